//! Sandbox interface registry
//!
//! A `Sandbox` owns the interfaces placed in one network namespace. It hands
//! out destination names, moves devices in and out of the namespace, drives the
//! configurator pipeline and keeps the registry in step with the kernel.
//!
//! Bookkeeping lives behind a single mutex that is never held across a kernel
//! call: state is read under the lock, the lock is released for the syscalls,
//! and re-taken only for the final registry update. Loopback IPv6 state has a
//! lock of its own that does span its toggle.

use crate::error::{Error, Result, ResultExt};
use crate::network::configure::{ConfigureContext, configure_interface};
use crate::network::lifecycle::Attachment;
use crate::network::{
    IfaceOption, Interface, InterfaceStatistics, IpRoute, Ipv6Control, Link, LinkHandle,
    NamespaceResolver, NetnsHandle, NetnsSysctl, ProcResolver, RouteScope,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Bounded retry for bringing a link up
///
/// Setting a freshly moved link up occasionally races with the kernel; the
/// call is repeated a fixed number of times with a constant pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkUpRetry {
    /// Attempts after the first one
    pub retries: u32,
    pub delay: Duration,
}

impl Default for LinkUpRetry {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Default)]
struct SandboxState {
    interfaces: Vec<Arc<Interface>>,
    next_if_index: HashMap<String, u32>,
}

/// The interfaces of one network namespace
pub struct Sandbox {
    /// Namespace path, empty for the default namespace
    path: PathBuf,
    is_default: bool,
    /// Handle inside the sandbox namespace
    handle: Arc<dyn LinkHandle>,
    /// Handle in the caller's namespace, where devices come from
    host: Arc<dyn LinkHandle>,
    resolver: Arc<dyn NamespaceResolver>,
    ipv6: Arc<dyn Ipv6Control>,
    retry: LinkUpRetry,
    state: Mutex<SandboxState>,
    /// Whether loopback IPv6 is on; held for a whole reconciliation
    lo_v6_enabled: Mutex<bool>,
}

impl Sandbox {
    /// Build a sandbox over explicit collaborators
    ///
    /// An empty `path` selects default namespace semantics: devices keep their
    /// names and are never moved.
    pub fn new(
        path: impl Into<PathBuf>,
        handle: Arc<dyn LinkHandle>,
        host: Arc<dyn LinkHandle>,
    ) -> Self {
        let path = path.into();
        Self {
            is_default: path.as_os_str().is_empty(),
            path,
            handle,
            host,
            resolver: Arc::new(ProcResolver),
            ipv6: Arc::new(NetnsSysctl),
            retry: LinkUpRetry::default(),
            state: Mutex::new(SandboxState::default()),
            lo_v6_enabled: Mutex::new(false),
        }
    }

    /// Sandbox for the namespace file at `path`, driven through iproute2
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let netns = NetnsHandle::open(path)?;
        tracing::debug!(netns = %path.display(), "opened sandbox namespace");

        Ok(Self::new(
            path,
            Arc::new(IpRoute::in_netns(netns)),
            Arc::new(IpRoute::current()),
        ))
    }

    /// Sandbox over the caller's own namespace
    pub fn host() -> Self {
        let handle: Arc<dyn LinkHandle> = Arc::new(IpRoute::current());
        Self::new(PathBuf::new(), handle.clone(), handle)
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn NamespaceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_ipv6(mut self, ipv6: Arc<dyn Ipv6Control>) -> Self {
        self.ipv6 = ipv6;
        self
    }

    pub fn with_retry(mut self, retry: LinkUpRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    fn state(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registered interfaces in registration order
    pub fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.state().interfaces.clone()
    }

    /// Destination name of the first registered interface with source name
    /// `src_name`, restricted to bridges when `want_bridge` is set
    pub fn find_dst(&self, src_name: &str, want_bridge: bool) -> Option<String> {
        self.state()
            .interfaces
            .iter()
            .find(|i| i.src_name() == src_name && (!want_bridge || i.is_bridge()))
            .map(|i| i.dst_name().to_string())
    }

    /// Pick the sandbox-side name for a device
    ///
    /// Outside the default namespace names are `prefix` followed by a counter
    /// that only ever grows, so a suffix is never handed out twice.
    fn allocate_name(state: &mut SandboxState, is_default: bool, prefix: &str, src_name: &str) -> String {
        if is_default {
            return src_name.to_string();
        }
        let next = state.next_if_index.entry(prefix.to_string()).or_insert(0);
        let name = format!("{}{}", prefix, next);
        *next += 1;
        name
    }

    /// Place a device in the sandbox, configure it and register it
    ///
    /// Bridges are created in place under `src_name`; any other device is taken
    /// from the caller's namespace. The returned record is already registered.
    pub fn add_interface<I>(
        self: &Arc<Self>,
        src_name: &str,
        dst_prefix: &str,
        options: I,
    ) -> Result<Arc<Interface>>
    where
        I: IntoIterator<Item = IfaceOption>,
    {
        let mut iface = Interface::new(src_name, Arc::downgrade(self));
        let mut prefix = dst_prefix.to_string();
        for option in options {
            if let Some(p) = iface.apply(option) {
                prefix = p;
            }
        }

        if let Some(master) = iface.master() {
            let dst_master = self
                .find_dst(master, true)
                .ok_or_else(|| Error::MasterNotFound {
                    master: master.to_string(),
                    interface: src_name.to_string(),
                })?;
            iface.set_dst_master(dst_master);
        }

        let dst_name = {
            let mut state = self.state();
            Self::allocate_name(&mut state, self.is_default, &prefix, src_name)
        };
        iface.set_dst_name(dst_name);

        let mut attachment = Attachment::new(src_name);
        if let Err(e) = self.place(&iface) {
            attachment.failed();
            tracing::debug!(interface = src_name, phase = %attachment.phase(), "placement failed");
            return Err(e);
        }
        attachment.placed();

        let mut link = self
            .handle
            .link_by_name(src_name)
            .with_action(|| format!("failed to get link by name \"{}\"", src_name))?;
        self.handle
            .set_down(&link)
            .with_action(|| "failed to set link down".to_string())?;

        let ctx = ConfigureContext {
            handle: self.handle.as_ref(),
            ipv6: self.ipv6.as_ref(),
            netns: &self.path,
        };
        if let Err(e) = configure_interface(&ctx, &mut link, &iface) {
            self.roll_back_placement(&mut link, &iface, &e);
            attachment.rolled_back();
            tracing::debug!(interface = src_name, phase = %attachment.phase(), "configuration failed");
            return Err(e);
        }
        attachment.configured();

        if let Err(e) = self.link_up(&link) {
            attachment.failed();
            tracing::debug!(interface = src_name, phase = %attachment.phase(), "activation failed");
            return Err(e);
        }
        attachment.activated();

        // Routes can only be installed once the link is up
        for route in iface.routes() {
            self.handle
                .add_route(&link, &route, RouteScope::Link)
                .with_action(|| {
                    format!(
                        "error setting interface \"{}\" routes to {:?}",
                        link.name(),
                        iface.routes()
                    )
                })?;
        }

        let iface = Arc::new(iface);
        self.state().interfaces.push(iface.clone());
        attachment.registered();

        tracing::info!(
            interface = %iface.src_name(),
            dst = %iface.dst_name(),
            netns = %self.path.display(),
            "interface added"
        );

        self.check_lo_v6();

        Ok(iface)
    }

    /// Create the bridge, or move the host device into the namespace
    fn place(&self, iface: &Interface) -> Result<()> {
        let src_name = iface.src_name();

        if iface.is_bridge() {
            return self
                .handle
                .add_bridge(src_name)
                .with_action(|| format!("failed to create bridge \"{}\"", src_name));
        }

        let link = self
            .host
            .link_by_name(src_name)
            .with_action(|| format!("failed to get link by name \"{}\"", src_name))?;

        if !self.is_default {
            let netns = self
                .resolver
                .open(&self.path)
                .with_action(|| format!("failed get network namespace \"{}\"", self.path.display()))?;
            self.host
                .set_netns(&link, &netns)
                .with_action(|| format!("failed to set namespace on link \"{}\"", src_name))?;
        }

        Ok(())
    }

    /// Best-effort undo of placement after a configuration failure
    ///
    /// Every step is attempted; failures are logged and never replace `cause`.
    fn roll_back_placement(&self, link: &mut Link, iface: &Interface, cause: &Error) {
        if let Err(e) = self.handle.set_name(link, iface.src_name()) {
            tracing::error!(
                interface = %iface.src_name(),
                "renaming interface ({}->{}) failed, {} after config error {}",
                iface.dst_name(),
                iface.src_name(),
                e,
                cause
            );
        }

        if self.is_default {
            return;
        }

        let moved = self
            .resolver
            .caller()
            .and_then(|caller| self.handle.set_netns(link, &caller));
        if let Err(e) = moved {
            tracing::error!(
                interface = %iface.src_name(),
                "moving interface {} to host ns failed, {}, after config error {}",
                iface.src_name(),
                e,
                cause
            );
        }
    }

    fn link_up(&self, link: &Link) -> Result<()> {
        let mut result = self.handle.set_up(link);
        let mut attempts = 1;

        while let Err(e) = &result {
            if attempts > self.retry.retries {
                break;
            }
            tracing::debug!(interface = %link.name(), attempt = attempts, "retrying link setup because of: {}", e);
            thread::sleep(self.retry.delay);
            result = self.handle.set_up(link);
            attempts += 1;
        }

        result.map_err(|e| Error::LinkUp {
            name: link.name().to_string(),
            attempts,
            source: Box::new(e),
        })
    }

    /// Detach `iface` from the sandbox
    pub(crate) fn remove_interface(&self, iface: &Arc<Interface>) -> Result<()> {
        let mut link = self
            .handle
            .link_by_name(iface.dst_name())
            .with_action(|| format!("failed to get link by name \"{}\"", iface.dst_name()))?;

        self.handle
            .set_down(&link)
            .with_action(|| format!("failed to set link \"{}\" down", iface.dst_name()))?;

        if let Err(e) = self.handle.set_name(&mut link, iface.src_name()) {
            tracing::debug!(interface = %iface.src_name(), "set name failed: {}", e);
            return Err(e).with_action(|| {
                format!("failed renaming \"{}\" to \"{}\"", iface.dst_name(), iface.src_name())
            });
        }

        if iface.is_bridge() {
            self.handle
                .delete_link(&link)
                .with_action(|| format!("failed deleting bridge \"{}\"", iface.src_name()))?;
        } else if !self.is_default {
            let caller = self.resolver.caller()?;
            if let Err(e) = self.handle.set_netns(&link, &caller) {
                tracing::debug!(interface = %iface.src_name(), "set netns failed: {}", e);
                return Err(e).with_action(|| {
                    format!("failed to move \"{}\" to the caller namespace", iface.src_name())
                });
            }
        }

        self.state().interfaces.retain(|i| !Arc::ptr_eq(i, iface));

        tracing::info!(
            interface = %iface.src_name(),
            netns = %self.path.display(),
            "interface removed"
        );

        self.check_lo_v6();

        Ok(())
    }

    /// Kernel counters of the device named `dst_name` inside the sandbox
    pub fn link_statistics(&self, dst_name: &str) -> Result<InterfaceStatistics> {
        let link = self.handle.link_by_name(dst_name).with_action(|| {
            format!(
                "failed to retrieve the statistics for {} in netns {}",
                dst_name,
                self.path.display()
            )
        })?;

        link.statistics()
            .ok_or_else(|| Error::StatisticsUnavailable(dst_name.to_string()))
    }

    /// Keep IPv6 on the loopback device enabled exactly while some registered
    /// interface carries an IPv6 address
    ///
    /// Reconciliations are serialized on their own lock so the registry is read
    /// after any toggle still in flight has been recorded. The registry lock is
    /// only taken for the read.
    fn check_lo_v6(&self) {
        let mut lo_enabled = self
            .lo_v6_enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let enable = self
            .state()
            .interfaces
            .iter()
            .any(|i| i.address_ipv6().is_some());
        if enable == *lo_enabled {
            return;
        }

        if let Err(e) = self.ipv6.set_ipv6(&self.path, "lo", enable) {
            tracing::warn!(
                netns = %self.path.display(),
                "failed to {} IPv6 on loopback interface: {}",
                if enable { "enable" } else { "disable" },
                e
            );
        }
        *lo_enabled = enable;
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("path", &self.path)
            .field("is_default", &self.is_default)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
