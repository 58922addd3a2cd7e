//! Managed interface records
//!
//! An `Interface` describes one device placed in a sandbox: its names on both
//! sides of the namespace boundary and the configuration applied to it. Values
//! handed out by the accessors are copies, so callers never hold references
//! into registered state.

use crate::error::{Error, Result};
use crate::network::{InterfaceStatistics, MacAddr, Sandbox};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::sync::{Arc, Weak};

/// Options accepted when adding an interface to a sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfaceOption {
    /// Replace the destination name prefix passed to `add_interface`
    Prefix(String),
    /// Hardware address to program
    Mac(MacAddr),
    /// Primary IPv4 network
    Address(Ipv4Net),
    /// Primary IPv6 network
    AddressIpv6(Ipv6Net),
    /// Append one link-local address
    LinkLocalAddress(IpNet),
    /// Append one destination route
    Route(IpNet),
    /// Source name of the bridge to enslave the device to
    Master(String),
    /// Create the device as a bridge instead of moving an existing one
    Bridge(bool),
}

/// A network device managed by a sandbox
#[derive(Debug)]
pub struct Interface {
    src_name: String,
    dst_name: String,
    master: Option<String>,
    dst_master: Option<String>,
    mac: Option<MacAddr>,
    address: Option<Ipv4Net>,
    address_ipv6: Option<Ipv6Net>,
    link_local: Vec<IpNet>,
    routes: Vec<IpNet>,
    bridge: bool,
    sandbox: Weak<Sandbox>,
}

impl Interface {
    /// An unregistered record; the destination name is filled in by the sandbox
    pub(crate) fn new(src_name: &str, sandbox: Weak<Sandbox>) -> Self {
        Self {
            src_name: src_name.to_string(),
            dst_name: String::new(),
            master: None,
            dst_master: None,
            mac: None,
            address: None,
            address_ipv6: None,
            link_local: Vec::new(),
            routes: Vec::new(),
            bridge: false,
            sandbox,
        }
    }

    /// Apply one option, returning a prefix override if the option carries one
    pub(crate) fn apply(&mut self, option: IfaceOption) -> Option<String> {
        match option {
            IfaceOption::Prefix(prefix) => return Some(prefix),
            IfaceOption::Mac(mac) => self.mac = Some(mac),
            IfaceOption::Address(net) => self.address = Some(net),
            IfaceOption::AddressIpv6(net) => self.address_ipv6 = Some(net),
            IfaceOption::LinkLocalAddress(net) => self.link_local.push(net),
            IfaceOption::Route(net) => self.routes.push(net),
            IfaceOption::Master(name) => self.master = Some(name),
            IfaceOption::Bridge(bridge) => self.bridge = bridge,
        }
        None
    }

    pub(crate) fn set_dst_name(&mut self, name: String) {
        self.dst_name = name;
    }

    pub(crate) fn set_dst_master(&mut self, name: String) {
        self.dst_master = Some(name);
    }

    /// Name of the device in its origin namespace
    pub fn src_name(&self) -> &str {
        &self.src_name
    }

    /// Name of the device inside the sandbox
    ///
    /// In the default namespace this is always the source name.
    pub fn dst_name(&self) -> &str {
        &self.dst_name
    }

    /// Source name of the master bridge, if any
    pub fn master(&self) -> Option<&str> {
        self.master.as_deref()
    }

    /// Sandbox-side name of the master bridge, resolved when the device was added
    pub fn dst_master(&self) -> Option<&str> {
        self.dst_master.as_deref()
    }

    pub fn is_bridge(&self) -> bool {
        self.bridge
    }

    pub fn mac_address(&self) -> Option<MacAddr> {
        self.mac
    }

    pub fn address(&self) -> Option<Ipv4Net> {
        self.address
    }

    pub fn address_ipv6(&self) -> Option<Ipv6Net> {
        self.address_ipv6
    }

    pub fn link_local_addresses(&self) -> Vec<IpNet> {
        self.link_local.clone()
    }

    pub fn routes(&self) -> Vec<IpNet> {
        self.routes.clone()
    }

    /// True when this record belongs to `sandbox`
    pub fn belongs_to(&self, sandbox: &Sandbox) -> bool {
        std::ptr::eq(self.sandbox.as_ptr(), sandbox)
    }

    fn sandbox(&self) -> Result<Arc<Sandbox>> {
        self.sandbox
            .upgrade()
            .ok_or_else(|| Error::SandboxGone(self.src_name.clone()))
    }

    /// Take the device out of its sandbox
    ///
    /// Bridges are deleted; other devices get their source name back and, outside
    /// the default namespace, return to the caller's namespace.
    pub fn remove(self: &Arc<Self>) -> Result<()> {
        self.sandbox()?.remove_interface(self)
    }

    /// Live kernel counters for the device
    pub fn statistics(&self) -> Result<InterfaceStatistics> {
        self.sandbox()?.link_statistics(&self.dst_name)
    }
}
