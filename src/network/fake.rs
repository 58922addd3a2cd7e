//! In-memory kernel used by unit tests
//!
//! Models several network namespaces with their links and routes, records every
//! call made through the handles, and injects failures on demand.

use crate::error::{Error, Result};
use crate::network::{
    Address, Family, InterfaceStatistics, Ipv6Control, Link, LinkHandle, MacAddr,
    NamespaceResolver, NetnsHandle, Route, RouteScope,
};
use ipnet::IpNet;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub(crate) struct FakeLink {
    pub index: u32,
    pub name: String,
    pub bridge: bool,
    pub up: bool,
    pub mac: Option<MacAddr>,
    pub master: Option<String>,
    pub addresses: Vec<Address>,
    pub statistics: Option<InterfaceStatistics>,
}

#[derive(Debug, Default)]
struct Namespace {
    links: Vec<FakeLink>,
    routes: Vec<(Family, Route)>,
}

#[derive(Debug, Default)]
struct World {
    next_index: u32,
    namespaces: HashMap<String, Namespace>,
    calls: Vec<String>,
    /// Remaining injected failures per operation, `None` fails forever
    failures: HashMap<&'static str, Option<u32>>,
    up_attempts: Vec<Instant>,
    ipv6_toggles: Vec<(String, String, bool)>,
}

impl World {
    fn enter(&mut self, op: &'static str, call: String) -> Result<()> {
        self.calls.push(call);
        match self.failures.get_mut(op) {
            Some(None) => Err(injected(op)),
            Some(Some(n)) if *n > 0 => {
                *n -= 1;
                Err(injected(op))
            }
            _ => Ok(()),
        }
    }

    fn ns(&mut self, path: &str) -> Result<&mut Namespace> {
        self.namespaces.get_mut(path).ok_or_else(|| Error::NamespaceOpen {
            path: path.into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
    }

    fn link_mut(&mut self, path: &str, index: u32) -> Result<&mut FakeLink> {
        self.ns(path)?
            .links
            .iter_mut()
            .find(|l| l.index == index)
            .ok_or_else(|| Error::InterfaceNotFound(format!("index {}", index)))
    }
}

fn injected(op: &str) -> Error {
    Error::CommandFailed {
        command: op.to_string(),
        message: "injected failure".to_string(),
    }
}

/// Shared fake kernel; clones observe the same state
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeKernel {
    world: Arc<Mutex<World>>,
}

impl FakeKernel {
    pub const HOST: &'static str = "/proc/1/task/1/ns/net";
    pub const SANDBOX: &'static str = "/var/run/netns/sbx";

    /// A kernel with the host and sandbox namespaces present
    pub fn new() -> Self {
        let kernel = Self::default();
        {
            let mut world = kernel.world();
            world.next_index = 2;
            world.namespaces.insert(Self::HOST.to_string(), Namespace::default());
            world.namespaces.insert(Self::SANDBOX.to_string(), Namespace::default());
        }
        kernel
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }

    pub fn handle(&self, ns: &str) -> FakeHandle {
        FakeHandle {
            kernel: self.clone(),
            ns: ns.to_string(),
        }
    }

    pub fn resolver(&self) -> FakeResolver {
        FakeResolver {
            kernel: self.clone(),
        }
    }

    pub fn ipv6(&self) -> FakeIpv6 {
        FakeIpv6 {
            kernel: self.clone(),
        }
    }

    pub fn add_link(&self, ns: &str, name: &str) -> u32 {
        let mut world = self.world();
        let index = world.next_index;
        world.next_index += 1;
        world.ns(ns).unwrap().links.push(FakeLink {
            index,
            name: name.to_string(),
            bridge: false,
            up: false,
            mac: None,
            master: None,
            addresses: Vec::new(),
            statistics: None,
        });
        index
    }

    pub fn set_statistics(&self, ns: &str, name: &str, stats: InterfaceStatistics) {
        let mut world = self.world();
        let link = world
            .ns(ns)
            .unwrap()
            .links
            .iter_mut()
            .find(|l| l.name == name)
            .unwrap();
        link.statistics = Some(stats);
    }

    pub fn add_route_entry(&self, ns: &str, dst: IpNet, dev: &str) {
        let mut world = self.world();
        world.ns(ns).unwrap().routes.push((
            Family::of(&dst),
            Route {
                dst: Some(dst),
                dev: Some(dev.to_string()),
                scope: RouteScope::Link,
            },
        ));
    }

    pub fn add_default_route(&self, ns: &str, dev: &str) {
        let mut world = self.world();
        world.ns(ns).unwrap().routes.push((
            Family::V4,
            Route {
                dst: None,
                dev: Some(dev.to_string()),
                scope: RouteScope::Universe,
            },
        ));
    }

    /// Fail the next `times` calls of `op`
    pub fn fail(&self, op: &'static str, times: u32) {
        self.world().failures.insert(op, Some(times));
    }

    pub fn fail_always(&self, op: &'static str) {
        self.world().failures.insert(op, None);
    }

    pub fn link(&self, ns: &str, name: &str) -> Option<FakeLink> {
        let world = self.world();
        world
            .namespaces
            .get(ns)?
            .links
            .iter()
            .find(|l| l.name == name)
            .cloned()
    }

    pub fn routes_in(&self, ns: &str) -> Vec<Route> {
        let world = self.world();
        world
            .namespaces
            .get(ns)
            .map(|n| n.routes.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.world().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.world()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn up_attempts(&self) -> Vec<Instant> {
        self.world().up_attempts.clone()
    }

    pub fn ipv6_toggles(&self) -> Vec<(String, String, bool)> {
        self.world().ipv6_toggles.clone()
    }
}

/// `LinkHandle` bound to one fake namespace
#[derive(Debug, Clone)]
pub(crate) struct FakeHandle {
    kernel: FakeKernel,
    ns: String,
}

impl LinkHandle for FakeHandle {
    fn link_by_name(&self, name: &str) -> Result<Link> {
        let mut world = self.kernel.world();
        world.enter("link_by_name", format!("link_by_name {} {}", self.ns, name))?;
        let link = world
            .ns(&self.ns)?
            .links
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))?;

        let mut found = Link::new(link.index, link.name.clone());
        if let Some(mac) = link.mac {
            found = found.with_hardware_addr(mac);
        }
        if let Some(stats) = link.statistics {
            found = found.with_statistics(stats);
        }
        Ok(found)
    }

    fn add_bridge(&self, name: &str) -> Result<()> {
        let mut world = self.kernel.world();
        world.enter("add_bridge", format!("add_bridge {} {}", self.ns, name))?;
        let index = world.next_index;
        world.next_index += 1;
        let ns = world.ns(&self.ns)?;
        if ns.links.iter().any(|l| l.name == name) {
            return Err(injected("add_bridge: exists"));
        }
        ns.links.push(FakeLink {
            index,
            name: name.to_string(),
            bridge: true,
            up: false,
            mac: None,
            master: None,
            addresses: Vec::new(),
            statistics: None,
        });
        Ok(())
    }

    fn delete_link(&self, link: &Link) -> Result<()> {
        let mut world = self.kernel.world();
        world.enter("delete_link", format!("delete_link {}", link.name()))?;
        let ns = world.ns(&self.ns)?;
        ns.links.retain(|l| l.index != link.index());
        Ok(())
    }

    fn set_up(&self, link: &Link) -> Result<()> {
        let mut world = self.kernel.world();
        world.up_attempts.push(Instant::now());
        world.enter("set_up", format!("set_up {}", link.name()))?;
        world.link_mut(&self.ns, link.index())?.up = true;
        Ok(())
    }

    fn set_down(&self, link: &Link) -> Result<()> {
        let mut world = self.kernel.world();
        world.enter("set_down", format!("set_down {}", link.name()))?;
        world.link_mut(&self.ns, link.index())?.up = false;
        Ok(())
    }

    fn set_name(&self, link: &mut Link, name: &str) -> Result<()> {
        let mut world = self.kernel.world();
        world.enter("set_name", format!("set_name {} -> {}", link.name(), name))?;
        let ns = world.ns(&self.ns)?;
        if ns
            .links
            .iter()
            .any(|l| l.name == name && l.index != link.index())
        {
            return Err(injected("set_name: exists"));
        }
        world.link_mut(&self.ns, link.index())?.name = name.to_string();
        link.set_name(name);
        Ok(())
    }

    fn set_hardware_addr(&self, link: &Link, mac: MacAddr) -> Result<()> {
        let mut world = self.kernel.world();
        world.enter("set_hardware_addr", format!("set_hardware_addr {} {}", link.name(), mac))?;
        world.link_mut(&self.ns, link.index())?.mac = Some(mac);
        Ok(())
    }

    fn set_master(&self, link: &Link, master: &str) -> Result<()> {
        let mut world = self.kernel.world();
        world.enter("set_master", format!("set_master {} {}", link.name(), master))?;
        let is_bridge = world
            .ns(&self.ns)?
            .links
            .iter()
            .any(|l| l.name == master && l.bridge);
        if !is_bridge {
            return Err(Error::InterfaceNotFound(master.to_string()));
        }
        world.link_mut(&self.ns, link.index())?.master = Some(master.to_string());
        Ok(())
    }

    fn add_address(&self, link: &Link, addr: &Address) -> Result<()> {
        let mut world = self.kernel.world();
        world.enter("add_address", format!("add_address {} {}", link.name(), addr.net))?;
        world.link_mut(&self.ns, link.index())?.addresses.push(*addr);
        Ok(())
    }

    fn add_route(&self, link: &Link, dst: &IpNet, scope: RouteScope) -> Result<()> {
        let mut world = self.kernel.world();
        world.enter("add_route", format!("add_route {} {}", link.name(), dst))?;
        world.ns(&self.ns)?.routes.push((
            Family::of(dst),
            Route {
                dst: Some(*dst),
                dev: Some(link.name().to_string()),
                scope,
            },
        ));
        Ok(())
    }

    fn routes(&self, family: Family) -> Result<Vec<Route>> {
        let mut world = self.kernel.world();
        world.enter("routes", format!("routes {} {}", self.ns, family))?;
        Ok(world
            .ns(&self.ns)?
            .routes
            .iter()
            .filter(|(f, _)| *f == family)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn set_netns(&self, link: &Link, netns: &NetnsHandle) -> Result<()> {
        let target = netns.path().to_string_lossy().to_string();
        let mut world = self.kernel.world();
        world.enter("set_netns", format!("set_netns {} {}", link.name(), target))?;
        world.ns(&target)?;
        let ns = world.ns(&self.ns)?;
        let pos = ns
            .links
            .iter()
            .position(|l| l.index == link.index())
            .ok_or_else(|| Error::InterfaceNotFound(link.name().to_string()))?;
        let moved = ns.links.remove(pos);
        world.ns(&target)?.links.push(moved);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeResolver {
    kernel: FakeKernel,
}

impl NamespaceResolver for FakeResolver {
    fn open(&self, path: &Path) -> Result<NetnsHandle> {
        let key = path.to_string_lossy().to_string();
        let mut world = self.kernel.world();
        world.enter("open_netns", format!("open_netns {}", key))?;
        world.ns(&key)?;
        Ok(NetnsHandle::detached(path))
    }

    fn caller(&self) -> Result<NetnsHandle> {
        let mut world = self.kernel.world();
        world.enter("caller_netns", "caller_netns".to_string())?;
        Ok(NetnsHandle::detached(FakeKernel::HOST))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeIpv6 {
    kernel: FakeKernel,
}

impl Ipv6Control for FakeIpv6 {
    fn set_ipv6(&self, netns: &Path, ifname: &str, enable: bool) -> Result<()> {
        let netns = netns.to_string_lossy().to_string();
        let mut world = self.kernel.world();
        world.enter("set_ipv6", format!("set_ipv6 {} {} {}", netns, ifname, enable))?;
        world.ipv6_toggles.push((netns, ifname.to_string(), enable));
        Ok(())
    }
}
