//! Kernel device handle abstraction
//!
//! Provides:
//! - The `LinkHandle` trait every namespace-scoped kernel backend implements
//! - Value types exchanged with the backend (links, addresses, routes, counters)

use crate::error::Result;
use crate::network::{MacAddr, NetnsHandle};
use bitflags::bitflags;
use ipnet::IpNet;
use serde::Serialize;
use std::fmt;

bitflags! {
    /// Flags passed along with an address assignment (IFA_F_*)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AddrFlags: u32 {
        /// Skip duplicate address detection
        const NODAD = 0x02;
    }
}

/// Address family used when listing routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(net: &IpNet) -> Self {
        match net {
            IpNet::V4(_) => Family::V4,
            IpNet::V6(_) => Family::V6,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => write!(f, "inet"),
            Family::V6 => write!(f, "inet6"),
        }
    }
}

/// Route scope (RT_SCOPE_*)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteScope {
    Universe,
    Link,
    Host,
}

impl fmt::Display for RouteScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteScope::Universe => write!(f, "global"),
            RouteScope::Link => write!(f, "link"),
            RouteScope::Host => write!(f, "host"),
        }
    }
}

/// A route as listed from a namespace routing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network, `None` for the default route
    pub dst: Option<IpNet>,
    /// Output device name
    pub dev: Option<String>,
    pub scope: RouteScope,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dst {
            Some(dst) => write!(f, "{}", dst)?,
            None => write!(f, "default")?,
        }
        if let Some(dev) = &self.dev {
            write!(f, " dev {}", dev)?;
        }
        write!(f, " scope {}", self.scope)
    }
}

/// An address to assign to a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub net: IpNet,
    pub flags: AddrFlags,
}

impl Address {
    pub fn new(net: IpNet) -> Self {
        Self {
            net,
            flags: AddrFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: AddrFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Per-device traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceStatistics {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
}

impl fmt::Display for InterfaceStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RX bytes:{} packets:{} dropped:{}, TX bytes:{} packets:{} dropped:{}",
            self.rx_bytes,
            self.rx_packets,
            self.rx_dropped,
            self.tx_bytes,
            self.tx_packets,
            self.tx_dropped
        )
    }
}

/// A kernel network device as seen from one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    index: u32,
    name: String,
    hardware_addr: Option<MacAddr>,
    statistics: Option<InterfaceStatistics>,
}

impl Link {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            hardware_addr: None,
            statistics: None,
        }
    }

    pub fn with_hardware_addr(mut self, mac: MacAddr) -> Self {
        self.hardware_addr = Some(mac);
        self
    }

    pub fn with_statistics(mut self, stats: InterfaceStatistics) -> Self {
        self.statistics = Some(stats);
        self
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hardware_addr(&self) -> Option<MacAddr> {
        self.hardware_addr
    }

    pub fn statistics(&self) -> Option<InterfaceStatistics> {
        self.statistics
    }

    /// Record a successful rename; only backends should call this
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

/// Netlink-style operations against the devices of one network namespace
///
/// Every call blocks until the kernel answers. Implementations must be usable
/// from several threads at once.
pub trait LinkHandle: Send + Sync {
    /// Look up a device by name, including its current counters when available
    fn link_by_name(&self, name: &str) -> Result<Link>;

    /// Create a bridge device named `name`
    fn add_bridge(&self, name: &str) -> Result<()>;

    fn delete_link(&self, link: &Link) -> Result<()>;

    fn set_up(&self, link: &Link) -> Result<()>;

    fn set_down(&self, link: &Link) -> Result<()>;

    /// Rename the device and update `link` on success
    fn set_name(&self, link: &mut Link, name: &str) -> Result<()>;

    fn set_hardware_addr(&self, link: &Link, mac: MacAddr) -> Result<()>;

    /// Enslave the device to the bridge named `master`
    fn set_master(&self, link: &Link, master: &str) -> Result<()>;

    fn add_address(&self, link: &Link, addr: &Address) -> Result<()>;

    /// Add a gateway-less route through the device
    fn add_route(&self, link: &Link, dst: &IpNet, scope: RouteScope) -> Result<()>;

    /// List the main table routes of one family
    fn routes(&self, family: Family) -> Result<Vec<Route>>;

    /// Move the device into the namespace referenced by `netns`
    fn set_netns(&self, link: &Link, netns: &NetnsHandle) -> Result<()>;
}
