//! Network interface management for namespace sandboxes
//!
//! Provides:
//! - Kernel link handle abstraction with an iproute2 backend
//! - Namespace handles and resolution
//! - Route conflict detection
//! - The interface configurator pipeline
//! - The `Sandbox` registry with add, remove and statistics

mod configure;
pub mod interface;
pub mod iproute;
pub mod lifecycle;
pub mod link;
pub mod mac;
pub mod netns;
pub mod route;
pub mod sandbox;
pub mod sysctl;

#[cfg(test)]
pub(crate) mod fake;

pub use interface::{IfaceOption, Interface};
pub use iproute::IpRoute;
pub use lifecycle::Attachment;
pub use link::{AddrFlags, Address, Family, InterfaceStatistics, Link, LinkHandle, Route, RouteScope};
pub use mac::MacAddr;
pub use netns::{NamespaceResolver, NetnsHandle, ProcResolver, inherit_fd, netns_command};
pub use route::check_route_conflict;
pub use sandbox::{LinkUpRetry, Sandbox};
pub use sysctl::{Ipv6Control, NetnsSysctl};
