//! Route conflict detection

use crate::error::{Error, Result};
use crate::network::{Family, LinkHandle};
use ipnet::IpNet;

/// Reject `address` when it overlaps a route already present in the namespace
///
/// Only routes of the address's own family are considered. A route conflicts
/// when its destination contains the address, or the address network contains
/// the route's destination. Default routes carry no destination and never
/// conflict.
pub fn check_route_conflict(handle: &dyn LinkHandle, address: &IpNet) -> Result<()> {
    let routes = handle.routes(Family::of(address))?;

    for route in routes {
        let Some(dst) = route.dst else {
            continue;
        };
        if dst.contains(&address.addr()) || address.contains(&dst.network()) {
            return Err(Error::RouteConflict {
                address: *address,
                route,
            });
        }
    }

    Ok(())
}
