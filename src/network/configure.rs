//! Interface configurator pipeline
//!
//! A fixed, ordered table of steps applied to a device that was just placed in
//! its sandbox. The order matters: the device is renamed before anything refers
//! to it by its sandbox name, and addresses are checked against the routing
//! table before they are programmed. Every step is a no-op when the interface
//! carries nothing for it.

use crate::error::{Error, Result};
use crate::network::check_route_conflict;
use crate::network::{AddrFlags, Address, Interface, Ipv6Control, Link, LinkHandle};
use ipnet::IpNet;
use std::path::Path;

/// Collaborators the steps need besides the device itself
pub(crate) struct ConfigureContext<'a> {
    pub handle: &'a dyn LinkHandle,
    pub ipv6: &'a dyn Ipv6Control,
    /// Namespace path, empty for the default namespace
    pub netns: &'a Path,
}

type StepFn = fn(&ConfigureContext<'_>, &mut Link, &Interface) -> Result<()>;
type DescribeFn = fn(&str, &Interface) -> String;

struct Step {
    apply: StepFn,
    describe: DescribeFn,
}

const STEPS: [Step; 6] = [
    Step {
        apply: set_interface_name,
        describe: |name, i| format!("error renaming interface \"{}\" to \"{}\"", name, i.dst_name()),
    },
    Step {
        apply: set_interface_mac,
        describe: |name, i| {
            format!(
                "error setting interface \"{}\" MAC to \"{}\"",
                name,
                i.mac_address().map(|m| m.to_string()).unwrap_or_default()
            )
        },
    },
    Step {
        apply: set_interface_ip,
        describe: |name, i| format!("error setting interface \"{}\" IP to {:?}", name, i.address()),
    },
    Step {
        apply: set_interface_ipv6,
        describe: |name, i| {
            format!("error setting interface \"{}\" IPv6 to {:?}", name, i.address_ipv6())
        },
    },
    Step {
        apply: set_interface_master,
        describe: |name, i| {
            format!(
                "error setting interface \"{}\" master to \"{}\"",
                name,
                i.dst_master().unwrap_or_default()
            )
        },
    },
    Step {
        apply: set_interface_link_local_ips,
        describe: |name, i| {
            format!(
                "error setting interface \"{}\" link local IPs to {:?}",
                name,
                i.link_local_addresses()
            )
        },
    },
];

/// Run every step in order, stopping at the first failure
///
/// Nothing already applied is undone here; undoing placement is the caller's job.
pub(crate) fn configure_interface(
    ctx: &ConfigureContext<'_>,
    link: &mut Link,
    iface: &Interface,
) -> Result<()> {
    let name = link.name().to_string();

    for step in &STEPS {
        if let Err(e) = (step.apply)(ctx, link, iface) {
            return Err(Error::Configure {
                step: (step.describe)(&name, iface),
                source: Box::new(e),
            });
        }
    }

    Ok(())
}

pub(crate) fn set_interface_name(
    ctx: &ConfigureContext<'_>,
    link: &mut Link,
    iface: &Interface,
) -> Result<()> {
    ctx.handle.set_name(link, iface.dst_name())
}

pub(crate) fn set_interface_mac(
    ctx: &ConfigureContext<'_>,
    link: &mut Link,
    iface: &Interface,
) -> Result<()> {
    match iface.mac_address() {
        Some(mac) => ctx.handle.set_hardware_addr(link, mac),
        None => Ok(()),
    }
}

pub(crate) fn set_interface_ip(
    ctx: &ConfigureContext<'_>,
    link: &mut Link,
    iface: &Interface,
) -> Result<()> {
    let Some(address) = iface.address() else {
        return Ok(());
    };
    let net = IpNet::V4(address);

    check_route_conflict(ctx.handle, &net)?;
    ctx.handle.add_address(link, &Address::new(net))
}

pub(crate) fn set_interface_ipv6(
    ctx: &ConfigureContext<'_>,
    link: &mut Link,
    iface: &Interface,
) -> Result<()> {
    let Some(address) = iface.address_ipv6() else {
        return Ok(());
    };
    let net = IpNet::V6(address);

    check_route_conflict(ctx.handle, &net)?;
    ctx.ipv6
        .set_ipv6(ctx.netns, iface.dst_name(), true)
        .map_err(|e| Error::Kernel {
            action: "failed to enable ipv6".to_string(),
            source: Box::new(e),
        })?;

    // Duplicate address detection is pointless for addresses we assigned
    // ourselves inside an isolated namespace.
    ctx.handle
        .add_address(link, &Address::new(net).with_flags(AddrFlags::NODAD))
}

pub(crate) fn set_interface_master(
    ctx: &ConfigureContext<'_>,
    link: &mut Link,
    iface: &Interface,
) -> Result<()> {
    match iface.dst_master() {
        Some(master) => ctx.handle.set_master(link, master),
        None => Ok(()),
    }
}

pub(crate) fn set_interface_link_local_ips(
    ctx: &ConfigureContext<'_>,
    link: &mut Link,
    iface: &Interface,
) -> Result<()> {
    for net in iface.link_local_addresses() {
        ctx.handle.add_address(link, &Address::new(net))?;
    }
    Ok(())
}
