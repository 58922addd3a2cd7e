//! iproute2 backed kernel handle
//!
//! Drives `ip(8)` with JSON output, optionally inside another network
//! namespace, replacing hand-built netlink messages.

use crate::error::{Error, Result};
use crate::network::{
    Address, AddrFlags, Family, InterfaceStatistics, Link, LinkHandle, MacAddr, NetnsHandle,
    Route, RouteScope, inherit_fd, netns_command,
};
use ipnet::IpNet;
use serde::Deserialize;
use std::net::IpAddr;
use std::process::Command;

/// `LinkHandle` that runs `ip` in a fixed network namespace
#[derive(Debug)]
pub struct IpRoute {
    netns: Option<NetnsHandle>,
}

impl IpRoute {
    /// Handle for the namespace of the calling process
    pub fn current() -> Self {
        Self { netns: None }
    }

    /// Handle whose commands join `netns` before executing
    pub fn in_netns(netns: NetnsHandle) -> Self {
        Self { netns: Some(netns) }
    }

    fn command(&self) -> Command {
        netns_command("ip", self.netns.as_ref())
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        Self::run_with(self.command(), args)
    }

    fn run_with(mut cmd: Command, args: &[&str]) -> Result<Vec<u8>> {
        let command = format!("ip {}", args.join(" "));
        let output = cmd
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::CommandFailed {
                command,
                message: stderr.trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

impl LinkHandle for IpRoute {
    fn link_by_name(&self, name: &str) -> Result<Link> {
        let stdout = match self.run(&["-j", "-s", "link", "show", "dev", name]) {
            Ok(stdout) => stdout,
            Err(Error::CommandFailed { message, .. })
                if message.contains("does not exist") || message.contains("Cannot find device") =>
            {
                return Err(Error::InterfaceNotFound(name.to_string()));
            }
            Err(e) => return Err(e),
        };

        parse_links(&stdout)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))
    }

    fn add_bridge(&self, name: &str) -> Result<()> {
        self.run(&["link", "add", "name", name, "type", "bridge"])?;
        Ok(())
    }

    fn delete_link(&self, link: &Link) -> Result<()> {
        self.run(&["link", "del", "dev", link.name()])?;
        Ok(())
    }

    fn set_up(&self, link: &Link) -> Result<()> {
        self.run(&["link", "set", "dev", link.name(), "up"])?;
        Ok(())
    }

    fn set_down(&self, link: &Link) -> Result<()> {
        self.run(&["link", "set", "dev", link.name(), "down"])?;
        Ok(())
    }

    fn set_name(&self, link: &mut Link, name: &str) -> Result<()> {
        self.run(&["link", "set", "dev", link.name(), "name", name])?;
        link.set_name(name);
        Ok(())
    }

    fn set_hardware_addr(&self, link: &Link, mac: MacAddr) -> Result<()> {
        let mac = mac.to_string();
        self.run(&["link", "set", "dev", link.name(), "address", mac.as_str()])?;
        Ok(())
    }

    fn set_master(&self, link: &Link, master: &str) -> Result<()> {
        self.run(&["link", "set", "dev", link.name(), "master", master])?;
        Ok(())
    }

    fn add_address(&self, link: &Link, addr: &Address) -> Result<()> {
        let net = addr.net.to_string();
        let mut args = vec!["addr", "add", net.as_str(), "dev", link.name()];
        if addr.flags.contains(AddrFlags::NODAD) {
            args.push("nodad");
        }
        self.run(&args)?;
        Ok(())
    }

    fn add_route(&self, link: &Link, dst: &IpNet, scope: RouteScope) -> Result<()> {
        let dst = dst.to_string();
        let scope = scope.to_string();
        self.run(&["route", "add", dst.as_str(), "dev", link.name(), "scope", scope.as_str()])?;
        Ok(())
    }

    fn routes(&self, family: Family) -> Result<Vec<Route>> {
        let flag = match family {
            Family::V4 => "-4",
            Family::V6 => "-6",
        };
        let stdout = self.run(&["-j", flag, "route", "show"])?;
        parse_routes(&stdout, family)
    }

    fn set_netns(&self, link: &Link, netns: &NetnsHandle) -> Result<()> {
        // iproute2 opens arguments containing '/' as namespace files, so the
        // open descriptor is handed over as /proc/self/fd/N
        let mut cmd = self.command();
        let target = match netns.fd() {
            Some(fd) => inherit_fd(&mut cmd, fd),
            None => netns.path().to_string_lossy().into_owned(),
        };
        Self::run_with(cmd, &["link", "set", "dev", link.name(), "netns", target.as_str()])?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct IpLink {
    ifindex: u32,
    ifname: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    stats64: Option<IpStats>,
}

#[derive(Debug, Deserialize)]
struct IpStats {
    rx: IpCounters,
    tx: IpCounters,
}

#[derive(Debug, Deserialize)]
struct IpCounters {
    bytes: u64,
    packets: u64,
    dropped: u64,
}

#[derive(Debug, Deserialize)]
struct IpRouteEntry {
    dst: String,
    #[serde(default)]
    dev: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Decode `ip -j -s link show` output
fn parse_links(json: &[u8]) -> Result<Vec<Link>> {
    let links: Vec<IpLink> = serde_json::from_slice(json)?;

    Ok(links
        .into_iter()
        .map(|l| {
            let mut link = Link::new(l.ifindex, l.ifname);
            // Non-Ethernet links report other address formats
            if let Some(mac) = l.address.and_then(|a| a.parse::<MacAddr>().ok()) {
                link = link.with_hardware_addr(mac);
            }
            if let Some(stats) = l.stats64 {
                link = link.with_statistics(InterfaceStatistics {
                    rx_bytes: stats.rx.bytes,
                    tx_bytes: stats.tx.bytes,
                    rx_packets: stats.rx.packets,
                    tx_packets: stats.tx.packets,
                    rx_dropped: stats.rx.dropped,
                    tx_dropped: stats.tx.dropped,
                });
            }
            link
        })
        .collect())
}

/// Decode `ip -j route show` output
fn parse_routes(json: &[u8], family: Family) -> Result<Vec<Route>> {
    let entries: Vec<IpRouteEntry> = serde_json::from_slice(json)?;

    entries
        .into_iter()
        .map(|e| {
            let dst = parse_route_dst(&e.dst, family)?;
            let scope = match e.scope.as_deref() {
                Some("link") => RouteScope::Link,
                Some("host") => RouteScope::Host,
                _ => RouteScope::Universe,
            };
            Ok(Route {
                dst,
                dev: e.dev,
                scope,
            })
        })
        .collect()
}

/// `default` has no destination, a bare address is a host route
fn parse_route_dst(dst: &str, family: Family) -> Result<Option<IpNet>> {
    if dst == "default" {
        return Ok(None);
    }

    if let Ok(net) = dst.parse::<IpNet>() {
        return Ok(Some(net));
    }

    let addr: IpAddr = dst.parse().map_err(|_| Error::CommandFailed {
        command: format!("ip -j route show ({})", family),
        message: format!("unexpected route destination '{}'", dst),
    })?;
    let prefix = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    IpNet::new(addr, prefix)
        .map(Some)
        .map_err(|e| Error::CommandFailed {
            command: format!("ip -j route show ({})", family),
            message: e.to_string(),
        })
}
