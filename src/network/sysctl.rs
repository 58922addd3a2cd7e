//! Per-namespace IPv6 enablement

use crate::error::{Error, Result};
use crate::network::{NetnsHandle, netns_command};
use std::path::Path;

/// Toggles IPv6 on a device inside a namespace
pub trait Ipv6Control: Send + Sync {
    /// Enable or disable IPv6 on `ifname` in the namespace at `netns`
    ///
    /// An empty path means the current namespace. Must be idempotent.
    fn set_ipv6(&self, netns: &Path, ifname: &str, enable: bool) -> Result<()>;
}

/// Flips `net.ipv6.conf.<dev>.disable_ipv6` with sysctl(8) run inside the namespace
#[derive(Debug, Default, Clone, Copy)]
pub struct NetnsSysctl;

impl NetnsSysctl {
    /// Slash separated key, so device names containing dots stay intact
    fn key(ifname: &str) -> String {
        format!("net/ipv6/conf/{}/disable_ipv6", ifname)
    }
}

impl Ipv6Control for NetnsSysctl {
    fn set_ipv6(&self, netns: &Path, ifname: &str, enable: bool) -> Result<()> {
        let handle = if netns.as_os_str().is_empty() {
            None
        } else {
            Some(NetnsHandle::open(netns)?)
        };

        let assignment = format!("{}={}", Self::key(ifname), if enable { 0 } else { 1 });
        let output = netns_command("sysctl", handle.as_ref())
            .args(["-q", "-w", assignment.as_str()])
            .output()
            .map_err(|e| Error::CommandFailed {
                command: format!("sysctl -w {}", assignment),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Without IPv6 support in the kernel the key does not exist, which
            // already satisfies a request to disable it.
            if !enable && (stderr.contains("cannot stat") || stderr.contains("No such file")) {
                tracing::debug!(interface = ifname, "IPv6 not available, nothing to disable");
                return Ok(());
            }
            return Err(Error::CommandFailed {
                command: format!("sysctl -w {}", assignment),
                message: stderr.trim().to_string(),
            });
        }

        tracing::debug!(
            interface = ifname,
            netns = %netns.display(),
            enable,
            "IPv6 toggled"
        );
        Ok(())
    }
}
