//! Configuration file parsing for Sandnet
//!
//! Parses `sandnet.toml` configuration files using serde

use crate::error::{Error, Result};
use crate::network::{IfaceOption, LinkUpRetry, MacAddr};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest interface name the kernel accepts (IFNAMSIZ - 1)
pub const MAX_IFNAME_LEN: usize = 15;

/// Load configuration from a file
pub fn load(path: &Path) -> Result<SandnetConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: SandnetConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Deserialize)]
pub struct SandnetConfig {
    #[serde(default)]
    pub sandbox: SandboxSection,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Interfaces, added in declaration order
    #[serde(default)]
    pub interfaces: Vec<InterfaceDef>,
}

impl SandnetConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut bridges = HashSet::new();
        let mut prefixes: HashMap<&str, usize> = HashMap::new();

        for iface in &self.interfaces {
            if iface.name.is_empty() {
                return Err(Error::ConfigValidation("Interface with empty name".into()));
            }
            if !names.insert(iface.name.as_str()) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate interface name: {}",
                    iface.name
                )));
            }
            if iface.name.len() > MAX_IFNAME_LEN {
                return Err(Error::ConfigValidation(format!(
                    "Interface name '{}' is longer than {} characters",
                    iface.name, MAX_IFNAME_LEN
                )));
            }
            if iface.prefix.is_empty() {
                return Err(Error::ConfigValidation(format!(
                    "Interface '{}' has an empty prefix",
                    iface.name
                )));
            }
            *prefixes.entry(iface.prefix.as_str()).or_insert(0) += 1;

            if let Some(master) = &iface.master {
                if iface.bridge {
                    return Err(Error::ConfigValidation(format!(
                        "Bridge '{}' cannot have a master",
                        iface.name
                    )));
                }
                if !bridges.contains(master.as_str()) {
                    return Err(Error::ConfigValidation(format!(
                        "Interface '{}' uses master '{}' which is not a bridge declared before it",
                        iface.name, master
                    )));
                }
            }

            if iface.bridge {
                bridges.insert(iface.name.as_str());
            }
        }

        // Sandbox names are prefix + counter, so the widest suffix handed out
        // is the count of interfaces sharing the prefix, minus one.
        // The default namespace keeps source names and ignores prefixes.
        if self.sandbox.netns.is_some() {
            for iface in &self.interfaces {
                let widest = prefixes[iface.prefix.as_str()] - 1;
                let longest = iface.prefix.len() + widest.to_string().len();
                if longest > MAX_IFNAME_LEN {
                    return Err(Error::ConfigValidation(format!(
                        "Prefix '{}' of interface '{}' would produce names of {} characters, the limit is {}",
                        iface.prefix, iface.name, longest, MAX_IFNAME_LEN
                    )));
                }
            }
        }

        Ok(())
    }

    /// Look up an interface definition by source name
    pub fn get_interface(&self, name: &str) -> Option<&InterfaceDef> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}

/// Target namespace settings
#[derive(Debug, Default, Deserialize)]
pub struct SandboxSection {
    /// Namespace file; absent means the caller's own namespace
    pub netns: Option<PathBuf>,
}

/// Link-up retry settings
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_link_up_retries")]
    pub link_up_retries: u32,

    #[serde(default = "default_link_up_delay_ms")]
    pub link_up_delay_ms: u64,
}

fn default_link_up_retries() -> u32 {
    3
}

fn default_link_up_delay_ms() -> u64 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            link_up_retries: default_link_up_retries(),
            link_up_delay_ms: default_link_up_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn link_up(&self) -> LinkUpRetry {
        LinkUpRetry {
            retries: self.link_up_retries,
            delay: Duration::from_millis(self.link_up_delay_ms),
        }
    }
}

/// One interface to place in the sandbox
#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceDef {
    /// Source device name (bridge name when `bridge` is set)
    pub name: String,

    /// Destination name prefix inside the sandbox
    #[serde(default = "default_prefix")]
    pub prefix: String,

    pub mac: Option<MacAddr>,

    pub address: Option<Ipv4Net>,

    pub address_ipv6: Option<Ipv6Net>,

    #[serde(default)]
    pub link_local: Vec<IpNet>,

    #[serde(default)]
    pub routes: Vec<IpNet>,

    /// Source name of a bridge declared earlier
    pub master: Option<String>,

    #[serde(default)]
    pub bridge: bool,
}

fn default_prefix() -> String {
    "eth".to_string()
}

impl InterfaceDef {
    /// Options for `Sandbox::add_interface`
    pub fn options(&self) -> Vec<IfaceOption> {
        let mut options = Vec::new();

        if let Some(mac) = self.mac {
            options.push(IfaceOption::Mac(mac));
        }
        if let Some(address) = self.address {
            options.push(IfaceOption::Address(address));
        }
        if let Some(address) = self.address_ipv6 {
            options.push(IfaceOption::AddressIpv6(address));
        }
        options.extend(self.link_local.iter().copied().map(IfaceOption::LinkLocalAddress));
        options.extend(self.routes.iter().copied().map(IfaceOption::Route));
        if let Some(master) = &self.master {
            options.push(IfaceOption::Master(master.clone()));
        }
        if self.bridge {
            options.push(IfaceOption::Bridge(true));
        }

        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[[interfaces]]
name = "veth0"
"#;

        let config: SandnetConfig = toml::from_str(toml).unwrap();
        assert!(config.sandbox.netns.is_none());
        assert_eq!(config.interfaces.len(), 1);
        assert_eq!(config.interfaces[0].prefix, "eth");
        assert_eq!(config.retry.link_up(), LinkUpRetry::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[sandbox]
netns = "/var/run/netns/web"

[retry]
link_up_retries = 5
link_up_delay_ms = 20

[[interfaces]]
name = "br0"
prefix = "br"
bridge = true

[[interfaces]]
name = "veth1a2b"
prefix = "eth"
mac = "02:42:ac:11:00:02"
address = "172.17.0.2/16"
address_ipv6 = "fd00::2/64"
link_local = ["169.254.10.2/16", "fe80::2/64"]
routes = ["10.10.0.0/16"]
master = "br0"
"#;

        let config: SandnetConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.sandbox.netns.as_deref(),
            Some(Path::new("/var/run/netns/web"))
        );

        let retry = config.retry.link_up();
        assert_eq!(retry.retries, 5);
        assert_eq!(retry.delay, Duration::from_millis(20));

        let veth = config.get_interface("veth1a2b").unwrap();
        let options = veth.options();
        assert_eq!(options.len(), 7);
        assert_eq!(options[0], IfaceOption::Mac("02:42:ac:11:00:02".parse().unwrap()));
        assert_eq!(options[6], IfaceOption::Master("br0".to_string()));

        let bridge = config.get_interface("br0").unwrap();
        assert_eq!(bridge.options(), vec![IfaceOption::Bridge(true)]);
    }

    #[test]
    fn test_invalid_mac_rejected() {
        let toml = r#"
[[interfaces]]
name = "veth0"
mac = "02:42:zz:11:00:02"
"#;

        assert!(toml::from_str::<SandnetConfig>(toml).is_err());
    }

    #[test]
    fn test_duplicate_name_error() {
        let toml = r#"
[[interfaces]]
name = "veth0"

[[interfaces]]
name = "veth0"
"#;

        let config: SandnetConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate interface name"));
    }

    #[test]
    fn test_long_name_error() {
        let toml = r#"
[[interfaces]]
name = "averyveryverylongname"
"#;

        let config: SandnetConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_prefix_error() {
        let toml = r#"
[[interfaces]]
name = "veth0"
prefix = ""
"#;

        let config: SandnetConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    fn shared_prefix_config(prefix: &str, count: usize) -> SandnetConfig {
        let mut toml = String::from("[sandbox]\nnetns = \"/var/run/netns/web\"\n");
        for n in 0..count {
            toml.push_str(&format!(
                "\n[[interfaces]]\nname = \"veth{}\"\nprefix = \"{}\"\n",
                n, prefix
            ));
        }
        toml::from_str(&toml).unwrap()
    }

    #[test]
    fn test_prefix_leaves_room_for_suffixes() {
        let prefix = "abcdefghijklmn";
        assert_eq!(prefix.len(), 14);

        // Suffixes 0..=9 fit in one digit
        assert!(shared_prefix_config(prefix, 10).validate().is_ok());

        // The eleventh interface would be named abcdefghijklmn10
        let err = shared_prefix_config(prefix, 11).validate().unwrap_err();
        assert!(err.to_string().contains("would produce names of 16 characters"));
    }

    #[test]
    fn test_full_length_prefix_rejected() {
        assert!(shared_prefix_config("abcdefghijklmno", 1).validate().is_err());
    }

    #[test]
    fn test_prefix_length_ignored_in_default_namespace() {
        let toml = r#"
[[interfaces]]
name = "veth0"
prefix = "abcdefghijklmnopqrst"
"#;

        let config: SandnetConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_master_must_be_earlier_bridge() {
        let toml = r#"
[[interfaces]]
name = "veth0"
master = "br0"

[[interfaces]]
name = "br0"
bridge = true
"#;

        let config: SandnetConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not a bridge declared before it"));
    }

    #[test]
    fn test_master_must_be_bridge() {
        let toml = r#"
[[interfaces]]
name = "veth0"

[[interfaces]]
name = "veth1"
master = "veth0"
"#;

        let config: SandnetConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bridge_with_master_error() {
        let toml = r#"
[[interfaces]]
name = "br0"
bridge = true

[[interfaces]]
name = "br1"
bridge = true
master = "br0"
"#;

        let config: SandnetConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cannot have a master"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/sandnet.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }
}
