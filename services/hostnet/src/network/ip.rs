//! iproute2-backed device driver.
//!
//! Devices are managed through the `ip` binary:
//! - `ip tuntap add dev <name> mode <tun|tap> user <owner>`
//! - `ip addr add <local> peer <peer> dev <name>`
//! - `ip link set dev <name> up`
//! - `ip link delete dev <name>`
//!
//! Inspection parses `ip -json` output.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::{Command, Output};

use serde::Deserialize;
use tracing::{debug, info};

use super::driver::{DeviceMode, DeviceState, DriverError, NetworkDeviceDriver};

const IP_BINARY: &str = "ip";

/// Driver that shells out to iproute2.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpCommandDriver;

impl IpCommandDriver {
    /// Create a driver using `ip` from `PATH`.
    pub fn new() -> Self {
        Self
    }

    /// Execute `ip` and return its raw output.
    fn output(&self, args: &[&str]) -> Result<Output, DriverError> {
        debug!(command = %format!("ip {}", args.join(" ")), "Running ip");

        Command::new(IP_BINARY).args(args).output().map_err(|e| {
            let detail = format!("failed to execute {}: {}", IP_BINARY, e);
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                DriverError::PermissionDenied(detail)
            } else {
                DriverError::Failed(detail)
            }
        })
    }

    /// Run an `ip` command and return its stdout.
    fn run_ip(&self, args: &[&str]) -> Result<String, DriverError> {
        let output = self.output(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(args, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl NetworkDeviceDriver for IpCommandDriver {
    fn create(&self, name: &str, mode: DeviceMode, owner: &str) -> Result<(), DriverError> {
        info!(device = %name, mode = %mode, owner = %owner, "Creating device");
        self.run_ip(&["tuntap", "add", "dev", name, "mode", mode.as_str(), "user", owner])?;
        Ok(())
    }

    fn assign_addresses(
        &self,
        name: &str,
        local: Ipv4Addr,
        peer: Ipv4Addr,
    ) -> Result<(), DriverError> {
        let local = local.to_string();
        let peer = peer.to_string();
        self.run_ip(&["addr", "add", &local, "peer", &peer, "dev", name])?;
        Ok(())
    }

    fn set_up(&self, name: &str) -> Result<(), DriverError> {
        self.run_ip(&["link", "set", "dev", name, "up"])?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), DriverError> {
        info!(device = %name, "Deleting device");
        self.run_ip(&["link", "delete", "dev", name])?;
        Ok(())
    }

    fn inspect(&self, name: &str) -> Result<Option<DeviceState>, DriverError> {
        let args = ["-details", "-json", "link", "show", "dev", name];
        let output = self.output(&args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_device(&stderr) {
                return Ok(None);
            }
            return Err(classify_failure(&args, stderr.trim()));
        }

        let links = parse_links(&String::from_utf8_lossy(&output.stdout))?;
        let Some(link) = links.into_iter().find(|l| l.name == name) else {
            return Ok(None);
        };

        let addrs = parse_addresses(&self.run_ip(&["-json", "addr", "show", "dev", name])?)?;
        Ok(Some(link.into_state(&addrs)))
    }

    fn list(&self) -> Result<Vec<DeviceState>, DriverError> {
        let links = parse_links(&self.run_ip(&["-details", "-json", "link", "show"])?)?;
        let addrs = parse_addresses(&self.run_ip(&["-json", "addr", "show"])?)?;

        Ok(links
            .into_iter()
            .filter(|l| l.mode.is_some())
            .map(|l| l.into_state(&addrs))
            .collect())
    }
}

/// Map a failed `ip` invocation onto a driver error.
fn classify_failure(args: &[&str], stderr: &str) -> DriverError {
    let detail = format!("ip {} failed: {}", args.join(" "), stderr);
    if stderr.contains("Operation not permitted") || stderr.contains("Permission denied") {
        DriverError::PermissionDenied(detail)
    } else {
        DriverError::Failed(detail)
    }
}

fn is_missing_device(stderr: &str) -> bool {
    stderr.contains("does not exist") || stderr.contains("Cannot find device")
}

// ============================================================================
// `ip -json` output
// ============================================================================

#[derive(Debug, Deserialize)]
struct LinkJson {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    linkinfo: Option<LinkInfoJson>,
}

#[derive(Debug, Deserialize)]
struct LinkInfoJson {
    #[serde(default)]
    info_kind: Option<String>,
    #[serde(default)]
    info_data: Option<TunInfoJson>,
}

#[derive(Debug, Deserialize)]
struct TunInfoJson {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddrJson {
    ifname: String,
    #[serde(default)]
    addr_info: Vec<AddrInfoJson>,
}

#[derive(Debug, Deserialize)]
struct AddrInfoJson {
    family: String,
    #[serde(default)]
    local: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

/// Link as parsed from `ip -details -json link show`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedLink {
    name: String,
    mode: Option<DeviceMode>,
    up: bool,
}

/// IPv4 addresses of one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ParsedAddresses {
    local: Option<Ipv4Addr>,
    peer: Option<Ipv4Addr>,
    extra: Vec<Ipv4Addr>,
}

type AddressMap = HashMap<String, ParsedAddresses>;

impl ParsedLink {
    fn into_state(self, addrs: &AddressMap) -> DeviceState {
        let parsed = addrs.get(&self.name).cloned().unwrap_or_default();
        DeviceState {
            name: self.name,
            mode: self.mode,
            local: parsed.local,
            peer: parsed.peer,
            up: self.up,
            extra_addresses: parsed.extra,
        }
    }
}

fn parse_links(json: &str) -> Result<Vec<ParsedLink>, DriverError> {
    let links: Vec<LinkJson> = serde_json::from_str(json)
        .map_err(|e| DriverError::Failed(format!("unexpected ip link output: {}", e)))?;

    Ok(links
        .into_iter()
        .map(|link| {
            let mode = link.linkinfo.as_ref().and_then(|info| {
                if info.info_kind.as_deref() != Some("tun") {
                    return None;
                }
                match info.info_data.as_ref().and_then(|d| d.kind.as_deref()) {
                    Some("tap") => Some(DeviceMode::Tap),
                    _ => Some(DeviceMode::Tun),
                }
            });
            ParsedLink {
                up: link.flags.iter().any(|f| f == "UP"),
                name: link.ifname,
                mode,
            }
        })
        .collect())
}

fn parse_addresses(json: &str) -> Result<AddressMap, DriverError> {
    let ifaces: Vec<AddrJson> = serde_json::from_str(json)
        .map_err(|e| DriverError::Failed(format!("unexpected ip addr output: {}", e)))?;

    let mut map = AddressMap::new();
    for iface in ifaces {
        let mut inet = iface.addr_info.iter().filter(|a| a.family == "inet");
        let Some(first) = inet.next() else {
            continue;
        };
        let parsed = ParsedAddresses {
            local: first.local.as_deref().and_then(|s| s.parse().ok()),
            peer: first.address.as_deref().and_then(|s| s.parse().ok()),
            extra: inet
                .filter_map(|a| a.local.as_deref().and_then(|s| s.parse().ok()))
                .collect(),
        };
        map.insert(iface.ifname, parsed);
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINKS: &str = r#"[
        {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP","LOWER_UP"],"mtu":65536,
         "operstate":"UNKNOWN","linkinfo":null},
        {"ifindex":2,"ifname":"eth0","flags":["BROADCAST","MULTICAST","UP","LOWER_UP"],
         "mtu":1500,"operstate":"UP"},
        {"ifindex":7,"ifname":"tun-alice","flags":["POINTOPOINT","MULTICAST","NOARP","UP"],
         "mtu":1500,"operstate":"DOWN","linkinfo":{"info_kind":"tun","info_data":
         {"type":"tun","pi":false,"vnet_hdr":false,"multi_queue":false,"persist":true,"user":"alice"}}},
        {"ifindex":8,"ifname":"tap-bob","flags":["BROADCAST","MULTICAST"],"mtu":1500,
         "operstate":"DOWN","linkinfo":{"info_kind":"tun","info_data":
         {"type":"tap","pi":false,"vnet_hdr":false,"multi_queue":false,"persist":true}}},
        {"ifindex":9,"ifname":"br0","flags":["BROADCAST","UP"],"mtu":1500,
         "linkinfo":{"info_kind":"bridge","info_data":{"stp_state":0}}}
    ]"#;

    const ADDRS: &str = r#"[
        {"ifindex":1,"ifname":"lo","addr_info":[{"family":"inet","local":"127.0.0.1","prefixlen":8}]},
        {"ifindex":7,"ifname":"tun-alice","addr_info":[
            {"family":"inet","local":"192.168.22.1","address":"192.168.22.2","prefixlen":32},
            {"family":"inet6","local":"fe80::1","prefixlen":64}]},
        {"ifindex":8,"ifname":"tap-bob","addr_info":[]},
        {"ifindex":10,"ifname":"tun-carol","addr_info":[
            {"family":"inet","local":"192.168.22.1","address":"192.168.22.4","prefixlen":32},
            {"family":"inet","local":"10.77.0.1","prefixlen":24}]}
    ]"#;

    #[test]
    fn test_parse_links() {
        let links = parse_links(LINKS).unwrap();
        assert_eq!(links.len(), 5);

        let alice = links.iter().find(|l| l.name == "tun-alice").unwrap();
        assert_eq!(alice.mode, Some(DeviceMode::Tun));
        assert!(alice.up);

        let bob = links.iter().find(|l| l.name == "tap-bob").unwrap();
        assert_eq!(bob.mode, Some(DeviceMode::Tap));
        assert!(!bob.up);

        let br = links.iter().find(|l| l.name == "br0").unwrap();
        assert_eq!(br.mode, None);
    }

    #[test]
    fn test_parse_addresses() {
        let addrs = parse_addresses(ADDRS).unwrap();

        assert_eq!(
            addrs.get("tun-alice"),
            Some(&ParsedAddresses {
                local: Some(Ipv4Addr::new(192, 168, 22, 1)),
                peer: Some(Ipv4Addr::new(192, 168, 22, 2)),
                extra: vec![],
            })
        );
        assert_eq!(
            addrs.get("lo").map(|a| (a.local, a.peer)),
            Some((Some(Ipv4Addr::new(127, 0, 0, 1)), None))
        );
        assert_eq!(addrs.get("tap-bob"), None);
        assert_eq!(
            addrs.get("tun-carol").map(|a| a.extra.clone()),
            Some(vec![Ipv4Addr::new(10, 77, 0, 1)])
        );
    }

    #[test]
    fn test_link_into_state() {
        let addrs = parse_addresses(ADDRS).unwrap();
        let states: Vec<_> = parse_links(LINKS)
            .unwrap()
            .into_iter()
            .filter(|l| l.mode.is_some())
            .map(|l| l.into_state(&addrs))
            .collect();

        assert_eq!(states.len(), 2);
        assert_eq!(states[0].name, "tun-alice");
        assert_eq!(states[0].peer, Some(Ipv4Addr::new(192, 168, 22, 2)));
        assert_eq!(states[1].local, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_links("not json").is_err());
        assert!(parse_addresses("{}").is_err());
    }

    #[test]
    fn test_classify_failure() {
        let args = ["tuntap", "add", "dev", "tun-alice", "mode", "tun"];

        let err = classify_failure(&args, "ioctl(TUNSETIFF): Operation not permitted");
        assert!(matches!(err, DriverError::PermissionDenied(_)));

        let err = classify_failure(&args, "ioctl(TUNSETIFF): Device or resource busy");
        assert!(matches!(err, DriverError::Failed(ref d) if d.contains("resource busy")));
    }

    #[test]
    fn test_missing_device_detection() {
        assert!(is_missing_device("Device \"tun-x\" does not exist."));
        assert!(is_missing_device("Cannot find device \"tun-x\""));
        assert!(!is_missing_device("RTNETLINK answers: Operation not permitted"));
    }
}
