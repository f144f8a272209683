//! Device naming.
//!
//! Names are `{mode}-{username}` (e.g. `tun-alice`). Interface names are
//! limited to 15 bytes (IFNAMSIZ - 1), so long usernames keep a short
//! prefix and gain a hash suffix instead.

use sha2::{Digest, Sha256};

use super::DeviceMode;

/// Maximum interface name length (IFNAMSIZ - 1).
pub const MAX_DEVICE_NAME_LEN: usize = 15;

/// Hex digits of the username hash used for shortened names.
const HASH_SUFFIX_LEN: usize = 6;

/// Derive the device name for a user.
pub fn device_name(username: &str, mode: DeviceMode) -> String {
    let full = format!("{}-{}", mode, username);
    if full.len() <= MAX_DEVICE_NAME_LEN {
        return full;
    }

    let digest = Sha256::digest(username.as_bytes());
    let suffix = hex::encode(&digest[..HASH_SUFFIX_LEN / 2]);

    let keep = MAX_DEVICE_NAME_LEN - mode.as_str().len() - 1 - HASH_SUFFIX_LEN;
    let prefix: String = username.chars().take(keep).collect();

    format!("{}-{}{}", mode, prefix, suffix)
}

/// Returns true if `name` follows the managed device naming scheme.
pub fn is_managed_name(name: &str) -> bool {
    [DeviceMode::Tun, DeviceMode::Tap].iter().any(|mode| {
        name.strip_prefix(mode.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|user| !user.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names() {
        assert_eq!(device_name("alice", DeviceMode::Tun), "tun-alice");
        assert_eq!(device_name("bob", DeviceMode::Tap), "tap-bob");
        assert_eq!(device_name("elevenchars", DeviceMode::Tun), "tun-elevenchars");
    }

    #[test]
    fn test_long_names_fit_ifnamsiz() {
        let name = device_name("alexandria.hamilton", DeviceMode::Tun);
        assert_eq!(name.len(), MAX_DEVICE_NAME_LEN);
        assert!(name.starts_with("tun-alexa"));

        // Deterministic.
        assert_eq!(name, device_name("alexandria.hamilton", DeviceMode::Tun));
    }

    #[test]
    fn test_long_names_with_shared_prefix_differ() {
        let a = device_name("alexandria.one", DeviceMode::Tap);
        let b = device_name("alexandria.two", DeviceMode::Tap);
        assert_ne!(a, b);
        assert_eq!(&a[..9], &b[..9]);
    }

    #[test]
    fn test_managed_names() {
        assert!(is_managed_name("tun-alice"));
        assert!(is_managed_name("tap-bob"));
        assert!(!is_managed_name("tun-"));
        assert!(!is_managed_name("tun0"));
        assert!(!is_managed_name("eth0"));
    }
}
