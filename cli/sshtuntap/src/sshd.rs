//! Editing of the SSH daemon configuration.
//!
//! Tunnels only work with `PermitTunnel yes`. Conflicting directives are
//! commented out rather than deleted, and the file is only rewritten when
//! something actually changed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sshtuntap_hostnet::atomic::write_atomic;
use tracing::debug;

/// Marker written above the directive we add.
pub const ADDED_BY: &str = "# Added by sshtuntap-server";

const KEYWORD: &str = "PermitTunnel";

/// Result of [`SshdConfig::enable_tunnel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelChange {
    /// An active `PermitTunnel yes` was already present.
    AlreadyEnabled,
    /// The directive was added.
    Added,
}

/// In-memory copy of an sshd configuration file.
#[derive(Debug)]
pub struct SshdConfig {
    path: PathBuf,
    original: String,
    lines: Vec<String>,
}

impl SshdConfig {
    pub fn load(path: &Path) -> io::Result<Self> {
        let original = fs::read_to_string(path)?;
        Ok(Self::from_contents(path, original))
    }

    fn from_contents(path: &Path, original: String) -> Self {
        let lines = original.lines().map(str::to_string).collect();
        Self {
            path: path.to_path_buf(),
            original,
            lines,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make tunnelling allowed.
    ///
    /// Active `PermitTunnel` lines with any other value are commented out.
    /// If no `PermitTunnel yes` remains, one is added in the global section.
    pub fn enable_tunnel(&mut self) -> TunnelChange {
        for line in &mut self.lines {
            if matches!(directive(line), Some((_, value)) if !value.eq_ignore_ascii_case("yes")) {
                debug!(line = %line, "Commenting out conflicting directive");
                *line = format!("# {}", line);
            }
        }

        if self.lines.iter().any(|l| directive(l).is_some()) {
            return TunnelChange::AlreadyEnabled;
        }

        // Directives after the first `Match` only apply to that block.
        let at = self
            .lines
            .iter()
            .position(|l| keyword(l).is_some_and(|k| k.eq_ignore_ascii_case("Match")))
            .unwrap_or(self.lines.len());

        let mut block = Vec::with_capacity(3);
        if at > 0 && !self.lines[at - 1].trim().is_empty() {
            block.push(String::new());
        }
        block.push(ADDED_BY.to_string());
        block.push(format!("{} yes", KEYWORD));
        if at < self.lines.len() {
            block.push(String::new());
        }
        self.lines.splice(at..at, block);

        TunnelChange::Added
    }

    /// Current contents.
    pub fn contents(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    pub fn is_changed(&self) -> bool {
        self.contents() != self.original
    }

    /// Write the file if it changed. Returns whether it was written.
    pub fn save_if_changed(&self) -> io::Result<bool> {
        if !self.is_changed() {
            return Ok(false);
        }
        write_atomic(&self.path, self.contents().as_bytes())?;
        debug!(path = %self.path.display(), "Saved sshd configuration");
        Ok(true)
    }
}

/// First word of an active (uncommented) line.
fn keyword(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    trimmed
        .split(|c: char| c.is_whitespace() || c == '=')
        .next()
        .filter(|kw| !kw.is_empty())
}

/// `(keyword, value)` if the line is an active `PermitTunnel` directive.
fn directive(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    let kw = keyword(trimmed)?;
    if !kw.eq_ignore_ascii_case(KEYWORD) {
        return None;
    }
    let value = trimmed[kw.len()..]
        .trim_start_matches(|c: char| c.is_whitespace() || c == '=')
        .split_whitespace()
        .next()
        .unwrap_or("");
    Some((kw, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(contents: &str) -> SshdConfig {
        SshdConfig::from_contents(Path::new("/etc/ssh/sshd_config"), contents.to_string())
    }

    #[test]
    fn test_adds_directive_when_missing() {
        let mut sshd = config("Port 22\nUsePAM yes\n");
        assert_eq!(sshd.enable_tunnel(), TunnelChange::Added);
        assert_eq!(
            sshd.contents(),
            "Port 22\nUsePAM yes\n\n# Added by sshtuntap-server\nPermitTunnel yes\n"
        );
        assert!(sshd.is_changed());
    }

    #[test]
    fn test_already_enabled_is_untouched() {
        let mut sshd = config("Port 22\npermittunnel yes\n");
        assert_eq!(sshd.enable_tunnel(), TunnelChange::AlreadyEnabled);
        assert!(!sshd.is_changed());
    }

    #[test]
    fn test_conflicting_values_are_commented_out() {
        let mut sshd = config("PermitTunnel no\n#PermitTunnel point-to-point\nPermitTunnel=ethernet\n");
        assert_eq!(sshd.enable_tunnel(), TunnelChange::Added);

        let contents = sshd.contents();
        assert!(contents.starts_with("# PermitTunnel no\n#PermitTunnel point-to-point\n"));
        assert!(contents.contains("# PermitTunnel=ethernet\n"));
        assert!(contents.ends_with("PermitTunnel yes\n"));
    }

    #[test]
    fn test_inserted_before_match_block() {
        let mut sshd = config("Port 22\nMatch User backup\n    ForceCommand internal-sftp\n");
        sshd.enable_tunnel();
        assert_eq!(
            sshd.contents(),
            "Port 22\n\n# Added by sshtuntap-server\nPermitTunnel yes\n\n\
             Match User backup\n    ForceCommand internal-sftp\n"
        );
    }

    #[test]
    fn test_save_only_when_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sshd_config");
        fs::write(&path, "PermitTunnel yes\n").unwrap();

        let mut sshd = SshdConfig::load(&path).unwrap();
        sshd.enable_tunnel();
        assert!(!sshd.save_if_changed().unwrap());

        fs::write(&path, "Port 2222\n").unwrap();
        let mut sshd = SshdConfig::load(&path).unwrap();
        sshd.enable_tunnel();
        assert!(sshd.save_if_changed().unwrap());
        assert!(fs::read_to_string(&path)
            .unwrap()
            .ends_with("PermitTunnel yes\n"));
    }
}
