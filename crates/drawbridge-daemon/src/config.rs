//! Daemon Configuration

use crate::DaemonError;
use drawbridge_dataplane::FilterOptions;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, overridden by `CONFIG_PATH`
pub const DEFAULT_CONFIG_PATH: &str = "/etc/drawbridge/drawbridge.json";

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding persisted tables
    pub data_dir: PathBuf,
    /// Password file; absent means insecure mode
    pub password_file: PathBuf,
    /// Management endpoint
    pub management: ManagementConfig,
    /// Link to the protected segment
    pub inside: LinkConfig,
    /// Link to the untrusted segment
    pub outside: LinkConfig,
    /// Frames buffered between the links and the filter
    pub queue_depth: usize,
    /// Delay between REBOOTACK and exit
    pub reboot_delay_ms: u64,
    /// Bytes reserved for host tables
    pub arena_bytes: usize,
    /// Filter build options
    pub filter: FilterOptions,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: "/var/lib/drawbridge".into(),
            password_file: "/etc/drawbridge/password".into(),
            management: ManagementConfig::default(),
            inside: LinkConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], 7101)),
                peer: SocketAddr::from(([127, 0, 0, 1], 7201)),
            },
            outside: LinkConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], 7102)),
                peer: SocketAddr::from(([127, 0, 0, 1], 7202)),
            },
            queue_depth: drawbridge_dataplane::bridge::DEFAULT_QUEUE_DEPTH,
            reboot_delay_ms: 2000,
            arena_bytes: 64 * 65536,
            filter: FilterOptions::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DaemonError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| DaemonError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DaemonError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| DaemonError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// REBOOT grace period
    pub fn reboot_delay(&self) -> Duration {
        Duration::from_millis(self.reboot_delay_ms)
    }
}

/// Management endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// Hosts allowed to manage the filter; empty allows any
    pub managers: Vec<IpAddr>,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 7100)),
            managers: Vec::new(),
        }
    }
}

impl ManagementConfig {
    /// Whether `ip` may send management requests
    pub fn is_manager(&self, ip: IpAddr) -> bool {
        self.managers.is_empty() || self.managers.contains(&ip)
    }
}

/// One UDP-tunnelled interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Local socket
    pub bind: SocketAddr,
    /// Far end that frames come from and go to
    pub peer: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use drawbridge_dataplane::TcpAdmission;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{
            "data_dir": "/srv/drawbridge",
            "management": { "managers": ["10.1.1.5"] },
            "filter": { "tcp_admission": "every_segment" }
        }"#;
        let config: DaemonConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/drawbridge"));
        assert_eq!(config.queue_depth, DaemonConfig::default().queue_depth);
        assert_eq!(config.management.bind, ManagementConfig::default().bind);
        assert_eq!(config.filter.tcp_admission, TcpAdmission::EverySegment);
        assert!(config.filter.discard_suspect_offset);
    }

    #[test]
    fn test_manager_allow_list() {
        let mut management = ManagementConfig::default();
        assert!(management.is_manager("192.0.2.9".parse().unwrap()));

        management.managers = vec!["10.1.1.5".parse().unwrap()];
        assert!(management.is_manager("10.1.1.5".parse().unwrap()));
        assert!(!management.is_manager("10.1.1.6".parse().unwrap()));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drawbridge.json");

        let mut config = DaemonConfig::default();
        config.reboot_delay_ms = 50;
        config.save(&path).unwrap();
        assert_eq!(DaemonConfig::load(&path).unwrap(), config);
        assert_eq!(config.reboot_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drawbridge.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(DaemonConfig::load(&path), Err(DaemonError::Config(_))));
        assert!(matches!(
            DaemonConfig::load(dir.path().join("missing.json")),
            Err(DaemonError::Io(_))
        ));
    }
}
