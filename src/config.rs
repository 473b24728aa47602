//! TOML configuration with sensible defaults
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working setup. The standard location follows platform conventions via
//! `directories`, but any path can be loaded explicitly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants::{
    BASE_RECONNECT_DELAY_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_RENDEZVOUS_PORT,
    MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_DELAY_MS, ROOM_CAPACITY,
};
use crate::error::ConfigError;
use crate::mesh::{MeshConfig, ReconnectPolicy};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub mesh: MeshSection,
    pub audio: AudioSection,
}

/// Rendezvous server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub room_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_RENDEZVOUS_PORT,
            room_capacity: ROOM_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Peer mesh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSection {
    /// Rendezvous server to discover peers through; empty disables discovery
    pub rendezvous_url: Option<String>,
    pub room_capacity: usize,
    pub connect_timeout_ms: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for MeshSection {
    fn default() -> Self {
        Self {
            rendezvous_url: None,
            room_capacity: ROOM_CAPACITY,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_max_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay_ms: BASE_RECONNECT_DELAY_MS,
            reconnect_max_delay_ms: MAX_RECONNECT_DELAY_MS,
        }
    }
}

impl MeshSection {
    /// Convert into the runtime mesh configuration
    pub fn to_mesh_config(&self) -> MeshConfig {
        MeshConfig {
            capacity: self.room_capacity,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            rendezvous_url: self.rendezvous_url.clone(),
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect_max_attempts,
                base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            },
        }
    }
}

/// Spatial audio settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub master_volume: f32,
    pub spatial_enabled: bool,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            master_volume: 1.0,
            spatial_enabled: true,
        }
    }
}

impl AppConfig {
    /// Load from an explicit path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, falling back to defaults when
    /// no file exists
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Platform-conventional config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "voicemesh").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.room_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.room_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.mesh.room_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mesh.room_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.mesh.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mesh.connect_timeout_ms",
                reason: "must be greater than 0".into(),
            });
        }
        if self.mesh.reconnect_base_delay_ms > self.mesh.reconnect_max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "mesh.reconnect_base_delay_ms",
                reason: "must not exceed reconnect_max_delay_ms".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.audio.master_volume) {
            return Err(ConfigError::InvalidValue {
                field: "audio.master_volume",
                reason: format!("{} is outside [0, 1]", self.audio.master_volume),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, DEFAULT_RENDEZVOUS_PORT);
        assert_eq!(config.mesh.room_capacity, ROOM_CAPACITY);
        assert!(config.audio.spatial_enabled);
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, DEFAULT_RENDEZVOUS_PORT);
        assert_eq!(config.mesh.reconnect_max_attempts, MAX_RECONNECT_ATTEMPTS);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 4444

            [mesh]
            rendezvous_url = "ws://localhost:4444/ws"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 4444);
        assert_eq!(config.server.room_capacity, ROOM_CAPACITY);
        assert_eq!(
            config.mesh.rendezvous_url.as_deref(),
            Some("ws://localhost:4444/ws")
        );
        assert_eq!(config.mesh.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }

    #[test]
    fn test_invalid_master_volume_rejected() {
        let config: AppConfig = toml::from_str(
            r#"
            [audio]
            master_volume = 1.5
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "audio.master_volume",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config: AppConfig = toml::from_str(
            r#"
            [mesh]
            room_capacity = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mesh_section_converts_to_runtime_config() {
        let section = MeshSection {
            rendezvous_url: Some("ws://host:9000/ws".into()),
            connect_timeout_ms: 5_000,
            ..Default::default()
        };
        let mesh = section.to_mesh_config();
        assert_eq!(mesh.capacity, ROOM_CAPACITY);
        assert_eq!(mesh.connect_timeout, Duration::from_secs(5));
        assert_eq!(mesh.rendezvous_url.as_deref(), Some("ws://host:9000/ws"));
    }
}
