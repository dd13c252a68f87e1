//! JSON configuration model for both peers.
//!
//! Unknown keys are ignored; missing required keys fail the load with a
//! descriptive error. Interval and timeout fields are plain millisecond
//! integers on the wire and expose [`Duration`] accessors here.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

fn default_true() -> bool {
    true
}

fn default_latency_ms() -> u64 {
    20
}

fn default_max_clients() -> usize {
    5
}

fn default_reconnect_ms() -> u64 {
    1_000
}

fn default_command_timeout_ms() -> u64 {
    100
}

fn default_tally_interval_ms() -> u64 {
    100
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

fn check_unique_camera_ids<'a>(ids: impl Iterator<Item = (u8, &'a str)>) -> Result<(), ConfigError> {
    let mut seen: Vec<(u8, &str)> = Vec::new();
    for (id, name) in ids {
        if let Some((_, first)) = seen.iter().find(|(other, _)| *other == id) {
            return Err(ConfigError::Invalid {
                reason: format!("camera id {id} is used by both '{first}' and '{name}'"),
            });
        }
        seen.push((id, name));
    }
    Ok(())
}

// ── SRT channel ───────────────────────────────────────────────────────────────

/// Tuning for the SRT channel; every key is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct SrtSettings {
    /// Receiver buffer latency in milliseconds.
    #[serde(rename = "latency", default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Bandwidth cap in bytes per second; unlimited when absent.
    #[serde(default)]
    pub max_bw: Option<u64>,

    /// Maximum concurrently served SRT clients (server only).
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

impl Default for SrtSettings {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            max_bw: None,
            max_clients: default_max_clients(),
        }
    }
}

impl SrtSettings {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// Caller-mode target (client config).
#[derive(Debug, Clone, Deserialize)]
pub struct SrtServerAddr {
    pub host: String,
    pub port: u16,
}

// ── NDI tally ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct NdiSettings {
    /// Reconciliation tick period for the tally translator.
    #[serde(rename = "tally_update_interval", default = "default_tally_interval_ms")]
    pub tally_update_interval_ms: u64,

    /// Client only: local UDP port accepting tally wire frames for
    /// forwarding over SRT. Tally ingress is disabled when absent.
    #[serde(default)]
    pub tally_listen_port: Option<u16>,
}

impl Default for NdiSettings {
    fn default() -> Self {
        Self {
            tally_update_interval_ms: default_tally_interval_ms(),
            tally_listen_port: None,
        }
    }
}

impl NdiSettings {
    pub fn tally_update_interval(&self) -> Duration {
        Duration::from_millis(self.tally_update_interval_ms)
    }
}

/// Raw VISCA byte sequences sent verbatim on a tally transition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TallyCommands {
    #[serde(default)]
    pub program: Vec<u8>,
    #[serde(default)]
    pub preview: Vec<u8>,
    #[serde(default)]
    pub off: Vec<u8>,
    /// Distinct sequence for the combined state; `program` is reused when
    /// absent.
    #[serde(default)]
    pub program_preview: Option<Vec<u8>>,
}

/// Binds one NDI source to one camera's tally commands.
#[derive(Debug, Clone, Deserialize)]
pub struct NdiMapping {
    pub source_name: String,
    #[serde(default = "default_true")]
    pub tally_program_enabled: bool,
    #[serde(default = "default_true")]
    pub tally_preview_enabled: bool,
    pub commands: TallyCommands,
}

// ── Server peer ───────────────────────────────────────────────────────────────

/// One downstream camera the server proxies for.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub id: u8,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    #[serde(rename = "reconnect_interval", default = "default_reconnect_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(rename = "command_timeout", default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default)]
    pub ndi_mapping: Option<NdiMapping>,
}

impl CameraConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub srt_port: u16,
    #[serde(default)]
    pub srt_settings: SrtSettings,
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub ndi_settings: NdiSettings,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_unique_camera_ids(self.cameras.iter().map(|c| (c.id, c.name.as_str())))
    }
}

// ── Client peer ───────────────────────────────────────────────────────────────

/// One local TCP listener-side controller the client bridges.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub camera_id: u8,
    #[serde(rename = "reconnect_interval", default = "default_reconnect_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(rename = "command_timeout", default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl EndpointConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub srt_server: SrtServerAddr,
    #[serde(default)]
    pub srt_settings: SrtSettings,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub ndi_settings: NdiSettings,
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_unique_camera_ids(self.endpoints.iter().map(|e| (e.camera_id, e.name.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_JSON: &str = r#"{
        "bind_address": "0.0.0.0",
        "srt_port": 9000,
        "srt_settings": { "latency": 40, "max_bw": 1000000, "max_clients": 2 },
        "cameras": [
            {
                "id": 1, "name": "cam-left", "ip_address": "10.0.0.11", "port": 52381,
                "ndi_mapping": {
                    "source_name": "Studio (Cam Left)",
                    "commands": {
                        "program": [129, 1, 126, 1, 10, 0, 2, 255],
                        "preview": [129, 1, 126, 1, 10, 0, 1, 255],
                        "off":     [129, 1, 126, 1, 10, 0, 3, 255]
                    }
                }
            },
            { "id": 2, "name": "cam-right", "ip_address": "10.0.0.12", "port": 52381,
              "reconnect_interval": 250, "command_timeout": 50 }
        ]
    }"#;

    #[test]
    fn parses_server_config_with_defaults() {
        let config: ServerConfig = serde_json::from_str(SERVER_JSON).unwrap();
        config.validate().unwrap();

        assert_eq!(config.srt_settings.latency(), Duration::from_millis(40));
        assert_eq!(config.srt_settings.max_bw, Some(1_000_000));
        assert_eq!(config.srt_settings.max_clients, 2);
        // Defaults for the ndi block and per-camera intervals.
        assert_eq!(
            config.ndi_settings.tally_update_interval(),
            Duration::from_millis(100)
        );
        assert_eq!(config.cameras[0].command_timeout(), Duration::from_millis(100));
        assert_eq!(config.cameras[1].reconnect_interval(), Duration::from_millis(250));

        let mapping = config.cameras[0].ndi_mapping.as_ref().unwrap();
        assert!(mapping.tally_program_enabled);
        assert_eq!(mapping.commands.program[0], 0x81);
        assert!(mapping.commands.program_preview.is_none());
    }

    #[test]
    fn parses_client_config_and_ignores_unknown_keys() {
        let json = r#"{
            "srt_server": { "host": "203.0.113.5", "port": 9000 },
            "endpoints": [
                { "name": "desk-1", "ip_address": "127.0.0.1", "port": 5500,
                  "camera_id": 3, "reconnect_interval": 500, "command_timeout": 80 }
            ],
            "ndi_settings": { "tally_update_interval": 200, "tally_listen_port": 5960 },
            "comment": "not a real key"
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.srt_server.port, 9000);
        assert_eq!(config.endpoints[0].camera_id, 3);
        assert_eq!(config.endpoints[0].command_timeout(), Duration::from_millis(80));
        assert_eq!(config.ndi_settings.tally_listen_port, Some(5960));
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let json = r#"{ "srt_port": 9000, "cameras": [] }"#;
        assert!(serde_json::from_str::<ServerConfig>(json).is_err());
    }

    #[test]
    fn duplicate_camera_ids_are_rejected() {
        let json = r#"{
            "bind_address": "0.0.0.0",
            "srt_port": 9000,
            "cameras": [
                { "id": 1, "name": "a", "ip_address": "10.0.0.1", "port": 1 },
                { "id": 1, "name": "b", "ip_address": "10.0.0.2", "port": 2 }
            ]
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("camera id 1"));
    }
}
