use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::channel::READ_CHUNK_SIZE;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_VIDEO_PORT: u16 = 9999;
pub const DEFAULT_CONTROL_PORT: u16 = 9998;
pub const DEFAULT_QUERY_PORT: u16 = 9997;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClientConfigFile {
    host: Option<String>,
    ports: Option<PortsConfigFile>,
    connect_timeout_ms: Option<u64>,
    read_chunk_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PortsConfigFile {
    video: Option<u16>,
    control: Option<u16>,
    query: Option<u16>,
}

/// Where the gateway app listens and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// IP address or hostname of the phone running the gateway app.
    pub host: String,
    pub video_port: u16,
    pub control_port: u16,
    pub query_port: u16,
    /// Per-connection timeout for the initial connects.
    pub connect_timeout: Duration,
    /// Size of a single socket read on every channel.
    pub read_chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST)
    }
}

impl ClientConfig {
    /// Default ports and timeouts for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            video_port: DEFAULT_VIDEO_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            query_port: DEFAULT_QUERY_PORT,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }

    /// Loads `MSDK_CONFIG` (JSON, optional), then applies `MSDK_*` env
    /// overrides and validates the result.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MSDK_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClientConfigFile) -> Self {
        let defaults = Self::default();
        let ports = file.ports.unwrap_or_default();
        Self {
            host: file.host.unwrap_or(defaults.host),
            video_port: ports.video.unwrap_or(defaults.video_port),
            control_port: ports.control.unwrap_or(defaults.control_port),
            query_port: ports.query.unwrap_or(defaults.query_port),
            connect_timeout: file
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            read_chunk_size: file.read_chunk_size.unwrap_or(defaults.read_chunk_size),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("MSDK_HOST") {
            if !host.trim().is_empty() {
                self.host = host.trim().to_string();
            }
        }
        if let Some(port) = env_port("MSDK_VIDEO_PORT")? {
            self.video_port = port;
        }
        if let Some(port) = env_port("MSDK_CONTROL_PORT")? {
            self.control_port = port;
        }
        if let Some(port) = env_port("MSDK_QUERY_PORT")? {
            self.query_port = port;
        }
        if let Ok(timeout) = std::env::var("MSDK_CONNECT_TIMEOUT_MS") {
            let ms: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("MSDK_CONNECT_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.connect_timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("gateway host must not be empty"));
        }
        let ports = [self.video_port, self.control_port, self.query_port];
        if ports.contains(&0) {
            return Err(anyhow!("gateway ports must be non-zero"));
        }
        if ports[0] == ports[1] || ports[0] == ports[2] || ports[1] == ports[2] {
            return Err(anyhow!(
                "video, control and query ports must differ (got {}, {}, {})",
                ports[0],
                ports[1],
                ports[2]
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("connect timeout must be greater than zero"));
        }
        if self.read_chunk_size == 0 {
            return Err(anyhow!("read chunk size must be greater than zero"));
        }
        Ok(())
    }
}

fn env_port(var: &str) -> Result<Option<u16>> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a TCP port number", var)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<ClientConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let file: ClientConfigFile =
            serde_json::from_str(r#"{"host": "10.0.0.6", "ports": {"query": 7000}}"#)
                .expect("parse");
        let cfg = ClientConfig::from_file(file);
        assert_eq!(cfg.host, "10.0.0.6");
        assert_eq!(cfg.video_port, DEFAULT_VIDEO_PORT);
        assert_eq!(cfg.control_port, DEFAULT_CONTROL_PORT);
        assert_eq!(cfg.query_port, 7000);
        assert_eq!(cfg.read_chunk_size, READ_CHUNK_SIZE);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn duplicate_ports_rejected() {
        let mut cfg = ClientConfig::new("10.0.0.6");
        cfg.query_port = cfg.video_port;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn unknown_fields_rejected() {
        let parsed: std::result::Result<ClientConfigFile, _> =
            serde_json::from_str(r#"{"hots": "10.0.0.6"}"#);
        assert!(parsed.is_err());
    }
}
