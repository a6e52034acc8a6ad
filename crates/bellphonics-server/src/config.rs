//! Server configuration loading from file and environment variables.

use bellphonics_gate::GatePolicy;
use bellphonics_voice::{BackendKind, TtsConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission policy, including the shared API key.
    #[serde(default)]
    pub gate: GatePolicy,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Name reported by `/handshake`.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "bellphonics_gate=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// mDNS advertisement of the relay on the local network.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryConfig {
    /// Off unless explicitly enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Advertised instance name; falls back to `server.instance_name`.
    #[serde(default)]
    pub name: Option<String>,

    /// mDNS host name; the machine's host name when empty.
    #[serde(default)]
    pub host: String,

    /// Optional placement hints published as TXT records.
    #[serde(default)]
    pub zone: String,

    #[serde(default)]
    pub subzone: String,
}

/// Whether the configuration file was read or the defaults were used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    File,
    /// No file was named, or the named file does not exist.
    Defaults,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8099
}

fn default_instance_name() -> String {
    "Bellphonics".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            instance_name: default_instance_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },

    /// No API key configured; the relay refuses to run unauthenticated.
    #[error("BELLPHONICS_API_KEY (or gate.api_key) must be set")]
    MissingApiKey,
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides from the process environment.
///
/// Runs before logging is installed, so it reports the fallback through
/// [`ConfigOrigin`] instead of logging it.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, an
/// override is malformed, or no API key is configured.
pub fn load_config(path: Option<&str>) -> Result<(Config, ConfigOrigin), ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with the environment read through `lookup`.
pub fn load_config_with<F>(
    path: Option<&str>,
    lookup: F,
) -> Result<(Config, ConfigOrigin), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let (mut config, origin) = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => (toml::from_str(&contents)?, ConfigOrigin::File),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (Config::default(), ConfigOrigin::Defaults)
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => (Config::default(), ConfigOrigin::Defaults),
    };

    apply_env_overrides(&mut config, lookup)?;
    config.validate()?;
    Ok((config, origin))
}

impl Config {
    /// Rejects configurations the server must not start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.gate.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(()),
            _ => Err(ConfigError::MissingApiKey),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

/// Applies `BELLPHONICS_*` overrides read through `lookup`.
///
/// Values are trimmed and empty values are treated as unset.
///
/// - `BELLPHONICS_BIND_HOST`, `BELLPHONICS_BIND_PORT`, `BELLPHONICS_INSTANCE_NAME`
/// - `BELLPHONICS_API_KEY`, `BELLPHONICS_DEDUPE_TTL_S`, `BELLPHONICS_DEFAULT_COOLDOWN_S`,
///   `BELLPHONICS_RATE_LIMIT_PER_MIN`, `BELLPHONICS_ALLOWLIST` (comma separated),
///   `BELLPHONICS_DNS_CACHE_TTL_S`
/// - `BELLPHONICS_TTS_BACKEND`, `BELLPHONICS_PIPER_VOICES_DIR`,
///   `BELLPHONICS_PIPER_DEFAULT_VOICE`, `BELLPHONICS_PIPER_BINARY`,
///   `BELLPHONICS_SYSTEM_TTS_BINARY`, `BELLPHONICS_AUDIO_PLAYER`
/// - `BELLPHONICS_LOG_LEVEL`, `BELLPHONICS_LOG_JSON` ("true" or "1")
/// - `BELLPHONICS_DISCOVERY_ENABLED` ("true" or "1"), `BELLPHONICS_DISCOVERY_NAME`,
///   `BELLPHONICS_DISCOVERY_HOST`, `BELLPHONICS_DISCOVERY_ZONE`,
///   `BELLPHONICS_DISCOVERY_SUBZONE`
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(v) = get("BELLPHONICS_BIND_HOST") {
        config.server.host = parse_env("BELLPHONICS_BIND_HOST", v)?;
    }
    if let Some(v) = get("BELLPHONICS_BIND_PORT") {
        config.server.port = parse_env("BELLPHONICS_BIND_PORT", v)?;
    }
    if let Some(v) = get("BELLPHONICS_INSTANCE_NAME") {
        config.server.instance_name = v;
    }

    if let Some(v) = get("BELLPHONICS_API_KEY") {
        config.gate.api_key = Some(v);
    }
    if let Some(v) = get("BELLPHONICS_DEDUPE_TTL_S") {
        config.gate.dedupe_ttl_seconds = parse_env("BELLPHONICS_DEDUPE_TTL_S", v)?;
    }
    if let Some(v) = get("BELLPHONICS_DEFAULT_COOLDOWN_S") {
        config.gate.default_cooldown_seconds =
            Some(parse_env("BELLPHONICS_DEFAULT_COOLDOWN_S", v)?);
    }
    if let Some(v) = get("BELLPHONICS_RATE_LIMIT_PER_MIN") {
        config.gate.rate_limit_per_min = parse_env("BELLPHONICS_RATE_LIMIT_PER_MIN", v)?;
    }
    if let Some(v) = get("BELLPHONICS_ALLOWLIST") {
        config.gate.allowlist = v
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = get("BELLPHONICS_DNS_CACHE_TTL_S") {
        config.gate.dns_cache_ttl_seconds = parse_env("BELLPHONICS_DNS_CACHE_TTL_S", v)?;
    }

    if let Some(v) = get("BELLPHONICS_TTS_BACKEND") {
        config.tts.backend = parse_env::<BackendKind>("BELLPHONICS_TTS_BACKEND", v)?;
    }
    if let Some(v) = get("BELLPHONICS_PIPER_VOICES_DIR") {
        config.tts.voices_dir = PathBuf::from(v);
    }
    if let Some(v) = get("BELLPHONICS_PIPER_DEFAULT_VOICE") {
        config.tts.default_voice = v;
    }
    if let Some(v) = get("BELLPHONICS_PIPER_BINARY") {
        config.tts.piper_binary = PathBuf::from(v);
    }
    if let Some(v) = get("BELLPHONICS_SYSTEM_TTS_BINARY") {
        config.tts.system_binary = Some(PathBuf::from(v));
    }
    if let Some(v) = get("BELLPHONICS_AUDIO_PLAYER") {
        config.tts.player_binary = Some(PathBuf::from(v));
    }

    if let Some(v) = get("BELLPHONICS_LOG_LEVEL") {
        config.logging.level = v;
    }
    if let Some(v) = get("BELLPHONICS_LOG_JSON") {
        config.logging.json = is_truthy(&v);
    }

    if let Some(v) = get("BELLPHONICS_DISCOVERY_ENABLED") {
        config.discovery.enabled = is_truthy(&v);
    }
    if let Some(v) = get("BELLPHONICS_DISCOVERY_NAME") {
        config.discovery.name = Some(v);
    }
    if let Some(v) = get("BELLPHONICS_DISCOVERY_HOST") {
        config.discovery.host = v;
    }
    if let Some(v) = get("BELLPHONICS_DISCOVERY_ZONE") {
        config.discovery.zone = v;
    }
    if let Some(v) = get("BELLPHONICS_DISCOVERY_SUBZONE") {
        config.discovery.subzone = v;
    }

    Ok(())
}
