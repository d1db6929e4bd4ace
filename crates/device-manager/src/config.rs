//! Configuration, merged in precedence order: CLI flag > environment
//! variable > config file > built-in default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_SOCKET_PATH: &str = "/run/hailo/device.sock";
pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:5099";
pub const DEFAULT_SOCKET_MODE: u32 = 0o660;
pub const DEFAULT_MODEL_TYPE: &str = "echo";
pub const DEFAULT_GROUP_ID: i64 = -1;

/// Values that, compared case-insensitively, mean "disable the HTTP
/// sidecar entirely" when given as `http_bind`.
const HTTP_BIND_DISABLE_TOKENS: &[&str] = &["0", "off", "false", "none", "disable", "disabled"];

#[derive(Debug, Clone)]
pub struct Config {
    pub socket_path: PathBuf,
    /// `None` means the HTTP status sidecar is disabled.
    pub http_bind: Option<SocketAddr>,
    pub socket_group: Option<String>,
    pub socket_mode: u32,
    pub max_frame_bytes: u32,
    pub default_model_type: String,
    /// Group ID passed through to `DeviceContext::open_exclusive`. `-1`
    /// means "use the driver default".
    pub device_group_id: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            http_bind: Some(DEFAULT_HTTP_BIND.parse().expect("default bind address is valid")),
            socket_group: None,
            socket_mode: DEFAULT_SOCKET_MODE,
            max_frame_bytes: device_core::framing::DEFAULT_MAX_FRAME_BYTES,
            default_model_type: DEFAULT_MODEL_TYPE.to_string(),
            device_group_id: DEFAULT_GROUP_ID,
        }
    }
}

/// On-disk representation. Every field is optional so a file only needs to
/// set what it wants to override.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    http_bind: Option<String>,
    socket_group: Option<String>,
    socket_mode: Option<String>,
    max_frame_bytes: Option<u32>,
    default_model_type: Option<String>,
    device_group_id: Option<i64>,
}

/// CLI overrides, as parsed by `clap`. Kept separate from [`Config`] so the
/// merge logic has a single place that decides precedence.
#[derive(Debug, Default, clap::Args)]
pub struct CliOverrides {
    /// Path to the Unix domain socket clients connect to.
    #[arg(long)]
    pub socket_path: Option<PathBuf>,
    /// Address the read-only HTTP status sidecar binds to, or a disable
    /// token (`off`, `0`, `none`, ...) to turn it off.
    #[arg(long)]
    pub http_bind: Option<String>,
    /// Unix group allowed to connect to the socket.
    #[arg(long)]
    pub socket_group: Option<String>,
    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile { path: PathBuf, #[source] source: toml::de::Error },
    #[error("invalid http_bind value {value:?}: {source}")]
    InvalidHttpBind { value: String, #[source] source: std::net::AddrParseError },
    #[error("invalid socket_mode {value:?}: not a valid octal number")]
    InvalidSocketMode { value: String },
    #[error("invalid device_group_id {value:?}: not a valid integer")]
    InvalidGroupId { value: String },
}

impl Config {
    /// Load the file layer (if a path was given via `--config` or the
    /// `HAILO_DEVICE_CONFIG` environment variable), then apply environment
    /// variables, then CLI overrides, in that increasing order of priority.
    pub async fn load(cli: &CliOverrides) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var_os("HAILO_DEVICE_CONFIG").map(PathBuf::from));

        if let Some(path) = &config_path {
            let file = load_file(path).await?;
            apply_file(&mut config, file)?;
        }

        apply_env(&mut config)?;
        apply_cli(&mut config, cli)?;

        Ok(config)
    }
}

async fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::ReadFile { path: path.to_owned(), source })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseFile { path: path.to_owned(), source })
}

fn apply_file(config: &mut Config, file: FileConfig) -> Result<(), ConfigError> {
    if let Some(socket_path) = file.socket_path {
        config.socket_path = socket_path;
    }
    if let Some(http_bind) = file.http_bind {
        config.http_bind = parse_http_bind(&http_bind)?;
    }
    if let Some(socket_group) = file.socket_group {
        config.socket_group = Some(socket_group);
    }
    if let Some(socket_mode) = file.socket_mode {
        config.socket_mode = parse_socket_mode(&socket_mode)?;
    }
    if let Some(max_frame_bytes) = file.max_frame_bytes {
        config.max_frame_bytes = max_frame_bytes;
    }
    if let Some(default_model_type) = file.default_model_type {
        config.default_model_type = default_model_type;
    }
    if let Some(device_group_id) = file.device_group_id {
        config.device_group_id = device_group_id;
    }
    Ok(())
}

fn apply_env(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(socket_path) = std::env::var("HAILO_DEVICE_SOCKET") {
        config.socket_path = PathBuf::from(socket_path);
    }
    if let Ok(http_bind) = std::env::var("HAILO_DEVICE_HTTP_BIND") {
        config.http_bind = parse_http_bind(&http_bind)?;
    }
    if let Ok(socket_group) = std::env::var("HAILO_DEVICE_SOCKET_GROUP") {
        config.socket_group = Some(socket_group);
    }
    if let Ok(socket_mode) = std::env::var("HAILO_DEVICE_SOCKET_MODE") {
        config.socket_mode = parse_socket_mode(&socket_mode)?;
    }
    if let Ok(max_frame_bytes) = std::env::var("HAILO_DEVICE_MAX_MESSAGE_BYTES") {
        config.max_frame_bytes = max_frame_bytes
            .parse()
            .map_err(|_| ConfigError::InvalidSocketMode { value: max_frame_bytes })?;
    }
    if let Ok(group_id) = std::env::var("HAILO_DEVICE_GROUP_ID") {
        config.device_group_id = group_id
            .parse()
            .map_err(|_| ConfigError::InvalidGroupId { value: group_id })?;
    }
    Ok(())
}

fn apply_cli(config: &mut Config, cli: &CliOverrides) -> Result<(), ConfigError> {
    if let Some(socket_path) = &cli.socket_path {
        config.socket_path = socket_path.clone();
    }
    if let Some(http_bind) = &cli.http_bind {
        config.http_bind = parse_http_bind(http_bind)?;
    }
    if let Some(socket_group) = &cli.socket_group {
        config.socket_group = Some(socket_group.clone());
    }
    Ok(())
}

/// Parses an `http_bind` value three ways: a disable token (case
/// insensitive) turns the sidecar off, a bare port number binds to
/// `127.0.0.1` on that port, and anything else is parsed as a full
/// `host:port` socket address.
fn parse_http_bind(value: &str) -> Result<Option<SocketAddr>, ConfigError> {
    let trimmed = value.trim();
    if HTTP_BIND_DISABLE_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        return Ok(None);
    }
    if let Ok(port) = trimmed.parse::<u16>() {
        return Ok(Some(SocketAddr::from(([127, 0, 0, 1], port))));
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|source| ConfigError::InvalidHttpBind { value: value.to_string(), source })
}

fn parse_socket_mode(value: &str) -> Result<u32, ConfigError> {
    u32::from_str_radix(value.trim_start_matches("0o"), 8)
        .map_err(|_| ConfigError::InvalidSocketMode { value: value.to_string() })
}
