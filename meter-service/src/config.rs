use meter_client::domain::EqualCounterPolicy;
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub uri: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Postgres,
            uri: "postgres://localhost:5432/meters".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Serialize the read-compute-write sequence per device. Off by default: concurrent
    /// samples for one device may then share a stale baseline.
    pub serialize_per_device: bool,
    pub equal_counter_policy: EqualCounterPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub realtime: RealtimeConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    /// Load from `METER_CONFIG` (default `meter-config.toml`). A missing file yields the
    /// defaults; `DATABASE_URL` and `PORT` override the file.
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("METER_CONFIG").unwrap_or_else(|_| "meter-config.toml".to_string());
        let mut cfg = match fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path, "config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("failed to read config {path}: {e}")),
        };

        if let Ok(url) = env::var("DATABASE_URL") {
            cfg.store.uri = url;
        }
        if let Ok(port) = env::var("PORT") {
            cfg.server.bind_addr = with_port(&cfg.server.bind_addr, &port)?;
        }

        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

fn with_port(bind_addr: &str, port: &str) -> anyhow::Result<String> {
    let port: u16 = port
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid PORT '{port}': {e}"))?;
    let host = bind_addr.rsplit_once(':').map_or(bind_addr, |(host, _)| host);
    Ok(format!("{host}:{port}"))
}
