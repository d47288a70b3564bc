use diagnet_analysis::AnalysisConfig;
use diagnet_common::validate::QualityRules;
use diagnet_ingest::{IngestConfig, MqttConfig};
use serde::Deserialize;

/// Environment variable that overrides `auth.secret`, so the signing key
/// can stay out of the config file.
pub const AUTH_SECRET_ENV: &str = "DIAGNET_AUTH_SECRET";

/// Minimum signing key length: 256 bits.
const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub http: HttpConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub quality: QualityRules,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    /// Handler deadline; exceeded requests get 504.
    pub request_timeout_s: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            request_timeout_s: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing key; required (directly or via DIAGNET_AUTH_SECRET),
    /// at least 32 bytes. Never logged.
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_token_ttl_ms")]
    pub token_ttl_ms: u64,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

fn default_token_ttl_ms() -> u64 {
    86_400_000
}

/// One entry of the static identity map: username plus bcrypt hash.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { days: 365 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub age_days: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { age_days: 30 }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config file '{path}': {e}"))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("cannot parse config file '{path}': {e}"))?;
        if let Ok(secret) = std::env::var(AUTH_SECRET_ENV) {
            config.auth.secret = secret;
        }
        Ok(config)
    }

    /// Startup-time invariants. Failure here is fatal (exit 1).
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.secret.is_empty() {
            anyhow::bail!("auth.secret is required (config file or {AUTH_SECRET_ENV})");
        }
        if self.auth.secret.len() < MIN_SECRET_BYTES {
            anyhow::bail!(
                "auth.secret must be at least {MIN_SECRET_BYTES} bytes, got {}",
                self.auth.secret.len()
            );
        }
        if self.mqtt.broker_url.is_empty() {
            anyhow::bail!("mqtt.broker_url is required");
        }
        if self.ingest.batch_max == 0 || self.ingest.buffer_capacity == 0 {
            anyhow::bail!("ingest.batch_max and ingest.buffer_capacity must be positive");
        }
        Ok(())
    }
}
