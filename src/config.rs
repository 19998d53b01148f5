use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL (overridden by `DATABASE_URL`)
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 50,
            acquire_timeout_secs: 5,
        }
    }
}

/// Identity boundary settings (overridden by `JWT_SECRET`)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentsConfig {
    /// "mock" or the external provider name
    pub provider: String,
    /// Shared secret for the dev-only complete route (`X-Dev-Secret`)
    #[serde(default)]
    pub dev_secret: Option<String>,
    #[serde(default)]
    pub enable_mock_complete: bool,
    /// Shared secret the provider relay presents on callbacks (`X-Callback-Secret`).
    /// The callback route is not registered without it.
    #[serde(default)]
    pub callback_secret: Option<String>,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            dev_secret: None,
            enable_mock_complete: false,
            callback_secret: None,
        }
    }
}

/// Audit retry queue settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditConfig {
    pub retry_interval_ms: u64,
    pub max_attempts: u32,
    pub queue_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 500,
            max_attempts: 5,
            queue_size: 1024,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config yaml: {}", config_path))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.postgres_url = Some(url);
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(secret) = std::env::var("DEV_PAYMENT_SECRET") {
            self.payments.dev_secret = Some(secret);
        }
        if let Ok(secret) = std::env::var("CALLBACK_SECRET") {
            self.payments.callback_secret = Some(secret);
        }
    }

    /// Non-blank callback secret, if configured
    pub fn callback_secret(&self) -> Option<&str> {
        self.payments
            .callback_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// The mock complete route needs both the build feature and an explicit opt-in
    pub fn mock_complete_enabled(&self) -> bool {
        cfg!(feature = "mock-api")
            && self.payments.enable_mock_complete
            && self.payments.provider == "mock"
            && self
                .payments
                .dev_secret
                .as_deref()
                .is_some_and(|s| !s.is_empty())
    }
}
