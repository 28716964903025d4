use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `WINBACK__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Which delivery provider backs the transport, plus its credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// "mailgun" or "sendgrid".
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

/// Shared secrets. `unsubscribe_secret` is required before any send;
/// the others gate optional surfaces when set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub unsubscribe_secret: String,
    #[serde(default)]
    pub webhook_signing_key: Option<String>,
    #[serde(default)]
    pub cron_secret: Option<String>,
    #[serde(default)]
    pub send_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesConfig {
    /// Directory of `*.html` templates loaded at startup (file stem = name).
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_fallback_template")]
    pub fallback: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityConfig {
    /// Base URL of the product activity API; probe reports inactive when unset.
    #[serde(default)]
    pub api_url: Option<String>,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_provider_kind() -> String {
    "mailgun".to_string()
}
fn default_domain() -> String {
    "mail.example.com".to_string()
}
fn default_from_name() -> String {
    "Winback".to_string()
}
fn default_batch_size() -> usize {
    50
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_site_url() -> String {
    "https://example.com".to_string()
}
fn default_fallback_template() -> String {
    "announcement".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            api_key: String::new(),
            domain: default_domain(),
            from_name: default_from_name(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            delay_ms: default_delay_ms(),
            site_url: default_site_url(),
        }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: None,
            fallback: default_fallback_template(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            provider: ProviderConfig::default(),
            delivery: DeliveryConfig::default(),
            secrets: SecretsConfig::default(),
            templates: TemplatesConfig::default(),
            activity: ActivityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("WINBACK")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
