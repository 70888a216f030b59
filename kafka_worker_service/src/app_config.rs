use anyhow::{bail, Context};
use config::Config;
use kafka_worker::auth::{AuthEndpointConfig, LeadTime};
use kafka_worker::consumer::{AutoOffsetReset, ConsumerSettings, PayloadFormat, SecurityProtocol};
use kafka_worker::consumption::ConsumptionLoopSettings;
use kafka_worker::retry::RetryPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Deserialize, Debug)]
pub struct AppConfig {
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub restart: RetryConfig,
}

#[derive(Deserialize, Debug)]
pub struct KafkaConfig {
    /// Comma separated `host:port` list.
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    #[serde(default = "default_security_protocol")]
    pub security_protocol: SecurityProtocol,
    pub tls_ca_location: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub enable_tls_certificate_verification: bool,
    #[serde(default)]
    pub auto_offset_reset: AutoOffsetReset,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    pub statistics_interval_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enable_auto_commit: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default)]
    pub payload_format: PayloadFormat,
}

#[derive(Deserialize, Debug)]
pub struct AuthConfig {
    pub url: String,
    pub app_name: String,
    #[serde(default = "default_token_lifetime_minutes")]
    pub token_lifetime_minutes: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Deserialize, Debug)]
pub struct RefreshConfig {
    /// Fraction of the token lifetime left when a refresh becomes due.
    #[serde(default = "default_lead_fraction")]
    pub lead_fraction: f64,
    /// Fixed lead, takes precedence over `lead_fraction`.
    pub lead_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub proactive: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Deserialize, Debug)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            lead_fraction: default_lead_fraction(),
            lead_ms: None,
            proactive: true,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl AppConfig {
    pub fn build() -> Result<Self, anyhow::Error> {
        let config = Config::builder()
            .add_source(config::File::with_name("appsettings").required(false))
            .add_source(config::Environment::with_prefix("App").separator("__"))
            .build()
            .context("While building config")?;

        let deserialized_config: AppConfig = config
            .try_deserialize()
            .context("While deserializing config")?;

        info!("App config: {deserialized_config:?}");

        Ok(deserialized_config)
    }

    pub fn consumer_settings(&self) -> Result<ConsumerSettings, anyhow::Error> {
        let kafka = &self.kafka;
        let brokers: Vec<String> = kafka
            .brokers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_owned)
            .collect();

        if brokers.is_empty() {
            bail!("No brokers specified")
        }
        if kafka.topic.trim().is_empty() {
            bail!("No topic specified")
        }
        if kafka.group_id.trim().is_empty() {
            bail!("No consumer group specified")
        }

        let mut settings = ConsumerSettings::new(brokers, kafka.topic.trim(), kafka.group_id.trim());
        settings.security_protocol = kafka.security_protocol;
        settings.tls_ca_location = kafka.tls_ca_location.clone();
        settings.enable_tls_certificate_verification = kafka.enable_tls_certificate_verification;
        settings.auto_offset_reset = kafka.auto_offset_reset;
        settings.session_timeout = Duration::from_millis(kafka.session_timeout_ms);
        settings.statistics_interval = kafka.statistics_interval_ms.map(Duration::from_millis);
        settings.enable_auto_commit = kafka.enable_auto_commit;
        settings.poll_interval = Duration::from_millis(kafka.poll_interval_ms);
        settings.handshake_timeout = Duration::from_millis(kafka.handshake_timeout_ms);
        settings.payload_format = kafka.payload_format;

        Ok(settings)
    }

    pub fn auth_endpoint(&self) -> Result<AuthEndpointConfig, anyhow::Error> {
        let auth = &self.auth;
        let url = reqwest::Url::parse(&auth.url)
            .with_context(|| format!("While parsing auth url '{}'", auth.url))?;
        if auth.token_lifetime_minutes == 0 {
            bail!("Token lifetime must be at least one minute")
        }

        Ok(AuthEndpointConfig {
            auth_url: url.to_string(),
            requested_lifetime_minutes: auth.token_lifetime_minutes,
            app_name: auth.app_name.clone(),
            request_timeout: Duration::from_millis(auth.request_timeout_ms),
        })
    }

    pub fn lead_time(&self) -> Result<LeadTime, anyhow::Error> {
        match self.refresh.lead_ms {
            Some(ms) => Ok(LeadTime::Fixed(Duration::from_millis(ms))),
            None if (0.0..1.0).contains(&self.refresh.lead_fraction) => {
                Ok(LeadTime::FractionOfLifetime(self.refresh.lead_fraction))
            }
            None => bail!(
                "Refresh lead fraction must be in [0, 1), got {}",
                self.refresh.lead_fraction
            ),
        }
    }

    pub fn consumption_loop_settings(&self) -> Result<ConsumptionLoopSettings, anyhow::Error> {
        let lead_time = self.lead_time()?;

        Ok(ConsumptionLoopSettings {
            restart_policy: self.restart.to_policy(),
            proactive_refresh: self.refresh.proactive.then_some(lead_time),
            ..Default::default()
        })
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            jitter: self.jitter.clamp(0.0, 1.0),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_security_protocol() -> SecurityProtocol {
    SecurityProtocol::SaslSsl
}

fn default_session_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_handshake_timeout_ms() -> u64 {
    30_000
}

fn default_token_lifetime_minutes() -> u32 {
    60
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_lead_fraction() -> f64 {
    0.2
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter() -> f64 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> AppConfig {
        Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
        [kafka]
        brokers = "b1:9092, b2:9092"
        topic = "orders"
        group_id = "orders-workers"

        [auth]
        url = "https://auth.local/token"
        app_name = "orders-worker"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL);

        let settings = config.consumer_settings().unwrap();
        let auth = config.auth_endpoint().unwrap();
        let loop_settings = config.consumption_loop_settings().unwrap();

        assert_eq!(settings.brokers, vec!["b1:9092", "b2:9092"]);
        assert_eq!(settings.security_protocol, SecurityProtocol::SaslSsl);
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
        assert_eq!(auth.requested_lifetime_minutes, 60);
        assert_eq!(auth.app_name, "orders-worker");
        assert_eq!(loop_settings.restart_policy.max_attempts, 4);
        assert!(matches!(
            loop_settings.proactive_refresh,
            Some(LeadTime::FractionOfLifetime(f)) if f == 0.2
        ));
    }

    #[test]
    fn empty_brokers_are_rejected() {
        let config = parse(&MINIMAL.replace("b1:9092, b2:9092", " , "));

        let error = config.consumer_settings().unwrap_err();

        assert_eq!(error.to_string(), "No brokers specified");
    }

    #[test]
    fn lead_fraction_out_of_range_is_rejected() {
        let config = parse(&format!("{MINIMAL}\n[refresh]\nlead_fraction = 1.5\n"));

        assert!(config.lead_time().is_err());
    }

    #[test]
    fn fixed_lead_wins_over_fraction() {
        let config = parse(&format!("{MINIMAL}\n[refresh]\nlead_ms = 30000\nproactive = true\n"));

        let loop_settings = config.consumption_loop_settings().unwrap();

        assert!(matches!(
            loop_settings.proactive_refresh,
            Some(LeadTime::Fixed(lead)) if lead == Duration::from_secs(30)
        ));
    }

    #[test]
    fn enums_are_snake_case() {
        let config = parse(&MINIMAL.replace(
            "group_id = \"orders-workers\"",
            "group_id = \"orders-workers\"\nsecurity_protocol = \"plaintext\"\nauto_offset_reset = \"latest\"\npayload_format = \"utf8\"",
        ));

        let settings = config.consumer_settings().unwrap();

        assert_eq!(settings.security_protocol, SecurityProtocol::Plaintext);
        assert_eq!(settings.auto_offset_reset, AutoOffsetReset::Latest);
        assert_eq!(settings.payload_format, PayloadFormat::Utf8);
    }
}
