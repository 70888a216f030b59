use crate::consumer::ConsumerSettings;
use anyhow::bail;
use rdkafka::ClientConfig;

impl TryFrom<&ConsumerSettings> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(value: &ConsumerSettings) -> Result<Self, Self::Error> {
        if value.brokers.is_empty() {
            bail!("No brokers specified")
        }
        if value.topic.is_empty() {
            bail!("No topic specified")
        }

        // https://raw.githubusercontent.com/confluentinc/librdkafka/master/CONFIGURATION.md
        let mut config = ClientConfig::new();

        let brokers_string = value.brokers.join(",");
        config
            .set("bootstrap.servers", brokers_string)
            .set("security.protocol", value.security_protocol.to_string())
            .set("group.id", &value.group_id)
            .set("auto.offset.reset", value.auto_offset_reset.to_string())
            .set(
                "session.timeout.ms",
                value.session_timeout.as_millis().to_string(),
            )
            .set("enable.auto.commit", value.enable_auto_commit.to_string())
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false");

        if value.security_protocol.uses_bearer_token() {
            config.set("sasl.mechanisms", "OAUTHBEARER");
        }

        if value.security_protocol.uses_tls() {
            if let Some(ca_location) = &value.tls_ca_location {
                config.set("ssl.ca.location", ca_location.to_string_lossy());
            }
            config.set(
                "enable.ssl.certificate.verification",
                value.enable_tls_certificate_verification.to_string(),
            );
        }

        if let Some(interval) = value.statistics_interval {
            config.set("statistics.interval.ms", interval.as_millis().to_string());
        }

        if let Ok(value) = std::env::var("RD_KAFKA_DEBUG") {
            config.set("debug", value);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{AutoOffsetReset, SecurityProtocol};
    use std::time::Duration;

    fn settings() -> ConsumerSettings {
        let mut settings = ConsumerSettings::new(
            vec!["broker-1:9092".to_owned(), "broker-2:9092".to_owned()],
            "payments",
            "payments-reader",
        );
        settings.tls_ca_location = Some("/etc/kafka/ca.pem".into());
        settings.auto_offset_reset = AutoOffsetReset::Latest;
        settings.session_timeout = Duration::from_secs(6);
        settings.statistics_interval = Some(Duration::from_secs(10));
        settings
    }

    #[test]
    fn sasl_ssl_settings_map_to_librdkafka_properties() {
        let config = ClientConfig::try_from(&settings()).unwrap();

        assert_eq!(config.get("bootstrap.servers"), Some("broker-1:9092,broker-2:9092"));
        assert_eq!(config.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(config.get("sasl.mechanisms"), Some("OAUTHBEARER"));
        assert_eq!(config.get("ssl.ca.location"), Some("/etc/kafka/ca.pem"));
        assert_eq!(config.get("group.id"), Some("payments-reader"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(config.get("session.timeout.ms"), Some("6000"));
        assert_eq!(config.get("statistics.interval.ms"), Some("10000"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
    }

    #[test]
    fn plaintext_has_no_sasl_or_tls_properties() {
        let mut settings = settings();
        settings.security_protocol = SecurityProtocol::Plaintext;

        let config = ClientConfig::try_from(&settings).unwrap();

        assert_eq!(config.get("security.protocol"), Some("plaintext"));
        assert_eq!(config.get("sasl.mechanisms"), None);
        assert_eq!(config.get("ssl.ca.location"), None);
    }

    #[test]
    fn empty_brokers_are_rejected() {
        let mut settings = settings();
        settings.brokers.clear();

        assert!(ClientConfig::try_from(&settings).is_err());
    }
}
