mod auto_offset_reset;
mod payload_format;
mod security_protocol;

pub use auto_offset_reset::*;
pub use payload_format::*;
pub use security_protocol::*;

use std::path::PathBuf;
use std::time::Duration;

/// Broker connection and consumption settings. Built once and shared.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub security_protocol: SecurityProtocol,
    pub tls_ca_location: Option<PathBuf>,
    pub enable_tls_certificate_verification: bool,
    pub auto_offset_reset: AutoOffsetReset,
    pub session_timeout: Duration,
    pub statistics_interval: Option<Duration>,
    pub enable_auto_commit: bool,
    /// Upper bound for one blocking pull.
    pub poll_interval: Duration,
    /// Upper bound for one credential handshake.
    pub handshake_timeout: Duration,
    pub payload_format: PayloadFormat,
}

impl ConsumerSettings {
    pub fn new(brokers: Vec<String>, topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            group_id: group_id.into(),
            security_protocol: SecurityProtocol::SaslSsl,
            tls_ca_location: None,
            enable_tls_certificate_verification: true,
            auto_offset_reset: AutoOffsetReset::Earliest,
            session_timeout: Duration::from_secs(10),
            statistics_interval: None,
            enable_auto_commit: true,
            poll_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(30),
            payload_format: PayloadFormat::Raw,
        }
    }
}
