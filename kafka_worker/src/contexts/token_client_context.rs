use crate::consumer::{AuthCallback, HandshakeOutcome};
use rdkafka::client::OAuthToken;
use rdkafka::consumer::ConsumerContext;
use rdkafka::statistics::Statistics;
use rdkafka::ClientContext;
use std::error::Error;
use tracing::debug;

/// rdkafka context that answers OAUTHBEARER refresh requests through an
/// [`AuthCallback`].
pub struct MainClientContext {
    auth_callback: AuthCallback,
}

impl MainClientContext {
    pub fn new(auth_callback: AuthCallback) -> Self {
        Self { auth_callback }
    }
}

impl ClientContext for MainClientContext {
    const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

    fn stats(&self, statistics: Statistics) {
        debug!(
            client = %statistics.name,
            rx = statistics.rx,
            rx_bytes = statistics.rx_bytes,
            replyq = statistics.replyq,
            brokers = statistics.brokers.len(),
            "Kafka client statistics"
        );
    }

    fn generate_oauth_token(
        &self,
        _oauthbearer_config: Option<&str>,
    ) -> Result<OAuthToken, Box<dyn Error>> {
        let mut handshake = HandshakeOutcome::default();
        (self.auth_callback)(&mut handshake);

        match handshake {
            HandshakeOutcome::Token { value, expires_at } => Ok(OAuthToken {
                token: value,
                principal_name: "".to_string(),
                lifetime_ms: expires_at.timestamp_millis(),
            }),
            HandshakeOutcome::Failed(reason) => Err(reason.into()),
            HandshakeOutcome::Pending => Err("authentication callback gave no answer".into()),
        }
    }
}

impl ConsumerContext for MainClientContext {}
