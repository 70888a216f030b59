use serde::Deserialize;
use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    Plaintext,
    Ssl,
    /// SASL/OAUTHBEARER without TLS.
    SaslPlaintext,
    /// SASL/OAUTHBEARER over TLS.
    SaslSsl,
}

impl SecurityProtocol {
    pub fn uses_bearer_token(&self) -> bool {
        matches!(
            self,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        )
    }

    pub fn uses_tls(&self) -> bool {
        matches!(self, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl)
    }
}

impl Display for SecurityProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityProtocol::Plaintext => write!(f, "plaintext"),
            SecurityProtocol::Ssl => write!(f, "ssl"),
            SecurityProtocol::SaslPlaintext => write!(f, "sasl_plaintext"),
            SecurityProtocol::SaslSsl => write!(f, "sasl_ssl"),
        }
    }
}
