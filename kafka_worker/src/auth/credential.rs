use chrono::{DateTime, TimeDelta, Utc};
use std::fmt::{Debug, Formatter};

/// Bearer credential presented to the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    value: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryNotAfterIssue;

impl Credential {
    pub fn new(
        value: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, ExpiryNotAfterIssue> {
        if expires_at <= issued_at {
            return Err(ExpiryNotAfterIssue);
        }

        Ok(Self {
            value,
            issued_at,
            expires_at,
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn lifetime(&self) -> TimeDelta {
        self.expires_at - self.issued_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
