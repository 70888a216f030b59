use serde::Deserialize;

/// How message keys and values are checked before delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Bytes are delivered as they are.
    #[default]
    Raw,
    /// Key and value must be valid UTF-8, otherwise the pull fails.
    Utf8,
}

impl PayloadFormat {
    pub fn validate(&self, bytes: &[u8]) -> Result<(), String> {
        match self {
            PayloadFormat::Raw => Ok(()),
            PayloadFormat::Utf8 => std::str::from_utf8(bytes)
                .map(|_| ())
                .map_err(|e| e.to_string()),
        }
    }
}
