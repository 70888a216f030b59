use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    Subscribing,
    Consuming,
    Closing,
    Closed,
    Faulted,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Created => "created",
            ConsumerState::Subscribing => "subscribing",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Closing => "closing",
            ConsumerState::Closed => "closed",
            ConsumerState::Faulted => "faulted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsumerState::Closed | ConsumerState::Faulted)
    }
}

impl Display for ConsumerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
