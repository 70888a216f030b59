use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ConsumeCounters {
    pub received_messages_counter: AtomicU64,
    pub processed_messages_counter: AtomicU64,
    pub processing_failures_counter: AtomicU64,
    pub pull_errors_counter: AtomicU64,
    pub credential_refresh_failures_counter: AtomicU64,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
pub struct MessagesCounters {
    pub received_message_count: u64,
    pub processed_message_count: u64,
    pub processing_failure_count: u64,
    pub pull_error_count: u64,
    pub credential_refresh_failure_count: u64,
}

impl ConsumeCounters {
    pub fn snapshot(&self) -> MessagesCounters {
        MessagesCounters {
            received_message_count: self.received_messages_counter.load(Ordering::Relaxed),
            processed_message_count: self.processed_messages_counter.load(Ordering::Relaxed),
            processing_failure_count: self.processing_failures_counter.load(Ordering::Relaxed),
            pull_error_count: self.pull_errors_counter.load(Ordering::Relaxed),
            credential_refresh_failure_count: self
                .credential_refresh_failures_counter
                .load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}
