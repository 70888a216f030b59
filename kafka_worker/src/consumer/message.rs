use crate::consumer::PartitionOffset;
use bytes::Bytes;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Message {
    pub partition_offset: PartitionOffset,
    pub timestamp: Option<DateTime<Utc>>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl Message {
    pub fn partition(&self) -> i32 {
        *self.partition_offset.partition()
    }

    pub fn offset(&self) -> i64 {
        *self.partition_offset.offset()
    }
}
