mod broker_client;
mod broker_consumer;
mod consumer_settings;
mod consumer_state;
mod consumer_wrapper;
mod message;
mod message_metadata;

pub use broker_client::*;
pub use broker_consumer::*;
pub use consumer_settings::*;
pub use consumer_state::*;
pub use consumer_wrapper::*;
pub use message::*;
pub use message_metadata::*;
