mod consume_counters;
mod consumption_loop;
mod message_handler;

pub use consume_counters::*;
pub use consumption_loop::*;
pub use message_handler::*;
