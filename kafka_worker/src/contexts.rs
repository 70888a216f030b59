mod token_client_context;

pub use token_client_context::*;
