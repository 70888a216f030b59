pub mod auth;
pub mod connection_settings;
pub mod consumer;
pub mod consumption;
pub mod contexts;
pub mod error;
pub mod retry;
