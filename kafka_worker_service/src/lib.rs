pub mod app_config;
pub mod handler;
pub mod startup;
