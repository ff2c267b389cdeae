pub mod config;
pub mod error;
pub mod services;
pub mod store;
pub mod types;
