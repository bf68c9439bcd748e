pub mod config;
pub mod credentials;
pub mod error;
pub mod mood;
pub mod platform;
pub mod protocol;
pub mod state;
