//! Daemon internals, exposed as a library so integration tests can
//! drive the generation client and player core directly.

pub mod audio;
pub mod core;
pub mod generation;
pub mod http;
