//! # KMS v2 Plugin
//!
//! Envelope encryption for the API server: DEKs are encrypted with an
//! OpenBao transit key. Rotation of that key is detected by polling its
//! latest version on the health-check interval.

pub mod config;
pub mod server;

pub use config::KmsConfig;
pub use server::KmsPlugin;
