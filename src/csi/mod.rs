//! # Secrets Store CSI Provider
//!
//! Serves the secrets-store CSI driver's provider API on a Unix socket.
//! Each mount authenticates as the requesting pod, resolves the objects
//! listed in the SecretProviderClass and returns them as files.
//!
//! - [`params`]: attribute parsing and path normalization
//! - [`fetcher`]: per-object read/write against the backend
//! - [`cache`]: TTL cache shared across mounts
//! - [`provider`]: the gRPC service

pub mod cache;
pub mod config;
pub mod fetcher;
pub mod params;
pub mod provider;

pub use cache::SecretCache;
pub use config::CsiConfig;
pub use fetcher::{FetchReport, FetchedSecret, SecretsFetcher};
pub use params::{MountParams, SecretObject};
pub use provider::CsiProvider;
