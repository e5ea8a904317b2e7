//! # KubeBao
//!
//! OpenBao integration for Kubernetes. Three cooperating processes share one
//! backend client:
//!
//! ```text
//! kube-apiserver ──KMS v2──▶ kubebao-kms ──┐
//! CSI driver ──provider API──▶ kubebao-csi ─┼──▶ backend::OpenBaoClient ──▶ OpenBao
//! BaoSecret / BaoPolicy ──▶ kubebao-operator┘
//! ```
//!
//! - [`kms`]: envelope-encryption plugin backed by a transit key
//! - [`csi`]: secrets-store CSI provider with a TTL cache
//! - [`controller`]: BaoSecret and BaoPolicy reconcilers
//! - [`backend`]: authenticated client for the OpenBao HTTP API

pub mod backend;
pub mod config;
pub mod controller;
pub mod crd;
pub mod csi;
pub mod errors;
pub mod kms;
pub mod observability;
pub mod proto;
pub mod transport;
pub mod utils;

pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
