//! Policy Injector - mutating admission webhook for Deployment scheduling policy
//!
//! Every Deployment admitted through the webhook gets, for one configured
//! topology key:
//! - a preferred node affinity term listing the preferred topology values
//! - a topology spread constraint keeping replicas evenly spread
//!
//! # Modules
//!
//! - [`config`] - Injector configuration and its CLI/env surface
//! - [`webhook`] - Admission webhook router and the Deployment injector
//! - [`manifest`] - MutatingWebhookConfiguration rendering
//! - [`server`] - HTTP(S) serving of the webhook router
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod manifest;
pub mod server;
pub mod telemetry;
pub mod webhook;

pub use config::InjectorConfig;
pub use error::Error;
pub use webhook::deployment::{inject_affinity, inject_spread_constraints, PolicyInjector};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default listen address for the webhook server
///
/// Port 8443 is used instead of 443 to avoid requiring root privileges.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8443";
