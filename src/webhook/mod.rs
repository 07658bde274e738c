//! Mutating Admission Webhook
//!
//! This module provides a mutating admission webhook that intercepts
//! Deployment create/update operations and injects scheduling policy:
//! - a preferred node affinity term ranking the configured topology values
//! - a topology spread constraint over the configured topology key

pub mod deployment;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use deployment::PolicyInjector;

/// Default path the API server posts AdmissionReviews to
pub const DEFAULT_WEBHOOK_PATH: &str = "/mutate/deployments";

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Injector applied to every admitted Deployment
    pub injector: PolicyInjector,
}

impl WebhookState {
    /// Create a new webhook state around the given injector
    pub fn new(injector: PolicyInjector) -> Self {
        Self { injector }
    }
}

/// Create the webhook router
///
/// Routes:
/// - POST `path` - mutate Deployments
/// - GET /healthz - liveness probe
pub fn webhook_router(state: Arc<WebhookState>, path: &str) -> Router {
    Router::new()
        .route(path, post(deployment::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
