//! Deployment Mutation Webhook
//!
//! Handles AdmissionReview requests for Deployment resources, injecting a
//! preferred node affinity term and a topology spread constraint keyed on the
//! configured topology key.

use std::sync::Arc;

use axum::{extract::State, Json};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    NodeSelectorRequirement, NodeSelectorTerm, PodSpec, PreferredSchedulingTerm,
    TopologySpreadConstraint,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    DynamicObject,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::InjectorConfig;
use crate::error::Error;
use crate::Result;

use super::WebhookState;

/// Label the Deployment controller stamps on every ReplicaSet's pods
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Status message for requests that pass through untouched
pub const UNCHANGED_MESSAGE: &str = "no change after injection";

const OPERATOR_IN: &str = "In";
const DO_NOT_SCHEDULE: &str = "DoNotSchedule";

/// Turns the raw object of an admission request into a typed Deployment
pub trait Decoder: Send + Sync {
    /// Decode `raw` or fail with [`Error::Decode`]
    fn decode(&self, raw: &Value) -> Result<Deployment>;
}

/// [`Decoder`] backed by the k8s-openapi serde implementations
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, raw: &Value) -> Result<Deployment> {
        Deployment::deserialize(raw).map_err(|e| Error::decode(e.to_string()))
    }
}

/// Injects scheduling policy into admitted Deployments
pub struct PolicyInjector {
    config: Arc<InjectorConfig>,
    decoder: Box<dyn Decoder>,
}

impl PolicyInjector {
    /// Create an injector using the default JSON decoder
    pub fn new(config: Arc<InjectorConfig>) -> Self {
        Self::with_decoder(config, Box::new(JsonDecoder))
    }

    /// Create an injector with a caller-supplied decoder
    pub fn with_decoder(config: Arc<InjectorConfig>, decoder: Box<dyn Decoder>) -> Self {
        Self { config, decoder }
    }

    /// The configuration this injector applies
    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    /// Handle a single admission request
    ///
    /// Returns an allowed response carrying a JSONPatch when either mutation
    /// pass changed the Deployment, an allowed response without a patch when
    /// neither did, and a rejection (400 on decode failure, 500 on encode
    /// failure) otherwise.
    pub fn handle(&self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let uid = request.uid.as_str();

        let patch = match self.mutate(request) {
            Ok(Some(patch)) => patch,
            Ok(None) => {
                debug!(
                    uid = %uid,
                    name = %request.name,
                    "No change after injection, allowing unchanged"
                );
                let mut response = AdmissionResponse::from(request);
                response.result.message = UNCHANGED_MESSAGE.to_string();
                return response;
            }
            Err(e) => {
                error!(uid = %uid, name = %request.name, error = %e, "Rejecting deployment");
                return rejected(request, &e);
            }
        };

        info!(
            uid = %uid,
            name = %request.name,
            namespace = ?request.namespace,
            patch_ops = patch.0.len(),
            "Injecting scheduling policy into deployment"
        );

        match AdmissionResponse::from(request).with_patch(patch) {
            Ok(response) => response,
            Err(e) => {
                error!(uid = %uid, error = %e, "Failed to serialize patch");
                rejected(request, &Error::encode(e.to_string()))
            }
        }
    }

    /// Decode, run both mutation passes, and diff the result
    ///
    /// `Ok(None)` means neither pass reported a change.
    fn mutate(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<Option<json_patch::Patch>> {
        let object = request
            .object
            .as_ref()
            .ok_or_else(|| Error::decode("admission request contains no object"))?;
        let raw = serde_json::to_value(object).map_err(|e| Error::decode(e.to_string()))?;

        let mut deployment = self.decoder.decode(&raw)?;

        let affinity_changed = inject_affinity(&self.config, &mut deployment);
        let spread_changed = inject_spread_constraints(&self.config, &mut deployment);

        debug!(
            uid = %request.uid,
            affinity_changed,
            spread_changed,
            "Ran injection passes"
        );

        if !affinity_changed && !spread_changed {
            return Ok(None);
        }

        let mutated =
            serde_json::to_value(&deployment).map_err(|e| Error::encode(e.to_string()))?;
        Ok(Some(json_patch::diff(&raw, &mutated)))
    }
}

/// Build a rejection carrying the error's HTTP status and reason
fn rejected(request: &AdmissionRequest<DynamicObject>, err: &Error) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(request).deny(err.to_string());
    response.result.code = err.status_code().as_u16();
    response.result.reason = err.reason().to_string();
    response
}

/// Handle mutating admission review for Deployments
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(state.injector.handle(&req).into_review())
}

/// Pod spec of the Deployment's template, created if absent
fn pod_spec_mut(deployment: &mut Deployment) -> &mut PodSpec {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default)
}

/// The single preferred scheduling term this injector writes
fn preferred_term(config: &InjectorConfig) -> PreferredSchedulingTerm {
    PreferredSchedulingTerm {
        weight: 1,
        preference: NodeSelectorTerm {
            match_expressions: Some(vec![NodeSelectorRequirement {
                key: config.topology_key.clone(),
                operator: OPERATOR_IN.to_string(),
                values: Some(config.preferences.clone()),
            }]),
            ..Default::default()
        },
    }
}

fn term_uses_key(term: &PreferredSchedulingTerm, key: &str) -> bool {
    term.preference
        .match_expressions
        .iter()
        .flatten()
        .any(|expr| expr.key == key)
}

/// Inject the preferred node affinity term for the configured topology key
///
/// Returns true if the term was added. An existing term on the same key is
/// overwritten in place, which reports false.
// TODO: decide whether the in-place overwrite should count as a change; today
// it is dropped unless the spread constraint pass also changes the object.
pub fn inject_affinity(config: &InjectorConfig, deployment: &mut Deployment) -> bool {
    if config.preferences.is_empty() {
        return false;
    }

    let term = preferred_term(config);
    let terms = pod_spec_mut(deployment)
        .affinity
        .get_or_insert_with(Default::default)
        .node_affinity
        .get_or_insert_with(Default::default)
        .preferred_during_scheduling_ignored_during_execution
        .get_or_insert_with(Vec::new);

    if terms.is_empty() {
        terms.push(term);
        return true;
    }

    if let Some(existing) = terms
        .iter_mut()
        .find(|t| term_uses_key(t, &config.topology_key))
    {
        *existing = term;
        return false;
    }

    terms.push(term);
    true
}

/// Inject a topology spread constraint for the configured topology key
///
/// Returns true if a constraint was added. A constraint already declared for
/// the key is left as is.
pub fn inject_spread_constraints(config: &InjectorConfig, deployment: &mut Deployment) -> bool {
    let app = deployment
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(&config.app_label_key))
        .cloned()
        .unwrap_or_default();

    let constraint = TopologySpreadConstraint {
        max_skew: 1,
        topology_key: config.topology_key.clone(),
        when_unsatisfiable: DO_NOT_SCHEDULE.to_string(),
        label_selector: Some(LabelSelector {
            match_labels: Some([(config.app_label_key.clone(), app)].into()),
            ..Default::default()
        }),
        match_label_keys: Some(vec![POD_TEMPLATE_HASH_LABEL.to_string()]),
        ..Default::default()
    };

    let constraints = pod_spec_mut(deployment)
        .topology_spread_constraints
        .get_or_insert_with(Vec::new);

    if constraints.is_empty() {
        constraints.push(constraint);
        return true;
    }

    if constraints
        .iter()
        .any(|c| c.topology_key == config.topology_key)
    {
        return false;
    }

    constraints.push(constraint);
    true
}
