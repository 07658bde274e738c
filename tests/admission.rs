//! End-to-end admission tests for the policy injector
//!
//! These drive the public webhook router with full AdmissionReview payloads,
//! the same way the API server calls it, and apply the returned JSONPatch to
//! check the Deployment that would be persisted.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use k8s_openapi::api::apps::v1::Deployment;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use kube::core::DynamicObject;
use policy_injector::webhook::{webhook_router, WebhookState, DEFAULT_WEBHOOK_PATH};
use policy_injector::{InjectorConfig, PolicyInjector};
use serde_json::{json, Value};
use tower::ServiceExt;

fn zone_config() -> InjectorConfig {
    InjectorConfig::new(
        "zone",
        "app",
        vec!["us-east-1a".to_string(), "us-east-1b".to_string()],
    )
    .unwrap()
}

fn svc_deployment() -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": "svc", "namespace": "default", "labels": { "app": "svc" } },
        "spec": {
            "replicas": 3,
            "selector": { "matchLabels": { "app": "svc" } },
            "template": {
                "metadata": { "labels": { "app": "svc" } },
                "spec": { "containers": [{ "name": "svc", "image": "registry.local/svc:1.4.2" }] }
            }
        }
    })
}

fn review(object: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "b1f4c2de-0c7a-4d0b-9f55-0d5c8e7a9a11",
            "kind": { "group": "apps", "version": "v1", "kind": "Deployment" },
            "resource": { "group": "apps", "version": "v1", "resource": "deployments" },
            "name": "svc",
            "namespace": "default",
            "operation": "CREATE",
            "userInfo": { "username": "system:serviceaccount:ci:deployer" },
            "object": object
        }
    })
}

fn request(object: Value) -> AdmissionRequest<DynamicObject> {
    let review: AdmissionReview<DynamicObject> = serde_json::from_value(review(object)).unwrap();
    review.try_into().unwrap()
}

/// Story: the documented end-to-end scenario
///
/// A Deployment with no scheduling policy, labelled `app: svc`, is admitted
/// with a patch that adds one preferred zone term and one zone spread
/// constraint selecting `app: svc`.
#[test]
fn story_deployment_without_policy_gets_zone_policy() {
    let injector = PolicyInjector::new(Arc::new(zone_config()));
    let request = request(svc_deployment());
    let original = serde_json::to_value(request.object.as_ref().unwrap()).unwrap();

    let response = injector.handle(&request);
    assert!(response.allowed);

    let patch: json_patch::Patch = serde_json::from_slice(response.patch.as_ref().unwrap()).unwrap();
    let mut patched = original;
    json_patch::patch(&mut patched, &patch.0).unwrap();
    let deployment: Deployment = serde_json::from_value(patched).unwrap();

    let pod_spec = deployment.spec.unwrap().template.spec.unwrap();

    let terms = pod_spec
        .affinity
        .unwrap()
        .node_affinity
        .unwrap()
        .preferred_during_scheduling_ignored_during_execution
        .unwrap();
    assert_eq!(terms.len(), 1);
    let expr = &terms[0].preference.match_expressions.as_ref().unwrap()[0];
    assert_eq!(expr.key, "zone");
    assert_eq!(
        expr.values,
        Some(vec!["us-east-1a".to_string(), "us-east-1b".to_string()])
    );

    let constraints = pod_spec.topology_spread_constraints.unwrap();
    assert_eq!(constraints.len(), 1);
    assert_eq!(constraints[0].topology_key, "zone");
    let selector = constraints[0].label_selector.clone().unwrap();
    assert_eq!(
        selector.match_labels.unwrap().get("app").map(String::as_str),
        Some("svc")
    );

    // containers are untouched by the patch
    assert_eq!(pod_spec.containers.len(), 1);
    assert_eq!(
        pod_spec.containers[0].image.as_deref(),
        Some("registry.local/svc:1.4.2")
    );
}

/// Story: re-submitting the patched Deployment is a no-op
#[test]
fn story_resubmitted_deployment_is_unchanged() {
    let injector = PolicyInjector::new(Arc::new(zone_config()));
    let first = request(svc_deployment());
    let mut patched = serde_json::to_value(first.object.as_ref().unwrap()).unwrap();

    let response = injector.handle(&first);
    let patch: json_patch::Patch = serde_json::from_slice(response.patch.as_ref().unwrap()).unwrap();
    json_patch::patch(&mut patched, &patch.0).unwrap();

    let second = injector.handle(&request(patched));

    assert!(second.allowed);
    assert!(second.patch.is_none());
}

/// Story: the API server sees a 400 rejection for a malformed Deployment
#[tokio::test]
async fn story_malformed_deployment_rejected_over_http() {
    let state = Arc::new(WebhookState::new(PolicyInjector::new(Arc::new(zone_config()))));
    let router = webhook_router(state, DEFAULT_WEBHOOK_PATH);

    let mut object = svc_deployment();
    object["spec"]["template"]["spec"]["containers"] = json!("not-a-list");

    let http_request = Request::builder()
        .method("POST")
        .uri(DEFAULT_WEBHOOK_PATH)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&review(object)).unwrap()))
        .unwrap();

    let response = router.oneshot(http_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let review: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(review["response"]["uid"], "b1f4c2de-0c7a-4d0b-9f55-0d5c8e7a9a11");
    assert_eq!(review["response"]["allowed"], false);
    assert_eq!(review["response"]["status"]["code"], 400);
    assert!(review["response"]["status"]["message"]
        .as_str()
        .unwrap()
        .contains("decode error"));
}
