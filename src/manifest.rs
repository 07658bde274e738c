//! MutatingWebhookConfiguration rendering
//!
//! The API server only calls the injector once a MutatingWebhookConfiguration
//! routes Deployment CREATE/UPDATE requests to the webhook Service. This
//! module builds that object so it can be printed and applied alongside the
//! injector's own Deployment.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

use crate::error::Error;
use crate::webhook::DEFAULT_WEBHOOK_PATH;
use crate::Result;

/// Name of the webhook entry inside the configuration
pub const WEBHOOK_NAME: &str = "policy-injector.scheduling.k8s.io";

/// How the API server treats calls that fail or time out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    /// Admit the Deployment without injected policy
    #[default]
    Ignore,
    /// Reject the Deployment
    Fail,
}

impl FailurePolicy {
    fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::Ignore => "Ignore",
            FailurePolicy::Fail => "Fail",
        }
    }
}

/// Where the webhook is reachable and how it should be registered
#[derive(Args, Debug, Clone)]
pub struct ManifestArgs {
    /// Name of the MutatingWebhookConfiguration
    #[arg(long, default_value = "policy-injector")]
    pub name: String,

    /// Name of the Service in front of the injector
    #[arg(long, default_value = "policy-injector")]
    pub service_name: String,

    /// Namespace of the Service in front of the injector
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub service_namespace: String,

    /// Service port
    #[arg(long, default_value_t = 443)]
    pub service_port: i32,

    /// Request path the injector serves
    #[arg(long, default_value = DEFAULT_WEBHOOK_PATH)]
    pub path: String,

    /// PEM bundle of the CA that signed the serving certificate
    #[arg(long)]
    pub ca_bundle: Option<PathBuf>,

    /// Behavior when the webhook cannot be reached
    #[arg(long, value_enum, default_value_t = FailurePolicy::Ignore)]
    pub failure_policy: FailurePolicy,

    /// Seconds the API server waits for a response
    #[arg(long, default_value_t = 10)]
    pub timeout_seconds: i32,
}

/// Build the MutatingWebhookConfiguration for the injector
pub fn webhook_configuration(
    args: &ManifestArgs,
    ca_bundle: Option<Vec<u8>>,
) -> MutatingWebhookConfiguration {
    let webhook = MutatingWebhook {
        name: WEBHOOK_NAME.to_string(),
        admission_review_versions: vec!["v1".to_string()],
        client_config: WebhookClientConfig {
            ca_bundle: ca_bundle.map(ByteString),
            service: Some(ServiceReference {
                name: args.service_name.clone(),
                namespace: args.service_namespace.clone(),
                path: Some(args.path.clone()),
                port: Some(args.service_port),
            }),
            url: None,
        },
        rules: Some(vec![RuleWithOperations {
            api_groups: Some(vec!["apps".to_string()]),
            api_versions: Some(vec!["v1".to_string()]),
            operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
            resources: Some(vec!["deployments".to_string()]),
            scope: Some("Namespaced".to_string()),
        }]),
        failure_policy: Some(args.failure_policy.as_str().to_string()),
        side_effects: "None".to_string(),
        timeout_seconds: Some(args.timeout_seconds),
        ..Default::default()
    };

    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(args.name.clone()),
            ..Default::default()
        },
        webhooks: Some(vec![webhook]),
    }
}

/// Render the configuration as YAML, reading the CA bundle if one was given
pub fn render(args: &ManifestArgs) -> Result<String> {
    let ca_bundle = args
        .ca_bundle
        .as_ref()
        .map(std::fs::read)
        .transpose()?;

    serde_yaml::to_string(&webhook_configuration(args, ca_bundle))
        .map_err(|e| Error::encode(format!("failed to serialize webhook configuration: {e}")))
}
