//! Policy Injector - mutating admission webhook for Deployment scheduling policy

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use policy_injector::config::InjectorArgs;
use policy_injector::manifest::{self, ManifestArgs};
use policy_injector::server::{self, ServerConfig};
use policy_injector::telemetry::{init_tracing, LogFormat};
use policy_injector::webhook::{webhook_router, WebhookState, DEFAULT_WEBHOOK_PATH};
use policy_injector::{PolicyInjector, DEFAULT_LISTEN_ADDR};

/// Policy Injector - injects node affinity preferences and topology spread
/// constraints into Deployments at admission time
#[derive(Parser, Debug)]
#[command(name = "policy-injector", version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the admission webhook (default mode)
    Serve(ServeArgs),

    /// Print the MutatingWebhookConfiguration that registers the webhook
    Manifest(ManifestArgs),
}

/// Serve mode arguments
#[derive(Parser, Debug)]
struct ServeArgs {
    #[command(flatten)]
    injector: InjectorArgs,

    /// Address to listen on
    #[arg(long, env = "LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Request path for AdmissionReviews
    #[arg(long, env = "WEBHOOK_PATH", default_value = DEFAULT_WEBHOOK_PATH)]
    path: String,

    /// PEM certificate chain for HTTPS
    #[arg(long, env = "TLS_CERT_FILE")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for HTTPS
    #[arg(long, env = "TLS_KEY_FILE")]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Manifest(args)) => {
            print!("{}", manifest::render(&args)?);
            Ok(())
        }
        Some(Commands::Serve(args)) => run_server(cli.log_format, args).await,
        None => {
            let args = ServeArgs::parse_from(std::env::args().take(1));
            run_server(cli.log_format, args).await
        }
    }
}

async fn run_server(log_format: LogFormat, args: ServeArgs) -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install aws-lc-rs crypto provider: {:?}", e);
    }

    init_tracing(log_format)?;

    let config = Arc::new(args.injector.into_config()?);
    let server_config = ServerConfig::new(args.listen, args.tls_cert, args.tls_key)?;

    tracing::info!(
        topology_key = %config.topology_key,
        app_label_key = %config.app_label_key,
        preferences = ?config.preferences,
        path = %args.path,
        "Starting policy injector"
    );

    let state = Arc::new(WebhookState::new(PolicyInjector::new(config)));
    let router = webhook_router(state, &args.path);

    server::serve(router, server_config).await?;
    Ok(())
}
