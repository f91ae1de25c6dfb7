use std::sync::Arc;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::{crate_authors, crate_description, crate_version, Parser};
use kube::Config;
use prometheus_client::registry::Registry;
use reqwest::Client as HttpClient;
use tmb_k8s_util::client::new_client_with_metrics;
use tmb_operator::backend::{self, State};
use tmb_operator::cloud::ArmTrafficManagerClient;
use tmb_operator::metrics::Metrics;
use tmb_operator::telemetry;

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(c.metrics())
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[derive(Parser, Debug)]
#[command(
    name = "traffic-manager-backend-operator",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Listen on given port
    #[arg(short, long, default_value_t = 8080, env)]
    port: u32,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    /// Example: "info,kube=debug,tmb_operator=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// This optional argument specifies the URL to which traces will be sent using
    /// OpenTelemetry. If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,

    /// Base URL for the Azure Resource Manager-compatible Traffic Manager
    /// API. Overridden in tests to point at a local stub.
    #[arg(long, default_value = "https://management.azure.com", env = "ARM_BASE_URL")]
    arm_base_url: String,

    /// Azure subscription id the Traffic Manager profiles live under.
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    azure_subscription_id: String,

    /// Bearer token used to authenticate to the Traffic Manager API. A
    /// production deployment loads this from workload identity; this flag
    /// exists for the static-credential path the reconciler itself doesn't
    /// need to know about.
    #[arg(long, env = "AZURE_ACCESS_TOKEN")]
    azure_access_token: String,

    /// Upper bound on concurrent cloud endpoint DELETEs issued while
    /// tearing down a deleted backend.
    #[arg(long, default_value_t = 5, env)]
    teardown_concurrency: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let mut registry = Registry::with_prefix("tmb_operator");
    let config = Config::infer().await?;
    let client = new_client_with_metrics(config, &mut registry).await?;

    let http = HttpClient::builder().build()?;
    let cloud = Arc::new(ArmTrafficManagerClient::new(
        http,
        args.arm_base_url,
        args.azure_subscription_id,
        args.azure_access_token,
    ));

    let state = State::new(Metrics::new(registry));
    let controller = backend::run(state.clone(), client, cloud, args.teardown_concurrency);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(metrics)
    })
    .bind(format!("0.0.0.0:{}", args.port))?
    .shutdown_timeout(5);

    tokio::join!(controller, server.run()).1?;
    Ok(())
}
