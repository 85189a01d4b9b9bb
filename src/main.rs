use std::io::IsTerminal;
use std::time::Duration;

use clap::Parser;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{self, RandomIdGenerator, Sampler},
    Resource,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::prelude::*;

mod api;
mod config;
#[macro_use]
mod error;
mod core;
mod cost_graph;
mod db;
mod model;
mod policy;
mod store;
mod sweeper;
mod trace;

use crate::config::Settings;
use crate::core::Core;
use crate::cost_graph::CostGraph;
use crate::store::LocalObjectStore;

#[derive(Debug, Parser)]
#[command(version)]
struct Opt {
    /// Path to the service's config file (TOML/YAML/JSON, per the `config` crate).
    #[arg(long, short, default_value = "config/skystore.toml")]
    config: String,

    /// Opentelemetry endpoint (http://ip:port)
    #[arg(long)]
    otlp_endpoint: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();
    setup_tracing(&opt)?;

    let settings = Settings::new(&opt.config)?;

    let db = db::connect(&settings.db).await?;
    db::run_migrations(&db).await?;
    info!("database migrations applied");

    let cost_graph = CostGraph::load(&settings.cost_graph)?;

    let store: Box<dyn store::ObjectStore> = Box::new(LocalObjectStore);
    if !settings.local_test {
        info!("no real cloud adapter is wired into this binary; falling back to the local no-op store");
    }

    let addr = settings.server_addr.parse()?;
    let sweeper_config = settings.sweeper.clone();
    let core = Core::new(db, cost_graph, settings, store)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper_core = core.clone();
    let sweeper_handle = tokio::spawn(sweeper::run(sweeper_core, sweeper_config, shutdown_rx));

    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    };

    api::serve(core, addr, shutdown).await?;

    if let Err(e) = sweeper_handle.await {
        tracing::warn!(error = %e, "sweeper task panicked");
    }

    info!("server is stopped");
    Ok(())
}

fn setup_tracing(args: &Opt) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    if args.otlp_endpoint.is_none() {
        use tracing_subscriber::EnvFilter;

        let env_filter = EnvFilter::from_default_env();
        let enable_color = std::io::stdout().is_terminal();

        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .with_ansi(enable_color)
            .init();
        return Ok(());
    }

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&args.otlp_endpoint.clone().unwrap())
                .with_timeout(Duration::from_secs(3)),
        )
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_max_events_per_span(64)
                .with_max_attributes_per_span(16)
                .with_resource(Resource::new(vec![KeyValue::new("service.name", "skystore_metadata")])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    let fmt_layer = tracing_subscriber::fmt::layer();
    let opentelemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let registry = tracing_subscriber::Registry::default()
        .with(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with(fmt_layer)
        .with(opentelemetry);
    registry.try_init()?;

    Ok(())
}
