// SPDX-License-Identifier: MIT OR Apache-2.0

//! counterd server binary.

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use counterd::core::config::{Catalogs, Settings};
use counterd::core::error::{CounterdError, CounterdResult};
use counterd::core::generator::MessageGenerator;
use counterd::core::ingest::IngestOrchestrator;
use counterd::core::store::{MongoGateway, StoreGateway};
use counterd::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(name = "counterd", about = "Fact ingest and counter evaluation service")]
struct Args {
    /// Field catalog file
    #[arg(long, default_value = "config/fields.json")]
    fields: PathBuf,

    /// Index catalog file
    #[arg(long, default_value = "config/indexes.json")]
    indexes: PathBuf,

    /// Counter catalog file
    #[arg(long, default_value = "config/counters.json")]
    counters: PathBuf,

    /// Bind address, overriding COUNTERD_BIND
    #[arg(long)]
    bind: Option<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("cannot build runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(serve(args)) {
        Ok(()) => info!("shut down cleanly"),
        Err(e @ CounterdError::ConfigInvalid { .. }) => {
            error!("{e}");
            std::process::exit(2);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

async fn serve(args: Args) -> CounterdResult<()> {
    let settings = Settings::from_env()?;
    let catalogs = Catalogs::load_from_files(
        &args.fields,
        &args.indexes,
        &args.counters,
        settings.short_names,
    )?;
    info!(
        "catalogs loaded: {} fields, {} index rules, {} counters (short names: {})",
        catalogs.fields.entries().len(),
        catalogs.indexes.rules().len(),
        catalogs.counters.counters().len(),
        settings.short_names
    );

    let gateway: Arc<dyn StoreGateway> = Arc::new(MongoGateway::connect(&settings).await?);
    gateway.ensure_indexes().await?;

    let state = Arc::new(AppState {
        orchestrator: IngestOrchestrator::new(&catalogs, Arc::clone(&gateway), &settings),
        generator: MessageGenerator::new(
            Arc::clone(&catalogs.fields),
            Arc::clone(&catalogs.mapper),
        ),
        started: Instant::now(),
    });

    let bind = args.bind.unwrap_or_else(|| settings.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| CounterdError::internal(format!("cannot bind {bind}: {e}")))?;
    info!("listening on {bind}");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CounterdError::internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot listen for shutdown signal: {e}");
    }
}
