//! Agenda Sync - governance agenda cache daemon

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agenda_sync::{
    chain::{ChainReader, HttpRpcTransport, LogPoller, RpcTransport},
    config::Args,
    metadata::{HttpExistenceSource, HttpMetadataStore},
    PageLoad, SyncContext, SyncError,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("agenda_sync={},info", args.log_level).into());
    let (json_layer, text_layer) = if args.log_json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let rpc_urls = args.rpc_urls();
    info!("======================================");
    info!("  Agenda Sync");
    info!("======================================");
    info!("Network: {}", args.network);
    info!("RPC endpoints: {}", rpc_urls.join(", "));
    info!("Agenda manager: {}", args.agenda_manager);
    info!("Committee: {}", args.committee);
    info!("Metadata: {}", args.metadata_base_url);
    info!("Page size: {}, batch size: {}", args.page_size, args.batch_size);
    info!("======================================");

    // Ledger access
    let mut transports: Vec<Arc<dyn RpcTransport>> = Vec::with_capacity(rpc_urls.len());
    for url in &rpc_urls {
        let transport = HttpRpcTransport::new(url.clone(), args.request_timeout())
            .with_context(|| format!("failed to create RPC transport for {}", url))?;
        transports.push(Arc::new(transport));
    }
    let reader = Arc::new(ChainReader::new(
        transports,
        args.contracts(),
        args.retry_policy(),
    ));

    // Metadata
    let store = Arc::new(
        HttpMetadataStore::new(args.metadata_store_config())
            .context("failed to create metadata store")?,
    );
    let existence = Arc::new(
        HttpExistenceSource::new(
            args.metadata_api_url.clone(),
            args.network.clone(),
            args.request_timeout(),
        )
        .context("failed to create metadata range client")?,
    );

    let events = Arc::new(LogPoller::new(Arc::clone(&reader), args.poller_config()));

    let ctx = Arc::new(SyncContext::new(
        reader,
        store,
        existence,
        events,
        args.sync_config(),
    ));

    match ctx.load_next_page().await {
        Ok(PageLoad::Loaded { records, .. }) => {
            info!("First page loaded ({} agendas, {} total)", records, ctx.snapshot().total_count)
        }
        Ok(outcome) => info!("First page: {:?}", outcome),
        Err(e) => warn!("First page load failed, will retry on demand: {}", e),
    }

    ctx.start().await.context("failed to start sync context")?;

    let background = CancellationToken::new();

    if args.backfill_all {
        let ctx = Arc::clone(&ctx);
        let cancel = background.clone();
        tokio::spawn(async move {
            match ctx.backfill_all(&cancel).await {
                Ok(pages) => info!("Backfill loaded {} pages", pages),
                Err(SyncError::Cancelled) => info!("Backfill cancelled"),
                Err(e) => error!("Backfill failed: {}", e),
            }
        });
    }

    if args.summary_secs > 0 {
        let ctx = Arc::clone(&ctx);
        let cancel = background.clone();
        let period = Duration::from_secs(args.summary_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = ctx.snapshot();
                        info!(
                            total = snapshot.total_count,
                            loaded = snapshot.agendas.len(),
                            page = snapshot.current_page,
                            loading = snapshot.is_loading,
                            error = snapshot.error.as_deref().unwrap_or(""),
                            "Agenda snapshot"
                        );
                    }
                }
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    background.cancel();
    ctx.shutdown().await;

    Ok(())
}
