//! kad - DHT node entry point
//!
//! Runs a Kademlia node: binds the RPC server, bootstraps from the given
//! peers, joins the network and serves until interrupted.

use anyhow::{Context, Result};
use kadnode::cli::{init_logging, NodeArgs, NodeConfig};
use kadnode::dht::{DhtNode, EventSink, TracingSink};
use kadnode::net::{start_client, start_server, ServerHandle};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at an unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = NodeArgs::parse_args();
    init_logging(args.log);
    debug!("CLI arguments: {:?}", args);

    let config = NodeConfig::from_args(&args).context("Invalid arguments")?;
    config.validate().context("Invalid configuration")?;

    let identity = config
        .identity
        .identity()
        .context("Failed to create node identity")?;
    let validator = config.validator.build();
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);

    let server = if config.dht.is_client() {
        info!("Running in client mode, not accepting connections");
        None
    } else {
        let handle = start_server(
            identity.clone(),
            config.listen,
            config.dht.clone(),
            validator.clone(),
            events.clone(),
        )
        .await
        .with_context(|| format!("Failed to start RPC server on {}", config.listen))?;
        info!("Host address: {}", handle.full_address());
        Some(handle)
    };

    let node = match &server {
        Some(handle) => handle.node.clone(),
        None => start_client(identity, config.dht.clone(), validator, events)
            .context("Failed to create client node")?,
    };

    let known = node.bootstrap(config.peers.clone()).await;
    if known > 0 {
        node.join().await;
    } else {
        warn!("No bootstrap peers, waiting for others to find us");
    }

    run(node, server).await
}

/// Serve until Ctrl-C, refreshing stale buckets and pruning expired state periodically
async fn run(node: DhtNode, server: Option<ServerHandle>) -> Result<()> {
    let mut refresh = interval(node.config().refresh_interval);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; the join just populated everything
    refresh.tick().await;

    let accept_loop = async {
        match server {
            Some(handle) => handle.wait().await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(accept_loop);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
            result = &mut accept_loop => {
                return result.context("RPC server stopped");
            }
            _ = refresh.tick() => {
                let refreshed = node.refresh_stale_buckets().await;
                let pruned = node.prune_expired();
                debug!(
                    "Refreshed {} buckets, pruned {} expired entries, {} peers in routing table",
                    refreshed,
                    pruned,
                    node.routing().len().await
                );
            }
        }
    }
}
