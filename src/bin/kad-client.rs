//! kad-client - one-shot PUT/GET through a DHT node
//!
//! Joins as a client-mode peer through `--dest`, runs a single command and
//! exits non-zero on failure.

use anyhow::{Context, Result};
use kadnode::cli::{init_logging, ClientArgs, ClientCommand, ClientConfig};
use kadnode::dht::{DhtNode, EventSink, Record, TracingSink, ValidatorKind};
use kadnode::net::start_client;
use kadnode::peer::{AddressTtl, PeerIdentity};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ClientArgs::parse_args();
    init_logging(args.log);
    debug!("CLI arguments: {:?}", args);

    let config = ClientConfig::from_args(&args).context("Invalid arguments")?;
    config.validate().context("Invalid configuration")?;

    let identity = config
        .identity
        .identity()
        .context("Failed to create client identity")?;
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);
    let node = start_client(
        identity.clone(),
        config.dht.clone(),
        config.validator.build(),
        events,
    )
    .context("Failed to create client node")?;

    node.add_peers(vec![config.dest.clone()], AddressTtl::CLIENT_DEST)
        .await;
    info!("Using {} as entry point", config.dest);

    match &config.command {
        ClientCommand::Put { key, value } => put(&node, &identity, config.validator, key, value).await,
        ClientCommand::Get { key, quorum } => get(&node, key, *quorum).await,
    }
}

async fn put(
    node: &DhtNode,
    identity: &PeerIdentity,
    validator: ValidatorKind,
    key: &str,
    value: &str,
) -> Result<()> {
    let record = build_record(identity, validator, key, value)?;
    let stored_key = record.key.clone();
    let report = node
        .put(record)
        .await
        .with_context(|| format!("Failed to put '{}'", stored_key))?;
    info!(
        "RESULT: stored '{}' on {} of {} peers",
        stored_key, report.acks, report.attempted
    );
    if stored_key != key {
        println!("{}", stored_key);
    }
    Ok(())
}

async fn get(node: &DhtNode, key: &str, quorum: usize) -> Result<()> {
    let record = node
        .get(key, quorum)
        .await
        .with_context(|| format!("Failed to get '{}'", key))?;
    let value = String::from_utf8_lossy(&record.value);
    info!("RESULT: {}", value);
    println!("{}", value);
    Ok(())
}

/// Wrap the value in the metadata the chosen validator expects
fn build_record(
    identity: &PeerIdentity,
    validator: ValidatorKind,
    key: &str,
    value: &str,
) -> Result<Record> {
    let record = match validator {
        ValidatorKind::Null => Record::new(key, value.as_bytes().to_vec()),
        ValidatorKind::Timestamp => Record::timestamped(key, value.as_bytes().to_vec(), now_millis()?),
        // Signed keys live under the signer's namespace: /pk/<public key>/<key>
        ValidatorKind::Signature => Record::signed(
            identity.signing_key(),
            key,
            value.as_bytes().to_vec(),
            now_millis()?,
        ),
    };
    Ok(record)
}

fn now_millis() -> Result<u64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the Unix epoch")?;
    Ok(elapsed.as_millis() as u64)
}
