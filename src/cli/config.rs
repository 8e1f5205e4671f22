//! CLI configuration module
//!
//! Turns parsed arguments into validated runtime configuration.

use crate::cli::args::{ClientArgs, ClientCommand, DhtArgs, LogArgs, NodeArgs};
use crate::dht::{DhtConfig, NodeMode, ValidatorKind};
use crate::error::{DhtError, Result};
use crate::peer::{Contact, PeerIdentity};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// Where a node's keypair comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Deterministic keypair from a seed
    Seeded(u64),
    /// Fresh keypair from the OS RNG
    Ephemeral,
}

impl IdentitySource {
    /// Create the keypair
    pub fn identity(self) -> Result<PeerIdentity> {
        match self {
            IdentitySource::Seeded(seed) => PeerIdentity::derive(seed),
            IdentitySource::Ephemeral => PeerIdentity::generate(),
        }
    }
}

fn dht_config(args: &DhtArgs, mode: NodeMode) -> DhtConfig {
    DhtConfig {
        k: args.k,
        alpha: args.alpha,
        rpc_timeout: Duration::from_millis(args.rpc_timeout_ms),
        lookup_timeout: Duration::from_secs(args.lookup_timeout_secs),
        mode,
        ..Default::default()
    }
}

/// Configuration for the `kad` node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the RPC server binds to
    pub listen: SocketAddr,
    /// Bootstrap peers
    pub peers: Vec<Contact>,
    /// Keypair source
    pub identity: IdentitySource,
    /// Protocol parameters
    pub dht: DhtConfig,
    /// Record validation policy
    pub validator: ValidatorKind,
    /// Verbosity
    pub log: LogArgs,
}

impl NodeConfig {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &NodeArgs) -> Result<Self> {
        let peers = args
            .peers
            .iter()
            .map(|p| Contact::parse(p.trim()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let identity = match args.seed {
            Some(seed) => IdentitySource::Seeded(seed),
            None => IdentitySource::Ephemeral,
        };
        let mode = if args.client {
            NodeMode::Client
        } else {
            NodeMode::Server
        };

        Ok(Self {
            listen: SocketAddr::new(args.host, args.port),
            peers,
            identity,
            dht: dht_config(&args.dht, mode),
            validator: args.dht.validator,
            log: args.log,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.listen.port() == 0 {
            return Err(DhtError::config("Port cannot be 0", "port"));
        }
        self.dht.validate()?;
        debug!("Node configuration is valid");
        Ok(())
    }
}

/// Configuration for the `kad-client` tool
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The node to send queries through
    pub dest: Contact,
    /// Keypair source
    pub identity: IdentitySource,
    /// Protocol parameters, always in client mode
    pub dht: DhtConfig,
    /// Record validation policy
    pub validator: ValidatorKind,
    /// What to do
    pub command: ClientCommand,
    /// Verbosity
    pub log: LogArgs,
}

impl ClientConfig {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &ClientArgs) -> Result<Self> {
        Ok(Self {
            dest: Contact::parse(args.dest.trim())?,
            identity: IdentitySource::Seeded(args.seed),
            dht: dht_config(&args.dht, NodeMode::Client),
            validator: args.dht.validator,
            command: args.command.clone(),
            log: args.log,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.dht.validate()?;
        if let ClientCommand::Put { key, .. } = &self.command {
            if key.is_empty() {
                return Err(DhtError::config("key cannot be empty", "key"));
            }
        }
        Ok(())
    }
}

/// Install the global `tracing` subscriber
pub fn init_logging(log: LogArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if log.verbose {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
    debug!("Logging initialized at {:?}", log.log_level());
}
