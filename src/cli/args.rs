//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use crate::dht::config::{DEFAULT_ALPHA, DEFAULT_K};
use crate::dht::ValidatorKind;
use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr};

/// Protocol parameters shared by both binaries
#[derive(Debug, Clone, Args)]
pub struct DhtArgs {
    /// Bucket size and replication factor
    #[arg(long, default_value_t = DEFAULT_K)]
    pub k: usize,

    /// Parallel queries per lookup round
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    pub alpha: usize,

    /// Timeout for a single RPC, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub rpc_timeout_ms: u64,

    /// Deadline for a whole lookup, in seconds
    #[arg(long, default_value_t = 30)]
    pub lookup_timeout_secs: u64,

    /// Record validation policy
    #[arg(long, value_enum, default_value_t = ValidatorKind::Null)]
    pub validator: ValidatorKind,
}

/// Output verbosity
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct LogArgs {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl LogArgs {
    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

/// CLI arguments for a DHT node
#[derive(Debug, Parser)]
#[command(name = "kad")]
#[command(about = "Run a Kademlia DHT node", long_about = None)]
pub struct NodeArgs {
    /// Interface to listen on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Listening port for incoming RPCs
    #[arg(short, long, default_value_t = 3001)]
    pub port: u16,

    /// Bootstrap peers, e.g. /ip4/127.0.0.1/tcp/3001/p2p/<id>
    #[arg(long, value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Derive the keypair from this seed; a fresh random keypair otherwise
    #[arg(long)]
    pub seed: Option<u64>,

    /// Client mode: query the DHT without joining its routing tables
    #[arg(long)]
    pub client: bool,

    #[command(flatten)]
    pub dht: DhtArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

impl NodeArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// CLI arguments for the one-shot client
#[derive(Debug, Parser)]
#[command(name = "kad-client")]
#[command(about = "Put or get a value through a DHT node", long_about = None)]
pub struct ClientArgs {
    /// Address of the node to talk to, e.g. /ip4/127.0.0.1/tcp/3001/p2p/<id>
    #[arg(long)]
    pub dest: String,

    /// Derive the keypair from this seed
    #[arg(long, default_value_t = 999)]
    pub seed: u64,

    #[command(flatten)]
    pub dht: DhtArgs,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: ClientCommand,
}

/// What the client should do
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ClientCommand {
    /// Store a value under a key
    Put { key: String, value: String },
    /// Fetch the value under a key
    Get {
        key: String,
        /// Distinct peers to collect records from
        #[arg(long, default_value_t = 1)]
        quorum: usize,
    },
}

impl ClientArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
