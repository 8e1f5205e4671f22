//! CLI module
//!
//! Command-line interface for the `kad` node and the `kad-client` tool.

pub mod args;
pub mod config;

pub use args::{ClientArgs, ClientCommand, DhtArgs, LogArgs, NodeArgs};
pub use config::{init_logging, ClientConfig, IdentitySource, NodeConfig};
