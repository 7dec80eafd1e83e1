//! Azure CLI integration
//!
//! Wraps the `az` binary for the AKS, virtual network and PostgreSQL
//! Flexible Server operations the chaos experiments need.

mod cli;
mod models;

pub use cli::AzCli;
pub use models::{FlexibleServer, HighAvailability, NodePool};
