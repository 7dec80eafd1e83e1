//! zonechaos library
//!
//! Deploys a zone-spread demo workload to AKS and runs failure-injection
//! experiments against zone-redundant Azure resources. Every cluster and
//! cloud operation goes through the `kubectl`, `az` and `helm` CLIs.

pub mod azure;
pub mod chaos;
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod helm;
pub mod k8s;
