//! Helm CLI integration, used to install Chaos Mesh on demand

mod client;

pub use client::HelmClient;
