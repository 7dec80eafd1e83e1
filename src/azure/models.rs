//! Subsets of the `az` JSON output that zonechaos reads

use serde::{Deserialize, Serialize};

/// An AKS node pool as returned by `az aks nodepool list`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    pub name: String,
    #[serde(default)]
    pub enable_auto_scaling: Option<bool>,
    #[serde(default)]
    pub count: Option<i32>,
    #[serde(default)]
    pub availability_zones: Option<Vec<String>>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl NodePool {
    pub fn autoscaling(&self) -> bool {
        self.enable_auto_scaling.unwrap_or(false)
    }
}

/// High availability block of a Flexible Server
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HighAvailability {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub standby_availability_zone: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// A PostgreSQL Flexible Server as returned by `az postgres flexible-server show`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlexibleServer {
    pub name: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub high_availability: Option<HighAvailability>,
}

impl FlexibleServer {
    pub fn is_zone_redundant(&self) -> bool {
        self.high_availability
            .as_ref()
            .and_then(|ha| ha.mode.as_deref())
            == Some("ZoneRedundant")
    }

    pub fn zone(&self) -> &str {
        self.availability_zone.as_deref().unwrap_or("unknown")
    }
}
