//! Chaos Mesh resource builders
//!
//! Creates the NetworkChaos CRD used by the zone partition experiment.

use serde_json::json;

use super::types::ZONES;
use crate::k8s::{MANAGED_BY, ZONE_LABEL};

/// Chaos Mesh API group/version
pub const CHAOS_MESH_API_VERSION: &str = "chaos-mesh.org/v1alpha1";

/// CRD that must exist before NetworkChaos objects can be applied
pub const NETWORK_CHAOS_CRD: &str = "networkchaos.chaos-mesh.org";

/// Name of the NetworkChaos object isolating `zone`
pub fn partition_name(zone: u8) -> String {
    format!("zonechaos-partition-zone{}", zone)
}

/// The zone number from a node's zone label (`westeurope-2` gives `2`)
pub fn zone_suffix(zone_label: &str) -> &str {
    zone_label.rsplit('-').next().unwrap_or(zone_label)
}

/// All zones except `isolated`
pub fn other_zones(isolated: u8) -> Vec<String> {
    let isolated = isolated.to_string();
    ZONES
        .iter()
        .filter(|z| **z != isolated)
        .map(|z| z.to_string())
        .collect()
}

/// Create a NetworkChaos manifest partitioning pods in `isolated_zone` from
/// pods in every other zone, in both directions
pub fn create_zone_partition(namespace: &str, isolated_zone: u8) -> serde_json::Value {
    json!({
        "apiVersion": CHAOS_MESH_API_VERSION,
        "kind": "NetworkChaos",
        "metadata": {
            "name": partition_name(isolated_zone),
            "namespace": namespace,
            "labels": {
                "app.kubernetes.io/managed-by": MANAGED_BY
            }
        },
        "spec": {
            "action": "partition",
            "mode": "all",
            "selector": {
                "namespaces": [namespace],
                "labelSelectors": {
                    ZONE_LABEL: isolated_zone.to_string()
                }
            },
            "direction": "both",
            "target": {
                "mode": "all",
                "selector": {
                    "namespaces": [namespace],
                    "expressionSelectors": [{
                        "key": ZONE_LABEL,
                        "operator": "In",
                        "values": other_zones(isolated_zone)
                    }]
                }
            }
        }
    })
}
