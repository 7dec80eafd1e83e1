//! Tests for demo manifest rendering and connection instructions
//!
//! These go through the public API only; no cluster or CLI is needed.

use std::time::Duration;

use serde::Deserialize;
use serde_yaml::Value;

use zonechaos::k8s::{
    connection_instructions, render_manifests, validate_namespace, DemoApp, DeploymentReport,
    ServiceSnapshot, ServiceType, ZONE_LABEL,
};

fn demo(service_type: ServiceType) -> DemoApp {
    DemoApp {
        name: "shop".to_string(),
        namespace: "zone-test".to_string(),
        replicas: 3,
        service_type,
        message: "Served from <zone> & friends".to_string(),
        ..Default::default()
    }
}

fn documents(yaml: &str) -> Vec<Value> {
    serde_yaml::Deserializer::from_str(yaml)
        .map(|doc| Value::deserialize(doc).unwrap())
        .collect()
}

fn report(service: Option<ServiceSnapshot>) -> DeploymentReport {
    DeploymentReport {
        name: "shop".to_string(),
        namespace: "zone-test".to_string(),
        namespace_created: true,
        ready_replicas: 3,
        desired_replicas: 3,
        elapsed: Duration::from_secs(42),
        service,
    }
}

#[test]
fn test_render_manifests_document_order() {
    let yaml = render_manifests(&demo(ServiceType::LoadBalancer)).unwrap();
    let docs = documents(&yaml);

    let kinds: Vec<&str> = docs.iter().map(|d| d["kind"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["ConfigMap", "Deployment", "Service"]);

    for doc in &docs {
        assert_eq!(doc["metadata"]["namespace"], "zone-test");
        assert_eq!(
            doc["metadata"]["labels"]["app.kubernetes.io/managed-by"],
            "zonechaos"
        );
    }
}

#[test]
fn test_deployment_spreads_over_zones() {
    let yaml = render_manifests(&demo(ServiceType::ClusterIP)).unwrap();
    let docs = documents(&yaml);
    let deployment = &docs[1];

    assert_eq!(deployment["spec"]["replicas"], 3);
    let spread = &deployment["spec"]["template"]["spec"]["topologySpreadConstraints"][0];
    assert_eq!(spread["topologyKey"], ZONE_LABEL);
    assert_eq!(spread["maxSkew"], 1);
    assert_eq!(spread["whenUnsatisfiable"], "ScheduleAnyway");
}

#[test]
fn test_landing_page_is_escaped() {
    let yaml = render_manifests(&demo(ServiceType::ClusterIP)).unwrap();
    let docs = documents(&yaml);
    let html = docs[0]["data"]["index.html"].as_str().unwrap();

    assert!(html.contains("Served from &lt;zone&gt; &amp; friends"));
    assert_eq!(docs[0]["data"]["APP_MESSAGE"], "Served from <zone> & friends");
}

#[test]
fn test_service_type_rendered() {
    let yaml = render_manifests(&demo(ServiceType::NodePort)).unwrap();
    let docs = documents(&yaml);
    assert_eq!(docs[2]["spec"]["type"], "NodePort");
    assert_eq!(docs[2]["spec"]["ports"][0]["port"], 80);
}

#[test]
fn test_namespace_validation() {
    assert!(validate_namespace("zone-test").is_ok());
    assert!(validate_namespace("Zone_Test").is_err());
    assert!(validate_namespace(&"a".repeat(64)).is_err());
}

#[test]
fn test_instructions_load_balancer_ready() {
    let text = connection_instructions(&report(Some(ServiceSnapshot {
        name: "shop".to_string(),
        service_type: ServiceType::LoadBalancer,
        cluster_ip: Some("10.0.12.7".to_string()),
        port: 80,
        node_port: Some(31080),
        ingress: Some("20.50.1.2".to_string()),
    })));

    assert!(text.starts_with("Deployment zone-test/shop is ready (3/3 replicas available)."));
    assert!(text.contains("Namespace zone-test was created."));
    assert!(text.contains("curl http://20.50.1.2:80/"));
}

#[test]
fn test_instructions_load_balancer_pending() {
    let text = connection_instructions(&report(Some(ServiceSnapshot {
        name: "shop".to_string(),
        service_type: ServiceType::LoadBalancer,
        cluster_ip: None,
        port: 80,
        node_port: None,
        ingress: None,
    })));

    assert!(text.contains("still pending"));
    assert!(text.contains("kubectl get svc shop -n zone-test -w"));
}

#[test]
fn test_instructions_cluster_ip_port_forward() {
    let text = connection_instructions(&report(Some(ServiceSnapshot {
        name: "shop".to_string(),
        service_type: ServiceType::ClusterIP,
        cluster_ip: Some("10.0.12.7".to_string()),
        port: 80,
        node_port: None,
        ingress: None,
    })));

    assert!(text.contains("kubectl port-forward -n zone-test svc/shop 8080:80"));
}

#[test]
fn test_instructions_without_service() {
    let mut r = report(None);
    r.ready_replicas = 1;
    let text = connection_instructions(&r);

    assert!(text.contains("is NOT ready (1/3 replicas available)"));
    assert!(text.contains("No service found for shop."));
}
