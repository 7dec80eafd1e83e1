//! Kubernetes resource builders for the demo application
//!
//! The demo is a ConfigMap-backed nginx Deployment spread over availability
//! zones, exposed by a Service. The three objects are rendered to a single
//! multi-document YAML stream and handed to `kubectl apply`.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    HTTPGetAction, ObjectFieldSelector, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    Service, ServicePort, ServiceSpec, TopologySpreadConstraint, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::naming::{validate_name, validate_namespace};
use crate::error::{AppError, AppResult};

/// Default container image for the demo workload
pub const DEFAULT_APP_IMAGE: &str = "nginx:1.27-alpine";

/// Value of `app.kubernetes.io/managed-by` on everything zonechaos creates
pub const MANAGED_BY: &str = "zonechaos";

/// Well-known node label carrying the availability zone
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

const HTML_ROOT: &str = "/usr/share/nginx/html";

/// How the demo Service is exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[strum(ascii_case_insensitive)]
pub enum ServiceType {
    ClusterIP,
    NodePort,
    #[default]
    LoadBalancer,
}

/// Parameters of the demo application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoApp {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: i32,
    /// Port the container listens on
    pub port: i32,
    pub service_type: ServiceType,
    /// Text served on the landing page
    pub message: String,
}

impl Default for DemoApp {
    fn default() -> Self {
        Self {
            name: "zone-demo".to_string(),
            namespace: "zone-demo".to_string(),
            image: DEFAULT_APP_IMAGE.to_string(),
            replicas: 3,
            port: 80,
            service_type: ServiceType::default(),
            message: "Hello from a zone-redundant deployment".to_string(),
        }
    }
}

impl DemoApp {
    pub fn config_map_name(&self) -> String {
        format!("{}-config", self.name)
    }

    /// Port exposed by the Service
    pub fn service_port(&self) -> i32 {
        80
    }

    /// Check the parameters before anything is rendered or applied
    pub fn validate(&self) -> AppResult<()> {
        validate_namespace(&self.namespace)?;
        validate_name(&self.name)?;
        if self.replicas < 1 {
            return Err(AppError::precondition("replicas must be at least 1"));
        }
        if !(1..=65535).contains(&self.port) {
            return Err(AppError::precondition(format!(
                "port {} is outside 1-65535",
                self.port
            )));
        }
        // The stock nginx image only listens on 80
        if self.image == DEFAULT_APP_IMAGE && self.port != 80 {
            return Err(AppError::precondition(format!(
                "{} listens on port 80; pass --image with an image that serves on port {}",
                DEFAULT_APP_IMAGE, self.port
            )));
        }
        Ok(())
    }
}

/// Labels shared by every demo object
pub fn app_labels(name: &str) -> BTreeMap<String, String> {
    [
        ("app.kubernetes.io/name".to_string(), name.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        ),
    ]
    .into_iter()
    .collect()
}

fn selector_labels(name: &str) -> BTreeMap<String, String> {
    [("app.kubernetes.io/name".to_string(), name.to_string())]
        .into_iter()
        .collect()
}

fn metadata(app: &DemoApp, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(app.namespace.clone()),
        labels: Some(app_labels(&app.name)),
        ..Default::default()
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn index_html(app: &DemoApp) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{name}</title></head>\n<body>\n\
         <h1>{message}</h1>\n<p>Application <b>{name}</b> in namespace <b>{namespace}</b>.</p>\n\
         </body>\n</html>\n",
        name = escape_html(&app.name),
        namespace = escape_html(&app.namespace),
        message = escape_html(&app.message),
    )
}

/// ConfigMap holding the landing page
pub fn config_map(app: &DemoApp) -> ConfigMap {
    let data: BTreeMap<String, String> = [
        ("index.html".to_string(), index_html(app)),
        ("APP_MESSAGE".to_string(), app.message.clone()),
    ]
    .into_iter()
    .collect();

    ConfigMap {
        metadata: metadata(app, app.config_map_name()),
        data: Some(data),
        ..Default::default()
    }
}

fn http_probe(port: i32, initial_delay: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/".to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(5),
        ..Default::default()
    }
}

fn resources() -> ResourceRequirements {
    let requests: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity("50m".to_string())),
        ("memory".to_string(), Quantity("64Mi".to_string())),
    ]
    .into_iter()
    .collect();
    let limits: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity("200m".to_string())),
        ("memory".to_string(), Quantity("128Mi".to_string())),
    ]
    .into_iter()
    .collect();

    ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    }
}

/// Deployment spreading the replicas over availability zones
pub fn deployment(app: &DemoApp) -> Deployment {
    let container = Container {
        name: "web".to_string(),
        image: Some(app.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![ContainerPort {
            container_port: app.port,
            name: Some("http".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(vec![EnvVar {
            name: "NODE_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "spec.nodeName".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: "content".to_string(),
            mount_path: HTML_ROOT.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        readiness_probe: Some(http_probe(app.port, 2)),
        liveness_probe: Some(http_probe(app.port, 10)),
        resources: Some(resources()),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(app, app.name.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(app.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&app.name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels(&app.name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: "content".to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: Some(app.config_map_name()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    topology_spread_constraints: Some(vec![TopologySpreadConstraint {
                        max_skew: 1,
                        topology_key: ZONE_LABEL.to_string(),
                        when_unsatisfiable: "ScheduleAnyway".to_string(),
                        label_selector: Some(LabelSelector {
                            match_labels: Some(selector_labels(&app.name)),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service exposing the Deployment on port 80
pub fn service(app: &DemoApp) -> Service {
    Service {
        metadata: metadata(app, app.name.clone()),
        spec: Some(ServiceSpec {
            type_: Some(app.service_type.to_string()),
            selector: Some(selector_labels(&app.name)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: app.service_port(),
                target_port: Some(IntOrString::Int(app.port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Render ConfigMap, Deployment and Service as one multi-document YAML stream
pub fn render_manifests(app: &DemoApp) -> AppResult<String> {
    let docs = [
        serde_yaml::to_string(&config_map(app))?,
        serde_yaml::to_string(&deployment(app))?,
        serde_yaml::to_string(&service(app))?,
    ];
    Ok(docs.join("---\n"))
}
