//! Kubernetes naming rules

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AppError, AppResult};

/// Maximum length of a DNS-1123 label
pub const MAX_NAME_LEN: usize = 63;

static DNS1123_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("hardcoded regex pattern is valid")
});

/// Check that `name` is a valid DNS-1123 label
pub fn validate_name(name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::invalid_name(name, "must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(AppError::invalid_name(
            name,
            format!("must be at most {} characters", MAX_NAME_LEN),
        ));
    }
    if !DNS1123_LABEL.is_match(name) {
        return Err(AppError::invalid_name(
            name,
            "must consist of lower case alphanumeric characters or '-', \
             and must start and end with an alphanumeric character",
        ));
    }
    Ok(())
}

/// Namespaces follow the DNS-1123 label rules; the `kube-` prefix is reserved
pub fn validate_namespace(namespace: &str) -> AppResult<()> {
    validate_name(namespace)?;
    if namespace.starts_with("kube-") {
        return Err(AppError::invalid_name(
            namespace,
            "the 'kube-' prefix is reserved for Kubernetes system namespaces",
        ));
    }
    Ok(())
}
