//! Cluster access module
//!
//! Defines the capabilities the test helpers need from the cluster and the
//! adapters that provide them: the cluster CLI for one-shot operations and
//! field queries, and a typed API client for listing nodes, pods and VMIs.

mod cli;
mod client;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::error::{CreateError, DeleteError, ExecError, QueryError};

pub use cli::ClusterCli;
pub use client::{peer_ip, pod_placement, K8sClient, NodeAddress};

/// How a resource is located: by exact name or by label selector
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    Name(String),
    Label(String),
}

impl Selector {
    pub fn name(name: impl Into<String>) -> Self {
        Selector::Name(name.into())
    }

    pub fn label(label: impl Into<String>) -> Self {
        Selector::Label(label.into())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Name(name) => write!(f, "name {name}"),
            Selector::Label(label) => write!(f, "label {label}"),
        }
    }
}

/// A single readiness query: which resource, which field, what value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceQuery {
    pub kind: String,
    pub selector: Selector,
    /// JSONPath expression evaluated against the resource, e.g. `{.status.phase}`
    pub field_query: Option<String>,
    pub expected: String,
}

impl ResourceQuery {
    pub fn new(kind: impl Into<String>, selector: Selector, expected: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            selector,
            field_query: None,
            expected: expected.into(),
        }
    }

    pub fn by_name(
        kind: impl Into<String>,
        name: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::new(kind, Selector::name(name), expected)
    }

    pub fn by_label(
        kind: impl Into<String>,
        label: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::new(kind, Selector::label(label), expected)
    }

    /// Set the field query
    pub fn field(mut self, query: impl Into<String>) -> Self {
        self.field_query = Some(query.into());
        self
    }

    /// Wait for `.status.phase` to equal `phase`
    pub fn phase(kind: impl Into<String>, name: impl Into<String>, phase: &str) -> Self {
        Self::by_name(kind, name, phase).field("{.status.phase}")
    }
}

impl fmt::Display for ResourceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} with {}", self.kind, self.selector)?;
        if let Some(query) = &self.field_query {
            write!(f, " ({query})")?;
        }
        Ok(())
    }
}

/// Handle to a running pod and the container commands are executed in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodRef {
    pub name: String,
    pub container: String,
}

impl PodRef {
    pub fn new(name: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pod/{} ({})", self.name, self.container)
    }
}

/// Read-only access to the observable state of resources
#[async_trait]
pub trait ResourceQuerier: Send + Sync {
    /// Fetch the resource matched by `selector` and extract `field_query` as text
    async fn query_resource_field(
        &self,
        kind: &str,
        selector: &Selector,
        field_query: Option<&str>,
    ) -> Result<String, QueryError>;
}

/// One-shot mutating operations against the cluster
#[async_trait]
pub trait ClusterOps: ResourceQuerier {
    /// Apply a declarative resource document
    async fn create_resource(&self, document: &Path) -> Result<(), CreateError>;

    /// Remove all resources of `kind` matching `label`
    async fn delete_resource(&self, kind: &str, label: &str) -> Result<(), DeleteError>;

    /// Run a command in a container of a running pod and capture its output
    async fn exec_in_guest(
        &self,
        target: &PodRef,
        command: &[String],
    ) -> Result<String, ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_query() {
        let query = ResourceQuery::phase("pod", "pod-a", "Running");

        assert_eq!(query.kind, "pod");
        assert_eq!(query.selector, Selector::Name("pod-a".to_string()));
        assert_eq!(query.field_query.as_deref(), Some("{.status.phase}"));
        assert_eq!(query.expected, "Running");
    }

    #[test]
    fn test_query_display() {
        let query = ResourceQuery::by_label("vmi", "app=x", "Running").field("{.status.phase}");
        assert_eq!(query.to_string(), "vmi with label app=x ({.status.phase})");

        let query = ResourceQuery::by_name("pod", "pod-a", "");
        assert_eq!(query.to_string(), "pod with name pod-a");
    }

    #[test]
    fn test_pod_ref_display() {
        assert_eq!(
            PodRef::new("ovs-1", "ovs").to_string(),
            "pod/ovs-1 (ovs)"
        );
    }
}
