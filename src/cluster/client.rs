//! Kubernetes client wrapper
//!
//! Typed API access for the parts of the scenario that need structured data:
//! compute nodes and their addresses, privileged pods and their placement.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    api::{Api, ListParams},
    Client,
};
use tracing::{debug, info};

use super::PodRef;

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
    namespace: String,
}

impl K8sClient {
    /// Create a new Kubernetes client from the ambient kubeconfig
    pub async fn new(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;

        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    /// List nodes matching `label` together with their internal IPs
    pub async fn nodes_with_addresses(&self, label: &str) -> Result<Vec<NodeAddress>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let node_list = nodes
            .list(&ListParams::default().labels(label))
            .await
            .context("Failed to list nodes")?;

        let addresses: Vec<NodeAddress> = node_list
            .items
            .iter()
            .filter_map(NodeAddress::from_node)
            .collect();

        info!("Found {} nodes matching {}", addresses.len(), label);
        Ok(addresses)
    }

    /// List pods in the namespace matching `label`
    pub async fn pods_with_label(&self, label: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pod_list = pods
            .list(&ListParams::default().labels(label))
            .await
            .context("Failed to list pods")?;

        debug!("Found {} pods matching {}", pod_list.items.len(), label);
        Ok(pod_list.items)
    }

    /// Create a namespaced API for a custom resource type
    pub fn namespaced_api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// A node name and its `InternalIP`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAddress {
    pub name: String,
    pub internal_ip: String,
}

impl NodeAddress {
    /// Extract name and internal IP, skipping nodes that report neither
    pub fn from_node(node: &Node) -> Option<Self> {
        let name = node.metadata.name.clone()?;
        let internal_ip = node
            .status
            .as_ref()?
            .addresses
            .as_ref()?
            .iter()
            .find(|addr| addr.type_ == "InternalIP")
            .map(|addr| addr.address.clone())?;

        Some(Self { name, internal_ip })
    }
}

/// IP of the first node that is not `node_name`
pub fn peer_ip<'a>(nodes: &'a [NodeAddress], node_name: &str) -> Option<&'a str> {
    nodes
        .iter()
        .find(|node| node.name != node_name)
        .map(|node| node.internal_ip.as_str())
}

/// Node a pod is scheduled on and a handle to its first container
pub fn pod_placement(pod: &Pod) -> Option<(String, PodRef)> {
    let name = pod.metadata.name.clone()?;
    let spec = pod.spec.as_ref()?;
    let node_name = spec.node_name.clone()?;
    let container = spec.containers.first()?.name.clone();

    Some((node_name, PodRef::new(name, container)))
}
