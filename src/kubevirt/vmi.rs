//! VirtualMachineInstance resource management
//!
//! Typed VMI resource, a builder for the dual-network test VMs and a small
//! manager for create/get.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use kube::api::{Api, PostParams};
use kube::CustomResource;
use rand::distr::Alphanumeric;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cluster::K8sClient;

/// VirtualMachineInstance custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    plural = "virtualmachineinstances",
    shortname = "vmi",
    namespaced,
    status = "VirtualMachineInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    /// Domain specification
    pub domain: DomainSpec,

    /// Networks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Node selector used to pin the VMI
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesSpec>,

    pub devices: DevicesSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DevicesSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
}

/// Disk device
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Disk name (must match volume name)
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskTarget>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

/// Network interface (name must match a network)
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeBinding>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct BridgeBinding {}

/// Network source for an interface
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodNetwork>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub multus: Option<MultusNetwork>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct PodNetwork {}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultusNetwork {
    /// NetworkAttachmentDefinition name
    pub network_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloud>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    pub image: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloud {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

/// VMI Status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    /// Current phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Node name where VMI is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// Interfaces with IP addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<VmiInterface>,
}

/// VMI network interface as reported by the guest
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiInterface {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    /// Primary IP address
    #[serde(rename = "ipAddress", skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
}

impl VirtualMachineInstance {
    /// IP of the first reported interface, which is the pod network one
    pub fn default_ip(&self) -> Option<&str> {
        let iface = self.status.as_ref()?.interfaces.first()?;
        iface
            .ip_address
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .or_else(|| iface.ip_addresses.first().map(String::as_str))
    }
}

/// Name of the pod network on every test VMI
pub const DEFAULT_NETWORK: &str = "default";

/// Container disk booted by test VMIs; its cloud-init honours `#cloud-config`
pub const DEFAULT_GUEST_IMAGE: &str = "quay.io/kubevirt/fedora-cloud-container-disk-demo:latest";

/// Default cloud-init user of [`DEFAULT_GUEST_IMAGE`]
pub const DEFAULT_GUEST_USER: &str = "fedora";

pub const DEFAULT_GUEST_MEMORY: &str = "1024Mi";

/// Builder for the test VMIs
#[derive(Clone, Debug)]
pub struct VmiConfig {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub memory: String,
    pub user_data: Option<String>,
    pub authorized_key: Option<String>,
    pub node: Option<String>,
    pub labels: BTreeMap<String, String>,
    /// Secondary Multus networks as (interface name, NetworkAttachmentDefinition)
    pub secondary_networks: Vec<(String, String)>,
}

impl VmiConfig {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            image: DEFAULT_GUEST_IMAGE.to_string(),
            memory: DEFAULT_GUEST_MEMORY.to_string(),
            user_data: None,
            authorized_key: None,
            node: None,
            labels: BTreeMap::new(),
            secondary_networks: Vec::new(),
        }
    }

    /// Random name with `prefix`, mirroring how test VMIs are usually named
    pub fn random(prefix: &str, namespace: impl Into<String>) -> Self {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(5)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();
        Self::new(format!("{prefix}{suffix}"), namespace)
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    /// Extra cloud-config user data appended after the generated header
    pub fn user_data(mut self, user_data: impl Into<String>) -> Self {
        self.user_data = Some(user_data.into());
        self
    }

    /// Authorize an SSH key in the guest through cloud-init
    pub fn authorized_key(mut self, key: impl Into<String>) -> Self {
        self.authorized_key = Some(key.into());
        self
    }

    /// Pin to a node by hostname
    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Attach a bridge-bound interface on a Multus network
    pub fn multus_network(
        mut self,
        interface: impl Into<String>,
        network_name: impl Into<String>,
    ) -> Self {
        self.secondary_networks
            .push((interface.into(), network_name.into()));
        self
    }

    fn cloud_config(&self) -> Option<String> {
        if self.authorized_key.is_none() && self.user_data.is_none() {
            return None;
        }

        let mut config = String::from("#cloud-config\n");
        if let Some(key) = &self.authorized_key {
            config.push_str("ssh_authorized_keys:\n");
            config.push_str(&format!("  - {}\n", key.trim()));
        }
        if let Some(extra) = &self.user_data {
            config.push_str(extra);
            if !extra.ends_with('\n') {
                config.push('\n');
            }
        }
        Some(config)
    }

    /// Build the VirtualMachineInstance resource
    pub fn build(self) -> VirtualMachineInstance {
        let cloud_config = self.cloud_config();

        let mut interfaces = vec![Interface {
            name: DEFAULT_NETWORK.to_string(),
            bridge: Some(BridgeBinding {}),
            ..Default::default()
        }];
        let mut networks = vec![Network {
            name: DEFAULT_NETWORK.to_string(),
            pod: Some(PodNetwork {}),
            multus: None,
        }];
        for (interface, network_name) in &self.secondary_networks {
            interfaces.push(Interface {
                name: interface.clone(),
                bridge: Some(BridgeBinding {}),
                ..Default::default()
            });
            networks.push(Network {
                name: interface.clone(),
                pod: None,
                multus: Some(MultusNetwork {
                    network_name: network_name.clone(),
                }),
            });
        }

        let mut disks = vec![Disk {
            name: "containerdisk".to_string(),
            disk: Some(DiskTarget {
                bus: Some("virtio".to_string()),
            }),
        }];
        let mut volumes = vec![Volume {
            name: "containerdisk".to_string(),
            container_disk: Some(ContainerDiskSource { image: self.image }),
            ..Default::default()
        }];

        if let Some(user_data) = cloud_config {
            disks.push(Disk {
                name: "cloudinitdisk".to_string(),
                disk: Some(DiskTarget {
                    bus: Some("virtio".to_string()),
                }),
            });
            volumes.push(Volume {
                name: "cloudinitdisk".to_string(),
                cloud_init_no_cloud: Some(CloudInitNoCloud {
                    user_data: Some(user_data),
                }),
                ..Default::default()
            });
        }

        let mut node_selector = BTreeMap::new();
        if let Some(node) = self.node {
            node_selector.insert("kubernetes.io/hostname".to_string(), node);
        }

        let mut requests = BTreeMap::new();
        requests.insert("memory".to_string(), self.memory);

        let mut vmi = VirtualMachineInstance::new(
            &self.name,
            VirtualMachineInstanceSpec {
                domain: DomainSpec {
                    resources: Some(ResourcesSpec { requests }),
                    devices: DevicesSpec { disks, interfaces },
                },
                networks,
                volumes,
                node_selector,
                termination_grace_period_seconds: Some(0),
            },
        );
        vmi.metadata.namespace = Some(self.namespace);
        if !self.labels.is_empty() {
            vmi.metadata.labels = Some(self.labels);
        }
        vmi
    }
}

/// VMI Manager for create/get
pub struct VmiManager {
    api: Api<VirtualMachineInstance>,
}

impl VmiManager {
    pub fn new(client: &K8sClient) -> Self {
        Self {
            api: client.namespaced_api(),
        }
    }

    /// Create a VMI
    pub async fn create(&self, vmi: &VirtualMachineInstance) -> Result<VirtualMachineInstance> {
        let created = self
            .api
            .create(&PostParams::default(), vmi)
            .await
            .context("Failed to create VirtualMachineInstance")?;
        info!(
            "Created VirtualMachineInstance {}",
            created.metadata.name.as_deref().unwrap_or_default()
        );
        Ok(created)
    }

    /// Get a VMI
    pub async fn get(&self, name: &str) -> Result<VirtualMachineInstance> {
        self.api
            .get(name)
            .await
            .with_context(|| format!("Failed to get VirtualMachineInstance {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vmi_config_dual_network() {
        let vmi = VmiConfig::new("testvmi-a", "kubevirt-test-default")
            .multus_network("vm-ovs-vlan-net", "ovs-vlan-net")
            .node("compute-0")
            .label("kubevirt-e2e", "connectivity")
            .build();

        assert_eq!(vmi.metadata.name.as_deref(), Some("testvmi-a"));
        assert_eq!(vmi.metadata.namespace.as_deref(), Some("kubevirt-test-default"));

        let interfaces = &vmi.spec.domain.devices.interfaces;
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].name, "default");
        assert!(interfaces[0].bridge.is_some());
        assert_eq!(interfaces[1].name, "vm-ovs-vlan-net");
        assert!(interfaces[1].bridge.is_some());

        let networks = &vmi.spec.networks;
        assert!(networks[0].pod.is_some());
        assert_eq!(
            networks[1].multus.as_ref().map(|m| m.network_name.as_str()),
            Some("ovs-vlan-net")
        );

        assert_eq!(
            vmi.spec.node_selector.get("kubernetes.io/hostname").map(String::as_str),
            Some("compute-0")
        );
    }

    #[test]
    fn test_vmi_config_cloud_init() {
        let vmi = VmiConfig::new("testvmi-b", "default")
            .authorized_key("ssh-rsa AAAAB3... \n")
            .user_data("runcmd:\n  - echo hello")
            .build();

        assert_eq!(vmi.spec.volumes.len(), 2);
        assert_eq!(vmi.spec.domain.devices.disks.len(), 2);

        let user_data = vmi.spec.volumes[1]
            .cloud_init_no_cloud
            .as_ref()
            .and_then(|c| c.user_data.as_deref())
            .unwrap();
        assert!(user_data.starts_with("#cloud-config\n"));
        assert!(user_data.contains("  - ssh-rsa AAAAB3...\n"));
        assert!(user_data.ends_with("echo hello\n"));
    }

    #[test]
    fn test_key_reaches_default_guest_user_through_nocloud() {
        let vmi = VmiConfig::new("testvmi-c", "default")
            .authorized_key("ssh-rsa AAAAB3NzaC1yc2E test@e2e")
            .build();

        assert_eq!(
            vmi.spec.volumes[0]
                .container_disk
                .as_ref()
                .map(|d| d.image.as_str()),
            Some("quay.io/kubevirt/fedora-cloud-container-disk-demo:latest")
        );
        assert_eq!(DEFAULT_GUEST_USER, "fedora");

        let json = serde_json::to_value(&vmi).unwrap();
        let user_data = json["spec"]["volumes"][1]["cloudInitNoCloud"]["userData"]
            .as_str()
            .unwrap();
        assert_eq!(
            user_data,
            "#cloud-config\nssh_authorized_keys:\n  - ssh-rsa AAAAB3NzaC1yc2E test@e2e\n"
        );
        assert_eq!(json["spec"]["domain"]["devices"]["disks"][1]["name"], "cloudinitdisk");
        assert_eq!(json["spec"]["domain"]["resources"]["requests"]["memory"], "1024Mi");
    }

    #[test]
    fn test_vmi_without_cloud_init() {
        let vmi = VmiConfig::new("plain", "default").build();

        assert_eq!(vmi.spec.volumes.len(), 1);
        assert!(vmi.spec.node_selector.is_empty());
        assert!(vmi.metadata.labels.is_none());
    }

    #[test]
    fn test_random_name() {
        let a = VmiConfig::random("testvmi", "default");
        let b = VmiConfig::random("testvmi", "default");

        assert!(a.name.starts_with("testvmi"));
        assert_eq!(a.name.len(), "testvmi".len() + 5);
        assert!(a.name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn test_vmi_serializes_camel_case() {
        let vmi = VmiConfig::new("testvmi", "default")
            .multus_network("ovs", "ovs-vlan-net")
            .build();
        let json = serde_json::to_value(&vmi).unwrap();

        assert_eq!(json["kind"], "VirtualMachineInstance");
        assert_eq!(json["apiVersion"], "kubevirt.io/v1");
        assert_eq!(json["spec"]["networks"][1]["multus"]["networkName"], "ovs-vlan-net");
        assert_eq!(
            json["spec"]["volumes"][0]["containerDisk"]["image"],
            DEFAULT_GUEST_IMAGE
        );
        assert_eq!(json["spec"]["terminationGracePeriodSeconds"], 0);
    }

    #[test]
    fn test_default_ip() {
        let mut vmi = VmiConfig::new("testvmi", "default").build();
        assert_eq!(vmi.default_ip(), None);

        vmi.status = Some(VirtualMachineInstanceStatus {
            phase: Some("Running".to_string()),
            interfaces: vec![
                VmiInterface {
                    name: Some("default".to_string()),
                    ip_address: Some("10.128.0.5".to_string()),
                    ..Default::default()
                },
                VmiInterface {
                    name: Some("ovs".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        assert_eq!(vmi.default_ip(), Some("10.128.0.5"));

        vmi.status = Some(VirtualMachineInstanceStatus {
            interfaces: vec![VmiInterface {
                ip_address: Some(String::new()),
                ip_addresses: vec!["10.128.0.6".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        });
        assert_eq!(vmi.default_ip(), Some("10.128.0.6"));
    }

    #[test]
    fn test_deserialize_status() {
        let json = serde_json::json!({
            "phase": "Running",
            "nodeName": "compute-1",
            "interfaces": [{"name": "default", "ipAddress": "10.0.0.9", "mac": "52:54:00:00:00:01"}]
        });
        let status: VirtualMachineInstanceStatus = serde_json::from_value(json).unwrap();

        assert_eq!(status.node_name.as_deref(), Some("compute-1"));
        assert_eq!(status.interfaces[0].ip_address.as_deref(), Some("10.0.0.9"));
    }
}
