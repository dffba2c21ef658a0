//! Configuration module
//!
//! Handles finding, loading and validating configuration files, with
//! environment overrides layered on top.

mod env;

pub use env::{print_env_help, EnvConfig};

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::keys;
use crate::kubevirt::{DEFAULT_GUEST_IMAGE, DEFAULT_GUEST_MEMORY, DEFAULT_GUEST_USER};
use crate::poller::PollSettings;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./kubevirt-e2e.yaml",
    "./.kubevirt-e2e.yaml",
    "~/.config/kubevirt-e2e/config.yaml",
];

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct E2eConfig {
    /// Namespace the test resources live in
    pub namespace: String,

    /// Cluster CLI binary (`oc` or `kubectl`)
    pub cli: String,

    /// virtctl binary
    pub virtctl: String,

    /// Readiness polling
    pub poll: PollConfig,

    /// Connectivity scenario settings
    pub scenario: ScenarioConfig,

    /// Guest VM settings
    pub guest: GuestSettings,

    /// RSA modulus size for generated guest keys
    pub key_bits: usize,

    /// Where generated keys and rendered templates are written
    pub work_dir: PathBuf,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            namespace: "kubevirt-test-default".to_string(),
            cli: "oc".to_string(),
            virtctl: "virtctl".to_string(),
            poll: PollConfig::default(),
            scenario: ScenarioConfig::default(),
            guest: GuestSettings::default(),
            key_bits: keys::DEFAULT_BITS,
            work_dir: std::env::temp_dir().join("kubevirt-e2e"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            interval_secs: 5,
        }
    }
}

impl PollConfig {
    pub fn settings(&self) -> PollSettings {
        PollSettings::from_secs(self.timeout_secs, self.interval_secs)
    }
}

/// Connectivity scenario settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Service account the privileged pods run as
    pub service_account: String,

    /// Grant the `privileged` SCC to the service account (OpenShift only)
    pub grant_privileged_scc: bool,

    pub privileged_pod_manifest: PathBuf,
    pub ovs_network_manifest: PathBuf,

    /// Label selecting the nodes VMs are spread over
    pub compute_node_label: String,

    /// Label selecting the privileged OVS pods
    pub privileged_pod_label: String,

    /// OVS bridge created in every privileged pod
    pub bridge_name: String,

    /// NetworkAttachmentDefinition of the OVS network
    pub ovs_network: String,

    /// Guest interface attached to the OVS network
    pub ovs_interface: String,

    /// Addresses assigned on the OVS interface, one per VM
    pub ovs_addresses: Vec<String>,

    /// Label put on every VMI so teardown can find them
    pub vmi_label: String,

    pub vmi_name_prefix: String,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            service_account: "privileged-test-user".to_string(),
            grant_privileged_scc: true,
            privileged_pod_manifest: PathBuf::from("manifests/privileged-pod.yml"),
            ovs_network_manifest: PathBuf::from("manifests/ovs-vlan-net.yml"),
            compute_node_label: "node-role.kubernetes.io/compute=true".to_string(),
            privileged_pod_label: "app=privileged-test-pod".to_string(),
            bridge_name: "br1_for_vxlan".to_string(),
            ovs_network: "ovs-vlan-net".to_string(),
            ovs_interface: "eth1".to_string(),
            ovs_addresses: vec!["192.168.0.1".to_string(), "192.168.0.2".to_string()],
            vmi_label: "kubevirt-e2e=network-connectivity".to_string(),
            vmi_name_prefix: "testvmi".to_string(),
        }
    }
}

impl ScenarioConfig {
    /// Split `vmi_label` into key and value
    pub fn vmi_label_pair(&self) -> Option<(&str, &str)> {
        self.vmi_label
            .split_once('=')
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
    }
}

/// Guest VM settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestSettings {
    pub image: String,
    pub memory: String,
    pub username: String,
    pub login_timeout_secs: u64,
    /// Upper bound for a single command run in the guest
    pub command_timeout_secs: u64,
}

impl Default for GuestSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_GUEST_IMAGE.to_string(),
            memory: DEFAULT_GUEST_MEMORY.to_string(),
            username: DEFAULT_GUEST_USER.to_string(),
            login_timeout_secs: 300,
            command_timeout_secs: 60,
        }
    }
}

impl GuestSettings {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl E2eConfig {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from `path`, or the first standard location, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path.map(Path::to_path_buf).or_else(Self::find) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            anyhow::bail!("namespace must not be empty");
        }
        if self.cli.is_empty() {
            anyhow::bail!("cli must not be empty");
        }
        if self.poll.interval_secs == 0 {
            anyhow::bail!("poll.interval_secs must be greater than zero");
        }
        if self.poll.timeout_secs < self.poll.interval_secs {
            anyhow::bail!(
                "poll.timeout_secs ({}) must be at least poll.interval_secs ({})",
                self.poll.timeout_secs,
                self.poll.interval_secs
            );
        }
        if !(keys::MIN_BITS..=keys::MAX_BITS).contains(&self.key_bits) {
            anyhow::bail!(
                "key_bits {} outside {}..={}",
                self.key_bits,
                keys::MIN_BITS,
                keys::MAX_BITS
            );
        }
        if self.guest.command_timeout_secs == 0 {
            anyhow::bail!("guest.command_timeout_secs must be greater than zero");
        }
        if self.scenario.ovs_addresses.len() < 2 {
            anyhow::bail!("scenario.ovs_addresses needs one address per VM (2)");
        }
        if self.scenario.vmi_label_pair().is_none() {
            anyhow::bail!(
                "scenario.vmi_label must be key=value, got '{}'",
                self.scenario.vmi_label
            );
        }
        Ok(())
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(namespace) = &env.namespace {
            self.namespace = namespace.clone();
        }
        if let Some(cli) = &env.cli {
            self.cli = cli.clone();
        }
        if let Some(timeout) = env.timeout {
            self.poll.timeout_secs = timeout;
        }
        if let Some(interval) = env.interval {
            self.poll.interval_secs = interval;
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        self.poll.settings()
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
