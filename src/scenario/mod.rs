//! Network connectivity scenario
//!
//! Two VMs on different compute nodes, joined both by the pod network and by
//! an OVS VXLAN network attached through Multus, ping each other over each.
//! Setup stops at the first error; teardown always runs and never fails.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::future::try_join_all;
use k8s_openapi::api::core::v1::Pod;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::cluster::{
    peer_ip, pod_placement, ClusterCli, ClusterOps, K8sClient, NodeAddress, PodRef, ResourceQuery,
};
use crate::config::E2eConfig;
use crate::error::{CliError, CreateError, DeleteError};
use crate::keys::{self, SshKeyPair};
use crate::kubevirt::{GuestConfig, GuestProbe, GuestShell, VmiConfig, VmiManager};
use crate::models::{CheckResult, ConnectivityCheck, ProbeResult, ScenarioSummary};
use crate::poller::{PollSettings, ReadinessPoller};
use crate::utils::{as_millis, PhaseClock};

pub const SCENARIO_NAME: &str = "network-connectivity";

/// VMI interface attached to the OVS network
pub const OVS_INTERFACE_NAME: &str = "vm-ovs-vlan-net";

const OVS_VSCTL: &str = "ovs-vsctl";

/// A privileged pod and the node its VXLAN tunnel points at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodSetup {
    pub target: PodRef,
    pub node: String,
    pub peer_ip: String,
}

/// A started VM and the addresses other VMs ping
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioVm {
    pub name: String,
    pub node: String,
    pub default_ip: String,
    pub ovs_ip: String,
}

impl ScenarioVm {
    fn address(&self, check: ConnectivityCheck) -> &str {
        match check {
            ConnectivityCheck::OvsMultus => &self.ovs_ip,
            ConnectivityCheck::PodNetwork => &self.default_ip,
        }
    }
}

/// Pair every privileged pod with the IP of a node other than its own
pub fn plan_pod_setup(nodes: &[NodeAddress], pods: &[Pod]) -> Result<Vec<PodSetup>> {
    if nodes.len() < 2 {
        bail!(
            "connectivity needs at least 2 compute nodes, found {}",
            nodes.len()
        );
    }
    if pods.len() != nodes.len() {
        bail!(
            "expected one privileged pod per compute node ({}), found {}",
            nodes.len(),
            pods.len()
        );
    }

    pods.iter()
        .map(|pod| -> Result<PodSetup> {
            let (node, target) = pod_placement(pod).with_context(|| {
                format!(
                    "pod {} is not scheduled",
                    pod.metadata.name.as_deref().unwrap_or("<unnamed>")
                )
            })?;
            let peer_ip = peer_ip(nodes, &node)
                .with_context(|| format!("no peer node for {node}"))?
                .to_string();
            Ok(PodSetup {
                target,
                node,
                peer_ip,
            })
        })
        .collect()
}

/// Bridge plus VXLAN port towards `peer_ip`
pub fn ovs_commands(bridge: &str, peer_ip: &str) -> Vec<Vec<String>> {
    let add_br = [OVS_VSCTL, "add-br", bridge];
    let remote_ip = format!("options:remote_ip={peer_ip}");
    let add_port = [
        OVS_VSCTL,
        "add-port",
        bridge,
        "vxlan",
        "--",
        "set",
        "Interface",
        "vxlan",
        "type=vxlan",
        remote_ip.as_str(),
    ];

    vec![
        add_br.iter().map(|s| s.to_string()).collect(),
        add_port.iter().map(|s| s.to_string()).collect(),
    ]
}

/// Address and bring up the guest interface on the OVS network
pub fn guest_network_commands(ip: &str, interface: &str) -> Vec<String> {
    vec![
        format!("sudo ip addr add {ip}/24 dev {interface}"),
        format!("sudo ip link set up {interface}"),
    ]
}

/// Wait for the pod to run, then create its bridge and tunnel
pub async fn prepare_ovs_pod<C: ClusterOps + ?Sized>(
    cluster: &C,
    settings: PollSettings,
    setup: &PodSetup,
    bridge: &str,
) -> Result<()> {
    ReadinessPoller::new(cluster, settings)
        .wait_ready(&ResourceQuery::phase("pod", &setup.target.name, "Running"))
        .await
        .with_context(|| format!("{} did not start", setup.target))?;

    for command in ovs_commands(bridge, &setup.peer_ip) {
        cluster
            .exec_in_guest(&setup.target, &command)
            .await
            .with_context(|| format!("Failed to configure OVS in {}", setup.target))?;
    }

    info!(
        "{} on {}: {} tunnels to {}",
        setup.target, setup.node, bridge, setup.peer_ip
    );
    Ok(())
}

/// Ping every other VM from every VM over the network `check` covers
pub async fn run_check<P: GuestProbe + ?Sized>(
    probe: &P,
    check: ConnectivityCheck,
    vms: &[ScenarioVm],
) -> CheckResult {
    let start = Instant::now();
    let mut probes = Vec::new();

    for vm in vms {
        for peer in vms.iter().filter(|peer| peer.name != vm.name) {
            let target = peer.address(check);
            match probe.ping(&vm.name, target).await {
                Ok(reachable) => probes.push(ProbeResult {
                    from_vmi: vm.name.clone(),
                    to_ip: target.to_string(),
                    reachable,
                }),
                Err(e) => {
                    return CheckResult::error(
                        check,
                        as_millis(start.elapsed()),
                        format!("ping from {} failed: {e:#}", vm.name),
                    )
                }
            }
        }
    }

    CheckResult::from_probes(check, as_millis(start.elapsed()), probes)
}

/// Treat "already exists" as success so reruns reuse earlier setup
fn tolerate_existing(result: Result<(), CreateError>, what: &str) -> Result<()> {
    match result {
        Err(CreateError::Cli(CliError::Failed { stderr, .. })) if stderr.contains("AlreadyExists") => {
            debug!("{} already exists", what);
            Ok(())
        }
        other => other.with_context(|| format!("Failed to create {what}")),
    }
}

/// The connectivity scenario bound to a cluster
pub struct ConnectivityScenario {
    config: E2eConfig,
    cli: ClusterCli,
    k8s: K8sClient,
    guest: GuestShell,
    key_pair: SshKeyPair,
    checks: Vec<ConnectivityCheck>,
    vms: Vec<ScenarioVm>,
}

impl ConnectivityScenario {
    /// Connect to the cluster and generate the guest key pair
    pub async fn new(config: E2eConfig) -> Result<Self> {
        config.validate()?;

        let k8s = K8sClient::new(&config.namespace).await?;
        let cli = ClusterCli::new(&config.cli, &config.namespace);

        let bits = config.key_bits;
        let key_pair = tokio::task::spawn_blocking(move || keys::generate_key_pair(bits))
            .await
            .context("Key generation task failed")??;
        let key_path = config.work_dir.join("id_rsa");
        key_pair.write_private_key(&key_path)?;

        let guest = GuestShell::new(
            GuestConfig::new(&config.namespace, key_path)
                .virtctl(&config.virtctl)
                .username(&config.guest.username)
                .command_timeout(config.guest.command_timeout()),
        );

        Ok(Self {
            config,
            cli,
            k8s,
            guest,
            key_pair,
            checks: ConnectivityCheck::all(),
            vms: Vec::new(),
        })
    }

    /// Run only `checks`; an empty list keeps all of them
    pub fn with_checks(mut self, checks: Vec<ConnectivityCheck>) -> Self {
        if !checks.is_empty() {
            self.checks = checks;
        }
        self
    }

    /// Set up, run the selected checks, tear down
    pub async fn run(mut self) -> Result<ScenarioSummary> {
        let started_at = Utc::now();
        let mut clock = PhaseClock::start();
        info!(
            "Starting {} in {} ({})",
            SCENARIO_NAME,
            self.config.namespace,
            self.config.poll_settings()
        );

        if let Err(e) = self.setup().await {
            self.teardown().await;
            return Err(e.context("Scenario setup failed"));
        }
        clock.finish("setup");

        let mut results = Vec::new();
        for &check in &self.checks {
            let result = run_check(&self.guest, check, &self.vms).await;
            info!("{}", result);
            results.push(result);
        }
        clock.finish("checks");

        self.teardown().await;
        clock.finish("teardown");

        Ok(ScenarioSummary::new(
            SCENARIO_NAME,
            &self.config.namespace,
            started_at,
            clock.into_phases(),
            results,
        ))
    }

    async fn setup(&mut self) -> Result<()> {
        let scenario = &self.config.scenario;
        let settings = self.config.poll.settings();

        tolerate_existing(
            self.cli.create_service_account(&scenario.service_account).await,
            "service account",
        )?;
        if scenario.grant_privileged_scc {
            self.cli
                .grant_privileged_scc(&scenario.service_account)
                .await
                .context("Failed to grant the privileged SCC")?;
        }
        tolerate_existing(
            self.cli.create_resource(&scenario.privileged_pod_manifest).await,
            "privileged pods",
        )?;
        tolerate_existing(
            self.cli.create_resource(&scenario.ovs_network_manifest).await,
            "OVS network",
        )?;

        let nodes = self
            .k8s
            .nodes_with_addresses(&scenario.compute_node_label)
            .await?;
        let pods = self
            .wait_for_pods(&scenario.privileged_pod_label, nodes.len(), settings)
            .await?;
        let setups = plan_pod_setup(&nodes, &pods)?;

        try_join_all(
            setups
                .iter()
                .map(|setup| prepare_ovs_pod(&self.cli, settings, setup, &scenario.bridge_name)),
        )
        .await?;

        for (node, ovs_ip) in nodes.iter().zip(&scenario.ovs_addresses).take(2) {
            let vm = self.start_vm(&node.name, ovs_ip, settings).await?;
            self.vms.push(vm);
        }

        Ok(())
    }

    /// List pods by label until `expected` exist or the timeout passes
    async fn wait_for_pods(
        &self,
        label: &str,
        expected: usize,
        settings: PollSettings,
    ) -> Result<Vec<Pod>> {
        let start = Instant::now();
        loop {
            let pods = self.k8s.pods_with_label(label).await?;
            if pods.len() >= expected {
                return Ok(pods);
            }
            debug!("{} of {} pods with {} exist", pods.len(), expected, label);

            sleep(settings.interval).await;
            if start.elapsed() >= settings.timeout {
                return Ok(pods);
            }
        }
    }

    async fn start_vm(&self, node: &str, ovs_ip: &str, settings: PollSettings) -> Result<ScenarioVm> {
        let scenario = &self.config.scenario;
        let (label_key, label_value) = scenario
            .vmi_label_pair()
            .context("scenario.vmi_label must be key=value")?;

        let vmi_config = VmiConfig::random(&scenario.vmi_name_prefix, &self.config.namespace)
            .image(&self.config.guest.image)
            .memory(&self.config.guest.memory)
            .authorized_key(self.key_pair.authorized_key())
            .multus_network(OVS_INTERFACE_NAME, &scenario.ovs_network)
            .node(node)
            .label(label_key, label_value);
        let name = vmi_config.name.clone();

        let manager = VmiManager::new(&self.k8s);
        manager.create(&vmi_config.build()).await?;

        ReadinessPoller::new(&self.cli, settings)
            .wait_ready(&ResourceQuery::phase("vmi", &name, "Running"))
            .await
            .with_context(|| format!("vmi/{name} did not start"))?;

        if !self
            .guest
            .wait_for_login(&name, self.config.guest.login_timeout())
            .await?
        {
            bail!("could not log in to vmi/{name}");
        }

        let default_ip = manager
            .get(&name)
            .await?
            .default_ip()
            .map(str::to_string)
            .with_context(|| format!("vmi/{name} reports no pod network address"))?;

        for command in guest_network_commands(ovs_ip, &scenario.ovs_interface) {
            self.guest.run(&name, &command).await?;
        }

        info!(
            "vmi/{} on {}: default {}, ovs {}",
            name, node, default_ip, ovs_ip
        );
        Ok(ScenarioVm {
            name,
            node: node.to_string(),
            default_ip,
            ovs_ip: ovs_ip.to_string(),
        })
    }

    /// Delete the scenario VMIs; failures are logged only
    pub async fn teardown(&self) {
        let label = &self.config.scenario.vmi_label;
        match self.cli.delete_resource("vmi", label).await {
            Ok(()) => info!("Deleted VMIs with {}", label),
            Err(DeleteError::NoMatch { .. }) => debug!("No VMIs with {} to delete", label),
            Err(e) => warn!("Teardown failed: {}", e),
        }
    }
}
