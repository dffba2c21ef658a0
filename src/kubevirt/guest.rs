//! Guest access for KubeVirt VMIs
//!
//! Runs commands inside a VMI over `virtctl ssh`, authenticating with the key
//! pair injected through cloud-init.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{self, sleep, Instant};
use tracing::{debug, info, warn};

use super::vmi::DEFAULT_GUEST_USER;

/// Guest login settings
#[derive(Clone, Debug)]
pub struct GuestConfig {
    /// virtctl binary
    pub virtctl: String,

    /// Namespace of the VMIs
    pub namespace: String,

    /// Guest username
    pub username: String,

    /// Private key matching the authorized key in the guest
    pub identity_file: PathBuf,

    /// Delay between login attempts
    pub retry_delay: Duration,

    /// Upper bound for one `virtctl ssh` invocation
    pub command_timeout: Duration,
}

impl GuestConfig {
    pub fn new(namespace: impl Into<String>, identity_file: impl Into<PathBuf>) -> Self {
        Self {
            virtctl: "virtctl".to_string(),
            namespace: namespace.into(),
            username: DEFAULT_GUEST_USER.to_string(),
            identity_file: identity_file.into(),
            retry_delay: Duration::from_secs(5),
            command_timeout: Duration::from_secs(60),
        }
    }

    pub fn virtctl(mut self, program: impl Into<String>) -> Self {
        self.virtctl = program.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn command_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = limit;
        self
    }
}

/// Output of a guest command
#[derive(Clone, Debug)]
pub struct GuestOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl GuestOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Shell access to VMIs
pub struct GuestShell {
    config: GuestConfig,
}

impl GuestShell {
    pub fn new(config: GuestConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, vmi: &str, command: &str) -> Vec<String> {
        vec![
            "ssh".to_string(),
            format!("{}@vmi/{vmi}", self.config.username),
            "-n".to_string(),
            self.config.namespace.clone(),
            "-i".to_string(),
            self.config.identity_file.to_string_lossy().to_string(),
            "--local-ssh-opts".to_string(),
            "-o StrictHostKeyChecking=no".to_string(),
            "--local-ssh-opts".to_string(),
            "-o UserKnownHostsFile=/dev/null".to_string(),
            "--local-ssh-opts".to_string(),
            "-o LogLevel=ERROR".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]
    }

    /// Run `command` in the guest, failing when it outlives the command timeout
    pub async fn exec(&self, vmi: &str, command: &str) -> Result<GuestOutput> {
        let limit = self.config.command_timeout;
        self.exec_within(vmi, command, limit)
            .await?
            .with_context(|| format!("command `{command}` in vmi/{vmi} timed out after {limit:?}"))
    }

    /// `None` when `limit` elapses first; the ssh process is killed then
    async fn exec_within(
        &self,
        vmi: &str,
        command: &str,
        limit: Duration,
    ) -> Result<Option<GuestOutput>> {
        debug!("Executing in vmi/{}: {}", vmi, command);

        let mut ssh = Command::new(&self.config.virtctl);
        ssh.args(self.build_args(vmi, command)).kill_on_drop(true);
        let output = match time::timeout(limit, ssh.output()).await {
            Ok(output) => {
                output.with_context(|| format!("Failed to execute {}", self.config.virtctl))?
            }
            Err(_) => return Ok(None),
        };

        Ok(Some(GuestOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }))
    }

    /// Run `command` and fail unless it exits zero
    pub async fn run(&self, vmi: &str, command: &str) -> Result<String> {
        let output = self.exec(vmi, command).await?;
        if !output.success() {
            anyhow::bail!(
                "command `{}` in vmi/{} exited with {}: {}",
                command,
                vmi,
                output.exit_code,
                output.stderr.trim()
            );
        }
        Ok(output.stdout)
    }

    /// Wait until a trivial command succeeds in the guest
    pub async fn wait_for_login(&self, vmi: &str, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        info!("Waiting for login on vmi/{} (timeout: {:?})", vmi, timeout);

        loop {
            let limit = timeout
                .saturating_sub(start.elapsed())
                .min(self.config.command_timeout);
            match self.exec_within(vmi, "echo connected", limit).await? {
                Some(output) if output.success() && output.stdout.trim() == "connected" => {
                    info!("Logged in to vmi/{}", vmi);
                    return Ok(true);
                }
                Some(output) => {
                    debug!("Login to vmi/{} not ready: {}", vmi, output.stderr.trim())
                }
                None => debug!("Login attempt on vmi/{} gave up after {:?}", vmi, limit),
            }

            sleep(self.config.retry_delay).await;
            if start.elapsed() >= timeout {
                warn!("Timeout waiting for login on vmi/{}", vmi);
                return Ok(false);
            }
        }
    }

    /// Ping `ip` from the guest; true when every probe was sent and the command exited zero
    pub async fn ping(&self, vmi: &str, ip: &str) -> Result<bool> {
        let output = self.exec(vmi, &ping_command(ip)).await?;
        let reachable = ping_succeeded(&output);
        if reachable {
            info!("vmi/{} reached {}", vmi, ip);
        } else {
            warn!("vmi/{} could not reach {}: {}", vmi, ip, output.stdout.trim());
        }
        Ok(reachable)
    }
}

/// Reachability probe run from inside a guest
#[async_trait]
pub trait GuestProbe: Send + Sync {
    /// Whether `ip` answers pings sent from `vmi`
    async fn ping(&self, vmi: &str, ip: &str) -> Result<bool>;
}

#[async_trait]
impl GuestProbe for GuestShell {
    async fn ping(&self, vmi: &str, ip: &str) -> Result<bool> {
        GuestShell::ping(self, vmi, ip).await
    }
}

/// Number of probes sent per ping check
pub const PING_COUNT: u32 = 3;

pub fn ping_command(ip: &str) -> String {
    format!("ping -c {PING_COUNT} -w 10 {ip}")
}

pub fn ping_succeeded(output: &GuestOutput) -> bool {
    output.success()
        && output
            .stdout
            .contains(&format!("{PING_COUNT} packets transmitted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stdout: &str, exit_code: i32) -> GuestOutput {
        GuestOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
        }
    }

    #[test]
    fn test_build_args() {
        let shell = GuestShell::new(
            GuestConfig::new("kubevirt-test-default", "/tmp/keys/id_rsa").username("fedora"),
        );
        let args = shell.build_args("testvmi-a", "ip addr");

        assert_eq!(args[0], "ssh");
        assert_eq!(args[1], "fedora@vmi/testvmi-a");
        assert!(args.windows(2).any(|w| w == ["-n", "kubevirt-test-default"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/tmp/keys/id_rsa"]));
        assert_eq!(args[args.len() - 2..], ["-c", "ip addr"]);
    }

    #[test]
    fn test_ping_command() {
        assert_eq!(ping_command("10.0.0.2"), "ping -c 3 -w 10 10.0.0.2");
    }

    #[test]
    fn test_ping_succeeded() {
        let ok = "3 packets transmitted, 3 packets received, 0% packet loss\n";
        assert!(ping_succeeded(&output(ok, 0)));

        let lost = "3 packets transmitted, 0 packets received, 100% packet loss\n";
        assert!(!ping_succeeded(&output(lost, 1)));

        assert!(!ping_succeeded(&output("ping: sendto: Network unreachable\n", 0)));
    }

    #[test]
    fn test_default_user_matches_guest_image() {
        let config = GuestConfig::new("default", "/tmp/id_rsa");
        assert_eq!(config.username, "fedora");
        assert_eq!(config.command_timeout, Duration::from_secs(60));
    }

    #[cfg(unix)]
    fn shell_with(virtctl: &std::path::Path, command_timeout: Duration) -> GuestShell {
        let mut config = GuestConfig::new("e2e", "/tmp/id_rsa")
            .virtctl(virtctl.to_string_lossy())
            .command_timeout(command_timeout);
        config.retry_delay = Duration::ZERO;
        GuestShell::new(config)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_killed_after_command_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let virtctl = crate::utils::script::write_script(dir.path(), "virtctl", "exec sleep 30");
        let shell = shell_with(&virtctl, Duration::from_millis(200));

        let start = std::time::Instant::now();
        let err = shell.exec("testvmi", "true").await.unwrap_err();

        assert!(err.to_string().contains("timed out"), "{err:#}");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_for_login_bounded_by_login_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let virtctl = crate::utils::script::write_script(dir.path(), "virtctl", "exec sleep 30");
        let shell = shell_with(&virtctl, Duration::from_secs(60));

        let start = std::time::Instant::now();
        let logged_in = shell
            .wait_for_login("testvmi", Duration::from_millis(300))
            .await
            .unwrap();

        assert!(!logged_in);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_for_login_passes_user_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let virtctl = crate::utils::script::write_script(
            dir.path(),
            "virtctl",
            &format!("echo \"$@\" >> {}\necho connected", log.display()),
        );
        let shell = shell_with(&virtctl, Duration::from_secs(10));

        assert!(shell
            .wait_for_login("testvmi", Duration::from_secs(10))
            .await
            .unwrap());

        let calls = std::fs::read_to_string(&log).unwrap();
        assert!(calls.starts_with("ssh fedora@vmi/testvmi -n e2e -i /tmp/id_rsa"));
        assert!(calls.trim_end().ends_with("-c echo connected"));
    }

    #[tokio::test]
    async fn test_exec_missing_virtctl() {
        let shell = GuestShell::new(
            GuestConfig::new("default", "/tmp/id_rsa").virtctl("virtctl-does-not-exist"),
        );
        assert!(shell.exec("vmi", "true").await.is_err());
    }
}
