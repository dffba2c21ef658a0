//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "KUBEVIRT_E2E";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Namespace from KUBEVIRT_E2E_NAMESPACE
    pub namespace: Option<String>,
    /// Cluster CLI from KUBEVIRT_E2E_CLI
    pub cli: Option<String>,
    /// Poll timeout in seconds from KUBEVIRT_E2E_TIMEOUT
    pub timeout: Option<u64>,
    /// Poll interval in seconds from KUBEVIRT_E2E_INTERVAL
    pub interval: Option<u64>,
    /// Config file from KUBEVIRT_E2E_CONFIG
    pub config_file: Option<String>,
    /// Verbose from KUBEVIRT_E2E_VERBOSE
    pub verbose: Option<bool>,
    /// Kubeconfig from KUBECONFIG
    pub kubeconfig: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            namespace: get_env("NAMESPACE"),
            cli: get_env("CLI"),
            timeout: get_env_parse("TIMEOUT"),
            interval: get_env_parse("INTERVAL"),
            config_file: get_env("CONFIG"),
            verbose: get_env_bool("VERBOSE"),
            kubeconfig: env::var("KUBECONFIG").ok(),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.namespace.is_some()
            || self.cli.is_some()
            || self.timeout.is_some()
            || self.interval.is_some()
            || self.config_file.is_some()
            || self.verbose.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_NAMESPACE: {:?}", ENV_PREFIX, self.namespace);
        println!("  {}_CLI:       {:?}", ENV_PREFIX, self.cli);
        println!("  {}_TIMEOUT:   {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_INTERVAL:  {:?}", ENV_PREFIX, self.interval);
        println!("  {}_CONFIG:    {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_VERBOSE:   {:?}", ENV_PREFIX, self.verbose);
        println!("  KUBECONFIG:             {:?}", self.kubeconfig);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
#[cfg(test)]
pub(crate) struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn namespace(self, namespace: impl Into<String>) -> Self {
        self.var("NAMESPACE", namespace)
    }

    pub fn cli(self, cli: impl Into<String>) -> Self {
        self.var("CLI", cli)
    }

    pub fn timeout(self, timeout: u64) -> Self {
        self.var("TIMEOUT", timeout.to_string())
    }

    pub fn interval(self, interval: u64) -> Self {
        self.var("INTERVAL", interval.to_string())
    }

    pub fn verbose(self, value: impl Into<String>) -> Self {
        self.var("VERBOSE", value)
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub(crate) struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all KUBEVIRT_E2E environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_NAMESPACE   Namespace for test resources");
    println!("  {ENV_PREFIX}_CLI         Cluster CLI binary (oc, kubectl)");
    println!("  {ENV_PREFIX}_TIMEOUT     Readiness timeout in seconds");
    println!("  {ENV_PREFIX}_INTERVAL    Readiness poll interval in seconds");
    println!("  {ENV_PREFIX}_CONFIG      Path to configuration file");
    println!("  {ENV_PREFIX}_VERBOSE     Enable debug logging (true/false)");
    println!("  KUBECONFIG               Path to kubeconfig file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_NAMESPACE=kubevirt-test-default");
    println!("  export {ENV_PREFIX}_CLI=kubectl");
    println!("  kubevirt-e2e connectivity");
}
