//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// KubeVirt end-to-end test helpers
#[derive(Parser, Debug)]
#[command(name = "kubevirt-e2e")]
#[command(version)]
#[command(about = "Readiness polling, cluster helpers and the VM network connectivity scenario")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (YAML or JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Namespace, overriding configuration
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait until a resource field equals a value
    Wait(WaitArgs),

    /// Create resources from a file
    Create(CreateArgs),

    /// Delete resources by label
    Delete(DeleteArgs),

    /// Run a command in a pod container
    Exec(ExecArgs),

    /// Describe a resource
    Describe(DescribeArgs),

    /// Render a template with parameters
    Process(ProcessArgs),

    /// Generate an RSA key pair for guest login
    Keygen(KeygenArgs),

    /// Run the VM to VM network connectivity scenario
    Connectivity(ConnectivityArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for wait command
#[derive(Parser, Debug)]
pub struct WaitArgs {
    /// Resource kind (pod, vmi, ...)
    pub kind: String,

    /// Resource name
    #[arg(required_unless_present = "label", conflicts_with = "label")]
    pub name: Option<String>,

    /// Label selector matching exactly one resource
    #[arg(short, long)]
    pub label: Option<String>,

    /// JSONPath field query
    #[arg(short, long, default_value = "{.status.phase}")]
    pub query: String,

    /// Expected value
    #[arg(short, long, default_value = "Running")]
    pub expected: String,

    /// Timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Poll interval in seconds
    #[arg(short, long)]
    pub interval: Option<u64>,
}

/// Arguments for create command
#[derive(Parser, Debug)]
pub struct CreateArgs {
    /// Resource document
    #[arg(short, long)]
    pub file: PathBuf,
}

/// Arguments for delete command
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    /// Resource kind
    pub kind: String,

    /// Label selector
    #[arg(short, long)]
    pub label: String,
}

/// Arguments for exec command
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Pod name
    pub pod: String,

    /// Container name
    #[arg(short, long)]
    pub container: String,

    /// Command to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for describe command
#[derive(Parser, Debug)]
pub struct DescribeArgs {
    pub kind: String,
    pub name: String,
}

/// Arguments for process command
#[derive(Parser, Debug)]
pub struct ProcessArgs {
    /// Template file
    #[arg(short, long)]
    pub template: PathBuf,

    /// Where the rendered document is written
    #[arg(short, long)]
    pub output: PathBuf,

    /// Template parameters as KEY=VALUE
    #[arg(short, long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

/// Arguments for keygen command
#[derive(Parser, Debug)]
pub struct KeygenArgs {
    /// Private key path; the public key goes next to it with `.pub`
    #[arg(short, long, default_value = "id_rsa")]
    pub output: PathBuf,

    /// RSA modulus size
    #[arg(short, long)]
    pub bits: Option<usize>,
}

/// Arguments for connectivity command
#[derive(Parser, Debug)]
pub struct ConnectivityArgs {
    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Also write the summary to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Skip granting the privileged SCC (non-OpenShift clusters)
    #[arg(long)]
    pub no_scc: bool,

    /// Run only these checks (1609, 1610); repeatable
    #[arg(long = "check")]
    pub checks: Vec<u32>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show {
        /// Also list environment variables
        #[arg(long)]
        env: bool,
    },

    /// Write a default configuration file
    Init {
        #[arg(short, long, default_value = "kubevirt-e2e.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parse `KEY=VALUE`
fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
