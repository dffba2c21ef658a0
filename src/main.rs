//! kubevirt-e2e - KubeVirt end-to-end test helper CLI
//!
//! ## Usage
//!
//! ```bash
//! # Wait for a pod to run
//! kubevirt-e2e wait pod virt-launcher-abc --timeout 120
//!
//! # Wait on a label selector and a custom field
//! kubevirt-e2e wait vmi --label app=test --query '{.status.phase}' --expected Running
//!
//! # Run the network connectivity scenario
//! kubevirt-e2e connectivity --format json-pretty
//!
//! # Generate a guest key pair
//! kubevirt-e2e keygen --output keys/id_rsa
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use kubevirt_e2e::cli::{self, Args, ConfigAction};
use kubevirt_e2e::cluster::{ClusterCli, ClusterOps, PodRef, ResourceQuery, Selector};
use kubevirt_e2e::config::{print_env_help, E2eConfig, EnvConfig};
use kubevirt_e2e::keys::generate_key_pair;
use kubevirt_e2e::output::{write_summary_to_file, OutputFormat, ResultFormatter};
use kubevirt_e2e::poller::{PollOutcome, ReadinessPoller};
use kubevirt_e2e::scenario::ConnectivityScenario;
use kubevirt_e2e::models::ConnectivityCheck;
use kubevirt_e2e::utils::{as_millis, init_logger};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(args.verbose || env.verbose.unwrap_or(false));

    let config_path = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    let mut config = E2eConfig::load_or_default(config_path.as_deref())?;
    config.apply_env(&env);
    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }

    match args.command {
        cli::Command::Wait(wait_args) => run_wait(&config, wait_args).await,
        cli::Command::Create(create_args) => {
            cluster_cli(&config)
                .create_resource(&create_args.file)
                .await?;
            println!("✓ Created resources from {}", create_args.file.display());
            Ok(())
        }
        cli::Command::Delete(delete_args) => {
            cluster_cli(&config)
                .delete_resource(&delete_args.kind, &delete_args.label)
                .await?;
            println!("✓ Deleted {} with {}", delete_args.kind, delete_args.label);
            Ok(())
        }
        cli::Command::Exec(exec_args) => {
            let target = PodRef::new(exec_args.pod, exec_args.container);
            let output = cluster_cli(&config)
                .exec_in_guest(&target, &exec_args.command)
                .await?;
            print!("{output}");
            Ok(())
        }
        cli::Command::Describe(describe_args) => {
            let output = cluster_cli(&config)
                .describe_resource(&describe_args.kind, &describe_args.name)
                .await?;
            print!("{output}");
            Ok(())
        }
        cli::Command::Process(process_args) => {
            let path = cluster_cli(&config)
                .process_template(
                    &process_args.template,
                    &process_args.output,
                    &process_args.params,
                )
                .await?;
            println!("✓ Rendered {}", path.display());
            Ok(())
        }
        cli::Command::Keygen(keygen_args) => run_keygen(&config, keygen_args).await,
        cli::Command::Connectivity(conn_args) => run_connectivity(config, conn_args).await,
        cli::Command::Config(config_args) => manage_config(&config, config_args.action),
    }
}

fn cluster_cli(config: &E2eConfig) -> ClusterCli {
    ClusterCli::new(&config.cli, &config.namespace)
}

async fn run_wait(config: &E2eConfig, args: cli::WaitArgs) -> Result<()> {
    let mut settings = config.poll_settings();
    if let Some(timeout) = args.timeout {
        settings.timeout = Duration::from_secs(timeout);
    }
    if let Some(interval) = args.interval {
        settings.interval = Duration::from_secs(interval);
    }

    let selector = match (args.name, args.label) {
        (Some(name), _) => Selector::Name(name),
        (None, Some(label)) => Selector::Label(label),
        (None, None) => bail!("either a name or --label is required"),
    };
    let query = ResourceQuery::new(args.kind, selector, args.expected).field(args.query);

    let cli = cluster_cli(config);
    let poller = ReadinessPoller::new(&cli, settings);
    let start = tokio::time::Instant::now();
    match poller.wait(&query).await {
        PollOutcome::Ready(output) => {
            println!("✓ {} is {:?} ({}ms)", query, output, as_millis(start.elapsed()));
            Ok(())
        }
        PollOutcome::TimedOut => bail!(
            "timed out after {:?}: {} never became {:?}",
            poller.settings().timeout,
            query,
            query.expected
        ),
        PollOutcome::QueryFailed(e) => {
            Err(anyhow::Error::new(e).context(format!("query for {query} failed")))
        }
    }
}

async fn run_keygen(config: &E2eConfig, args: cli::KeygenArgs) -> Result<()> {
    let bits = args.bits.unwrap_or(config.key_bits);
    let pair = tokio::task::spawn_blocking(move || generate_key_pair(bits))
        .await
        .context("Key generation task failed")??;

    let public_path = public_key_path(&args.output);
    pair.write_private_key(&args.output)?;
    pair.write_public_key(&public_path)?;

    println!("✓ Private key: {}", args.output.display());
    println!("✓ Public key:  {}", public_path.display());
    print!("{}", pair.authorized_key());
    Ok(())
}

fn public_key_path(private_key: &Path) -> PathBuf {
    let mut path = private_key.as_os_str().to_owned();
    path.push(".pub");
    PathBuf::from(path)
}

async fn run_connectivity(mut config: E2eConfig, args: cli::ConnectivityArgs) -> Result<()> {
    let format = OutputFormat::from_str(&args.format)
        .with_context(|| format!("Unknown output format: {}", args.format))?;
    if args.no_scc {
        config.scenario.grant_privileged_scc = false;
    }
    let checks = args
        .checks
        .iter()
        .map(|&id| {
            ConnectivityCheck::from_id(id)
                .with_context(|| format!("Unknown connectivity check: {id}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let summary = ConnectivityScenario::new(config)
        .await?
        .with_checks(checks)
        .run()
        .await?;

    println!("{}", ResultFormatter::new(format).format_summary(&summary));
    if let Some(path) = &args.output {
        write_summary_to_file(path, &summary, format)?;
        info!("Summary written to {}", path.display());
    }

    if !summary.is_all_passed() {
        bail!(
            "{} of {} connectivity checks failed",
            summary.total - summary.passed,
            summary.total
        );
    }
    Ok(())
}

fn manage_config(config: &E2eConfig, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { env } => {
            config.validate()?;
            print!(
                "{}",
                serde_yaml::to_string(config).context("Failed to serialize config")?
            );
            if env {
                println!();
                EnvConfig::load().print_summary();
                println!();
                print_env_help();
            }
        }
        ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    output.display()
                );
            }
            E2eConfig::default().save(&output)?;
            println!("✓ Wrote {}", output.display());
        }
    }
    Ok(())
}
