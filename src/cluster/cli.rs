//! Cluster CLI adapter
//!
//! Implements the cluster capabilities by shelling out to `oc` (or `kubectl`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ClusterOps, PodRef, ResourceQuerier, Selector};
use crate::error::{CliError, CreateError, DeleteError, ExecError, QueryError, TemplateError};

/// Adapter over the cluster command line tool, scoped to one namespace
#[derive(Clone, Debug)]
pub struct ClusterCli {
    program: String,
    namespace: String,
}

impl ClusterCli {
    pub fn new(program: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            namespace: namespace.into(),
        }
    }

    /// Run the CLI with `args` and return its stdout
    pub async fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<String, CliError> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("Running: {}", command);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|source| CliError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(CliError::Failed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn get_args(&self, kind: &str, selector: &Selector, field_query: Option<&str>) -> Vec<String> {
        let mut args = vec!["get".to_string(), kind.to_string()];
        match selector {
            Selector::Name(name) => args.push(name.clone()),
            Selector::Label(label) => {
                args.push("-l".to_string());
                args.push(label.clone());
            }
        }
        args.push("-n".to_string());
        args.push(self.namespace.clone());
        args.push("-o".to_string());
        args.push(match field_query {
            Some(query) => format!("jsonpath={query}"),
            None => "name".to_string(),
        });
        args
    }

    fn create_args(&self, document: &Path) -> Vec<String> {
        vec![
            "create".to_string(),
            "-f".to_string(),
            document.to_string_lossy().to_string(),
            "-n".to_string(),
            self.namespace.clone(),
        ]
    }

    fn delete_args(&self, kind: &str, label: &str) -> Vec<String> {
        vec![
            "delete".to_string(),
            kind.to_string(),
            "-l".to_string(),
            label.to_string(),
            "-n".to_string(),
            self.namespace.clone(),
        ]
    }

    fn exec_args(&self, target: &PodRef, command: &[String]) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            target.name.clone(),
            "-c".to_string(),
            target.container.clone(),
            "-n".to_string(),
            self.namespace.clone(),
            "--".to_string(),
        ];
        args.extend(command.iter().cloned());
        args
    }

    fn process_args(&self, template: &Path, params: &[(String, String)]) -> Vec<String> {
        let mut args = vec![
            "process".to_string(),
            "-f".to_string(),
            template.to_string_lossy().to_string(),
        ];
        for (key, value) in params {
            args.push("-p".to_string());
            args.push(format!("{key}={value}"));
        }
        args
    }

    /// Describe a resource in human readable form
    pub async fn describe_resource(&self, kind: &str, name: &str) -> Result<String, QueryError> {
        info!("Describing {} {}", kind, name);
        self.run(&["describe", kind, name, "-n", self.namespace.as_str()])
            .await
            .map_err(|e| classify_query_failure(kind, &Selector::name(name), e))
    }

    /// Render a template with parameters and write the result to `destination`
    pub async fn process_template(
        &self,
        template: &Path,
        destination: &Path,
        params: &[(String, String)],
    ) -> Result<PathBuf, TemplateError> {
        info!(
            "Processing template {} into {}",
            template.display(),
            destination.display()
        );
        let rendered = self.run(&self.process_args(template, params)).await?;

        tokio::fs::write(destination, rendered)
            .await
            .map_err(|source| TemplateError::Write {
                path: destination.to_path_buf(),
                source,
            })?;

        Ok(destination.to_path_buf())
    }

    /// Create a service account in the namespace
    pub async fn create_service_account(&self, name: &str) -> Result<(), CreateError> {
        info!("Creating service account {}", name);
        self.run(&["create", "serviceaccount", name, "-n", self.namespace.as_str()])
            .await?;
        Ok(())
    }

    /// Allow a service account to run privileged pods (OpenShift SCC)
    pub async fn grant_privileged_scc(&self, service_account: &str) -> Result<(), CreateError> {
        info!("Granting privileged SCC to {}", service_account);
        self.run(&[
            "adm",
            "policy",
            "add-scc-to-user",
            "privileged",
            "-z",
            service_account,
            "-n",
            self.namespace.as_str(),
        ])
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceQuerier for ClusterCli {
    async fn query_resource_field(
        &self,
        kind: &str,
        selector: &Selector,
        field_query: Option<&str>,
    ) -> Result<String, QueryError> {
        match selector {
            Selector::Name(_) => self
                .run(&self.get_args(kind, selector, field_query))
                .await
                .map_err(|e| classify_query_failure(kind, selector, e)),
            Selector::Label(_) => {
                let names = self
                    .run(&self.get_args(kind, selector, None))
                    .await
                    .map_err(|e| classify_query_failure(kind, selector, e))?;
                let object = single_match(kind, selector, &names)?;

                match field_query {
                    None => Ok(object),
                    Some(query) => {
                        // `-o name` yields `kind/name`, which `get` accepts as is
                        let args = [
                            "get".to_string(),
                            object,
                            "-n".to_string(),
                            self.namespace.clone(),
                            "-o".to_string(),
                            format!("jsonpath={query}"),
                        ];
                        self.run(&args)
                            .await
                            .map_err(|e| classify_query_failure(kind, selector, e))
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ClusterOps for ClusterCli {
    async fn create_resource(&self, document: &Path) -> Result<(), CreateError> {
        info!("Creating resources from {}", document.display());
        if !document.exists() {
            return Err(CreateError::MissingDocument(document.to_path_buf()));
        }
        self.run(&self.create_args(document)).await?;
        Ok(())
    }

    async fn delete_resource(&self, kind: &str, label: &str) -> Result<(), DeleteError> {
        info!("Deleting {} with label {}", kind, label);
        let stdout = self.run(&self.delete_args(kind, label)).await?;
        if stdout.trim().is_empty() || stdout.contains("No resources found") {
            return Err(DeleteError::NoMatch {
                kind: kind.to_string(),
                label: label.to_string(),
            });
        }
        Ok(())
    }

    async fn exec_in_guest(
        &self,
        target: &PodRef,
        command: &[String],
    ) -> Result<String, ExecError> {
        debug!("Executing in {}: {:?}", target, command);
        self.run(&self.exec_args(target, command))
            .await
            .map_err(|source| ExecError::Cli {
                target: target.to_string(),
                source,
            })
    }
}

/// Map a failed `get`/`describe` onto the query error taxonomy
fn classify_query_failure(kind: &str, selector: &Selector, err: CliError) -> QueryError {
    let stderr = err.stderr();
    if stderr.contains("NotFound") || stderr.contains("not found") {
        QueryError::NotFound {
            kind: kind.to_string(),
            selector: selector.to_string(),
        }
    } else {
        QueryError::Cli(err)
    }
}

/// Require exactly one object in `-o name` output
fn single_match(kind: &str, selector: &Selector, names: &str) -> Result<String, QueryError> {
    let objects: Vec<&str> = names
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    match objects.as_slice() {
        [] => Err(QueryError::NotFound {
            kind: kind.to_string(),
            selector: selector.to_string(),
        }),
        [object] => Ok((*object).to_string()),
        _ => Err(QueryError::Ambiguous {
            kind: kind.to_string(),
            selector: selector.to_string(),
            count: objects.len(),
        }),
    }
}
