//! Error types for cluster operations
//!
//! Every external call made by the helpers has its own error type so callers
//! can tell a broken query apart from a failed create, delete or exec.

use std::path::PathBuf;

use thiserror::Error;

/// Failure running the cluster CLI (or any other external binary)
#[derive(Debug, Error)]
pub enum CliError {
    /// The binary could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The binary ran but exited unsuccessfully
    #[error("`{command}` exited with status {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl CliError {
    /// Captured stderr of a failed command, empty for spawn failures
    pub fn stderr(&self) -> &str {
        match self {
            CliError::Failed { stderr, .. } => stderr,
            CliError::Spawn { .. } => "",
        }
    }
}

/// Reading the observable state of a resource failed
#[derive(Debug, Error)]
pub enum QueryError {
    /// No resource matched the selector
    #[error("{kind} matching {selector} not found")]
    NotFound { kind: String, selector: String },

    /// A label selector matched more than one resource where one was required
    #[error("{kind} matching {selector} is ambiguous: {count} resources matched")]
    Ambiguous {
        kind: String,
        selector: String,
        count: usize,
    },

    /// Transport or tool failure
    #[error("query failed: {0}")]
    Cli(#[from] CliError),
}

/// Applying a resource document failed
#[derive(Debug, Error)]
pub enum CreateError {
    /// The document to apply does not exist
    #[error("resource document {0} does not exist")]
    MissingDocument(PathBuf),

    /// The cluster rejected the document or the tool failed
    #[error("create failed: {0}")]
    Cli(#[from] CliError),
}

/// Removing resources failed
#[derive(Debug, Error)]
pub enum DeleteError {
    /// Nothing matched the kind and label
    #[error("no {kind} matching label {label}")]
    NoMatch { kind: String, label: String },

    #[error("delete failed: {0}")]
    Cli(#[from] CliError),
}

/// Running a command inside a workload failed
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("exec in {target} failed: {source}")]
    Cli {
        target: String,
        #[source]
        source: CliError,
    },
}

/// Key pair generation failed
#[derive(Debug, Error)]
pub enum KeyGenError {
    #[error("invalid RSA key size {0}: must be between 1024 and 16384 bits")]
    InvalidBitSize(usize),

    #[error("key generation failed: {0}")]
    Generation(String),

    #[error("key encoding failed: {0}")]
    Encoding(String),

    #[error("failed to write key to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Rendering a template failed
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template processing failed: {0}")]
    Cli(#[from] CliError),

    #[error("failed to write rendered template to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_error_display() {
        let err = CliError::Failed {
            command: "oc get pod pod-a".to_string(),
            code: Some(1),
            stderr: "boom".to_string(),
        };

        assert_eq!(err.to_string(), "`oc get pod pod-a` exited with status Some(1): boom");
        assert_eq!(err.stderr(), "boom");
    }

    #[test]
    fn test_query_error_from_cli() {
        let err: QueryError = CliError::Spawn {
            program: "oc".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        }
        .into();

        assert!(matches!(err, QueryError::Cli(_)));
        assert!(err.to_string().starts_with("query failed: failed to run oc"));
    }

    #[test]
    fn test_ambiguous_message() {
        let err = QueryError::Ambiguous {
            kind: "pod".to_string(),
            selector: "label app=x".to_string(),
            count: 2,
        };

        assert_eq!(
            err.to_string(),
            "pod matching label app=x is ambiguous: 2 resources matched"
        );
    }

    #[test]
    fn test_keygen_invalid_size_message() {
        assert!(KeyGenError::InvalidBitSize(512).to_string().contains("512"));
    }
}
