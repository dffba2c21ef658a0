//! Connectivity check results
//!
//! Defines the checks the connectivity scenario runs, their outcomes and the
//! summary of a whole run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checks run by the connectivity scenario, numbered by their test ids
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityCheck {
    /// VM to VM over the Multus OVS network
    OvsMultus,
    /// VM to VM over the pod network
    PodNetwork,
}

impl ConnectivityCheck {
    pub fn id(&self) -> u32 {
        match self {
            ConnectivityCheck::OvsMultus => 1609,
            ConnectivityCheck::PodNetwork => 1610,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectivityCheck::OvsMultus => "VM to VM over Multus/OVS",
            ConnectivityCheck::PodNetwork => "VM to VM over pod network",
        }
    }

    pub fn all() -> Vec<ConnectivityCheck> {
        vec![ConnectivityCheck::OvsMultus, ConnectivityCheck::PodNetwork]
    }

    pub fn from_id(id: u32) -> Option<ConnectivityCheck> {
        match id {
            1609 => Some(ConnectivityCheck::OvsMultus),
            1610 => Some(ConnectivityCheck::PodNetwork),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectivityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id(), self.name())
    }
}

/// Check execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
}

impl CheckStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "✓",
            CheckStatus::Fail => "✗",
            CheckStatus::Error => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CheckStatus::Pass)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Fail => write!(f, "FAIL"),
            CheckStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// One ping from a VM to an address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub from_vmi: String,
    pub to_ip: String,
    pub reachable: bool,
}

/// Result of a single check
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: ConnectivityCheck,
    pub status: CheckStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probes: Vec<ProbeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    /// Pass when every probe reached its target
    pub fn from_probes(check: ConnectivityCheck, duration_ms: u64, probes: Vec<ProbeResult>) -> Self {
        let unreachable: Vec<String> = probes
            .iter()
            .filter(|p| !p.reachable)
            .map(|p| format!("{} -> {}", p.from_vmi, p.to_ip))
            .collect();

        let (status, message) = if probes.is_empty() {
            (CheckStatus::Fail, Some("no probes ran".to_string()))
        } else if unreachable.is_empty() {
            (CheckStatus::Pass, None)
        } else {
            (
                CheckStatus::Fail,
                Some(format!("unreachable: {}", unreachable.join(", "))),
            )
        };

        Self {
            check,
            status,
            duration_ms,
            probes,
            message,
        }
    }

    pub fn error(check: ConnectivityCheck, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            check,
            status: CheckStatus::Error,
            duration_ms,
            probes: Vec::new(),
            message: Some(error.into()),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.check,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Time spent in a named phase of the scenario
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub name: String,
    pub duration_ms: u64,
}

/// Summary of a scenario run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub scenario: String,
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub total_duration_ms: u64,
    pub phases: Vec<PhaseTiming>,
    pub results: Vec<CheckResult>,
}

impl ScenarioSummary {
    pub fn new(
        scenario: impl Into<String>,
        namespace: impl Into<String>,
        started_at: DateTime<Utc>,
        phases: Vec<PhaseTiming>,
        results: Vec<CheckResult>,
    ) -> Self {
        let count = |status: CheckStatus| results.iter().filter(|r| r.status == status).count();
        let passed = count(CheckStatus::Pass);
        let failed = count(CheckStatus::Fail);
        let errors = count(CheckStatus::Error);
        let total_duration_ms = phases.iter().map(|p| p.duration_ms).sum();

        Self {
            scenario: scenario.into(),
            namespace: namespace.into(),
            started_at,
            total: results.len(),
            passed,
            failed,
            errors,
            total_duration_ms,
            phases,
            results,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }
}

impl fmt::Display for ScenarioSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.scenario, self.namespace)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Error: {}",
            self.total, self.passed, self.failed, self.errors
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}
