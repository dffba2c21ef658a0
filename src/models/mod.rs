//! Data models for scenario results

mod check;

pub use check::{
    CheckResult, CheckStatus, ConnectivityCheck, PhaseTiming, ProbeResult, ScenarioSummary,
};
