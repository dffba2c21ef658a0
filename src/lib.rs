//! KubeVirt end-to-end test helpers
//!
//! Cluster helpers for end-to-end tests of VMs on Kubernetes/OpenShift:
//!
//! - a readiness poller that waits for a resource field to reach a value,
//!   failing fast when the query itself breaks
//! - one-shot cluster operations (create, delete by label, exec, describe,
//!   template processing) through the `oc`/`kubectl` CLI
//! - RSA key pair generation for guest login
//! - the VM to VM network connectivity scenario over the pod network and an
//!   OVS VXLAN network attached through Multus

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod keys;
pub mod kubevirt;
pub mod models;
pub mod output;
pub mod poller;
pub mod scenario;
pub mod utils;
