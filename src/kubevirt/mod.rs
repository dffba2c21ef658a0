//! KubeVirt integration module
//!
//! VMI resources for the connectivity scenario and shell access to the
//! guests running in them.

mod guest;
mod vmi;

pub use guest::{
    ping_command, ping_succeeded, GuestConfig, GuestOutput, GuestProbe, GuestShell, PING_COUNT,
};
pub use vmi::{
    VirtualMachineInstance, VirtualMachineInstanceSpec, VirtualMachineInstanceStatus,
    VmiConfig, VmiInterface, VmiManager, DEFAULT_GUEST_IMAGE, DEFAULT_GUEST_MEMORY,
    DEFAULT_GUEST_USER, DEFAULT_NETWORK,
};
