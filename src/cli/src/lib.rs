//! a3s-oci CLI: OCI image composition from locally built root filesystems.

pub mod commands;
pub mod output;
