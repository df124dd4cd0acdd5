//! # p2plab-core
//!
//! Pure logic for p2plab - no I/O, instant tests.
//!
//! This crate provides:
//! - [`NodeState`] - Node lifecycle state machine
//! - [`NodeSet`] - Concurrency-safe registry of live node handles
//! - [`SshSettings`] - SSH session settings built from ordered options
//!
//! The I/O side (dialing control endpoints, talking to infrastructure)
//! lives in p2plab-client.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod node_set;
pub mod ssh;
pub mod state;

pub use node_set::{NodeIdentity, NodeSet};
pub use ssh::{
    with_command, with_identity_file, with_option, with_port, with_user, SshOption, SshSettings,
};
pub use state::{NodeEvent, NodeState, Rejection};
