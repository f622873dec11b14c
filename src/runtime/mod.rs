//! # Runtime
//!
//! Watch loop, error policy and leader election wiring of the controller.

pub mod error_policy;
pub mod leader_election;
pub mod watch_loop;

pub use leader_election::LeaderElection;
pub use watch_loop::{run_watch_loop, Context, Operation, ReconcileError};
