//! # Pico
//!
//! A deployment daemon that watches git-tracked container stacks and
//! redeploys them when their tracked revision moves, injecting secrets from
//! a pluggable backend into the deployment environment.
//!
//! ## Overview
//!
//! 1. **Watcher** - polls each target's remote and emits a task per change
//! 2. **Task bus** - bounded FIFO queue between watcher and executor
//! 3. **Executor** - resolves secrets and runs the deployment, one task at a time
//! 4. **Renewal loop** - keeps a leased secret backend (Vault) alive
//! 5. **Supervisor** - runs all of the above under one fail-fast cancellation scope

pub mod bus;
pub mod config;
pub mod constants;
pub mod executor;
pub mod observability;
pub mod reconfigure;
pub mod runtime;
pub mod secret;
pub mod task;
pub mod watcher;

pub use config::Config;
pub use runtime::{App, RuntimeError};
pub use task::{EventKind, ExecutionTask, Target};
