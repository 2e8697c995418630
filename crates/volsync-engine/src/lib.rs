//! The volsync synchronization engine
//!
//! Reconciles two directory trees living on any mix of backends — local
//! disk, a host reachable over an SSH shell, or an SFTP server — moving
//! only what changed, rsync style. The pipeline:
//!
//! 1. **Scan** source and target concurrently into ordered entry lists
//! 2. **Map** source paths into target space (MERGE or NEST)
//! 3. **Plan** a deterministic, ordered action list via quick-check and
//!    content fingerprints
//! 4. **Execute** the plan with bounded concurrency, collecting an
//!    immutable result
//!
//! Nothing destructive happens unless asked: deletions require the
//! `delete` option and type-mismatch overwrites require `force`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use volsync_engine::sync_local;
//! use volsync_types::{SyncMode, SyncOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let result = sync_local("./source", "./backup", SyncMode::Merge, SyncOptions::mirror()).await?;
//! println!("copied {} files, {} bytes", result.counts.files_copied, result.bytes_transferred);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod executor;
pub mod mapper;
pub mod planner;
mod state;

pub use engine::{sync_local, SyncAborted, SyncEngine};
pub use executor::{execute, ExecutionOutcome};
pub use mapper::{map_back, map_source};
pub use planner::{plan, Plan, PlanInputs};
