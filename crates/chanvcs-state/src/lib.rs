//! chanvcs-state: storage backends for chanvcs
//!
//! This crate provides the persistence layer for channel artifacts: the
//! working tree, version control, and the promotion approval log.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: path safety, atomic writes, and revision diffs.
//!
//! ## Key Components
//!
//! - `FileStore` / `FsFileStore`: working-tree file access
//! - `VersionControl` / `GitVersionControl`: commit and changed-path queries
//! - `ApprovalLog` / `JsonlApprovalLog`: append-only approval history
//! - `fakes`: in-memory implementations for tests

mod approval_log;
mod error;
pub mod fakes;
mod fs_store;
pub mod git;
pub mod storage_traits;

pub use approval_log::JsonlApprovalLog;
pub use error::StorageError;
pub use fs_store::FsFileStore;
pub use git::GitVersionControl;
pub use storage_traits::{
    validate_path, ApprovalLog, ApprovalOutcome, ApprovalRecord, ChangeStatus, ChangedPath,
    CommitId, FileStore, StorageResult, VersionControl,
};
