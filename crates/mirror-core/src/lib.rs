//! # mirror-core
//!
//! The sync engine itself: the domain model (repos, tuples, in-flight sync
//! attempts), configuration, the durable `Store` trait, and the Syncer and
//! Reactor state machines that drive a tuple from a merged upstream PR to
//! a merged fork PR (or a tracking issue, on failure).
//!
//! This crate is pure logic — no HTTP server, no SQLite, no CLI. It's
//! generic over [`store::Store`], [`mirror_host::HostClient`], and
//! [`mirror_git::GitWorkspace`] so the binary crate can wire in real
//! implementations while tests wire in mocks.

pub mod config;
pub mod domain;
pub mod error;
pub mod ops;
pub mod reactor;
pub mod store;
pub mod syncer;
pub mod templates;

pub use config::{Config, UpstreamMapping};
pub use domain::{PendingAction, PendingPr, Repo, Tuple, NOT_APPLICABLE_AUTHOR};
pub use error::{Error, Result};
pub use ops::MergeOutcome;
pub use store::Store;
pub use syncer::{BranchTarget, RunSummary};
