//! Core of the AFKMS change engine.
//! Proposes, commits and undoes batches of entity mutations over SQLite.

pub mod action;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use action::{Action, ActionError, ActionType, ApplyRecord, ApplyResult};
pub use config::{ConfigError, Settings};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::change::{ActorKind, ActorRef, ChangeSet, ChangeStatus, Commit, DiffItem};
pub use model::ValidationError;
pub use repo::audit_repo::AuditListQuery;
pub use repo::change_repo::ChangeListQuery;
pub use repo::{RepoError, RepoResult};
pub use service::change_service::{
    ActionInput, AuditListResult, ChangeError, ChangeListResult, ChangeResult, ChangeService,
    ChangeSetDetail, CommitOutcome, CommitRequest, DryRunRequest, Proposal, UndoOutcome,
    UndoRequest,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
