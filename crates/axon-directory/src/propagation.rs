//! Affiliation propagation: stamping, reassignment, and drift repair.

use std::sync::Arc;

use serde::Serialize;

use axon_store::DirectoryStore;
use axon_types::{AgentCode, AgentRecord, EndUserRecord};

use crate::{DirectoryError, EngineResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
/// Outcome of a single reassignment.
pub struct ReassignOutcome {
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
/// Public struct `BulkReassignReport` used across Axon components.
pub struct BulkReassignReport {
    pub reassigned: usize,
    pub already_assigned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
/// Outcome of a drift-repair attempt on one end user.
pub enum DriftRepair {
    /// Stamped code already matched the manager's current code.
    Clean,
    Repaired {
        old_code: String,
        new_code: String,
    },
    /// No manager to repair from; surfaced as a finding, never guessed at.
    NoManager,
}

impl DriftRepair {
    pub fn repaired(&self) -> bool {
        matches!(self, Self::Repaired { .. })
    }
}

/// Keeps each end-user's denormalized affiliation code consistent with their
/// current manager.
pub struct AffiliationPropagator {
    store: Arc<dyn DirectoryStore>,
}

impl AffiliationPropagator {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self { store }
    }

    fn active_manager(&self, manager_id: u64) -> EngineResult<AgentRecord> {
        self.store
            .get_agent(manager_id)?
            .filter(|agent| !agent.is_deleted())
            .ok_or(DirectoryError::AgentNotFound(manager_id))
    }

    /// Registers a new end user stamped with the manager's current
    /// affiliation code. Called once at registration.
    pub fn stamp_on_create(&self, manager_id: u64) -> EngineResult<EndUserRecord> {
        let manager = self.active_manager(manager_id)?;
        let user = self.store.insert_user(axon_types::NewEndUser {
            affiliate_code: manager.affiliation_code.clone(),
            manager_id: Some(manager.id),
        })?;
        tracing::debug!(
            user_id = user.id,
            manager_id = manager.id,
            affiliate_code = %user.affiliate_code,
            "stamped new end user"
        );
        Ok(user)
    }

    /// Moves a user to a new manager, updating `manager_id` and the stamped
    /// code as one atomic unit. Idempotent: a user already managed by
    /// `new_manager_id` is left untouched.
    pub fn reassign(&self, user_id: u64, new_manager_id: u64) -> EngineResult<ReassignOutcome> {
        let manager = self.active_manager(new_manager_id)?;
        let user = self
            .store
            .get_user(user_id)?
            .filter(|user| !user.is_deleted())
            .ok_or(DirectoryError::UserNotFound(user_id))?;

        if user.manager_id == Some(manager.id) {
            return Ok(ReassignOutcome { changed: false });
        }

        self.store
            .update_user_assignment(user.id, Some(manager.id), &manager.affiliation_code)?;
        tracing::debug!(
            user_id = user.id,
            manager_id = manager.id,
            old_code = %user.affiliate_code,
            new_code = %manager.affiliation_code,
            "reassigned end user"
        );
        Ok(ReassignOutcome { changed: true })
    }

    /// Reassigns every non-deleted user currently stamped with `from_code`.
    ///
    /// Each user is its own atomic unit; the bulk pass is not transactional,
    /// so partial progress stands and a re-run picks up where it stopped. A
    /// second complete run reports `reassigned = 0`.
    pub fn reassign_all(
        &self,
        from_code: &str,
        new_manager_id: u64,
    ) -> EngineResult<BulkReassignReport> {
        let user_ids = self.store.user_ids_with_affiliate_code(from_code)?;
        let mut report = BulkReassignReport::default();
        for user_id in user_ids {
            match self.reassign(user_id, new_manager_id) {
                Ok(ReassignOutcome { changed: true }) => report.reassigned += 1,
                Ok(ReassignOutcome { changed: false }) => report.already_assigned += 1,
                // Deleted between the scan and the write; nothing to move.
                Err(DirectoryError::UserNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        tracing::info!(
            from_code = %from_code,
            new_manager_id,
            reassigned = report.reassigned,
            already_assigned = report.already_assigned,
            "bulk reassignment finished"
        );
        Ok(report)
    }

    /// Re-stamps a user whose code drifted from, or was never a valid copy
    /// of, their manager's current affiliation code.
    ///
    /// The user row is re-read here rather than trusted from a finding, since
    /// audit findings may be stale by the time repair runs. A user without a
    /// usable manager reference yields `NoManager`.
    pub fn repair_drift(&self, user_id: u64) -> EngineResult<DriftRepair> {
        let user = self
            .store
            .get_user(user_id)?
            .filter(|user| !user.is_deleted())
            .ok_or(DirectoryError::UserNotFound(user_id))?;

        let Some(manager_id) = user.manager_id else {
            tracing::warn!(
                user_id = user.id,
                affiliate_code = %user.affiliate_code,
                "cannot repair drift for unmanaged end user"
            );
            return Ok(DriftRepair::NoManager);
        };

        let manager = match self.store.get_agent(manager_id)? {
            Some(manager) if !manager.is_deleted() => manager,
            // A dangling manager reference cannot be repaired from either;
            // report it alongside the unmanaged case for operator review.
            _ => {
                tracing::warn!(
                    user_id = user.id,
                    manager_id,
                    "manager reference points at a missing or deleted agent"
                );
                return Ok(DriftRepair::NoManager);
            }
        };

        if user.affiliate_code == manager.affiliation_code {
            return Ok(DriftRepair::Clean);
        }
        let malformed = !AgentCode::is_well_formed(&user.affiliate_code);

        self.store
            .update_user_assignment(user.id, Some(manager.id), &manager.affiliation_code)?;
        tracing::info!(
            user_id = user.id,
            manager_id = manager.id,
            old_code = %user.affiliate_code,
            new_code = %manager.affiliation_code,
            malformed,
            "repaired affiliate code drift"
        );
        Ok(DriftRepair::Repaired {
            old_code: user.affiliate_code,
            new_code: manager.affiliation_code,
        })
    }
}
