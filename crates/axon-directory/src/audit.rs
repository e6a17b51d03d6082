//! Integrity audit: duplicate-code and malformed-code scans with optional
//! repair through the propagator.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use axon_store::DirectoryStore;
use axon_types::{AgentCode, AgentRecord, EndUserRecord};

use crate::propagation::{AffiliationPropagator, DriftRepair};
use crate::EngineResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
/// Scan-only summary of the data-quality state.
pub struct IntegrityReport {
    pub agents: usize,
    pub users: usize,
    pub duplicate_codes: usize,
    pub malformed_users: usize,
    pub drifted_users: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_codes == 0 && self.malformed_users == 0 && self.drifted_users == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
/// Public struct `AuditRepairReport` used across Axon components.
pub struct AuditRepairReport {
    pub repaired: usize,
    pub skipped_no_manager: usize,
}

/// Scans the full agent/user population for duplicate codes and broken
/// affiliation stamps. Repairs go through [`AffiliationPropagator`];
/// duplicate-code findings are reported only, since which holder is
/// authoritative is ambiguous.
pub struct IntegrityAuditor {
    store: Arc<dyn DirectoryStore>,
    propagator: AffiliationPropagator,
}

impl IntegrityAuditor {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        let propagator = AffiliationPropagator::new(Arc::clone(&store));
        Self { store, propagator }
    }

    /// Affiliation codes held by more than one non-deleted agent, with every
    /// holder listed for operator resolution.
    pub fn find_duplicate_affiliation_codes(
        &self,
    ) -> EngineResult<BTreeMap<String, Vec<AgentRecord>>> {
        let mut holders: BTreeMap<String, Vec<AgentRecord>> = BTreeMap::new();
        for agent in self.store.list_agents()? {
            holders
                .entry(agent.affiliation_code.clone())
                .or_default()
                .push(agent);
        }
        holders.retain(|_, agents| agents.len() > 1);
        Ok(holders)
    }

    /// Non-deleted users whose stamped code fails the wire format check,
    /// e.g. a raw identifier stored by a legacy migration.
    pub fn find_malformed_user_codes(&self) -> EngineResult<Vec<EndUserRecord>> {
        let users = self.store.list_users()?;
        Ok(users
            .into_iter()
            .filter(|user| !AgentCode::is_well_formed(&user.affiliate_code))
            .collect())
    }

    /// Managed, non-deleted users whose stamped code no longer matches their
    /// manager's current affiliation code.
    pub fn find_drifted_users(&self) -> EngineResult<Vec<EndUserRecord>> {
        let mut managers: HashMap<u64, Option<AgentRecord>> = HashMap::new();
        let mut drifted = Vec::new();
        for user in self.store.list_users()? {
            let Some(manager_id) = user.manager_id else {
                continue;
            };
            let manager = match managers.entry(manager_id) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(self.store.get_agent(manager_id)?)
                }
            };
            match manager {
                Some(manager)
                    if !manager.is_deleted()
                        && manager.affiliation_code != user.affiliate_code =>
                {
                    drifted.push(user);
                }
                _ => {}
            }
        }
        Ok(drifted)
    }

    /// Scan-only pass producing a summary without mutating anything.
    pub fn audit(&self) -> EngineResult<IntegrityReport> {
        let agents = self.store.list_agents()?.len();
        let users = self.store.list_users()?.len();
        let duplicates = self.find_duplicate_affiliation_codes()?;
        let malformed = self.find_malformed_user_codes()?;
        let drifted = self.find_drifted_users()?;

        let report = IntegrityReport {
            agents,
            users,
            duplicate_codes: duplicates.len(),
            malformed_users: malformed.len(),
            drifted_users: drifted.len(),
        };
        tracing::debug!(
            agents = report.agents,
            users = report.users,
            duplicate_codes = report.duplicate_codes,
            malformed_users = report.malformed_users,
            drifted_users = report.drifted_users,
            "integrity audit scan finished"
        );
        Ok(report)
    }

    /// Runs drift repair over every malformed or drifted user, tallying
    /// outcomes. Duplicate agent codes are logged and left for the operator.
    pub fn audit_and_repair(&self) -> EngineResult<AuditRepairReport> {
        for (code, agents) in self.find_duplicate_affiliation_codes()? {
            tracing::warn!(
                code = %code,
                holders = agents.len(),
                "duplicate affiliation code requires operator resolution"
            );
        }

        let mut candidate_ids: Vec<u64> = self
            .find_malformed_user_codes()?
            .into_iter()
            .chain(self.find_drifted_users()?)
            .map(|user| user.id)
            .collect();
        candidate_ids.sort_unstable();
        candidate_ids.dedup();

        let mut report = AuditRepairReport::default();
        for user_id in candidate_ids {
            match self.propagator.repair_drift(user_id) {
                Ok(DriftRepair::Repaired { .. }) => report.repaired += 1,
                Ok(DriftRepair::NoManager) => report.skipped_no_manager += 1,
                // Fixed by a concurrent writer between scan and repair.
                Ok(DriftRepair::Clean) => {}
                // Deleted between scan and repair; nothing left to fix.
                Err(crate::DirectoryError::UserNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            repaired = report.repaired,
            skipped_no_manager = report.skipped_no_manager,
            "integrity repair pass finished"
        );
        Ok(report)
    }
}
