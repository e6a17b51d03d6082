//! Agent directory: creation, parent linkage, lineage, deactivation.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use axon_store::{DirectoryStore, DirectoryStoreError};
use axon_types::{AgentRecord, AgentTier, CodeSpace, NewAgent, MAX_LINEAGE_DEPTH};

use crate::code_allocator::CodeAllocator;
use crate::{DirectoryError, EngineResult};

/// Attempts made against a colliding code reservation before the conflict
/// becomes caller-visible.
const MAX_ALLOCATION_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Public struct `NewAgentRequest` used across Axon components.
pub struct NewAgentRequest {
    pub tier: AgentTier,
    pub parent_id: Option<u64>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Outcome of an explicit code regeneration.
pub struct CodeRegeneration {
    pub agent_id: u64,
    pub space: CodeSpace,
    pub old_code: String,
    pub new_code: String,
}

/// Owns the agent tree: creation with tier-order validation, lineage
/// resolution, and soft-deactivation.
pub struct AgentDirectory {
    store: Arc<dyn DirectoryStore>,
    allocator: CodeAllocator,
}

impl AgentDirectory {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            store,
            allocator: CodeAllocator::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn DirectoryStore> {
        Arc::clone(&self.store)
    }

    /// Creates an agent under an optional parent of strictly higher tier,
    /// allocating affiliation and referral codes from their separate spaces.
    pub fn create_agent(&self, request: NewAgentRequest) -> EngineResult<AgentRecord> {
        if let Some(parent_id) = request.parent_id {
            let parent = self
                .store
                .get_agent(parent_id)?
                .filter(|agent| !agent.is_deleted())
                .ok_or(DirectoryError::AgentNotFound(parent_id))?;
            // Covers INTEGRATED-with-parent as well: no tier outranks it.
            if !parent.tier.is_above(request.tier) {
                return Err(DirectoryError::InvalidHierarchy {
                    child: request.tier,
                    parent: Some(parent.tier),
                });
            }
        }

        // Slot guards stay held across scan and insert so in-process creates
        // for the same prefix are fully serialized; collisions can then only
        // come from another service instance and are retried below.
        let prefix = request.tier.prefix();
        let _affiliation_slot = self
            .allocator
            .reserve_slot(CodeSpace::Affiliation, prefix)?;
        let _referral_slot = self.allocator.reserve_slot(CodeSpace::Referral, prefix)?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let affiliation_code =
                self.allocator
                    .scan_free(self.store.as_ref(), CodeSpace::Affiliation, prefix)?;
            let referral_code =
                self.allocator
                    .scan_free(self.store.as_ref(), CodeSpace::Referral, prefix)?;

            match self.store.insert_agent(NewAgent {
                tier: request.tier,
                parent_id: request.parent_id,
                affiliation_code,
                referral_code,
                region: request.region.clone(),
            }) {
                Ok(agent) => {
                    tracing::debug!(
                        agent_id = agent.id,
                        tier = agent.tier.as_str(),
                        affiliation_code = %agent.affiliation_code,
                        referral_code = %agent.referral_code,
                        "created agent"
                    );
                    return Ok(agent);
                }
                Err(DirectoryStoreError::CodeTaken { space, code })
                    if attempts < MAX_ALLOCATION_ATTEMPTS =>
                {
                    tracing::debug!(
                        space = space.as_str(),
                        code = %code,
                        attempts,
                        "code reservation collided, rescanning"
                    );
                }
                Err(DirectoryStoreError::CodeTaken { space, .. }) => {
                    return Err(DirectoryError::AllocationConflict { space, attempts });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Resolves the chain from `agent_id` up through parents to the root,
    /// self first. A parent reference to a missing or soft-deleted record is
    /// data corruption and fails with `BrokenChain` rather than truncating.
    pub fn lineage(&self, agent_id: u64) -> EngineResult<Vec<AgentRecord>> {
        let mut current = self
            .store
            .get_agent(agent_id)?
            .filter(|agent| !agent.is_deleted())
            .ok_or(DirectoryError::AgentNotFound(agent_id))?;

        let mut chain = Vec::new();
        loop {
            chain.push(current.clone());
            let Some(parent_id) = current.parent_id else {
                return Ok(chain);
            };
            // Tier ordering bounds well-formed chains at four entries; going
            // past that means the stored tiers no longer form a strict order.
            if chain.len() >= MAX_LINEAGE_DEPTH {
                return Err(DirectoryError::BrokenChain {
                    agent_id: current.id,
                    parent_id,
                });
            }
            current = self
                .store
                .get_agent(parent_id)?
                .filter(|agent| !agent.is_deleted())
                .ok_or(DirectoryError::BrokenChain {
                    agent_id: current.id,
                    parent_id,
                })?;
        }
    }

    /// Deactivates an agent. Already-stamped end-users keep the agent's code;
    /// historical attribution is preserved by design.
    pub fn deactivate(&self, agent_id: u64) -> EngineResult<()> {
        self.store.set_agent_active(agent_id, false).map_err(|err| {
            match err {
                DirectoryStoreError::AgentNotFound(id) => DirectoryError::AgentNotFound(id),
                other => other.into(),
            }
        })?;
        tracing::debug!(agent_id, "deactivated agent");
        Ok(())
    }

    /// Soft-deletes an agent, retiring both codes from future issuance.
    pub fn soft_delete(&self, agent_id: u64) -> EngineResult<()> {
        self.store
            .soft_delete_agent(agent_id, Utc::now())
            .map_err(|err| match err {
                DirectoryStoreError::AgentNotFound(id) => DirectoryError::AgentNotFound(id),
                other => other.into(),
            })?;
        tracing::debug!(agent_id, "soft-deleted agent");
        Ok(())
    }

    pub fn find_by_affiliation_code(&self, code: &str) -> EngineResult<Option<AgentRecord>> {
        Ok(self.store.find_agent_by_affiliation_code(code)?)
    }

    /// Replaces one of an agent's codes with a freshly allocated one.
    ///
    /// End-users stamped with the old affiliation code are left untouched;
    /// the caller follows up with a bulk reassignment from `old_code` when
    /// the stamped population should move along.
    pub fn regenerate_code(
        &self,
        agent_id: u64,
        space: CodeSpace,
    ) -> EngineResult<CodeRegeneration> {
        let agent = self
            .store
            .get_agent(agent_id)?
            .filter(|agent| !agent.is_deleted())
            .ok_or(DirectoryError::AgentNotFound(agent_id))?;
        let old_code = match space {
            CodeSpace::Affiliation => agent.affiliation_code,
            CodeSpace::Referral => agent.referral_code,
        };

        let prefix = agent.tier.prefix();
        let _slot = self.allocator.reserve_slot(space, prefix)?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let new_code = self
                .allocator
                .scan_free(self.store.as_ref(), space, prefix)?;
            match self.store.update_agent_code(agent_id, space, &new_code) {
                Ok(()) => {
                    tracing::info!(
                        agent_id,
                        space = space.as_str(),
                        old_code = %old_code,
                        new_code = %new_code,
                        "regenerated agent code"
                    );
                    return Ok(CodeRegeneration {
                        agent_id,
                        space,
                        old_code,
                        new_code,
                    });
                }
                Err(DirectoryStoreError::CodeTaken { .. })
                    if attempts < MAX_ALLOCATION_ATTEMPTS => {}
                Err(DirectoryStoreError::CodeTaken { space, .. }) => {
                    return Err(DirectoryError::AllocationConflict { space, attempts });
                }
                Err(DirectoryStoreError::AgentNotFound(id)) => {
                    return Err(DirectoryError::AgentNotFound(id));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
