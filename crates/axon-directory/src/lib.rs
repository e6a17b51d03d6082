//! Agent hierarchy engine: code allocation, directory operations, affiliation
//! propagation, and integrity audit over a shared `DirectoryStore`.

use thiserror::Error;

use axon_store::DirectoryStoreError;
use axon_types::{AgentTier, CodePrefix, CodeSpace};

mod audit;
mod code_allocator;
mod hierarchy;
mod propagation;

pub use audit::{AuditRepairReport, IntegrityAuditor, IntegrityReport};
pub use code_allocator::{first_free_sequence, CodeAllocator};
pub use hierarchy::{AgentDirectory, CodeRegeneration, NewAgentRequest};
pub use propagation::{
    AffiliationPropagator, BulkReassignReport, DriftRepair, ReassignOutcome,
};

/// Result type for hierarchy engine operations.
pub type EngineResult<T> = Result<T, DirectoryError>;

/// Errors surfaced by the hierarchy engine.
///
/// Transient allocation races are retried internally and only reach the
/// caller as `AllocationConflict` once retries are exhausted. Structural
/// findings (unmanaged users, duplicate codes) are carried in report values,
/// not through this enum.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("tier {child:?} cannot attach under parent tier {parent:?}")]
    InvalidHierarchy {
        child: AgentTier,
        parent: Option<AgentTier>,
    },
    #[error("{space} sequence space for prefix {prefix} is exhausted")]
    AllocationExhausted {
        space: CodeSpace,
        prefix: CodePrefix,
    },
    #[error("{space} code reservation kept colliding after {attempts} attempts")]
    AllocationConflict { space: CodeSpace, attempts: u32 },
    #[error("lineage for agent {agent_id} references missing or deleted parent {parent_id}")]
    BrokenChain { agent_id: u64, parent_id: u64 },
    #[error("agent {0} not found")]
    AgentNotFound(u64),
    #[error("end user {0} not found")]
    UserNotFound(u64),
    #[error(transparent)]
    Store(#[from] DirectoryStoreError),
}
