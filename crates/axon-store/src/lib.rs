//! Directory store abstractions and in-memory backend.
//!
//! The engine consumes a transactional store through the [`DirectoryStore`]
//! trait; [`InMemoryDirectoryStore`] backs tests and embedded use while
//! [`SqliteDirectoryStore`] provides durable persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use axon_types::{
    AgentCode, AgentRecord, CodePrefix, CodeSpace, EndUserRecord, NewAgent, NewEndUser,
};

mod sqlite;

pub use sqlite::SqliteDirectoryStore;

/// Result type for directory store operations.
pub type StoreResult<T> = Result<T, DirectoryStoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum DirectoryStoreError {
    #[error("agent {0} not found")]
    AgentNotFound(u64),
    #[error("end user {0} not found")]
    UserNotFound(u64),
    #[error("{space} code '{code}' is already held")]
    CodeTaken { space: CodeSpace, code: String },
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error("directory store lock is poisoned")]
    LockPoisoned,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Transactional store contract consumed by the hierarchy engine.
///
/// Implementations must enforce per-space uniqueness of agent codes across
/// *all* rows, soft-deleted included, so retired codes are never reissued.
/// `update_user_assignment` is the single write path for the paired
/// `manager_id`/`affiliate_code` fields and must apply both as one atomic
/// unit visible to concurrent readers.
pub trait DirectoryStore: Send + Sync {
    fn insert_agent(&self, new_agent: NewAgent) -> StoreResult<AgentRecord>;
    fn get_agent(&self, agent_id: u64) -> StoreResult<Option<AgentRecord>>;
    /// Point lookup by affiliation code over non-deleted agents; deactivated
    /// agents remain findable because their codes stay historically valid.
    fn find_agent_by_affiliation_code(&self, code: &str) -> StoreResult<Option<AgentRecord>>;
    /// All non-deleted agents, active and deactivated alike.
    fn list_agents(&self) -> StoreResult<Vec<AgentRecord>>;
    fn set_agent_active(&self, agent_id: u64, active: bool) -> StoreResult<()>;
    fn update_agent_code(&self, agent_id: u64, space: CodeSpace, code: &str) -> StoreResult<()>;
    fn soft_delete_agent(&self, agent_id: u64, when: DateTime<Utc>) -> StoreResult<()>;
    /// Sequence numbers currently held in one space/prefix across all rows,
    /// soft-deleted included.
    fn taken_sequences(&self, space: CodeSpace, prefix: CodePrefix) -> StoreResult<Vec<u16>>;

    fn insert_user(&self, new_user: NewEndUser) -> StoreResult<EndUserRecord>;
    fn get_user(&self, user_id: u64) -> StoreResult<Option<EndUserRecord>>;
    /// All non-deleted end users.
    fn list_users(&self) -> StoreResult<Vec<EndUserRecord>>;
    /// Ids of non-deleted users currently stamped with `code`, ascending.
    fn user_ids_with_affiliate_code(&self, code: &str) -> StoreResult<Vec<u64>>;
    fn update_user_assignment(
        &self,
        user_id: u64,
        manager_id: Option<u64>,
        affiliate_code: &str,
    ) -> StoreResult<()>;
    fn soft_delete_user(&self, user_id: u64, when: DateTime<Utc>) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct InMemoryTables {
    agents: HashMap<u64, AgentRecord>,
    users: HashMap<u64, EndUserRecord>,
    next_agent_id: u64,
    next_user_id: u64,
}

impl InMemoryTables {
    fn code_holder(&self, space: CodeSpace, code: &str) -> Option<u64> {
        self.agents
            .values()
            .find(|agent| code_in_space(agent, space) == code)
            .map(|agent| agent.id)
    }
}

fn code_in_space(agent: &AgentRecord, space: CodeSpace) -> &str {
    match space {
        CodeSpace::Affiliation => &agent.affiliation_code,
        CodeSpace::Referral => &agent.referral_code,
    }
}

/// Volatile store backend keeping both tables behind one `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryDirectoryStore {
    tables: RwLock<InMemoryTables>,
}

impl InMemoryDirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, InMemoryTables>> {
        self.tables
            .read()
            .map_err(|_| DirectoryStoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, InMemoryTables>> {
        self.tables
            .write()
            .map_err(|_| DirectoryStoreError::LockPoisoned)
    }
}

impl DirectoryStore for InMemoryDirectoryStore {
    fn insert_agent(&self, new_agent: NewAgent) -> StoreResult<AgentRecord> {
        let mut tables = self.write()?;
        for space in CodeSpace::ALL {
            let code = match space {
                CodeSpace::Affiliation => &new_agent.affiliation_code,
                CodeSpace::Referral => &new_agent.referral_code,
            };
            if tables.code_holder(space, code).is_some() {
                return Err(DirectoryStoreError::CodeTaken {
                    space,
                    code: code.clone(),
                });
            }
        }

        tables.next_agent_id += 1;
        let agent = AgentRecord {
            id: tables.next_agent_id,
            tier: new_agent.tier,
            parent_id: new_agent.parent_id,
            affiliation_code: new_agent.affiliation_code,
            referral_code: new_agent.referral_code,
            region: new_agent.region,
            active: true,
            deleted_at: None,
        };
        tables.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    fn get_agent(&self, agent_id: u64) -> StoreResult<Option<AgentRecord>> {
        Ok(self.read()?.agents.get(&agent_id).cloned())
    }

    fn find_agent_by_affiliation_code(&self, code: &str) -> StoreResult<Option<AgentRecord>> {
        Ok(self
            .read()?
            .agents
            .values()
            .find(|agent| !agent.is_deleted() && agent.affiliation_code == code)
            .cloned())
    }

    fn list_agents(&self) -> StoreResult<Vec<AgentRecord>> {
        let mut agents: Vec<AgentRecord> = self
            .read()?
            .agents
            .values()
            .filter(|agent| !agent.is_deleted())
            .cloned()
            .collect();
        agents.sort_by_key(|agent| agent.id);
        Ok(agents)
    }

    fn set_agent_active(&self, agent_id: u64, active: bool) -> StoreResult<()> {
        let mut tables = self.write()?;
        let agent = tables
            .agents
            .get_mut(&agent_id)
            .filter(|agent| agent.deleted_at.is_none())
            .ok_or(DirectoryStoreError::AgentNotFound(agent_id))?;
        agent.active = active;
        Ok(())
    }

    fn update_agent_code(&self, agent_id: u64, space: CodeSpace, code: &str) -> StoreResult<()> {
        let mut tables = self.write()?;
        match tables.code_holder(space, code) {
            Some(holder) if holder != agent_id => {
                return Err(DirectoryStoreError::CodeTaken {
                    space,
                    code: code.to_string(),
                });
            }
            _ => {}
        }
        let agent = tables
            .agents
            .get_mut(&agent_id)
            .filter(|agent| agent.deleted_at.is_none())
            .ok_or(DirectoryStoreError::AgentNotFound(agent_id))?;
        match space {
            CodeSpace::Affiliation => agent.affiliation_code = code.to_string(),
            CodeSpace::Referral => agent.referral_code = code.to_string(),
        }
        Ok(())
    }

    fn soft_delete_agent(&self, agent_id: u64, when: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.write()?;
        let agent = tables
            .agents
            .get_mut(&agent_id)
            .ok_or(DirectoryStoreError::AgentNotFound(agent_id))?;
        agent.active = false;
        agent.deleted_at = Some(when);
        Ok(())
    }

    fn taken_sequences(&self, space: CodeSpace, prefix: CodePrefix) -> StoreResult<Vec<u16>> {
        let tables = self.read()?;
        let mut sequences: Vec<u16> = tables
            .agents
            .values()
            .filter_map(|agent| AgentCode::parse(code_in_space(agent, space)))
            .filter(|code| code.prefix == prefix)
            .map(|code| code.sequence)
            .collect();
        sequences.sort_unstable();
        Ok(sequences)
    }

    fn insert_user(&self, new_user: NewEndUser) -> StoreResult<EndUserRecord> {
        let mut tables = self.write()?;
        tables.next_user_id += 1;
        let user = EndUserRecord {
            id: tables.next_user_id,
            affiliate_code: new_user.affiliate_code,
            manager_id: new_user.manager_id,
            deleted_at: None,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn get_user(&self, user_id: u64) -> StoreResult<Option<EndUserRecord>> {
        Ok(self.read()?.users.get(&user_id).cloned())
    }

    fn list_users(&self) -> StoreResult<Vec<EndUserRecord>> {
        let mut users: Vec<EndUserRecord> = self
            .read()?
            .users
            .values()
            .filter(|user| !user.is_deleted())
            .cloned()
            .collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }

    fn user_ids_with_affiliate_code(&self, code: &str) -> StoreResult<Vec<u64>> {
        let tables = self.read()?;
        let mut ids: Vec<u64> = tables
            .users
            .values()
            .filter(|user| !user.is_deleted() && user.affiliate_code == code)
            .map(|user| user.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn update_user_assignment(
        &self,
        user_id: u64,
        manager_id: Option<u64>,
        affiliate_code: &str,
    ) -> StoreResult<()> {
        let mut tables = self.write()?;
        let user = tables
            .users
            .get_mut(&user_id)
            .filter(|user| user.deleted_at.is_none())
            .ok_or(DirectoryStoreError::UserNotFound(user_id))?;
        user.manager_id = manager_id;
        user.affiliate_code = affiliate_code.to_string();
        Ok(())
    }

    fn soft_delete_user(&self, user_id: u64, when: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.write()?;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(DirectoryStoreError::UserNotFound(user_id))?;
        user.deleted_at = Some(when);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DirectoryStore, DirectoryStoreError, InMemoryDirectoryStore, SqliteDirectoryStore,
    };
    use axon_types::{AgentTier, CodePrefix, CodeSpace, NewAgent, NewEndUser};
    use chrono::Utc;
    use tempfile::tempdir;

    fn new_agent(tier: AgentTier, affiliation: &str, referral: &str) -> NewAgent {
        NewAgent {
            tier,
            parent_id: None,
            affiliation_code: affiliation.to_string(),
            referral_code: referral.to_string(),
            region: None,
        }
    }

    fn stores() -> Vec<(&'static str, Box<dyn DirectoryStore>, Option<tempfile::TempDir>)> {
        let temp = tempdir().expect("tempdir");
        let sqlite = SqliteDirectoryStore::open(temp.path().join("directory.sqlite"))
            .expect("open sqlite store");
        vec![
            ("memory", Box::new(InMemoryDirectoryStore::new()), None),
            ("sqlite", Box::new(sqlite), Some(temp)),
        ]
    }

    #[test]
    fn rejects_taken_codes_per_space() {
        for (name, store, _guard) in stores() {
            store
                .insert_agent(new_agent(AgentTier::Ceo, "CEO001", "CEO002"))
                .expect("insert");

            let affiliation_clash =
                store.insert_agent(new_agent(AgentTier::Ceo, "CEO001", "CEO009"));
            assert!(
                matches!(
                    affiliation_clash,
                    Err(DirectoryStoreError::CodeTaken {
                        space: CodeSpace::Affiliation,
                        ..
                    })
                ),
                "{name}"
            );

            let referral_clash = store.insert_agent(new_agent(AgentTier::Ceo, "CEO003", "CEO002"));
            assert!(
                matches!(
                    referral_clash,
                    Err(DirectoryStoreError::CodeTaken {
                        space: CodeSpace::Referral,
                        ..
                    })
                ),
                "{name}"
            );

            // The same string may exist once per space.
            store
                .insert_agent(new_agent(AgentTier::Ceo, "CEO002", "CEO001"))
                .expect("cross-space reuse");
        }
    }

    #[test]
    fn soft_deleted_agents_leave_active_queries_but_keep_codes_reserved() {
        for (name, store, _guard) in stores() {
            let kept = store
                .insert_agent(new_agent(AgentTier::Middle, "MID001", "MID002"))
                .expect("insert");
            let gone = store
                .insert_agent(new_agent(AgentTier::Middle, "MID002", "MID001"))
                .expect("insert");
            store
                .soft_delete_agent(gone.id, Utc::now())
                .expect("soft delete");

            let listed = store.list_agents().expect("list");
            assert_eq!(listed.len(), 1, "{name}");
            assert_eq!(listed[0].id, kept.id, "{name}");
            assert!(
                store
                    .find_agent_by_affiliation_code("MID002")
                    .expect("find")
                    .is_none(),
                "{name}"
            );

            let taken = store
                .taken_sequences(CodeSpace::Affiliation, CodePrefix::Mid)
                .expect("taken");
            assert_eq!(taken, vec![1, 2], "{name}");
        }
    }

    #[test]
    fn deactivated_agents_stay_findable_by_code() {
        for (name, store, _guard) in stores() {
            let agent = store
                .insert_agent(new_agent(AgentTier::General, "GEN001", "GEN002"))
                .expect("insert");
            store.set_agent_active(agent.id, false).expect("deactivate");

            let found = store
                .find_agent_by_affiliation_code("GEN001")
                .expect("find")
                .expect("present");
            assert!(!found.active, "{name}");
        }
    }

    #[test]
    fn updates_user_assignment_as_a_pair() {
        for (name, store, _guard) in stores() {
            let manager = store
                .insert_agent(new_agent(AgentTier::Ceo, "CEO001", "CEO002"))
                .expect("insert agent");
            let user = store
                .insert_user(NewEndUser {
                    affiliate_code: "GEN001".to_string(),
                    manager_id: None,
                })
                .expect("insert user");

            store
                .update_user_assignment(user.id, Some(manager.id), &manager.affiliation_code)
                .expect("update");
            let reread = store.get_user(user.id).expect("get").expect("present");
            assert_eq!(reread.manager_id, Some(manager.id), "{name}");
            assert_eq!(reread.affiliate_code, "CEO001", "{name}");

            let missing = store.update_user_assignment(9_999, Some(manager.id), "CEO001");
            assert!(
                matches!(missing, Err(DirectoryStoreError::UserNotFound(9_999))),
                "{name}"
            );
        }
    }

    #[test]
    fn filters_user_scans_to_non_deleted_rows() {
        for (name, store, _guard) in stores() {
            let first = store
                .insert_user(NewEndUser {
                    affiliate_code: "CEO001".to_string(),
                    manager_id: None,
                })
                .expect("insert");
            let second = store
                .insert_user(NewEndUser {
                    affiliate_code: "CEO001".to_string(),
                    manager_id: None,
                })
                .expect("insert");
            store
                .soft_delete_user(second.id, Utc::now())
                .expect("soft delete");

            let ids = store
                .user_ids_with_affiliate_code("CEO001")
                .expect("scan");
            assert_eq!(ids, vec![first.id], "{name}");
            assert_eq!(store.list_users().expect("list").len(), 1, "{name}");
        }
    }

    #[test]
    fn code_regeneration_enforces_uniqueness() {
        for (name, store, _guard) in stores() {
            let first = store
                .insert_agent(new_agent(AgentTier::Ceo, "CEO001", "CEO002"))
                .expect("insert");
            store
                .insert_agent(new_agent(AgentTier::Ceo, "CEO003", "CEO004"))
                .expect("insert");

            let clash = store.update_agent_code(first.id, CodeSpace::Affiliation, "CEO003");
            assert!(
                matches!(clash, Err(DirectoryStoreError::CodeTaken { .. })),
                "{name}"
            );

            store
                .update_agent_code(first.id, CodeSpace::Affiliation, "CEO005")
                .expect("update");
            let reread = store.get_agent(first.id).expect("get").expect("present");
            assert_eq!(reread.affiliation_code, "CEO005", "{name}");
        }
    }
}
