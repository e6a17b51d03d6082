//! SQLite-backed `DirectoryStore` implementation with durable persistence.
//!
//! Code uniqueness is checked inside immediate transactions rather than by
//! `UNIQUE` indexes so that databases imported from legacy systems, which can
//! already hold duplicate codes, remain loadable for the integrity auditor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use axon_types::{
    AgentCode, AgentRecord, AgentTier, CodePrefix, CodeSpace, EndUserRecord, NewAgent, NewEndUser,
};

use crate::{DirectoryStore, DirectoryStoreError, StoreResult};

const AGENT_COLUMNS: &str =
    "agent_id, tier, parent_id, affiliation_code, referral_code, region, active, deleted_at";
const USER_COLUMNS: &str = "user_id, affiliate_code, manager_id, deleted_at";

/// Persistent SQLite store backend for the agent directory.
#[derive(Debug)]
pub struct SqliteDirectoryStore {
    db_path: PathBuf,
}

impl SqliteDirectoryStore {
    /// Opens a SQLite-backed store at `path`, creating schema if needed.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                agent_id INTEGER PRIMARY KEY AUTOINCREMENT,
                tier TEXT NOT NULL,
                parent_id INTEGER NULL,
                affiliation_code TEXT NOT NULL,
                referral_code TEXT NOT NULL,
                region TEXT NULL,
                active INTEGER NOT NULL,
                deleted_at TEXT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_agents_affiliation_code
                ON agents (affiliation_code);
            CREATE INDEX IF NOT EXISTS idx_agents_referral_code
                ON agents (referral_code);

            CREATE TABLE IF NOT EXISTS end_users (
                user_id INTEGER PRIMARY KEY AUTOINCREMENT,
                affiliate_code TEXT NOT NULL,
                manager_id INTEGER NULL,
                deleted_at TEXT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_end_users_affiliate_code
                ON end_users (affiliate_code);
            "#,
        )?;
        Ok(())
    }
}

impl DirectoryStore for SqliteDirectoryStore {
    fn insert_agent(&self, new_agent: NewAgent) -> StoreResult<AgentRecord> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for (space, column, code) in [
            (
                CodeSpace::Affiliation,
                "affiliation_code",
                &new_agent.affiliation_code,
            ),
            (CodeSpace::Referral, "referral_code", &new_agent.referral_code),
        ] {
            let holder: Option<i64> = transaction
                .query_row(
                    &format!("SELECT agent_id FROM agents WHERE {column} = ?1 LIMIT 1"),
                    params![code],
                    |row| row.get(0),
                )
                .optional()?;
            if holder.is_some() {
                return Err(DirectoryStoreError::CodeTaken {
                    space,
                    code: code.clone(),
                });
            }
        }

        transaction.execute(
            r#"
            INSERT INTO agents (tier, parent_id, affiliation_code, referral_code, region, active, deleted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, NULL)
            "#,
            params![
                tier_to_db(new_agent.tier),
                new_agent.parent_id.map(u64_to_db).transpose()?,
                new_agent.affiliation_code,
                new_agent.referral_code,
                new_agent.region,
            ],
        )?;
        let agent_id = i64_to_u64("agent_id", transaction.last_insert_rowid())?;
        transaction.commit()?;

        Ok(AgentRecord {
            id: agent_id,
            tier: new_agent.tier,
            parent_id: new_agent.parent_id,
            affiliation_code: new_agent.affiliation_code,
            referral_code: new_agent.referral_code,
            region: new_agent.region,
            active: true,
            deleted_at: None,
        })
    }

    fn get_agent(&self, agent_id: u64) -> StoreResult<Option<AgentRecord>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = ?1"),
                params![u64_to_db(agent_id)?],
                agent_row_tuple,
            )
            .optional()?;
        row.map(agent_from_row).transpose()
    }

    fn find_agent_by_affiliation_code(&self, code: &str) -> StoreResult<Option<AgentRecord>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                &format!(
                    "SELECT {AGENT_COLUMNS} FROM agents \
                     WHERE affiliation_code = ?1 AND deleted_at IS NULL \
                     ORDER BY agent_id LIMIT 1"
                ),
                params![code],
                agent_row_tuple,
            )
            .optional()?;
        row.map(agent_from_row).transpose()
    }

    fn list_agents(&self) -> StoreResult<Vec<AgentRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE deleted_at IS NULL ORDER BY agent_id"
        ))?;
        let rows = statement.query_map([], agent_row_tuple)?;
        let mut agents = Vec::new();
        for row in rows {
            agents.push(agent_from_row(row?)?);
        }
        Ok(agents)
    }

    fn set_agent_active(&self, agent_id: u64, active: bool) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let updated = connection.execute(
            "UPDATE agents SET active = ?1 WHERE agent_id = ?2 AND deleted_at IS NULL",
            params![i64::from(active), u64_to_db(agent_id)?],
        )?;
        if updated == 0 {
            return Err(DirectoryStoreError::AgentNotFound(agent_id));
        }
        Ok(())
    }

    fn update_agent_code(&self, agent_id: u64, space: CodeSpace, code: &str) -> StoreResult<()> {
        let column = match space {
            CodeSpace::Affiliation => "affiliation_code",
            CodeSpace::Referral => "referral_code",
        };

        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let holder: Option<i64> = transaction
            .query_row(
                &format!("SELECT agent_id FROM agents WHERE {column} = ?1 AND agent_id != ?2 LIMIT 1"),
                params![code, u64_to_db(agent_id)?],
                |row| row.get(0),
            )
            .optional()?;
        if holder.is_some() {
            return Err(DirectoryStoreError::CodeTaken {
                space,
                code: code.to_string(),
            });
        }

        let updated = transaction.execute(
            &format!("UPDATE agents SET {column} = ?1 WHERE agent_id = ?2 AND deleted_at IS NULL"),
            params![code, u64_to_db(agent_id)?],
        )?;
        if updated == 0 {
            return Err(DirectoryStoreError::AgentNotFound(agent_id));
        }
        transaction.commit()?;
        Ok(())
    }

    fn soft_delete_agent(&self, agent_id: u64, when: DateTime<Utc>) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let updated = connection.execute(
            "UPDATE agents SET active = 0, deleted_at = ?1 WHERE agent_id = ?2",
            params![timestamp_to_db(when), u64_to_db(agent_id)?],
        )?;
        if updated == 0 {
            return Err(DirectoryStoreError::AgentNotFound(agent_id));
        }
        Ok(())
    }

    fn taken_sequences(&self, space: CodeSpace, prefix: CodePrefix) -> StoreResult<Vec<u16>> {
        let column = match space {
            CodeSpace::Affiliation => "affiliation_code",
            CodeSpace::Referral => "referral_code",
        };

        let connection = self.open_connection()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {column} FROM agents WHERE {column} LIKE ?1"
        ))?;
        let rows = statement.query_map(params![format!("{prefix}%")], |row| {
            row.get::<_, String>(0)
        })?;

        let mut sequences = Vec::new();
        for row in rows {
            if let Some(code) = AgentCode::parse(&row?) {
                if code.prefix == prefix {
                    sequences.push(code.sequence);
                }
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    fn insert_user(&self, new_user: NewEndUser) -> StoreResult<EndUserRecord> {
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT INTO end_users (affiliate_code, manager_id, deleted_at) VALUES (?1, ?2, NULL)",
            params![
                new_user.affiliate_code,
                new_user.manager_id.map(u64_to_db).transpose()?,
            ],
        )?;
        let user_id = i64_to_u64("user_id", connection.last_insert_rowid())?;

        Ok(EndUserRecord {
            id: user_id,
            affiliate_code: new_user.affiliate_code,
            manager_id: new_user.manager_id,
            deleted_at: None,
        })
    }

    fn get_user(&self, user_id: u64) -> StoreResult<Option<EndUserRecord>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM end_users WHERE user_id = ?1"),
                params![u64_to_db(user_id)?],
                user_row_tuple,
            )
            .optional()?;
        row.map(user_from_row).transpose()
    }

    fn list_users(&self) -> StoreResult<Vec<EndUserRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM end_users WHERE deleted_at IS NULL ORDER BY user_id"
        ))?;
        let rows = statement.query_map([], user_row_tuple)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(user_from_row(row?)?);
        }
        Ok(users)
    }

    fn user_ids_with_affiliate_code(&self, code: &str) -> StoreResult<Vec<u64>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT user_id FROM end_users \
             WHERE affiliate_code = ?1 AND deleted_at IS NULL ORDER BY user_id",
        )?;
        let rows = statement.query_map(params![code], |row| row.get::<_, i64>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(i64_to_u64("user_id", row?)?);
        }
        Ok(ids)
    }

    fn update_user_assignment(
        &self,
        user_id: u64,
        manager_id: Option<u64>,
        affiliate_code: &str,
    ) -> StoreResult<()> {
        // One statement keeps the pair atomic for concurrent readers.
        let connection = self.open_connection()?;
        let updated = connection.execute(
            "UPDATE end_users SET manager_id = ?1, affiliate_code = ?2 \
             WHERE user_id = ?3 AND deleted_at IS NULL",
            params![
                manager_id.map(u64_to_db).transpose()?,
                affiliate_code,
                u64_to_db(user_id)?,
            ],
        )?;
        if updated == 0 {
            return Err(DirectoryStoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    fn soft_delete_user(&self, user_id: u64, when: DateTime<Utc>) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let updated = connection.execute(
            "UPDATE end_users SET deleted_at = ?1 WHERE user_id = ?2",
            params![timestamp_to_db(when), u64_to_db(user_id)?],
        )?;
        if updated == 0 {
            return Err(DirectoryStoreError::UserNotFound(user_id));
        }
        Ok(())
    }
}

type AgentRow = (
    i64,
    String,
    Option<i64>,
    String,
    String,
    Option<String>,
    i64,
    Option<String>,
);

fn agent_row_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn agent_from_row(row: AgentRow) -> StoreResult<AgentRecord> {
    let (agent_id, tier, parent_id, affiliation_code, referral_code, region, active, deleted_at) =
        row;
    Ok(AgentRecord {
        id: i64_to_u64("agent_id", agent_id)?,
        tier: tier_from_db(&tier)?,
        parent_id: parent_id
            .map(|value| i64_to_u64("parent_id", value))
            .transpose()?,
        affiliation_code,
        referral_code,
        region,
        active: active != 0,
        deleted_at: option_timestamp_from_db(deleted_at)?,
    })
}

type UserRow = (i64, String, Option<i64>, Option<String>);

fn user_row_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn user_from_row(row: UserRow) -> StoreResult<EndUserRecord> {
    let (user_id, affiliate_code, manager_id, deleted_at) = row;
    Ok(EndUserRecord {
        id: i64_to_u64("user_id", user_id)?,
        affiliate_code,
        manager_id: manager_id
            .map(|value| i64_to_u64("manager_id", value))
            .transpose()?,
        deleted_at: option_timestamp_from_db(deleted_at)?,
    })
}

fn tier_to_db(tier: AgentTier) -> &'static str {
    tier.as_str()
}

fn tier_from_db(value: &str) -> StoreResult<AgentTier> {
    AgentTier::parse(value).ok_or_else(|| DirectoryStoreError::InvalidPersistedValue {
        field: "tier",
        value: value.to_string(),
    })
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn option_timestamp_from_db(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value
        .as_deref()
        .map(|raw| Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc)))
        .transpose()
}

fn i64_to_u64(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| DirectoryStoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn u64_to_db(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| DirectoryStoreError::InvalidPersistedValue {
        field: "id",
        value: value.to_string(),
    })
}
