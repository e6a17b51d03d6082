//! Shared domain types for the Axon agent-network core.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest sequence number a code can carry within one prefix.
pub const MAX_CODE_SEQUENCE: u16 = 999;

/// Maximum depth of an agent parent chain (GENERAL up to INTEGRATED).
pub const MAX_LINEAGE_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `AgentTier` values, highest rank first.
pub enum AgentTier {
    Integrated,
    Ceo,
    Middle,
    General,
}

impl AgentTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integrated => "integrated",
            Self::Ceo => "ceo",
            Self::Middle => "middle",
            Self::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "integrated" => Some(Self::Integrated),
            "ceo" => Some(Self::Ceo),
            "middle" => Some(Self::Middle),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    /// Numeric rank within the strict total order INTEGRATED > CEO > MIDDLE > GENERAL.
    pub fn rank(self) -> u8 {
        match self {
            Self::Integrated => 3,
            Self::Ceo => 2,
            Self::Middle => 1,
            Self::General => 0,
        }
    }

    /// Returns true when this tier outranks `other`. A parent link is valid
    /// only when the parent's tier is strictly above the child's.
    pub fn is_above(self, other: Self) -> bool {
        self.rank() > other.rank()
    }

    pub fn prefix(self) -> CodePrefix {
        match self {
            Self::Integrated => CodePrefix::Int,
            Self::Ceo => CodePrefix::Ceo,
            Self::Middle => CodePrefix::Mid,
            Self::General => CodePrefix::Gen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `CodePrefix` values. `Adm` is never minted for the
/// four known tiers but stays parseable for codes issued by earlier admin
/// tooling.
pub enum CodePrefix {
    Int,
    Ceo,
    Mid,
    Gen,
    Adm,
}

impl CodePrefix {
    pub const ALL: [Self; 5] = [Self::Int, Self::Ceo, Self::Mid, Self::Gen, Self::Adm];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::Ceo => "CEO",
            Self::Mid => "MID",
            Self::Gen => "GEN",
            Self::Adm => "ADM",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INT" => Some(Self::Int),
            "CEO" => Some(Self::Ceo),
            "MID" => Some(Self::Mid),
            "GEN" => Some(Self::Gen),
            "ADM" => Some(Self::Adm),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::Int => 0,
            Self::Ceo => 1,
            Self::Mid => 2,
            Self::Gen => 3,
            Self::Adm => 4,
        }
    }
}

impl fmt::Display for CodePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The two independent numbering spaces an agent holds a code in.
pub enum CodeSpace {
    Affiliation,
    Referral,
}

impl CodeSpace {
    pub const ALL: [Self; 2] = [Self::Affiliation, Self::Referral];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Affiliation => "affiliation",
            Self::Referral => "referral",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::Affiliation => 0,
            Self::Referral => 1,
        }
    }
}

impl fmt::Display for CodeSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Parsed form of the wire code format `^(INT|CEO|MID|GEN|ADM)[0-9]{3}$`.
pub struct AgentCode {
    pub prefix: CodePrefix,
    pub sequence: u16,
}

impl AgentCode {
    pub fn new(prefix: CodePrefix, sequence: u16) -> Self {
        Self { prefix, sequence }
    }

    /// Parses a stored code string, rejecting anything outside the bit-exact
    /// wire format (raw identifiers, truncated codes, lowercase prefixes).
    pub fn parse(value: &str) -> Option<Self> {
        if value.len() != 6 || !value.is_ascii() {
            return None;
        }
        let prefix = CodePrefix::parse(&value[..3])?;
        let digits = &value[3..];
        if !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        let sequence = digits.parse::<u16>().ok()?;
        Some(Self { prefix, sequence })
    }

    pub fn is_well_formed(value: &str) -> bool {
        Self::parse(value).is_some()
    }
}

impl fmt::Display for AgentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.prefix, self.sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Public struct `AgentRecord` used across Axon components.
pub struct AgentRecord {
    pub id: u64,
    pub tier: AgentTier,
    /// Weak reference to an agent of strictly higher tier; never an owning
    /// pointer, so the population forms a forest of depth at most four.
    pub parent_id: Option<u64>,
    pub affiliation_code: String,
    pub referral_code: String,
    pub region: Option<String>,
    pub active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AgentRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Public struct `EndUserRecord` used across Axon components.
pub struct EndUserRecord {
    pub id: u64,
    /// Denormalized copy of the managing agent's affiliation code.
    pub affiliate_code: String,
    pub manager_id: Option<u64>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EndUserRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Insert shape for a new agent row; codes are allocated before insertion.
pub struct NewAgent {
    pub tier: AgentTier,
    pub parent_id: Option<u64>,
    pub affiliation_code: String,
    pub referral_code: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Insert shape for a new end-user row.
pub struct NewEndUser {
    pub affiliate_code: String,
    pub manager_id: Option<u64>,
}
