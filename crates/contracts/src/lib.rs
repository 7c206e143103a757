//! v1 cross-boundary contracts for the tracker core, API, persistence, and clients.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod serde_u64_string;

pub const SCHEMA_VERSION_V1: &str = "1.0";

// ---------------------------------------------------------------------------
// Identity boundary
// ---------------------------------------------------------------------------

/// Role supplied by the identity collaborator. The core trusts it as given.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Member,
    GroupAdmin,
    PlatformAdmin,
}

impl Role {
    /// Privileged roles may flip paid flags for other recipients and purge
    /// encounters.
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::GroupAdmin | Self::PlatformAdmin)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MEMBER" | "USER" => Some(Self::Member),
            "GROUP_ADMIN" | "ADMIN" | "LEADER" => Some(Self::GroupAdmin),
            "PLATFORM_ADMIN" | "SUPERADMIN" => Some(Self::PlatformAdmin),
            _ => None,
        }
    }
}

/// Per-request acting identity, as handed over by the identity collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub login_id: String,
    pub role: Role,
    pub group_id: Option<u64>,
}

impl Actor {
    pub fn new(login_id: impl Into<String>, role: Role, group_id: Option<u64>) -> Self {
        Self {
            login_id: login_id.into(),
            role,
            group_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Encounter kinds & cadence rules
// ---------------------------------------------------------------------------

/// Declarative respawn cadence attached to an encounter kind.
///
/// Special-case scheduling (weekend exclusion, hour sets, rolling cycle
/// boundaries) lives here as data so the scheduler itself stays free of
/// per-kind branches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CadenceRule {
    /// Fixed interval in minutes. `jitter` marks kinds whose window is
    /// randomized in-game (the legacy `/R` flag); it does not change the
    /// computed next time, only how clients render it.
    Interval { minutes: i64, jitter: bool },
    /// Fixed time-of-day hour set, optionally skipped on weekends.
    DailyHours { hours: Vec<u32>, weekdays_only: bool },
    /// Single genesis minute relative to a rolling cycle boundary at
    /// `cycle_start_hour` (a configurable "day start", not midnight).
    CycleOffset {
        minute_of_cycle: i64,
        cycle_start_hour: u32,
    },
}

impl CadenceRule {
    /// Interval minutes for interval kinds; fixed-schedule kinds have none.
    pub fn interval_minutes(&self) -> Option<i64> {
        match self {
            Self::Interval { minutes, .. } => Some(*minutes),
            _ => None,
        }
    }

    pub fn is_fixed_schedule(&self) -> bool {
        matches!(self, Self::DailyHours { .. } | Self::CycleOffset { .. })
    }
}

/// Static reference data describing one recurring encounter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncounterKind {
    #[serde(with = "serde_u64_string")]
    pub id: u64,
    pub name: String,
    pub location: String,
    /// `None` when the stored cadence configuration failed to normalize;
    /// such kinds render as "unknown next time" rather than erroring.
    pub cadence: Option<CadenceRule>,
    /// The raw cadence text as configured, surfaced so operators can spot
    /// malformed entries.
    pub cadence_raw: String,
    pub order_no: i64,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Encounters, loot, shares
// ---------------------------------------------------------------------------

/// How proceeds of a recorded encounter are handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionMode {
    /// Pre-compute per-participant shares for every item.
    Distribute,
    /// Items belong to the shared treasury; sale proceeds post to the ledger.
    Treasury,
}

/// One confirmed occurrence of an encounter kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Encounter {
    #[serde(with = "serde_u64_string")]
    pub id: u64,
    #[serde(with = "serde_u64_string")]
    pub group_id: u64,
    pub kind_name: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub media: Vec<String>,
    pub created_by: String,
    /// Missed cycles carried into this record (bulk import); zero for live
    /// cuts.
    pub missed_count: i64,
}

/// A dropped item attached to an encounter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LootItem {
    #[serde(with = "serde_u64_string")]
    pub id: u64,
    #[serde(with = "serde_u64_string")]
    pub encounter_id: u64,
    pub item_name: String,
    /// Free text; not required to be a roster member.
    pub looter: String,
    pub sold: bool,
    pub sold_amount: Option<i64>,
    pub sold_at: Option<DateTime<Utc>>,
    /// Whether sale proceeds belong to the shared treasury.
    pub treasury_bound: bool,
    pub created_by: String,
}

/// Per-recipient entitlement to proceeds from a loot item (or to general
/// participation when `loot_item_id` is absent).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributionShare {
    #[serde(with = "serde_u64_string")]
    pub id: u64,
    #[serde(with = "serde_u64_string")]
    pub encounter_id: u64,
    pub loot_item_id: Option<u64>,
    pub recipient: String,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Treasury ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryKind {
    Sale,
    ManualIn,
    ManualOut,
    CorrectionIn,
    CorrectionOut,
}

impl LedgerEntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::ManualIn => "MANUAL_IN",
            Self::ManualOut => "MANUAL_OUT",
            Self::CorrectionIn => "CORRECTION_IN",
            Self::CorrectionOut => "CORRECTION_OUT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SALE" => Some(Self::Sale),
            "MANUAL_IN" => Some(Self::ManualIn),
            "MANUAL_OUT" => Some(Self::ManualOut),
            "CORRECTION_IN" => Some(Self::CorrectionIn),
            "CORRECTION_OUT" => Some(Self::CorrectionOut),
            _ => None,
        }
    }

    /// Whether the stored (unsigned) amount adds to the balance.
    pub fn is_inflow(self) -> bool {
        matches!(self, Self::Sale | Self::ManualIn | Self::CorrectionIn)
    }
}

/// One append-only journal row. Entries are never updated or deleted;
/// corrections are new entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    #[serde(with = "serde_u64_string")]
    pub id: u64,
    #[serde(with = "serde_u64_string")]
    pub group_id: u64,
    pub kind: LedgerEntryKind,
    /// Stored unsigned; `kind` implies the sign.
    pub amount: i64,
    /// Running balance snapshot: previous balance plus this entry's signed
    /// amount.
    pub balance: i64,
    pub note: Option<String>,
    pub encounter_id: Option<u64>,
    pub loot_item_id: Option<u64>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn signed_amount(&self) -> i64 {
        if self.kind.is_inflow() {
            self.amount
        } else {
            -self.amount
        }
    }
}

/// Display grouping for ledger listing filters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerDirection {
    In,
    Out,
}

impl LedgerDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IN" => Some(Self::In),
            "OUT" => Some(Self::Out),
            _ => None,
        }
    }

    pub fn matches(self, kind: LedgerEntryKind) -> bool {
        match self {
            Self::In => kind.is_inflow(),
            Self::Out => !kind.is_inflow(),
        }
    }
}

// ---------------------------------------------------------------------------
// API error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    Forbidden,
    Conflict,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{:?}: {} ({details})", self.error_code, self.message),
            None => write!(f, "{:?}: {}", self.error_code, self.message),
        }
    }
}
