use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use contracts::{
    CadenceRule, DistributionMode, DistributionShare, Encounter, EncounterKind, LedgerDirection,
    LedgerEntry, LedgerEntryKind, LootItem,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    /// Stored data failed to load back (bad timestamp, unknown ledger kind).
    Corrupt(String),
    NotFound(String),
    Conflict(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::Corrupt(detail) => write!(f, "corrupt row: {detail}"),
            Self::NotFound(detail) => write!(f, "not found: {detail}"),
            Self::Conflict(detail) => write!(f, "conflict: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// New encounter payload, validated and looter-resolved by the caller.
#[derive(Debug, Clone)]
pub struct NewEncounter {
    pub group_id: u64,
    pub kind_id: u64,
    pub occurred_at: DateTime<Utc>,
    pub mode: DistributionMode,
    pub media: Vec<String>,
    pub created_by: String,
    pub missed_count: i64,
    pub items: Vec<NewLootItem>,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewLootItem {
    pub item_name: String,
    pub looter: String,
}

/// One item row in a bulk edit, keyed by name against the stored set.
#[derive(Debug, Clone)]
pub struct ItemEdit {
    pub item_name: String,
    pub looter: Option<String>,
    pub sold: bool,
    pub sold_amount: Option<i64>,
    /// `None` keeps the stored flag for existing items; new items default to
    /// not treasury-bound.
    pub treasury_bound: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub corrections: Vec<LedgerEntry>,
    pub items: Vec<LootItem>,
    pub shares_replaced: bool,
}

/// Encounter with its items and shares, as served to clients.
#[derive(Debug, Clone, Serialize)]
pub struct EncounterView {
    #[serde(flatten)]
    pub encounter: Encounter,
    pub items: Vec<LootItem>,
    pub shares: Vec<DistributionShare>,
}

/// Ledger row enriched with a display direction and originating names.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerRow {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub direction: LedgerDirection,
    pub kind_name: Option<String>,
    pub item_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerRow>,
    pub total: i64,
    pub balance: i64,
    pub page: u32,
    pub size: u32,
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure(&mut self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS encounter_kinds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                location TEXT NOT NULL,
                cadence_json TEXT,
                cadence_raw TEXT NOT NULL,
                order_no INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS encounters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL,
                kind_id INTEGER NOT NULL REFERENCES encounter_kinds(id),
                occurred_at TEXT NOT NULL,
                media_json TEXT NOT NULL,
                created_by TEXT NOT NULL,
                missed_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS loot_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                encounter_id INTEGER NOT NULL
                    REFERENCES encounters(id) ON DELETE CASCADE,
                item_name TEXT NOT NULL,
                looter TEXT NOT NULL,
                sold INTEGER NOT NULL DEFAULT 0,
                sold_amount INTEGER,
                sold_at TEXT,
                treasury_bound INTEGER NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS distribution_shares (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                encounter_id INTEGER NOT NULL
                    REFERENCES encounters(id) ON DELETE CASCADE,
                loot_item_id INTEGER
                    REFERENCES loot_items(id) ON DELETE CASCADE,
                recipient TEXT NOT NULL,
                paid INTEGER NOT NULL DEFAULT 0,
                paid_at TEXT,
                UNIQUE (encounter_id, loot_item_id, recipient)
            );

            CREATE TABLE IF NOT EXISTS treasury_ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                amount INTEGER NOT NULL,
                balance INTEGER NOT NULL,
                note TEXT,
                encounter_id INTEGER,
                loot_item_id INTEGER,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS miss_counters (
                group_id INTEGER NOT NULL,
                kind_id INTEGER NOT NULL,
                missed INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (group_id, kind_id)
            );

            CREATE INDEX IF NOT EXISTS idx_encounters_group_kind_time
                ON encounters(group_id, kind_id, occurred_at);
            CREATE INDEX IF NOT EXISTS idx_loot_items_encounter
                ON loot_items(encounter_id);
            CREATE INDEX IF NOT EXISTS idx_shares_encounter
                ON distribution_shares(encounter_id);
            CREATE INDEX IF NOT EXISTS idx_ledger_group_id
                ON treasury_ledger(group_id, id);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', ?1)",
            params![store_instant(Utc::now())],
        )?;

        Ok(())
    }

    // -- encounter kinds ----------------------------------------------------

    pub fn upsert_kind(
        &mut self,
        name: &str,
        location: &str,
        cadence: Option<&CadenceRule>,
        cadence_raw: &str,
        order_no: i64,
        active: bool,
    ) -> Result<u64, StoreError> {
        let cadence_json = cadence.map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO encounter_kinds (name, location, cadence_json, cadence_raw, order_no, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                location = excluded.location,
                cadence_json = excluded.cadence_json,
                cadence_raw = excluded.cadence_raw,
                order_no = excluded.order_no,
                active = excluded.active",
            params![
                name,
                location,
                cadence_json,
                cadence_raw,
                order_no,
                active as i64
            ],
        )?;

        let id: i64 = self.conn.query_row(
            "SELECT id FROM encounter_kinds WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(as_u64(id))
    }

    pub fn list_kinds(&self) -> Result<Vec<EncounterKind>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, location, cadence_json, cadence_raw, order_no, active
             FROM encounter_kinds
             ORDER BY order_no ASC, name ASC",
        )?;
        let rows = stmt.query_map([], map_kind_row)?;

        let mut kinds = Vec::new();
        for row in rows {
            kinds.push(row?);
        }
        Ok(kinds)
    }

    pub fn find_kind_by_id(&self, kind_id: u64) -> Result<Option<EncounterKind>, StoreError> {
        let kind = self
            .conn
            .query_row(
                "SELECT id, name, location, cadence_json, cadence_raw, order_no, active
                 FROM encounter_kinds WHERE id = ?1",
                params![to_i64(kind_id)],
                map_kind_row,
            )
            .optional()?;
        Ok(kind)
    }

    pub fn find_kind_by_name(&self, name: &str) -> Result<Option<EncounterKind>, StoreError> {
        let kind = self
            .conn
            .query_row(
                "SELECT id, name, location, cadence_json, cadence_raw, order_no, active
                 FROM encounter_kinds WHERE name = ?1",
                params![name],
                map_kind_row,
            )
            .optional()?;
        Ok(kind)
    }

    // -- encounter lifecycle ------------------------------------------------

    /// Encounter, items, shares, and the miss-counter reset, all in one
    /// transaction.
    pub fn record_encounter(&mut self, new: &NewEncounter) -> Result<u64, StoreError> {
        let tx = self.conn.transaction()?;

        let kind_exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM encounter_kinds WHERE id = ?1",
                params![to_i64(new.kind_id)],
                |row| row.get(0),
            )
            .optional()?;
        if kind_exists.is_none() {
            return Err(StoreError::NotFound(format!("kind_id={}", new.kind_id)));
        }

        let media_json = serde_json::to_string(&new.media)?;
        tx.execute(
            "INSERT INTO encounters (group_id, kind_id, occurred_at, media_json, created_by, missed_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                to_i64(new.group_id),
                to_i64(new.kind_id),
                store_instant(new.occurred_at),
                media_json,
                new.created_by,
                new.missed_count
            ],
        )?;
        let encounter_id = tx.last_insert_rowid();

        let treasury_bound = matches!(new.mode, DistributionMode::Treasury);
        let mut item_ids = Vec::with_capacity(new.items.len());
        for item in &new.items {
            tx.execute(
                "INSERT INTO loot_items (encounter_id, item_name, looter, sold, treasury_bound, created_by)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                params![
                    encounter_id,
                    item.item_name,
                    item.looter,
                    treasury_bound as i64,
                    new.created_by
                ],
            )?;
            item_ids.push(tx.last_insert_rowid());
        }

        if matches!(new.mode, DistributionMode::Distribute) {
            for item_id in &item_ids {
                for recipient in &new.participants {
                    tx.execute(
                        "INSERT INTO distribution_shares (encounter_id, loot_item_id, recipient, paid)
                         VALUES (?1, ?2, ?3, 0)",
                        params![encounter_id, item_id, recipient],
                    )?;
                }
            }
        }

        // A live cut clears the no-spawn streak; imported lines carry their
        // own streak in `missed_count`.
        tx.execute(
            "INSERT INTO miss_counters (group_id, kind_id, missed) VALUES (?1, ?2, ?3)
             ON CONFLICT(group_id, kind_id) DO UPDATE SET missed = excluded.missed",
            params![to_i64(new.group_id), to_i64(new.kind_id), new.missed_count],
        )?;

        tx.commit()?;
        Ok(as_u64(encounter_id))
    }

    pub fn encounter_detail(
        &self,
        group_id: u64,
        encounter_id: u64,
    ) -> Result<Option<EncounterView>, StoreError> {
        let encounter = self
            .conn
            .query_row(
                "SELECT e.id, e.group_id, k.name, e.occurred_at, e.media_json, e.created_by, e.missed_count
                 FROM encounters e
                 JOIN encounter_kinds k ON k.id = e.kind_id
                 WHERE e.id = ?1 AND e.group_id = ?2",
                params![to_i64(encounter_id), to_i64(group_id)],
                map_encounter_row,
            )
            .optional()?;

        let Some(encounter) = encounter else {
            return Ok(None);
        };
        let encounter = finish_encounter(encounter)?;
        let items = self.items_for(encounter_id)?;
        let shares = self.shares_for(encounter_id)?;
        Ok(Some(EncounterView {
            encounter,
            items,
            shares,
        }))
    }

    /// Whether an encounter exists at all, regardless of group. Lets callers
    /// distinguish wrong-group access from a missing row.
    pub fn encounter_exists(&self, encounter_id: u64) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM encounters WHERE id = ?1",
                params![to_i64(encounter_id)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn timeline(&self, group_id: u64) -> Result<Vec<EncounterView>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.group_id, k.name, e.occurred_at, e.media_json, e.created_by, e.missed_count
             FROM encounters e
             JOIN encounter_kinds k ON k.id = e.kind_id
             WHERE e.group_id = ?1
             ORDER BY e.occurred_at DESC, e.id DESC",
        )?;
        let rows = stmt.query_map(params![to_i64(group_id)], map_encounter_row)?;

        let mut views = Vec::new();
        for row in rows {
            let encounter = finish_encounter(row?)?;
            let items = self.items_for(encounter.id)?;
            let shares = self.shares_for(encounter.id)?;
            views.push(EncounterView {
                encounter,
                items,
                shares,
            });
        }
        Ok(views)
    }

    /// Latest occurrence per kind for one group, feeding the scheduler.
    pub fn latest_occurrences(
        &self,
        group_id: u64,
    ) -> Result<HashMap<u64, DateTime<Utc>>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT kind_id, MAX(occurred_at)
             FROM encounters
             WHERE group_id = ?1
             GROUP BY kind_id",
        )?;
        let rows = stmt.query_map(params![to_i64(group_id)], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut latest = HashMap::new();
        for row in rows {
            let (kind_id, raw) = row?;
            latest.insert(as_u64(kind_id), load_instant(&raw)?);
        }
        Ok(latest)
    }

    /// Marks an item sold and, for treasury-bound items, posts the sale to
    /// the group ledger in the same transaction.
    pub fn mark_item_sold(
        &mut self,
        group_id: u64,
        encounter_id: u64,
        item_id: u64,
        amount: i64,
        sold_by: &str,
        now: DateTime<Utc>,
    ) -> Result<(LootItem, Option<LedgerEntry>), StoreError> {
        let tx = self.conn.transaction()?;

        let item = tx
            .query_row(
                "SELECT i.id, i.encounter_id, i.item_name, i.looter, i.sold, i.sold_amount,
                        i.sold_at, i.treasury_bound, i.created_by
                 FROM loot_items i
                 JOIN encounters e ON e.id = i.encounter_id
                 WHERE i.id = ?1 AND i.encounter_id = ?2 AND e.group_id = ?3",
                params![to_i64(item_id), to_i64(encounter_id), to_i64(group_id)],
                map_item_row,
            )
            .optional()?;
        let Some(item) = item else {
            return Err(StoreError::NotFound(format!(
                "item_id={item_id} encounter_id={encounter_id}"
            )));
        };
        let mut item = finish_item(item)?;
        if item.sold {
            return Err(StoreError::Conflict(format!(
                "item_id={item_id} is already sold"
            )));
        }

        tx.execute(
            "UPDATE loot_items SET sold = 1, sold_amount = ?2, sold_at = ?3 WHERE id = ?1",
            params![to_i64(item_id), amount, store_instant(now)],
        )?;
        item.sold = true;
        item.sold_amount = Some(amount);
        item.sold_at = Some(now);

        let entry = if item.treasury_bound {
            Some(post_entry(
                &tx,
                group_id,
                LedgerEntryKind::Sale,
                amount,
                Some(format!("sale: {}", item.item_name)),
                Some(encounter_id),
                Some(item_id),
                sold_by,
                now,
            )?)
        } else {
            None
        };

        tx.commit()?;
        Ok((item, entry))
    }

    pub fn find_share(
        &self,
        group_id: u64,
        encounter_id: u64,
        share_id: u64,
    ) -> Result<Option<DistributionShare>, StoreError> {
        let share = self
            .conn
            .query_row(
                "SELECT s.id, s.encounter_id, s.loot_item_id, s.recipient, s.paid, s.paid_at
                 FROM distribution_shares s
                 JOIN encounters e ON e.id = s.encounter_id
                 WHERE s.id = ?1 AND s.encounter_id = ?2 AND e.group_id = ?3",
                params![to_i64(share_id), to_i64(encounter_id), to_i64(group_id)],
                map_share_row,
            )
            .optional()?;
        share.map(finish_share).transpose()
    }

    pub fn set_share_paid(
        &mut self,
        share_id: u64,
        paid: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let paid_at = paid.then(|| store_instant(now));
        self.conn.execute(
            "UPDATE distribution_shares SET paid = ?2, paid_at = ?3 WHERE id = ?1",
            params![to_i64(share_id), paid as i64, paid_at],
        )?;
        Ok(())
    }

    /// Bulk diff-and-reconcile edit. Items are matched by name; ledger
    /// corrections are posted per treasury-bound item whose effective sold
    /// state changed. Corrections bypass the withdrawal balance guard.
    pub fn update_encounter(
        &mut self,
        group_id: u64,
        encounter_id: u64,
        edits: &[ItemEdit],
        new_participants: Option<&[String]>,
        edited_by: &str,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, StoreError> {
        let tx = self.conn.transaction()?;

        let owned: Option<i64> = tx
            .query_row(
                "SELECT id FROM encounters WHERE id = ?1 AND group_id = ?2",
                params![to_i64(encounter_id), to_i64(group_id)],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(StoreError::NotFound(format!(
                "encounter_id={encounter_id} group_id={group_id}"
            )));
        }

        let existing = {
            let mut stmt = tx.prepare(
                "SELECT id, encounter_id, item_name, looter, sold, sold_amount, sold_at,
                        treasury_bound, created_by
                 FROM loot_items WHERE encounter_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![to_i64(encounter_id)], map_item_row)?;
            let mut items = Vec::new();
            for row in rows {
                items.push(finish_item(row?)?);
            }
            items
        };

        let mut corrections = Vec::new();

        for item in &existing {
            let edit = edits.iter().find(|edit| edit.item_name == item.item_name);
            match edit {
                None => {
                    // Deleted while sold claws the sale back.
                    if item.treasury_bound && item.sold {
                        if let Some(prev) = item.sold_amount {
                            corrections.push(post_correction(
                                &tx,
                                group_id,
                                -prev,
                                format!("edit removed sold item: {}", item.item_name),
                                encounter_id,
                                item.id,
                                edited_by,
                                now,
                            )?);
                        }
                    }
                    tx.execute(
                        "DELETE FROM loot_items WHERE id = ?1",
                        params![to_i64(item.id)],
                    )?;
                }
                Some(edit) => {
                    let treasury_bound = edit.treasury_bound.unwrap_or(item.treasury_bound);
                    let prev = item.sold_amount.unwrap_or(0);
                    let next = edit.sold_amount.unwrap_or(0);
                    let delta = match (item.sold, edit.sold) {
                        (false, true) => next,
                        (true, false) => -prev,
                        (true, true) => next - prev,
                        (false, false) => 0,
                    };
                    if treasury_bound && delta != 0 {
                        corrections.push(post_correction(
                            &tx,
                            group_id,
                            delta,
                            format!("edit adjusted item: {}", item.item_name),
                            encounter_id,
                            item.id,
                            edited_by,
                            now,
                        )?);
                    }

                    let sold_at = match (item.sold, edit.sold) {
                        (true, true) => item.sold_at.map(store_instant),
                        (false, true) => Some(store_instant(now)),
                        (_, false) => None,
                    };
                    let looter = edit.looter.as_deref().unwrap_or(item.looter.as_str());
                    tx.execute(
                        "UPDATE loot_items
                         SET looter = ?2, sold = ?3, sold_amount = ?4, sold_at = ?5,
                             treasury_bound = ?6
                         WHERE id = ?1",
                        params![
                            to_i64(item.id),
                            looter,
                            edit.sold as i64,
                            edit.sold.then_some(edit.sold_amount).flatten(),
                            sold_at,
                            treasury_bound as i64
                        ],
                    )?;
                }
            }
        }

        // Names without a stored counterpart are inserts.
        for edit in edits {
            if existing.iter().any(|item| item.item_name == edit.item_name) {
                continue;
            }
            let treasury_bound = edit.treasury_bound.unwrap_or(false);
            let looter = edit.looter.as_deref().unwrap_or(edited_by);
            tx.execute(
                "INSERT INTO loot_items (encounter_id, item_name, looter, sold, sold_amount, sold_at, treasury_bound, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    to_i64(encounter_id),
                    edit.item_name,
                    looter,
                    edit.sold as i64,
                    edit.sold.then_some(edit.sold_amount).flatten(),
                    edit.sold.then(|| store_instant(now)),
                    treasury_bound as i64,
                    edited_by
                ],
            )?;
            let item_id = tx.last_insert_rowid();
            if treasury_bound && edit.sold {
                if let Some(amount) = edit.sold_amount {
                    corrections.push(post_correction(
                        &tx,
                        group_id,
                        amount,
                        format!("edit added sold item: {}", edit.item_name),
                        encounter_id,
                        as_u64(item_id),
                        edited_by,
                        now,
                    )?);
                }
            }
        }

        // Participant snapshot replace: all shares recreated, paid flags
        // reset.
        let shares_replaced = if let Some(participants) = new_participants {
            tx.execute(
                "DELETE FROM distribution_shares WHERE encounter_id = ?1",
                params![to_i64(encounter_id)],
            )?;
            let mut stmt =
                tx.prepare("SELECT id FROM loot_items WHERE encounter_id = ?1 ORDER BY id ASC")?;
            let item_ids = stmt
                .query_map(params![to_i64(encounter_id)], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            for item_id in &item_ids {
                for recipient in participants {
                    tx.execute(
                        "INSERT INTO distribution_shares (encounter_id, loot_item_id, recipient, paid)
                         VALUES (?1, ?2, ?3, 0)",
                        params![to_i64(encounter_id), item_id, recipient],
                    )?;
                }
            }
            true
        } else {
            false
        };

        let items = {
            let mut stmt = tx.prepare(
                "SELECT id, encounter_id, item_name, looter, sold, sold_amount, sold_at,
                        treasury_bound, created_by
                 FROM loot_items WHERE encounter_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![to_i64(encounter_id)], map_item_row)?;
            let mut items = Vec::new();
            for row in rows {
                items.push(finish_item(row?)?);
            }
            items
        };

        tx.commit()?;
        Ok(UpdateOutcome {
            corrections,
            items,
            shares_replaced,
        })
    }

    pub fn purge_encounter(&mut self, group_id: u64, encounter_id: u64) -> Result<(), StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM encounters WHERE id = ?1 AND group_id = ?2",
            params![to_i64(encounter_id), to_i64(group_id)],
        )?;
        if deleted == 0 {
            return Err(StoreError::NotFound(format!(
                "encounter_id={encounter_id} group_id={group_id}"
            )));
        }
        Ok(())
    }

    // -- miss counters ------------------------------------------------------

    /// Atomic upsert-increment; the returned value is the post-increment
    /// count. A read-modify-write here would lose concurrent presses.
    pub fn increment_miss_counter(
        &mut self,
        group_id: u64,
        kind_id: u64,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let missed = self.conn.query_row(
            "INSERT INTO miss_counters (group_id, kind_id, missed) VALUES (?1, ?2, ?3)
             ON CONFLICT(group_id, kind_id) DO UPDATE SET missed = missed + excluded.missed
             RETURNING missed",
            params![to_i64(group_id), to_i64(kind_id), delta],
            |row| row.get(0),
        )?;
        Ok(missed)
    }

    pub fn miss_counters(&self, group_id: u64) -> Result<HashMap<u64, i64>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind_id, missed FROM miss_counters WHERE group_id = ?1")?;
        let rows = stmt.query_map(params![to_i64(group_id)], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counters = HashMap::new();
        for row in rows {
            let (kind_id, missed) = row?;
            counters.insert(as_u64(kind_id), missed);
        }
        Ok(counters)
    }

    // -- treasury ledger ----------------------------------------------------

    pub fn latest_balance(&self, group_id: u64) -> Result<i64, StoreError> {
        latest_balance_on(&self.conn, group_id)
    }

    /// Manual deposit or withdrawal. Withdrawals are rejected inside the
    /// transaction when the latest balance cannot cover them.
    pub fn manual_entry(
        &mut self,
        group_id: u64,
        kind: LedgerEntryKind,
        amount: i64,
        note: Option<String>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let tx = self.conn.transaction()?;

        if kind == LedgerEntryKind::ManualOut {
            let balance = latest_balance_on(&tx, group_id)?;
            if balance < amount {
                return Err(StoreError::Conflict(format!(
                    "insufficient balance: balance={balance} amount={amount}"
                )));
            }
        }

        let entry = post_entry(&tx, group_id, kind, amount, note, None, None, created_by, now)?;
        tx.commit()?;
        Ok(entry)
    }

    pub fn list_ledger(
        &self,
        group_id: u64,
        page: u32,
        size: u32,
        filter: Option<LedgerDirection>,
    ) -> Result<LedgerPage, StoreError> {
        let kind_filter = match filter {
            None => "".to_string(),
            Some(LedgerDirection::In) => {
                " AND l.kind IN ('SALE', 'MANUAL_IN', 'CORRECTION_IN')".to_string()
            }
            Some(LedgerDirection::Out) => {
                " AND l.kind IN ('MANUAL_OUT', 'CORRECTION_OUT')".to_string()
            }
        };

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM treasury_ledger l WHERE l.group_id = ?1{kind_filter}"),
            params![to_i64(group_id)],
            |row| row.get(0),
        )?;

        let offset = i64::from(page.saturating_sub(1)) * i64::from(size);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT l.id, l.group_id, l.kind, l.amount, l.balance, l.note, l.encounter_id,
                    l.loot_item_id, l.created_by, l.created_at, k.name, i.item_name
             FROM treasury_ledger l
             LEFT JOIN encounters e ON e.id = l.encounter_id
             LEFT JOIN encounter_kinds k ON k.id = e.kind_id
             LEFT JOIN loot_items i ON i.id = l.loot_item_id
             WHERE l.group_id = ?1{kind_filter}
             ORDER BY l.id DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            params![to_i64(group_id), i64::from(size), offset],
            map_ledger_row,
        )?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(finish_ledger_row(row?)?);
        }

        Ok(LedgerPage {
            entries,
            total,
            balance: self.latest_balance(group_id)?,
            page,
            size,
        })
    }

    // -- row loaders --------------------------------------------------------

    fn items_for(&self, encounter_id: u64) -> Result<Vec<LootItem>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, encounter_id, item_name, looter, sold, sold_amount, sold_at,
                    treasury_bound, created_by
             FROM loot_items WHERE encounter_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![to_i64(encounter_id)], map_item_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(finish_item(row?)?);
        }
        Ok(items)
    }

    fn shares_for(&self, encounter_id: u64) -> Result<Vec<DistributionShare>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, encounter_id, loot_item_id, recipient, paid, paid_at
             FROM distribution_shares WHERE encounter_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![to_i64(encounter_id)], map_share_row)?;

        let mut shares = Vec::new();
        for row in rows {
            shares.push(finish_share(row?)?);
        }
        Ok(shares)
    }
}

/// Reads the group's latest balance and appends the entry in the caller's
/// transaction; combined with the store-level mutex this makes the
/// read-then-insert race impossible.
#[allow(clippy::too_many_arguments)]
fn post_entry(
    tx: &Transaction<'_>,
    group_id: u64,
    kind: LedgerEntryKind,
    amount: i64,
    note: Option<String>,
    encounter_id: Option<u64>,
    loot_item_id: Option<u64>,
    created_by: &str,
    now: DateTime<Utc>,
) -> Result<LedgerEntry, StoreError> {
    let previous = latest_balance_on(tx, group_id)?;
    let signed = if kind.is_inflow() { amount } else { -amount };
    let balance = previous + signed;

    tx.execute(
        "INSERT INTO treasury_ledger (group_id, kind, amount, balance, note, encounter_id, loot_item_id, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            to_i64(group_id),
            kind.as_str(),
            amount,
            balance,
            note,
            encounter_id.map(to_i64),
            loot_item_id.map(to_i64),
            created_by,
            store_instant(now)
        ],
    )?;

    Ok(LedgerEntry {
        id: as_u64(tx.last_insert_rowid()),
        group_id,
        kind,
        amount,
        balance,
        note,
        encounter_id,
        loot_item_id,
        created_by: created_by.to_string(),
        created_at: now,
    })
}

/// Signed correction helper: positive deltas post `CORRECTION_IN`, negative
/// `CORRECTION_OUT`. No balance guard; a correction may take the balance
/// negative.
#[allow(clippy::too_many_arguments)]
fn post_correction(
    tx: &Transaction<'_>,
    group_id: u64,
    delta: i64,
    note: String,
    encounter_id: u64,
    loot_item_id: u64,
    created_by: &str,
    now: DateTime<Utc>,
) -> Result<LedgerEntry, StoreError> {
    let (kind, amount) = if delta >= 0 {
        (LedgerEntryKind::CorrectionIn, delta)
    } else {
        (LedgerEntryKind::CorrectionOut, -delta)
    };
    post_entry(
        tx,
        group_id,
        kind,
        amount,
        Some(note),
        Some(encounter_id),
        Some(loot_item_id),
        created_by,
        now,
    )
}

fn latest_balance_on(conn: &Connection, group_id: u64) -> Result<i64, StoreError> {
    let balance: Option<i64> = conn
        .query_row(
            "SELECT balance FROM treasury_ledger WHERE group_id = ?1 ORDER BY id DESC LIMIT 1",
            params![to_i64(group_id)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0))
}

// -- raw row shapes ---------------------------------------------------------
//
// rusqlite closures can only fail with rusqlite::Error, so rows come out as
// raw tuples and are finished (timestamp/json parsing) afterwards.

type RawEncounter = (i64, i64, String, String, String, String, i64);
type RawItem = (i64, i64, String, String, i64, Option<i64>, Option<String>, i64, String);
type RawShare = (i64, i64, Option<i64>, String, i64, Option<String>);
type RawLedger = (
    i64,
    i64,
    String,
    i64,
    i64,
    Option<String>,
    Option<i64>,
    Option<i64>,
    String,
    String,
    Option<String>,
    Option<String>,
);

fn map_kind_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EncounterKind> {
    let cadence_json: Option<String> = row.get(3)?;
    // Written by this store; failure to parse back means the row predates a
    // rule shape change, in which case the kind degrades to unknown cadence.
    let cadence = cadence_json
        .as_deref()
        .and_then(|raw| serde_json::from_str::<CadenceRule>(raw).ok());

    Ok(EncounterKind {
        id: as_u64(row.get::<_, i64>(0)?),
        name: row.get(1)?,
        location: row.get(2)?,
        cadence,
        cadence_raw: row.get(4)?,
        order_no: row.get(5)?,
        active: row.get::<_, i64>(6)? != 0,
    })
}

fn map_encounter_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEncounter> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn finish_encounter(raw: RawEncounter) -> Result<Encounter, StoreError> {
    let (id, group_id, kind_name, occurred_at, media_json, created_by, missed_count) = raw;
    Ok(Encounter {
        id: as_u64(id),
        group_id: as_u64(group_id),
        kind_name,
        occurred_at: load_instant(&occurred_at)?,
        media: serde_json::from_str(&media_json)?,
        created_by,
        missed_count,
    })
}

fn map_item_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawItem> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn finish_item(raw: RawItem) -> Result<LootItem, StoreError> {
    let (id, encounter_id, item_name, looter, sold, sold_amount, sold_at, treasury_bound, created_by) =
        raw;
    Ok(LootItem {
        id: as_u64(id),
        encounter_id: as_u64(encounter_id),
        item_name,
        looter,
        sold: sold != 0,
        sold_amount,
        sold_at: sold_at.as_deref().map(load_instant).transpose()?,
        treasury_bound: treasury_bound != 0,
        created_by,
    })
}

fn map_share_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawShare> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn finish_share(raw: RawShare) -> Result<DistributionShare, StoreError> {
    let (id, encounter_id, loot_item_id, recipient, paid, paid_at) = raw;
    Ok(DistributionShare {
        id: as_u64(id),
        encounter_id: as_u64(encounter_id),
        loot_item_id: loot_item_id.map(as_u64),
        recipient,
        paid: paid != 0,
        paid_at: paid_at.as_deref().map(load_instant).transpose()?,
    })
}

fn map_ledger_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLedger> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn finish_ledger_row(raw: RawLedger) -> Result<LedgerRow, StoreError> {
    let (
        id,
        group_id,
        kind,
        amount,
        balance,
        note,
        encounter_id,
        loot_item_id,
        created_by,
        created_at,
        kind_name,
        item_name,
    ) = raw;
    let kind = LedgerEntryKind::parse(&kind)
        .ok_or_else(|| StoreError::Corrupt(format!("ledger kind `{kind}`")))?;
    let direction = if kind.is_inflow() {
        LedgerDirection::In
    } else {
        LedgerDirection::Out
    };

    Ok(LedgerRow {
        entry: LedgerEntry {
            id: as_u64(id),
            group_id: as_u64(group_id),
            kind,
            amount,
            balance,
            note,
            encounter_id: encounter_id.map(as_u64),
            loot_item_id: loot_item_id.map(as_u64),
            created_by,
            created_at: load_instant(&created_at)?,
        },
        direction,
        kind_name,
        item_name,
    })
}

fn store_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339()
}

fn load_instant(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("timestamp `{raw}`: {err}")))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn as_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
