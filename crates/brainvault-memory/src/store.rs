//! Entity Store.
//!
//! Durable keyed storage for every record category on a local SQLite
//! database.  The store is the only component that touches the connection;
//! everything above it works through [`EntityStore::write`] and the typed
//! operations of [`StoreTx`].
//!
//! # Storage layout
//!
//! | table                   | holds                                         |
//! |-------------------------|-----------------------------------------------|
//! | `conversations`         | append-only exchanges                         |
//! | `facts` … `external_data` | upsertable knowledge, one table per category |
//! | `patterns`              | recurring behaviours and outcome counters     |
//! | `skills`                | proficiency per skill name (unique)           |
//! | `mistakes`              | errors and their fixes                        |
//! | `topics`                | interest counters per topic name (unique)     |
//! | `*_archive`             | archived conversations and patterns           |
//! | `keyword_index`         | `(term, category, record_id)` postings        |
//! | `relations`             | labelled links between record handles         |
//!
//! All timestamps are stored as fixed-width RFC 3339 UTC strings with
//! microsecond precision, so lexicographic order equals time order.
//!
//! # Concurrency
//!
//! A single connection sits behind a mutex.  Every operation, reads
//! included, runs inside one `BEGIN IMMEDIATE` transaction because reads
//! update access bookkeeping.  Upserts are therefore read-modify-write
//! atomic and concurrent callers never lose updates.
//!
//! # Example
//!
//! ```rust
//! use brainvault_memory::store::{EntityStore, NewRecord};
//! use brainvault_types::{Category, Confidence, Importance, KnowledgeCategory};
//!
//! let store = EntityStore::open_in_memory().unwrap();
//! store
//!     .put(NewRecord::Knowledge {
//!         category: KnowledgeCategory::Preference,
//!         key: "editor".into(),
//!         value: serde_json::json!("vim"),
//!         importance: Importance::new(7).unwrap(),
//!         confidence: Confidence::new(0.9).unwrap(),
//!     })
//!     .unwrap();
//!
//! let record = store.get(Category::Preference, "editor").unwrap();
//! assert_eq!(record.meta().access_count, 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use brainvault_types::{
    Category, Confidence, ConversationRecord, Importance, KnowledgeCategory, KnowledgeFact,
    MistakeRecord, MistakeState, PatternRecord, Record, RecordId, RecordMeta, RecordRef,
    SkillRecord, TopicRecord, ValidationError, require_non_empty,
};
use chrono::{DateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};
use rusqlite::types::Type;
use rusqlite::{
    Connection, OptionalExtension, Row, ToSql, Transaction, TransactionBehavior, params,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{MemoryError, Result};
use crate::schema::{archive_table_name, initialize_schema, schema_version, table_name};
use crate::text;

// ─────────────────────────────────────────────────────────────────────────────
// Column sets
// ─────────────────────────────────────────────────────────────────────────────

const META: &str = "importance, confidence, created_at, last_accessed_at, access_count";

const CONVERSATION_COLUMNS: &str =
    "id, input, response, success, importance, confidence, created_at, last_accessed_at, access_count";
const PATTERN_COLUMNS: &str = "id, pattern_type, pattern_key, pattern_data, frequency, success_count, total_count, importance, confidence, created_at, last_accessed_at, access_count";

fn select_columns(category: Category) -> &'static str {
    match category {
        Category::Conversation => CONVERSATION_COLUMNS,
        Category::Pattern => PATTERN_COLUMNS,
        Category::Skill => {
            "id, skill_name, proficiency, usage_count, importance, confidence, created_at, last_accessed_at, access_count"
        }
        Category::Mistake => {
            "id, mistake_type, context, solution, learned, learned_at, importance, confidence, created_at, last_accessed_at, access_count"
        }
        Category::Topic => {
            "id, topic_name, frequency, decayed_at, importance, confidence, created_at, last_accessed_at, access_count"
        }
        _ => {
            "id, key, value, updated_at, importance, confidence, created_at, last_accessed_at, access_count"
        }
    }
}

/// Column a key lookup or key-prefix filter matches against.
fn key_column(category: Category) -> &'static str {
    match category {
        Category::Conversation => "input",
        Category::Pattern => "pattern_type",
        Category::Skill => "skill_name",
        Category::Mistake => "mistake_type",
        Category::Topic => "topic_name",
        _ => "key",
    }
}

/// Canonical identity of a pattern payload: compact JSON with sorted keys.
pub fn pattern_key(data: &Value) -> String {
    data.to_string()
}

/// Sub-second digits kept in stored timestamps.
const TIMESTAMP_DIGITS: u16 = 6;

/// Fixed-width RFC 3339 form used for every stored timestamp.
pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn conversion<E>(idx: usize, ty: Type, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, Type::Text, e))
}

fn json_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion(idx, Type::Text, e))
}

fn count_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| conversion(idx, Type::Integer, e))
}

/// Reads the five trailing meta columns starting at `start`.
fn meta_at(row: &Row<'_>, start: usize) -> rusqlite::Result<RecordMeta> {
    let importance = Importance::new(row.get(start)?)
        .map_err(|e| conversion(start, Type::Integer, e))?;
    let confidence = Confidence::new(row.get(start + 1)?)
        .map_err(|e| conversion(start + 1, Type::Real, e))?;
    Ok(RecordMeta {
        importance,
        confidence,
        created_at: ts_at(row, start + 2)?,
        last_accessed_at: ts_at(row, start + 3)?,
        access_count: count_at(row, start + 4)?,
    })
}

fn row_to_record(category: Category, row: &Row<'_>) -> rusqlite::Result<Record> {
    let id = RecordId(row.get(0)?);
    let record = match category {
        Category::Conversation => Record::Conversation(ConversationRecord {
            id,
            input: row.get(1)?,
            response: row.get(2)?,
            success: row.get(3)?,
            meta: meta_at(row, 4)?,
        }),
        Category::Pattern => Record::Pattern(PatternRecord {
            id,
            pattern_type: row.get(1)?,
            pattern_data: json_at(row, 3)?,
            frequency: count_at(row, 4)?,
            success_count: count_at(row, 5)?,
            total_count: count_at(row, 6)?,
            meta: meta_at(row, 7)?,
        }),
        Category::Skill => Record::Skill(SkillRecord {
            id,
            skill_name: row.get(1)?,
            proficiency: row.get(2)?,
            usage_count: count_at(row, 3)?,
            meta: meta_at(row, 4)?,
        }),
        Category::Mistake => {
            let learned: bool = row.get(4)?;
            let learned_at: Option<String> = row.get(5)?;
            let learned_at = match learned_at {
                Some(_) => Some(ts_at(row, 5)?),
                None => None,
            };
            Record::Mistake(MistakeRecord {
                id,
                mistake_type: row.get(1)?,
                context: row.get(2)?,
                solution: row.get(3)?,
                state: if learned {
                    MistakeState::Learned
                } else {
                    MistakeState::Unresolved
                },
                learned_at,
                meta: meta_at(row, 6)?,
            })
        }
        Category::Topic => Record::Topic(TopicRecord {
            id,
            topic_name: row.get(1)?,
            frequency: row.get(2)?,
            decayed_at: ts_at(row, 3)?,
            meta: meta_at(row, 4)?,
        }),
        knowledge => {
            let category = KnowledgeCategory::try_from(knowledge)
                .map_err(|e| conversion(0, Type::Integer, e))?;
            Record::Knowledge(KnowledgeFact {
                id,
                category,
                key: row.get(1)?,
                value: json_at(row, 2)?,
                updated_at: ts_at(row, 3)?,
                meta: meta_at(row, 4)?,
            })
        }
    };
    Ok(record)
}

// ─────────────────────────────────────────────────────────────────────────────
// Write requests
// ─────────────────────────────────────────────────────────────────────────────

/// A record about to be written.  Scores are already validated by their
/// types; the remaining field checks run in [`NewRecord::validate`].
#[derive(Debug, Clone, PartialEq)]
pub enum NewRecord {
    Conversation {
        input: String,
        response: String,
        success: bool,
        importance: Importance,
        confidence: Confidence,
    },
    /// Upserts on `(category, key)`.
    Knowledge {
        category: KnowledgeCategory,
        key: String,
        value: Value,
        importance: Importance,
        confidence: Confidence,
    },
    Pattern {
        pattern_type: String,
        pattern_data: Value,
        frequency: u64,
        success_count: u64,
        total_count: u64,
        importance: Importance,
        confidence: Confidence,
    },
    /// Upserts on `skill_name`.
    Skill {
        skill_name: String,
        proficiency: f64,
        usage_count: u64,
        importance: Importance,
        confidence: Confidence,
    },
    Mistake {
        mistake_type: String,
        context: String,
        solution: Option<String>,
        importance: Importance,
        confidence: Confidence,
    },
    /// Upserts on `topic_name`.
    Topic {
        topic_name: String,
        frequency: f64,
        importance: Importance,
        confidence: Confidence,
    },
}

impl NewRecord {
    pub fn category(&self) -> Category {
        match self {
            NewRecord::Conversation { .. } => Category::Conversation,
            NewRecord::Knowledge { category, .. } => category.as_category(),
            NewRecord::Pattern { .. } => Category::Pattern,
            NewRecord::Skill { .. } => Category::Skill,
            NewRecord::Mistake { .. } => Category::Mistake,
            NewRecord::Topic { .. } => Category::Topic,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        match self {
            NewRecord::Conversation { .. } => Ok(()),
            NewRecord::Knowledge { key, .. } => require_non_empty("key", key),
            NewRecord::Pattern {
                pattern_type,
                success_count,
                total_count,
                ..
            } => {
                require_non_empty("pattern_type", pattern_type)?;
                if success_count > total_count {
                    return Err(ValidationError::InvalidParameter {
                        name: "success_count",
                        value: *success_count as f64,
                    });
                }
                Ok(())
            }
            NewRecord::Skill {
                skill_name,
                proficiency,
                ..
            } => {
                require_non_empty("skill_name", skill_name)?;
                if !proficiency.is_finite() || !(0.0..=1.0).contains(proficiency) {
                    return Err(ValidationError::ProficiencyOutOfRange(*proficiency));
                }
                Ok(())
            }
            NewRecord::Mistake {
                mistake_type,
                context,
                solution,
                ..
            } => {
                require_non_empty("mistake_type", mistake_type)?;
                require_non_empty("context", context)?;
                if let Some(solution) = solution {
                    require_non_empty("solution", solution)?;
                }
                Ok(())
            }
            NewRecord::Topic {
                topic_name,
                frequency,
                ..
            } => {
                require_non_empty("topic_name", topic_name)?;
                if !frequency.is_finite() || *frequency < 0.0 {
                    return Err(ValidationError::InvalidParameter {
                        name: "frequency",
                        value: *frequency,
                    });
                }
                Ok(())
            }
        }
    }
}

/// Whether a put created a new row or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted(RecordId),
    Updated(RecordId),
}

impl PutOutcome {
    pub fn id(&self) -> RecordId {
        match self {
            PutOutcome::Inserted(id) | PutOutcome::Updated(id) => *id,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scans
// ─────────────────────────────────────────────────────────────────────────────

/// Optional predicates applied by [`EntityStore::scan`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanFilter {
    pub min_importance: Option<Importance>,
    pub min_confidence: Option<Confidence>,
    /// Matches against the category's key column (`key`, `skill_name`,
    /// `topic_name`, `pattern_type`, `mistake_type` or `input`).
    pub key_prefix: Option<String>,
    pub limit: Option<usize>,
}

impl ScanFilter {
    pub fn min_importance(mut self, importance: Importance) -> Self {
        self.min_importance = Some(importance);
        self
    }

    pub fn min_confidence(mut self, confidence: Confidence) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOrder {
    /// Oldest first.
    #[default]
    Insertion,
    /// Most recently accessed first.
    Recency,
    /// Highest `importance × confidence` first.
    Weight,
}

impl ScanOrder {
    fn clause(self) -> &'static str {
        match self {
            ScanOrder::Insertion => " ORDER BY id ASC",
            ScanOrder::Recency => " ORDER BY last_accessed_at DESC, id ASC",
            ScanOrder::Weight => " ORDER BY importance * confidence DESC, last_accessed_at DESC, id ASC",
        }
    }
}

/// Row counts, active and archived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub active: BTreeMap<Category, u64>,
    pub archived_conversations: u64,
    pub archived_patterns: u64,
    pub relations: u64,
    pub indexed_terms: u64,
}

impl MemoryStats {
    pub fn total_active(&self) -> u64 {
        self.active.values().sum()
    }
}

/// One edge seen from a record: the other end and the label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbor {
    pub record: RecordRef,
    pub label: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// EntityStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed store for every record category.
pub struct EntityStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl EntityStore {
    /// Open (or create) a store at the given file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        initialize_schema(&conn)?;
        info!(
            path = %path.as_ref().display(),
            schema_version = schema_version(&conn)?,
            "entity store opened"
        );
        Ok(Self::from_connection(conn))
    }

    /// Open a transient in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current time at the precision timestamps are stored with.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(TIMESTAMP_DIGITS)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MemoryError::LockPoisoned)
    }

    /// Run `f` inside one immediate transaction.  The transaction commits
    /// when `f` returns `Ok` and rolls back otherwise.  Every bookkeeping
    /// update inside shares the single timestamp taken at the start.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        let now = self.now();
        let mut conn = self.lock()?;
        let tx = StoreTx {
            tx: conn.transaction_with_behavior(TransactionBehavior::Immediate)?,
            now,
        };
        let out = f(&tx)?;
        tx.tx.commit()?;
        Ok(out)
    }

    /// Direct connection access for statements that must run outside a
    /// transaction.
    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    pub fn put(&self, record: NewRecord) -> Result<PutOutcome> {
        self.write(|tx| tx.put(record))
    }

    /// Point lookup by key.  A hit counts as an access.
    pub fn get(&self, category: Category, key: &str) -> Result<Record> {
        self.write(|tx| {
            let record = tx
                .find(category, key)?
                .ok_or_else(|| MemoryError::not_found(category, key))?;
            tx.touch_record(record)
        })
    }

    /// Point lookup by handle.  A hit counts as an access.
    pub fn get_by_id(&self, record: RecordRef) -> Result<Record> {
        self.write(|tx| {
            let found = tx
                .find_by_id(record)?
                .ok_or_else(|| MemoryError::not_found(record.category, record.id))?;
            tx.touch_record(found)
        })
    }

    /// Filtered, ordered read of one category.  Every returned record counts
    /// as accessed.
    pub fn scan(&self, category: Category, filter: &ScanFilter, order: ScanOrder) -> Result<Vec<Record>> {
        self.write(|tx| {
            tx.select(category, filter, order)?
                .into_iter()
                .map(|r| tx.touch_record(r))
                .collect()
        })
    }

    pub fn delete(&self, record: RecordRef) -> Result<()> {
        self.write(|tx| {
            if tx.delete(record)? {
                Ok(())
            } else {
                Err(MemoryError::not_found(record.category, record.id))
            }
        })
    }

    pub fn archive(&self, record: RecordRef) -> Result<()> {
        self.write(|tx| {
            if tx.archive(record)? {
                Ok(())
            } else {
                Err(MemoryError::not_found(record.category, record.id))
            }
        })
    }

    pub fn counts(&self) -> Result<MemoryStats> {
        self.write(|tx| tx.counts())
    }

    pub fn link(&self, from: RecordRef, to: RecordRef, label: &str) -> Result<bool> {
        self.write(|tx| tx.link(from, to, label))
    }

    pub fn unlink(&self, from: RecordRef, to: RecordRef, label: &str) -> Result<bool> {
        self.write(|tx| tx.unlink(from, to, label))
    }

    pub fn neighbors(&self, record: RecordRef) -> Result<Vec<Neighbor>> {
        self.write(|tx| tx.neighbors(record))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StoreTx
// ─────────────────────────────────────────────────────────────────────────────

/// Typed operations inside one open transaction.
pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
    now: DateTime<Utc>,
}

impl StoreTx<'_> {
    /// Timestamp shared by every write in this transaction.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn stamp(&self) -> String {
        timestamp(&self.now)
    }

    /// Insert or upsert a record and refresh its index postings.
    pub fn put(&self, record: NewRecord) -> Result<PutOutcome> {
        record.validate()?;
        let category = record.category();
        let now = self.stamp();
        let table = table_name(category);

        let outcome = match record {
            NewRecord::Conversation {
                input,
                response,
                success,
                importance,
                confidence,
            } => {
                self.tx.execute(
                    &format!(
                        "INSERT INTO conversations (input, response, success, {META})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0)"
                    ),
                    params![input, response, success, importance.get(), confidence.get(), now],
                )?;
                PutOutcome::Inserted(RecordId(self.tx.last_insert_rowid()))
            }
            NewRecord::Knowledge {
                category: kc,
                key,
                value,
                importance,
                confidence,
            } => {
                let value = serde_json::to_string(&value)?;
                match self.knowledge_id(kc, &key)? {
                    Some(id) => {
                        self.tx.execute(
                            &format!(
                                "UPDATE {table} SET value = ?1, importance = ?2, confidence = ?3,
                                 updated_at = ?4 WHERE id = ?5"
                            ),
                            params![value, importance.get(), confidence.get(), now, id.0],
                        )?;
                        PutOutcome::Updated(id)
                    }
                    None => {
                        self.tx.execute(
                            &format!(
                                "INSERT INTO {table} (key, value, updated_at, {META})
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?3, ?3, 0)"
                            ),
                            params![key, value, now, importance.get(), confidence.get()],
                        )?;
                        PutOutcome::Inserted(RecordId(self.tx.last_insert_rowid()))
                    }
                }
            }
            NewRecord::Pattern {
                pattern_type,
                pattern_data,
                frequency,
                success_count,
                total_count,
                importance,
                confidence,
            } => {
                self.tx.execute(
                    &format!(
                        "INSERT INTO patterns (pattern_type, pattern_key, pattern_data, frequency,
                         success_count, total_count, {META})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 0)"
                    ),
                    params![
                        pattern_type,
                        pattern_key(&pattern_data),
                        serde_json::to_string(&pattern_data)?,
                        frequency as i64,
                        success_count as i64,
                        total_count as i64,
                        importance.get(),
                        confidence.get(),
                        now
                    ],
                )?;
                PutOutcome::Inserted(RecordId(self.tx.last_insert_rowid()))
            }
            NewRecord::Skill {
                skill_name,
                proficiency,
                usage_count,
                importance,
                confidence,
            } => match self.id_by_column(category, &skill_name)? {
                Some(id) => {
                    self.tx.execute(
                        "UPDATE skills SET proficiency = ?1, usage_count = ?2, importance = ?3,
                         confidence = ?4 WHERE id = ?5",
                        params![
                            proficiency,
                            usage_count as i64,
                            importance.get(),
                            confidence.get(),
                            id.0
                        ],
                    )?;
                    PutOutcome::Updated(id)
                }
                None => {
                    self.tx.execute(
                        &format!(
                            "INSERT INTO skills (skill_name, proficiency, usage_count, {META})
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0)"
                        ),
                        params![
                            skill_name,
                            proficiency,
                            usage_count as i64,
                            importance.get(),
                            confidence.get(),
                            now
                        ],
                    )?;
                    PutOutcome::Inserted(RecordId(self.tx.last_insert_rowid()))
                }
            },
            NewRecord::Mistake {
                mistake_type,
                context,
                solution,
                importance,
                confidence,
            } => {
                let learned = solution.is_some();
                let learned_at = learned.then(|| now.clone());
                self.tx.execute(
                    &format!(
                        "INSERT INTO mistakes (mistake_type, context, solution, learned, learned_at, {META})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 0)"
                    ),
                    params![
                        mistake_type,
                        context,
                        solution,
                        learned,
                        learned_at,
                        importance.get(),
                        confidence.get(),
                        now
                    ],
                )?;
                PutOutcome::Inserted(RecordId(self.tx.last_insert_rowid()))
            }
            NewRecord::Topic {
                topic_name,
                frequency,
                importance,
                confidence,
            } => match self.id_by_column(category, &topic_name)? {
                Some(id) => {
                    self.tx.execute(
                        "UPDATE topics SET frequency = ?1, importance = ?2, confidence = ?3
                         WHERE id = ?4",
                        params![frequency, importance.get(), confidence.get(), id.0],
                    )?;
                    PutOutcome::Updated(id)
                }
                None => {
                    self.tx.execute(
                        &format!(
                            "INSERT INTO topics (topic_name, frequency, decayed_at, {META})
                             VALUES (?1, ?2, ?3, ?4, ?5, ?3, ?3, 0)"
                        ),
                        params![topic_name, frequency, now, importance.get(), confidence.get()],
                    )?;
                    PutOutcome::Inserted(RecordId(self.tx.last_insert_rowid()))
                }
            },
        };

        let handle = RecordRef::new(category, outcome.id());
        if let Some(stored) = self.find_by_id(handle)? {
            self.reindex(&stored)?;
        }
        debug!(record = %handle, ?outcome, "record stored");
        Ok(outcome)
    }

    /// Row id of the record a key lookup on `category` resolves to.
    /// Duplicate knowledge keys resolve to the highest confidence, then the
    /// latest update, then the lowest id.
    fn knowledge_id(&self, category: KnowledgeCategory, key: &str) -> Result<Option<RecordId>> {
        let table = table_name(category.as_category());
        let id = self
            .tx
            .query_row(
                &format!(
                    "SELECT id FROM {table} WHERE key = ?1
                     ORDER BY confidence DESC, updated_at DESC, id ASC LIMIT 1"
                ),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(RecordId))
    }

    fn id_by_column(&self, category: Category, key: &str) -> Result<Option<RecordId>> {
        let id = self
            .tx
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE {} = ?1 ORDER BY id ASC LIMIT 1",
                    table_name(category),
                    key_column(category)
                ),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(RecordId))
    }

    /// Key lookup without bookkeeping.  Conversations and mistakes are
    /// addressed by id only.
    pub fn find(&self, category: Category, key: &str) -> Result<Option<Record>> {
        let id = match category {
            Category::Conversation | Category::Mistake | Category::Pattern => {
                return Err(ValidationError::Unsupported {
                    category,
                    operation: "lookup by key",
                }
                .into());
            }
            Category::Skill | Category::Topic => self.id_by_column(category, key)?,
            knowledge => self.knowledge_id(KnowledgeCategory::try_from(knowledge)?, key)?,
        };
        match id {
            Some(id) => self.find_by_id(RecordRef::new(category, id)),
            None => Ok(None),
        }
    }

    /// Handle lookup without bookkeeping.
    pub fn find_by_id(&self, record: RecordRef) -> Result<Option<Record>> {
        let category = record.category;
        let found = self
            .tx
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE id = ?1",
                    select_columns(category),
                    table_name(category)
                ),
                params![record.id.0],
                |row| row_to_record(category, row),
            )
            .optional()?;
        Ok(found)
    }

    /// Active pattern with the given identity, if any.
    pub fn find_pattern(&self, pattern_type: &str, data: &Value) -> Result<Option<PatternRecord>> {
        let found = self
            .tx
            .query_row(
                &format!(
                    "SELECT {PATTERN_COLUMNS} FROM patterns
                     WHERE pattern_type = ?1 AND pattern_key = ?2 ORDER BY id ASC LIMIT 1"
                ),
                params![pattern_type, pattern_key(data)],
                |row| row_to_record(Category::Pattern, row),
            )
            .optional()?;
        Ok(match found {
            Some(Record::Pattern(p)) => Some(p),
            _ => None,
        })
    }

    /// Filtered, ordered read without bookkeeping.
    pub fn select(&self, category: Category, filter: &ScanFilter, order: ScanOrder) -> Result<Vec<Record>> {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE 1=1",
            select_columns(category),
            table_name(category)
        );
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(importance) = filter.min_importance {
            sql.push_str(" AND importance >= ?");
            args.push(Box::new(importance.get()));
        }
        if let Some(confidence) = filter.min_confidence {
            sql.push_str(" AND confidence >= ?");
            args.push(Box::new(confidence.get()));
        }
        if let Some(prefix) = &filter.key_prefix {
            sql.push_str(&format!(" AND substr({}, 1, ?) = ?", key_column(category)));
            args.push(Box::new(prefix.chars().count() as i64));
            args.push(Box::new(prefix.clone()));
        }
        sql.push_str(order.clause());
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(limit as i64));
        }

        let arg_refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(arg_refs.as_slice(), |row| row_to_record(category, row))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Records of `category` with `id > after`, ascending, at most `limit`.
    pub fn select_after(&self, category: Category, after: RecordId, limit: usize) -> Result<Vec<Record>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {} FROM {} WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            select_columns(category),
            table_name(category)
        ))?;
        let rows = stmt.query_map(params![after.0, limit as i64], |row| {
            row_to_record(category, row)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Count one access on each handle.
    pub fn touch(&self, records: &[RecordRef]) -> Result<()> {
        let now = self.stamp();
        for record in records {
            self.tx.execute(
                &format!(
                    "UPDATE {} SET access_count = access_count + 1, last_accessed_at = ?1
                     WHERE id = ?2",
                    table_name(record.category)
                ),
                params![now, record.id.0],
            )?;
        }
        Ok(())
    }

    /// Count one access on each handle of a ranked window.  The i-th of `n`
    /// handles is stamped `base + (n - 1 - i)` microseconds, so recency
    /// agrees with the rank the window was served in and a repeated query
    /// breaks ties the same way.  `base` must not precede any candidate's
    /// previous access.
    pub fn touch_ranked(&self, records: &[RecordRef], base: DateTime<Utc>) -> Result<()> {
        let n = records.len();
        for (i, record) in records.iter().enumerate() {
            let offset = i64::try_from(n - 1 - i).unwrap_or(i64::MAX);
            let at = base + TimeDelta::microseconds(offset);
            self.tx.execute(
                &format!(
                    "UPDATE {} SET access_count = access_count + 1, last_accessed_at = ?1
                     WHERE id = ?2",
                    table_name(record.category)
                ),
                params![timestamp(&at), record.id.0],
            )?;
        }
        Ok(())
    }

    /// [`touch`](Self::touch) a loaded record and mirror the change on it.
    pub fn touch_record(&self, mut record: Record) -> Result<Record> {
        self.touch(&[record.record_ref()])?;
        let meta = record.meta_mut();
        meta.access_count += 1;
        meta.last_accessed_at = self.now;
        Ok(record)
    }

    pub fn set_confidence(&self, record: RecordRef, confidence: Confidence) -> Result<bool> {
        let changed = self.tx.execute(
            &format!(
                "UPDATE {} SET confidence = ?1 WHERE id = ?2",
                table_name(record.category)
            ),
            params![confidence.get(), record.id.0],
        )?;
        Ok(changed > 0)
    }

    pub fn update_pattern_counts(&self, id: RecordId, frequency: u64, success_count: u64, total_count: u64) -> Result<()> {
        if success_count > total_count {
            return Err(ValidationError::InvalidParameter {
                name: "success_count",
                value: success_count as f64,
            }
            .into());
        }
        self.tx.execute(
            "UPDATE patterns SET frequency = ?1, success_count = ?2, total_count = ?3 WHERE id = ?4",
            params![frequency as i64, success_count as i64, total_count as i64, id.0],
        )?;
        Ok(())
    }

    /// `Unresolved → Learned`.  Returns `false` when the mistake is missing
    /// or already learned; nothing is written in that case.
    pub fn resolve_mistake(&self, id: RecordId, solution: &str) -> Result<bool> {
        require_non_empty("solution", solution)?;
        let changed = self.tx.execute(
            "UPDATE mistakes SET solution = ?1, learned = 1, learned_at = ?2
             WHERE id = ?3 AND learned = 0",
            params![solution, self.stamp(), id.0],
        )?;
        if changed > 0 {
            if let Some(record) = self.find_by_id(RecordRef::new(Category::Mistake, id))? {
                self.reindex(&record)?;
            }
        }
        Ok(changed > 0)
    }

    /// Remove a record together with its postings and relations.  Patterns
    /// only ever leave through archival.
    pub fn delete(&self, record: RecordRef) -> Result<bool> {
        if record.category == Category::Pattern {
            return Err(ValidationError::Unsupported {
                category: record.category,
                operation: "delete",
            }
            .into());
        }
        let removed = self.tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", table_name(record.category)),
            params![record.id.0],
        )?;
        if removed > 0 {
            self.remove_postings(record)?;
            self.tx.execute(
                "DELETE FROM relations
                 WHERE (from_category = ?1 AND from_id = ?2) OR (to_category = ?1 AND to_id = ?2)",
                params![record.category.as_str(), record.id.0],
            )?;
        }
        Ok(removed > 0)
    }

    /// Move a conversation or pattern into its archive table.  Archived
    /// records keep their relations and leave the keyword index.
    pub fn archive(&self, record: RecordRef) -> Result<bool> {
        let archive = archive_table_name(record.category).ok_or(ValidationError::Unsupported {
            category: record.category,
            operation: "archive",
        })?;
        let table = table_name(record.category);
        let columns = match record.category {
            Category::Conversation => CONVERSATION_COLUMNS,
            _ => PATTERN_COLUMNS,
        };
        let copied = self.tx.execute(
            &format!(
                "INSERT INTO {archive} ({columns}, archived_at)
                 SELECT {columns}, ?1 FROM {table} WHERE id = ?2"
            ),
            params![self.stamp(), record.id.0],
        )?;
        if copied == 0 {
            return Ok(false);
        }
        self.tx.execute(
            &format!("DELETE FROM {table} WHERE id = ?1"),
            params![record.id.0],
        )?;
        self.remove_postings(record)?;
        Ok(true)
    }

    // ── keyword index ──────────────────────────────────────────────────────

    fn postings(&self, record: RecordRef) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .tx
            .prepare("SELECT term FROM keyword_index WHERE category = ?1 AND record_id = ?2")?;
        let terms = stmt.query_map(params![record.category.as_str(), record.id.0], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(terms.collect::<rusqlite::Result<BTreeSet<_>>>()?)
    }

    fn remove_postings(&self, record: RecordRef) -> Result<()> {
        self.tx.execute(
            "DELETE FROM keyword_index WHERE category = ?1 AND record_id = ?2",
            params![record.category.as_str(), record.id.0],
        )?;
        Ok(())
    }

    /// Bring the postings of `record` in line with its current text.
    /// Returns `true` when anything had to change.
    pub fn reindex(&self, record: &Record) -> Result<bool> {
        let handle = record.record_ref();
        let expected = text::record_terms(record);
        let current = self.postings(handle)?;
        if expected == current {
            return Ok(false);
        }
        for stale in current.difference(&expected) {
            self.tx.execute(
                "DELETE FROM keyword_index WHERE term = ?1 AND category = ?2 AND record_id = ?3",
                params![stale, handle.category.as_str(), handle.id.0],
            )?;
        }
        for missing in expected.difference(&current) {
            self.tx.execute(
                "INSERT OR IGNORE INTO keyword_index (term, category, record_id) VALUES (?1, ?2, ?3)",
                params![missing, handle.category.as_str(), handle.id.0],
            )?;
        }
        Ok(true)
    }

    /// Handles of every record sharing at least one of `terms`, ordered by
    /// category then id.
    pub fn matching(&self, terms: &BTreeSet<String>) -> Result<Vec<RecordRef>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; terms.len()].join(", ");
        let mut stmt = self.tx.prepare(&format!(
            "SELECT DISTINCT category, record_id FROM keyword_index WHERE term IN ({placeholders})"
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(terms.iter()), |row| {
            let category: String = row.get(0)?;
            let category = category
                .parse::<Category>()
                .map_err(|e| conversion(0, Type::Text, e))?;
            Ok(RecordRef::new(category, RecordId(row.get(1)?)))
        })?;
        let mut refs = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        refs.sort();
        Ok(refs)
    }

    // ── relations ──────────────────────────────────────────────────────────

    fn exists(&self, record: RecordRef) -> Result<bool> {
        let mut tables = vec![table_name(record.category)];
        tables.extend(archive_table_name(record.category));
        for table in tables {
            let found: bool = self.tx.query_row(
                &format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = ?1)"),
                params![record.id.0],
                |row| row.get(0),
            )?;
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Add a labelled edge.  Both ends must exist.  Returns `false` when the
    /// edge was already present.
    pub fn link(&self, from: RecordRef, to: RecordRef, label: &str) -> Result<bool> {
        require_non_empty("label", label)?;
        for end in [from, to] {
            if !self.exists(end)? {
                return Err(MemoryError::not_found(end.category, end.id));
            }
        }
        let added = self.tx.execute(
            "INSERT OR IGNORE INTO relations (from_category, from_id, to_category, to_id, label, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                from.category.as_str(),
                from.id.0,
                to.category.as_str(),
                to.id.0,
                label,
                self.stamp()
            ],
        )?;
        Ok(added > 0)
    }

    pub fn unlink(&self, from: RecordRef, to: RecordRef, label: &str) -> Result<bool> {
        let removed = self.tx.execute(
            "DELETE FROM relations
             WHERE from_category = ?1 AND from_id = ?2 AND to_category = ?3 AND to_id = ?4 AND label = ?5",
            params![
                from.category.as_str(),
                from.id.0,
                to.category.as_str(),
                to.id.0,
                label
            ],
        )?;
        Ok(removed > 0)
    }

    /// Edges touching `record` in either direction, ordered by the other
    /// end then label.
    pub fn neighbors(&self, record: RecordRef) -> Result<Vec<Neighbor>> {
        let mut stmt = self.tx.prepare(
            "SELECT to_category, to_id, label FROM relations WHERE from_category = ?1 AND from_id = ?2
             UNION
             SELECT from_category, from_id, label FROM relations WHERE to_category = ?1 AND to_id = ?2",
        )?;
        let rows = stmt.query_map(params![record.category.as_str(), record.id.0], |row| {
            let category: String = row.get(0)?;
            let category = category
                .parse::<Category>()
                .map_err(|e| conversion(0, Type::Text, e))?;
            Ok(Neighbor {
                record: RecordRef::new(category, RecordId(row.get(1)?)),
                label: row.get(2)?,
            })
        })?;
        let mut neighbors = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        neighbors.retain(|n| n.record != record);
        neighbors.sort_by(|a, b| a.record.cmp(&b.record).then_with(|| a.label.cmp(&b.label)));
        Ok(neighbors)
    }

    fn count(&self, sql: &str) -> Result<u64> {
        let n: i64 = self.tx.query_row(sql, [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    pub fn counts(&self) -> Result<MemoryStats> {
        let mut active = BTreeMap::new();
        for category in Category::ALL {
            let n = self.count(&format!("SELECT COUNT(*) FROM {}", table_name(category)))?;
            active.insert(category, n);
        }
        Ok(MemoryStats {
            active,
            archived_conversations: self.count("SELECT COUNT(*) FROM conversations_archive")?,
            archived_patterns: self.count("SELECT COUNT(*) FROM patterns_archive")?,
            relations: self.count("SELECT COUNT(*) FROM relations")?,
            indexed_terms: self.count("SELECT COUNT(DISTINCT term) FROM keyword_index")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Maintenance primitives
// ─────────────────────────────────────────────────────────────────────────────

/// Knowledge row fields that deduplication merges.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedKnowledge {
    pub survivor: RecordId,
    pub removed: usize,
    pub confidence: Confidence,
    pub access_count: u64,
    pub strengthened_at_count: u64,
}

/// A knowledge row eligible for access-based strengthening.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrengthenCandidate {
    pub id: RecordId,
    pub confidence: Confidence,
    pub access_count: u64,
}

/// A topic whose decay period has elapsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayCandidate {
    pub id: RecordId,
    pub frequency: f64,
    pub decayed_at: DateTime<Utc>,
}

impl StoreTx<'_> {
    /// Conversations older than `cutoff` with importance below
    /// `importance_below`, oldest first.
    pub fn archive_candidates(&self, cutoff: DateTime<Utc>, importance_below: u8, limit: usize) -> Result<Vec<RecordId>> {
        let mut stmt = self.tx.prepare(
            "SELECT id FROM conversations WHERE importance < ?1 AND created_at < ?2
             ORDER BY created_at ASC, id ASC LIMIT ?3",
        )?;
        let ids = stmt.query_map(
            params![importance_below, timestamp(&cutoff), limit as i64],
            |row| row.get(0).map(RecordId),
        )?;
        Ok(ids.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Knowledge rows accessed more than `threshold` times and not yet
    /// strengthened at their current count.
    pub fn strengthen_candidates(&self, category: KnowledgeCategory, threshold: u64, limit: usize) -> Result<Vec<StrengthenCandidate>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT id, confidence, access_count FROM {}
             WHERE access_count > ?1 AND access_count > strengthened_at_count
             ORDER BY id ASC LIMIT ?2",
            table_name(category.as_category())
        ))?;
        let rows = stmt.query_map(params![threshold as i64, limit as i64], |row| {
            Ok(StrengthenCandidate {
                id: RecordId(row.get(0)?),
                confidence: Confidence::new(row.get(1)?)
                    .map_err(|e| conversion(1, Type::Real, e))?,
                access_count: count_at(row, 2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Record a strengthening: new confidence plus the access count it was
    /// granted at.
    pub fn mark_strengthened(&self, category: KnowledgeCategory, id: RecordId, confidence: Confidence, at_count: u64) -> Result<()> {
        self.tx.execute(
            &format!(
                "UPDATE {} SET confidence = ?1, strengthened_at_count = ?2 WHERE id = ?3",
                table_name(category.as_category())
            ),
            params![confidence.get(), at_count as i64, id.0],
        )?;
        Ok(())
    }

    /// Keys held by more than one row of `category`.
    pub fn duplicate_keys(&self, category: KnowledgeCategory, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT key FROM {} GROUP BY key HAVING COUNT(*) > 1 ORDER BY key ASC LIMIT ?1",
            table_name(category.as_category())
        ))?;
        let keys = stmt.query_map(params![limit as i64], |row| row.get(0))?;
        Ok(keys.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Insert a knowledge row without the upsert, leaving a duplicate key
    /// behind for consolidation to find.
    #[cfg(test)]
    pub(crate) fn insert_duplicate(
        &self,
        category: KnowledgeCategory,
        key: &str,
        value: &Value,
        confidence: f64,
        access_count: u64,
    ) -> Result<RecordId> {
        self.tx.execute(
            &format!(
                "INSERT INTO {} (key, value, updated_at, {META})
                 VALUES (?1, ?2, ?3, 5, ?4, ?3, ?3, ?5)",
                table_name(category.as_category())
            ),
            params![key, value.to_string(), self.stamp(), confidence, access_count as i64],
        )?;
        Ok(RecordId(self.tx.last_insert_rowid()))
    }

    /// Collapse every row holding `key` into one survivor: the row a key
    /// lookup resolves to.  Access counts are summed, the earliest creation
    /// and latest access are kept and relations move to the survivor.
    pub fn merge_duplicates(&self, category: KnowledgeCategory, key: &str) -> Result<Option<MergedKnowledge>> {
        let table = table_name(category.as_category());
        let cat = category.as_category().as_str();
        let mut stmt = self.tx.prepare(&format!(
            "SELECT id, confidence, created_at, last_accessed_at, access_count, strengthened_at_count
             FROM {table} WHERE key = ?1 ORDER BY confidence DESC, updated_at DESC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((
                    RecordId(row.get(0)?),
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    count_at(row, 4)?,
                    count_at(row, 5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let Some((survivor, confidence, ..)) = rows.first().cloned() else {
            return Ok(None);
        };
        if rows.len() < 2 {
            return Ok(None);
        }

        let access_count: u64 = rows.iter().map(|r| r.4).sum();
        let strengthened_at_count = rows.iter().map(|r| r.5).max().unwrap_or(0);
        let created_at = rows.iter().map(|r| r.2.clone()).min().unwrap_or_default();
        let last_accessed_at = rows.iter().map(|r| r.3.clone()).max().unwrap_or_default();

        for (dup, ..) in rows.iter().skip(1) {
            for (side_cat, side_id) in [("from_category", "from_id"), ("to_category", "to_id")] {
                self.tx.execute(
                    &format!(
                        "UPDATE OR IGNORE relations SET {side_id} = ?1
                         WHERE {side_cat} = ?2 AND {side_id} = ?3"
                    ),
                    params![survivor.0, cat, dup.0],
                )?;
                self.tx.execute(
                    &format!("DELETE FROM relations WHERE {side_cat} = ?1 AND {side_id} = ?2"),
                    params![cat, dup.0],
                )?;
            }
            self.tx.execute(
                &format!("DELETE FROM {table} WHERE id = ?1"),
                params![dup.0],
            )?;
            self.remove_postings(RecordRef::new(category.as_category(), *dup))?;
        }
        self.tx.execute(
            "DELETE FROM relations WHERE from_category = ?1 AND from_id = ?2
             AND to_category = ?1 AND to_id = ?2",
            params![cat, survivor.0],
        )?;
        self.tx.execute(
            &format!(
                "UPDATE {table} SET access_count = ?1, strengthened_at_count = ?2,
                 created_at = ?3, last_accessed_at = ?4 WHERE id = ?5"
            ),
            params![
                access_count as i64,
                strengthened_at_count as i64,
                created_at,
                last_accessed_at,
                survivor.0
            ],
        )?;

        Ok(Some(MergedKnowledge {
            survivor,
            removed: rows.len() - 1,
            confidence: Confidence::saturating(confidence),
            access_count,
            strengthened_at_count,
        }))
    }

    /// Topics whose last decay is at least one `period` before now.
    pub fn decay_candidates(&self, period: TimeDelta, limit: usize) -> Result<Vec<DecayCandidate>> {
        let cutoff = timestamp(&(self.now - period));
        let mut stmt = self.tx.prepare(
            "SELECT id, frequency, decayed_at FROM topics WHERE decayed_at <= ?1
             ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cutoff, limit as i64], |row| {
            Ok(DecayCandidate {
                id: RecordId(row.get(0)?),
                frequency: row.get(1)?,
                decayed_at: ts_at(row, 2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_topic_decay(&self, id: RecordId, frequency: f64, decayed_at: DateTime<Utc>) -> Result<()> {
        self.tx.execute(
            "UPDATE topics SET frequency = ?1, decayed_at = ?2 WHERE id = ?3",
            params![frequency.max(0.0), timestamp(&decayed_at), id.0],
        )?;
        Ok(())
    }

    /// Drop postings whose record no longer exists in the active table.
    pub fn prune_orphan_postings(&self, category: Category) -> Result<usize> {
        let removed = self.tx.execute(
            &format!(
                "DELETE FROM keyword_index WHERE category = ?1
                 AND record_id NOT IN (SELECT id FROM {})",
                table_name(category)
            ),
            params![category.as_str()],
        )?;
        Ok(removed)
    }

    /// Drop edges whose endpoint exists in neither the active nor the
    /// archive table of `category`.
    pub fn prune_dangling_relations(&self, category: Category) -> Result<usize> {
        let mut live = format!("SELECT id FROM {}", table_name(category));
        if let Some(archive) = archive_table_name(category) {
            live.push_str(&format!(" UNION SELECT id FROM {archive}"));
        }
        let mut removed = 0;
        for (side_cat, side_id) in [("from_category", "from_id"), ("to_category", "to_id")] {
            removed += self.tx.execute(
                &format!(
                    "DELETE FROM relations WHERE {side_cat} = ?1 AND {side_id} NOT IN ({live})"
                ),
                params![category.as_str()],
            )?;
        }
        Ok(removed)
    }
}

/// Pages on the SQLite freelist.
pub(crate) fn freelist_count(conn: &Connection) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))?;
    Ok(n.max(0) as u64)
}
