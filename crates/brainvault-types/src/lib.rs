//! `brainvault-types` – shared vocabulary of the BrainVault memory subsystem.
//!
//! Every crate in the workspace (and every external adapter that exposes the
//! Brain as tools) speaks in these types:
//!
//! - [`Category`] / [`KnowledgeCategory`] – the closed set of record
//!   categories.  Category strings coming from callers are parsed once at the
//!   boundary and rejected with [`ValidationError::UnknownCategory`].
//! - [`Importance`] / [`Confidence`] – validated scoring newtypes.  They can
//!   only be constructed inside their legal ranges, so a record holding them
//!   cannot violate the range invariant.
//! - [`Record`] – a tagged union over the per-category record structs.
//!
//! All public types derive [`JsonSchema`] so that tool-exposure adapters can
//! publish a schema for them without re-describing the shapes by hand.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Frequency at which a topic's derived interest level reaches `0.5`.
pub const TOPIC_INTEREST_HALF_POINT: f64 = 5.0;

// ─────────────────────────────────────────────────────────────────────────────
// Validation errors
// ─────────────────────────────────────────────────────────────────────────────

/// Rejections raised at the API boundary.  Nothing is ever silently corrected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("importance {0} is outside 1..=10")]
    ImportanceOutOfRange(i64),

    #[error("confidence {0} is outside 0.0..=1.0")]
    ConfidenceOutOfRange(f64),

    #[error("proficiency {0} is outside 0.0..=1.0")]
    ProficiencyOutOfRange(f64),

    #[error("unknown category: {0:?}")]
    UnknownCategory(String),

    #[error("{0} is not a knowledge category")]
    NotKnowledge(Category),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("{operation} is not supported for {category}")]
    Unsupported {
        category: Category,
        operation: &'static str,
    },
}

/// Reject an empty (or whitespace-only) required text field.
pub fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Categories
// ─────────────────────────────────────────────────────────────────────────────

/// Every record category the store knows about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Conversation,
    Fact,
    Preference,
    Pattern,
    Skill,
    Mistake,
    Topic,
    ContextWindow,
    CachedContent,
    ScanResult,
    ExternalData,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Conversation,
        Category::Fact,
        Category::Preference,
        Category::Pattern,
        Category::Skill,
        Category::Mistake,
        Category::Topic,
        Category::ContextWindow,
        Category::CachedContent,
        Category::ScanResult,
        Category::ExternalData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Conversation => "conversation",
            Category::Fact => "fact",
            Category::Preference => "preference",
            Category::Pattern => "pattern",
            Category::Skill => "skill",
            Category::Mistake => "mistake",
            Category::Topic => "topic",
            Category::ContextWindow => "context_window",
            Category::CachedContent => "cached_content",
            Category::ScanResult => "scan_result",
            Category::ExternalData => "external_data",
        }
    }

    /// Stable position of the category, used as a deterministic tie-breaker.
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    /// `true` for the `(category, key) → value` fact-like categories.
    pub fn is_knowledge(&self) -> bool {
        KnowledgeCategory::try_from(*self).is_ok()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let category = match norm.as_str() {
            "conversation" | "conversations" => Category::Conversation,
            "fact" | "facts" => Category::Fact,
            "preference" | "preferences" | "pref" | "prefs" => Category::Preference,
            "pattern" | "patterns" => Category::Pattern,
            "skill" | "skills" => Category::Skill,
            "mistake" | "mistakes" => Category::Mistake,
            "topic" | "topics" => Category::Topic,
            "context_window" | "context_windows" => Category::ContextWindow,
            "cached_content" | "cache" => Category::CachedContent,
            "scan_result" | "scan_results" | "scan" => Category::ScanResult,
            "external_data" | "external" => Category::ExternalData,
            _ => return Err(ValidationError::UnknownCategory(s.to_string())),
        };
        Ok(category)
    }
}

/// The subset of categories stored as upsertable `(category, key) → value`
/// facts.  Knowledge operations only accept these.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeCategory {
    Fact,
    Preference,
    ContextWindow,
    CachedContent,
    ScanResult,
    ExternalData,
}

impl KnowledgeCategory {
    pub const ALL: [KnowledgeCategory; 6] = [
        KnowledgeCategory::Fact,
        KnowledgeCategory::Preference,
        KnowledgeCategory::ContextWindow,
        KnowledgeCategory::CachedContent,
        KnowledgeCategory::ScanResult,
        KnowledgeCategory::ExternalData,
    ];

    pub fn as_category(&self) -> Category {
        match self {
            KnowledgeCategory::Fact => Category::Fact,
            KnowledgeCategory::Preference => Category::Preference,
            KnowledgeCategory::ContextWindow => Category::ContextWindow,
            KnowledgeCategory::CachedContent => Category::CachedContent,
            KnowledgeCategory::ScanResult => Category::ScanResult,
            KnowledgeCategory::ExternalData => Category::ExternalData,
        }
    }
}

impl From<KnowledgeCategory> for Category {
    fn from(k: KnowledgeCategory) -> Self {
        k.as_category()
    }
}

impl TryFrom<Category> for KnowledgeCategory {
    type Error = ValidationError;

    fn try_from(c: Category) -> Result<Self, Self::Error> {
        match c {
            Category::Fact => Ok(KnowledgeCategory::Fact),
            Category::Preference => Ok(KnowledgeCategory::Preference),
            Category::ContextWindow => Ok(KnowledgeCategory::ContextWindow),
            Category::CachedContent => Ok(KnowledgeCategory::CachedContent),
            Category::ScanResult => Ok(KnowledgeCategory::ScanResult),
            Category::ExternalData => Ok(KnowledgeCategory::ExternalData),
            other => Err(ValidationError::NotKnowledge(other)),
        }
    }
}

impl FromStr for KnowledgeCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KnowledgeCategory::try_from(s.parse::<Category>()?)
    }
}

impl fmt::Display for KnowledgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_category().fmt(f)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scoring newtypes
// ─────────────────────────────────────────────────────────────────────────────

/// Caller-assigned priority in `1..=10`.  Never adjusted by the system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(try_from = "i64", into = "u8")]
pub struct Importance(u8);

impl Importance {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;
    pub const LOW: Importance = Importance(2);
    pub const DEFAULT: Importance = Importance(5);
    pub const HIGH: Importance = Importance(8);

    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ValidationError::ImportanceOutOfRange(value))
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Importance {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Importance::new(value)
    }
}

impl From<Importance> for u8 {
    fn from(i: Importance) -> Self {
        i.0
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Certainty in a record, in `[0.0, 1.0]`.
///
/// Callers construct it with [`Confidence::new`], which rejects anything out
/// of range (including NaN).  The scoring engine derives new values with
/// [`Confidence::saturating`]; those are computed from in-range inputs and
/// only need protection against floating-point drift.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    pub const CERTAIN: Confidence = Confidence(1.0);
    pub const NEUTRAL: Confidence = Confidence(0.5);

    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::ConfidenceOutOfRange(value))
        }
    }

    /// Build a confidence from a system-computed value.
    pub fn saturating(value: f64) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    pub const fn get(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Confidence {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Confidence::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Row identifier of a record inside its category table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique handle to a record: its category plus its row id.
///
/// Relations between records are stored as pairs of these handles, never as
/// embedded references.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct RecordRef {
    pub category: Category,
    pub id: RecordId,
}

impl RecordRef {
    pub fn new(category: Category, id: RecordId) -> Self {
        Self { category, id }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.category, self.id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Scoring and bookkeeping attributes shared by every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecordMeta {
    pub importance: Importance,
    pub confidence: Confidence,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Monotonic count of successful reads.
    pub access_count: u64,
}

impl RecordMeta {
    /// Fresh metadata for a record created at `now`.
    pub fn new(importance: Importance, confidence: Confidence, now: DateTime<Utc>) -> Self {
        Self {
            importance,
            confidence,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    /// `importance × confidence`, the base ranking key.
    pub fn weight(&self) -> f64 {
        f64::from(self.importance.get()) * self.confidence.get()
    }
}

/// One exchange of the conversational loop.  Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationRecord {
    pub id: RecordId,
    pub input: String,
    pub response: String,
    pub success: bool,
    pub meta: RecordMeta,
}

/// An upsertable `(category, key) → value` fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KnowledgeFact {
    pub id: RecordId,
    pub category: KnowledgeCategory,
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
    pub meta: RecordMeta,
}

/// A recurring behaviour with its outcome counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PatternRecord {
    pub id: RecordId,
    pub pattern_type: String,
    pub pattern_data: Value,
    pub frequency: u64,
    pub success_count: u64,
    pub total_count: u64,
    pub meta: RecordMeta,
}

impl PatternRecord {
    /// `success_count / total_count`, or `0.0` before the first outcome.
    pub fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_count as f64
        }
    }
}

/// A named skill and its moving-average proficiency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SkillRecord {
    pub id: RecordId,
    pub skill_name: String,
    /// Always within `[0.0, 1.0]`.
    pub proficiency: f64,
    pub usage_count: u64,
    pub meta: RecordMeta,
}

/// Lifecycle of a [`MistakeRecord`].  The only transition is
/// `Unresolved → Learned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MistakeState {
    Unresolved,
    Learned,
}

/// A recorded error together with its fix, once known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MistakeRecord {
    pub id: RecordId,
    pub mistake_type: String,
    pub context: String,
    pub solution: Option<String>,
    pub state: MistakeState,
    pub learned_at: Option<DateTime<Utc>>,
    pub meta: RecordMeta,
}

impl MistakeRecord {
    pub fn is_learned(&self) -> bool {
        self.state == MistakeState::Learned
    }
}

/// A subject the user keeps returning to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TopicRecord {
    pub id: RecordId,
    pub topic_name: String,
    /// Accumulated mentions, decayed periodically by consolidation.
    pub frequency: f64,
    pub decayed_at: DateTime<Utc>,
    pub meta: RecordMeta,
}

impl TopicRecord {
    /// Derived interest in `[0.0, 1.0)`.
    pub fn interest_level(&self) -> f64 {
        let f = self.frequency.max(0.0);
        f / (f + TOPIC_INTEREST_HALF_POINT)
    }
}

/// A record of any category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Conversation(ConversationRecord),
    Knowledge(KnowledgeFact),
    Pattern(PatternRecord),
    Skill(SkillRecord),
    Mistake(MistakeRecord),
    Topic(TopicRecord),
}

impl Record {
    pub fn category(&self) -> Category {
        match self {
            Record::Conversation(_) => Category::Conversation,
            Record::Knowledge(k) => k.category.as_category(),
            Record::Pattern(_) => Category::Pattern,
            Record::Skill(_) => Category::Skill,
            Record::Mistake(_) => Category::Mistake,
            Record::Topic(_) => Category::Topic,
        }
    }

    pub fn id(&self) -> RecordId {
        match self {
            Record::Conversation(r) => r.id,
            Record::Knowledge(r) => r.id,
            Record::Pattern(r) => r.id,
            Record::Skill(r) => r.id,
            Record::Mistake(r) => r.id,
            Record::Topic(r) => r.id,
        }
    }

    pub fn record_ref(&self) -> RecordRef {
        RecordRef::new(self.category(), self.id())
    }

    pub fn meta(&self) -> &RecordMeta {
        match self {
            Record::Conversation(r) => &r.meta,
            Record::Knowledge(r) => &r.meta,
            Record::Pattern(r) => &r.meta,
            Record::Skill(r) => &r.meta,
            Record::Mistake(r) => &r.meta,
            Record::Topic(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut RecordMeta {
        match self {
            Record::Conversation(r) => &mut r.meta,
            Record::Knowledge(r) => &mut r.meta,
            Record::Pattern(r) => &mut r.meta,
            Record::Skill(r) => &mut r.meta,
            Record::Mistake(r) => &mut r.meta,
            Record::Topic(r) => &mut r.meta,
        }
    }

    /// Short label: the input, key, type or name of the record.
    pub fn title(&self) -> String {
        match self {
            Record::Conversation(r) => r.input.clone(),
            Record::Knowledge(r) => r.key.clone(),
            Record::Pattern(r) => r.pattern_type.clone(),
            Record::Skill(r) => r.skill_name.clone(),
            Record::Mistake(r) => r.mistake_type.clone(),
            Record::Topic(r) => r.topic_name.clone(),
        }
    }

    /// Human-readable payload of the record.
    pub fn body(&self) -> String {
        match self {
            Record::Conversation(r) => r.response.clone(),
            Record::Knowledge(r) => value_text(&r.value),
            Record::Pattern(r) => format!(
                "{} (seen {}x, success rate {:.2})",
                value_text(&r.pattern_data),
                r.frequency,
                r.success_rate()
            ),
            Record::Skill(r) => format!(
                "proficiency {:.2} over {} uses",
                r.proficiency, r.usage_count
            ),
            Record::Mistake(r) => match &r.solution {
                Some(solution) => format!("{} => {}", r.context, solution),
                None => r.context.clone(),
            },
            Record::Topic(r) => format!("interest {:.2}", r.interest_level()),
        }
    }
}

/// Render a JSON payload as text: strings unquoted, everything else as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
