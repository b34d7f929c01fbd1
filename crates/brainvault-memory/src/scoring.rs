//! Scoring Engine.
//!
//! Owns every confidence transition a record can go through outside of
//! consolidation, and the total order retrieval ranks by.
//!
//! | event                     | confidence update                         |
//! |---------------------------|-------------------------------------------|
//! | upsert of an existing key | `old + (supplied − old) × blend`          |
//! | successful recall         | `c + (1 − c) × access_strengthen_rate`    |
//! | contradiction             | `c × contradiction_penalty`               |
//!
//! Every result is clamped to `[0.0, 1.0]`.  Context retrieval never moves
//! confidence; only the explicit events above do.

use std::cmp::Ordering;

use brainvault_types::{
    Category, Confidence, Importance, KnowledgeCategory, KnowledgeFact, Record, RecordMeta,
    RecordRef, ValidationError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::store::{EntityStore, NewRecord, PutOutcome};

/// Fraction of the remaining distance to `1.0` gained per recall.
pub const ACCESS_STRENGTHEN_RATE: f64 = 0.05;

/// Multiplier applied to confidence when a fact is contradicted.
pub const CONTRADICTION_PENALTY: f64 = 0.5;

/// Weight of the newly supplied confidence when an existing key is upserted.
pub const UPSERT_CONFIDENCE_BLEND: f64 = 0.5;

/// Confidence assigned to a conversation whose exchange failed.
pub const FAILED_CONVERSATION_CONFIDENCE: f64 = 0.5;

/// Tunables of the confidence transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    pub access_strengthen_rate: f64,
    pub contradiction_penalty: f64,
    pub upsert_confidence_blend: f64,
    pub failed_conversation_confidence: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            access_strengthen_rate: ACCESS_STRENGTHEN_RATE,
            contradiction_penalty: CONTRADICTION_PENALTY,
            upsert_confidence_blend: UPSERT_CONFIDENCE_BLEND,
            failed_conversation_confidence: FAILED_CONVERSATION_CONFIDENCE,
        }
    }
}

fn check(name: &'static str, value: f64, ok: bool) -> std::result::Result<(), ValidationError> {
    if value.is_finite() && ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidParameter { name, value })
    }
}

impl ScoringParams {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let rate = self.access_strengthen_rate;
        check("access_strengthen_rate", rate, rate > 0.0 && rate <= 1.0)?;
        let penalty = self.contradiction_penalty;
        check("contradiction_penalty", penalty, (0.0..1.0).contains(&penalty))?;
        let blend = self.upsert_confidence_blend;
        check("upsert_confidence_blend", blend, (0.0..=1.0).contains(&blend))?;
        let failed = self.failed_conversation_confidence;
        check("failed_conversation_confidence", failed, (0.0..=1.0).contains(&failed))
    }

    /// Confidence after one successful access.
    pub fn strengthened(&self, c: Confidence) -> Confidence {
        let c = c.get();
        Confidence::saturating(c + (1.0 - c) * self.access_strengthen_rate)
    }

    /// Confidence after a contradiction.
    pub fn penalized(&self, c: Confidence) -> Confidence {
        Confidence::saturating(c.get() * self.contradiction_penalty)
    }

    /// Confidence after re-storing a key that already holds `old`.
    pub fn blended(&self, old: Confidence, supplied: Confidence) -> Confidence {
        let old = old.get();
        Confidence::saturating(old + (supplied.get() - old) * self.upsert_confidence_blend)
    }

    /// Confidence recorded for a conversation.
    pub fn conversation_confidence(&self, success: bool) -> Confidence {
        if success {
            Confidence::CERTAIN
        } else {
            Confidence::saturating(self.failed_conversation_confidence)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ranking order
// ─────────────────────────────────────────────────────────────────────────────

/// Sort key of one retrieval candidate.
///
/// Orders by effective weight descending, then last access descending, then
/// insertion order ascending.  Insertion order is `(created_at, category,
/// id)` so the order is total across categories and never depends on the
/// order candidates arrive in.
#[derive(Debug, Clone, Copy)]
pub struct RankKey {
    pub weight: f64,
    pub last_accessed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub category: Category,
    pub id: i64,
}

impl RankKey {
    pub fn of(record: &Record, weight: f64) -> Self {
        let meta: &RecordMeta = record.meta();
        Self {
            weight,
            last_accessed_at: meta.last_accessed_at,
            created_at: meta.created_at,
            category: record.category(),
            id: record.id().0,
        }
    }
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey {}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .weight
            .total_cmp(&self.weight)
            .then_with(|| other.last_accessed_at.cmp(&self.last_accessed_at))
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.category.ordinal().cmp(&other.category.ordinal()))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScoringEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Knowledge operations that move confidence.
pub struct ScoringEngine<'a> {
    store: &'a EntityStore,
    params: &'a ScoringParams,
}

impl<'a> ScoringEngine<'a> {
    pub fn new(store: &'a EntityStore, params: &'a ScoringParams) -> Self {
        Self { store, params }
    }

    /// Upsert a fact.  A new key takes the supplied confidence verbatim; an
    /// existing key moves toward it by the blend factor.
    pub fn store_knowledge(
        &self,
        category: KnowledgeCategory,
        key: &str,
        value: Value,
        importance: Importance,
        confidence: Confidence,
    ) -> Result<PutOutcome> {
        self.store.write(|tx| {
            let effective = match tx.find(category.as_category(), key)? {
                Some(existing) => self.params.blended(existing.meta().confidence, confidence),
                None => confidence,
            };
            tx.put(NewRecord::Knowledge {
                category,
                key: key.to_string(),
                value,
                importance,
                confidence: effective,
            })
        })
    }

    /// Read a fact.  Counts an access and strengthens its confidence.
    pub fn recall(&self, category: KnowledgeCategory, key: &str) -> Result<KnowledgeFact> {
        let category = category.as_category();
        self.store.write(|tx| {
            let found = tx
                .find(category, key)?
                .ok_or_else(|| MemoryError::not_found(category, key))?;
            let mut record = tx.touch_record(found)?;
            let strengthened = self.params.strengthened(record.meta().confidence);
            tx.set_confidence(record.record_ref(), strengthened)?;
            record.meta_mut().confidence = strengthened;
            match record {
                Record::Knowledge(fact) => Ok(fact),
                other => Err(MemoryError::not_found(other.category(), key)),
            }
        })
    }

    /// Penalise a fact the caller found to be wrong.  Returns the new
    /// confidence.
    pub fn contradict(&self, category: KnowledgeCategory, key: &str) -> Result<Confidence> {
        let category = category.as_category();
        self.store.write(|tx| {
            let found = tx
                .find(category, key)?
                .ok_or_else(|| MemoryError::not_found(category, key))?;
            let before = found.meta().confidence;
            let after = self.params.penalized(before);
            tx.set_confidence(found.record_ref(), after)?;
            debug!(record = %found.record_ref(), %before, %after, "knowledge contradicted");
            Ok(after)
        })
    }

    /// Current `importance × confidence` of a record, `0.0` when it does not
    /// exist.  Pure read: no bookkeeping.
    pub fn weight_of(&self, record: RecordRef) -> Result<f64> {
        let found = self.store.write(|tx| tx.find_by_id(record))?;
        Ok(found.map(|r| r.meta().weight()).unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeDelta;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    fn conf(v: f64) -> Confidence {
        Confidence::new(v).unwrap()
    }

    #[test]
    fn recall_strengthens_by_access_rate() {
        let store = EntityStore::open_in_memory().unwrap();
        let params = ScoringParams::default();
        let engine = ScoringEngine::new(&store, &params);
        engine
            .store_knowledge(KnowledgeCategory::Fact, "k", json!(1), Importance::DEFAULT, conf(0.6))
            .unwrap();

        let fact = engine.recall(KnowledgeCategory::Fact, "k").unwrap();
        assert!((fact.meta.confidence.get() - 0.62).abs() < 1e-9);
        assert_eq!(fact.meta.access_count, 1);
    }

    #[test]
    fn contradiction_halves_confidence() {
        let store = EntityStore::open_in_memory().unwrap();
        let params = ScoringParams::default();
        let engine = ScoringEngine::new(&store, &params);
        engine
            .store_knowledge(KnowledgeCategory::Fact, "k", json!(1), Importance::DEFAULT, conf(0.8))
            .unwrap();
        let after = engine.contradict(KnowledgeCategory::Fact, "k").unwrap();
        assert!((after.get() - 0.4).abs() < 1e-9);
        assert!(
            engine
                .contradict(KnowledgeCategory::Fact, "missing")
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn upsert_blends_toward_supplied_confidence() {
        let store = EntityStore::open_in_memory().unwrap();
        let params = ScoringParams::default();
        let engine = ScoringEngine::new(&store, &params);
        let first = engine
            .store_knowledge(KnowledgeCategory::Preference, "editor", json!("vim"), Importance::HIGH, conf(0.8))
            .unwrap();
        let second = engine
            .store_knowledge(KnowledgeCategory::Preference, "editor", json!("helix"), Importance::HIGH, conf(0.2))
            .unwrap();
        assert_eq!(first.id(), second.id());

        let r = store.get(Category::Preference, "editor").unwrap();
        assert!((r.meta().confidence.get() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn weight_of_missing_record_is_zero() {
        let store = EntityStore::open_in_memory().unwrap();
        let params = ScoringParams::default();
        let engine = ScoringEngine::new(&store, &params);
        let ghost = RecordRef::new(Category::Fact, brainvault_types::RecordId(42));
        assert_eq!(engine.weight_of(ghost).unwrap(), 0.0);
    }

    #[test]
    fn rank_key_breaks_ties_by_recency_then_insertion() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = EntityStore::open_in_memory().unwrap().with_clock(clock.clone());
        let params = ScoringParams::default();
        let engine = ScoringEngine::new(&store, &params);
        for key in ["a", "b", "c"] {
            engine
                .store_knowledge(KnowledgeCategory::Fact, key, json!(key), Importance::DEFAULT, conf(0.5))
                .unwrap();
            clock.advance(TimeDelta::seconds(1));
        }
        store.get(Category::Fact, "b").unwrap();

        let mut keys: Vec<(RankKey, String)> = ["a", "b", "c"]
            .into_iter()
            .map(|k| {
                let r = store
                    .write(|tx| tx.find(Category::Fact, k))
                    .unwrap()
                    .unwrap();
                (RankKey::of(&r, r.meta().weight()), k.to_string())
            })
            .collect();
        keys.sort();
        let order: Vec<_> = keys.into_iter().map(|(_, k)| k).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = ScoringParams {
            contradiction_penalty: 1.5,
            ..ScoringParams::default()
        };
        assert!(params.validate().is_err());
        assert!(ScoringParams::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn transitions_stay_in_unit_interval(c in 0.0f64..=1.0, s in 0.0f64..=1.0) {
            let p = ScoringParams::default();
            let c = Confidence::new(c).unwrap();
            let s = Confidence::new(s).unwrap();
            for next in [p.strengthened(c), p.penalized(c), p.blended(c, s)] {
                prop_assert!((0.0..=1.0).contains(&next.get()));
            }
            prop_assert!(p.strengthened(c).get() >= c.get());
            prop_assert!(p.penalized(c).get() <= c.get());
        }
    }
}
