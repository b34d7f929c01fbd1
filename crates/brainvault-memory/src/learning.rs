//! Learning Recorder.
//!
//! Records the experience-derived categories: mistakes (and their
//! resolution), skill proficiency, behavioural patterns and topic interest.
//!
//! Skill proficiency follows an exponential moving average:
//!
//! ```text
//! p' = p + rate × (outcome − p)      outcome ∈ {0.0, 1.0}
//! ```
//!
//! which keeps `p` inside `[0.0, 1.0]` for any starting point in range.

use std::collections::BTreeMap;

use brainvault_types::{
    Category, Confidence, Importance, PatternRecord, Record, RecordId, RecordRef, SkillRecord,
    TopicRecord, ValidationError, require_non_empty,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{MemoryError, Result};
use crate::store::{EntityStore, NewRecord, ScanFilter, ScanOrder};

/// Fraction of the gap to the latest outcome closed per skill use.
pub const SKILL_LEARNING_RATE: f64 = 0.1;

/// Proficiency of a skill before its first recorded use.
pub const INITIAL_PROFICIENCY: f64 = 0.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningParams {
    pub skill_learning_rate: f64,
    pub initial_proficiency: f64,
    pub mistake_importance: Importance,
    pub record_importance: Importance,
}

impl Default for LearningParams {
    fn default() -> Self {
        Self {
            skill_learning_rate: SKILL_LEARNING_RATE,
            initial_proficiency: INITIAL_PROFICIENCY,
            mistake_importance: Importance::HIGH,
            record_importance: Importance::DEFAULT,
        }
    }
}

impl LearningParams {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let rate = self.skill_learning_rate;
        if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
            return Err(ValidationError::InvalidParameter {
                name: "skill_learning_rate",
                value: rate,
            });
        }
        let initial = self.initial_proficiency;
        if !initial.is_finite() || !(0.0..=1.0).contains(&initial) {
            return Err(ValidationError::ProficiencyOutOfRange(initial));
        }
        Ok(())
    }
}

/// One step of the proficiency moving average.
pub fn ema_update(current: f64, success: bool, rate: f64) -> std::result::Result<f64, ValidationError> {
    if !current.is_finite() || !(0.0..=1.0).contains(&current) {
        return Err(ValidationError::ProficiencyOutOfRange(current));
    }
    if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
        return Err(ValidationError::InvalidParameter {
            name: "skill_learning_rate",
            value: rate,
        });
    }
    let outcome = if success { 1.0 } else { 0.0 };
    Ok((current + rate * (outcome - current)).clamp(0.0, 1.0))
}

/// Result of asking for a mistake to be marked learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MistakeTransition {
    Learned,
    /// The mistake was learned before; nothing changed.
    AlreadyLearned,
}

pub struct LearningRecorder<'a> {
    store: &'a EntityStore,
    params: &'a LearningParams,
}

impl<'a> LearningRecorder<'a> {
    pub fn new(store: &'a EntityStore, params: &'a LearningParams) -> Self {
        Self { store, params }
    }

    /// Record a mistake.  Supplying a solution records it already learned.
    pub fn record_mistake(&self, mistake_type: &str, context: &str, solution: Option<&str>) -> Result<RecordId> {
        let outcome = self
            .store
            .put(NewRecord::Mistake {
                mistake_type: mistake_type.to_string(),
                context: context.to_string(),
                solution: solution.map(str::to_string),
                importance: self.params.mistake_importance,
                confidence: Confidence::CERTAIN,
            })
            .map_err(|e| e.during("record mistake"))?;
        info!(id = %outcome.id(), mistake_type, learned = solution.is_some(), "mistake recorded");
        Ok(outcome.id())
    }

    /// `Unresolved → Learned`.  Repeating it is a no-op reported as
    /// [`MistakeTransition::AlreadyLearned`], whatever solution is passed.
    pub fn mark_learned(&self, id: RecordId, solution: &str) -> Result<MistakeTransition> {
        self.store
            .write(|tx| {
                let handle = RecordRef::new(Category::Mistake, id);
                match tx.find_by_id(handle)? {
                    None => Err(MemoryError::not_found(Category::Mistake, id)),
                    Some(Record::Mistake(m)) if m.is_learned() => Ok(MistakeTransition::AlreadyLearned),
                    Some(_) => {
                        require_non_empty("solution", solution)?;
                        tx.resolve_mistake(id, solution)?;
                        Ok(MistakeTransition::Learned)
                    }
                }
            })
            .map_err(|e| e.during("mark mistake learned"))
    }

    /// Fold one use of `skill_name` into its proficiency.
    pub fn record_skill_usage(&self, skill_name: &str, success: bool) -> Result<SkillRecord> {
        require_non_empty("skill_name", skill_name)?;
        self.store
            .write(|tx| {
                let existing = match tx.find(Category::Skill, skill_name)? {
                    Some(Record::Skill(s)) => Some(s),
                    _ => None,
                };
                let (current, uses, importance, confidence) = match &existing {
                    Some(s) => (s.proficiency, s.usage_count, s.meta.importance, s.meta.confidence),
                    None => (
                        self.params.initial_proficiency,
                        0,
                        self.params.record_importance,
                        Confidence::NEUTRAL,
                    ),
                };
                let proficiency = ema_update(current, success, self.params.skill_learning_rate)?;
                let outcome = tx.put(NewRecord::Skill {
                    skill_name: skill_name.to_string(),
                    proficiency,
                    usage_count: uses + 1,
                    importance,
                    confidence,
                })?;
                debug!(skill_name, success, from = current, to = proficiency, "skill usage recorded");
                match tx.find_by_id(RecordRef::new(Category::Skill, outcome.id()))? {
                    Some(Record::Skill(s)) => Ok(s),
                    _ => Err(MemoryError::not_found(Category::Skill, skill_name)),
                }
            })
            .map_err(|e| e.during("record skill usage"))
    }

    /// Count one occurrence of a pattern.  Identity is `(type, canonical
    /// JSON of data)`.
    pub fn record_pattern(&self, pattern_type: &str, data: &Value, success: bool) -> Result<PatternRecord> {
        require_non_empty("pattern_type", pattern_type)?;
        self.store
            .write(|tx| {
                let id = match tx.find_pattern(pattern_type, data)? {
                    Some(p) => {
                        tx.update_pattern_counts(
                            p.id,
                            p.frequency + 1,
                            p.success_count + u64::from(success),
                            p.total_count + 1,
                        )?;
                        p.id
                    }
                    None => tx
                        .put(NewRecord::Pattern {
                            pattern_type: pattern_type.to_string(),
                            pattern_data: data.clone(),
                            frequency: 1,
                            success_count: u64::from(success),
                            total_count: 1,
                            importance: self.params.record_importance,
                            confidence: Confidence::NEUTRAL,
                        })?
                        .id(),
                };
                match tx.find_by_id(RecordRef::new(Category::Pattern, id))? {
                    Some(Record::Pattern(p)) => Ok(p),
                    _ => Err(MemoryError::not_found(Category::Pattern, pattern_type)),
                }
            })
            .map_err(|e| e.during("record pattern"))
    }

    /// Count one mention of a topic.  Names are matched case-insensitively.
    pub fn record_topic(&self, topic_name: &str) -> Result<TopicRecord> {
        require_non_empty("topic_name", topic_name)?;
        let name = topic_name.trim().to_lowercase();
        self.store
            .write(|tx| {
                let (frequency, importance, confidence) = match tx.find(Category::Topic, &name)? {
                    Some(Record::Topic(t)) => (t.frequency + 1.0, t.meta.importance, t.meta.confidence),
                    _ => (1.0, Importance::LOW, Confidence::NEUTRAL),
                };
                let outcome = tx.put(NewRecord::Topic {
                    topic_name: name.clone(),
                    frequency,
                    importance,
                    confidence,
                })?;
                match tx.find_by_id(RecordRef::new(Category::Topic, outcome.id()))? {
                    Some(Record::Topic(t)) => Ok(t),
                    _ => Err(MemoryError::not_found(Category::Topic, &name)),
                }
            })
            .map_err(|e| e.during("record topic"))
    }

    /// Proficiency per skill name.
    pub fn skills(&self) -> Result<BTreeMap<String, f64>> {
        let records = self
            .store
            .scan(Category::Skill, &ScanFilter::default(), ScanOrder::Insertion)
            .map_err(|e| e.during("list skills"))?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                Record::Skill(s) => Some((s.skill_name, s.proficiency)),
                _ => None,
            })
            .collect())
    }

    /// Active patterns in insertion order.
    pub fn patterns(&self) -> Result<Vec<PatternRecord>> {
        let records = self
            .store
            .scan(Category::Pattern, &ScanFilter::default(), ScanOrder::Insertion)
            .map_err(|e| e.during("list patterns"))?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                Record::Pattern(p) => Some(p),
                _ => None,
            })
            .collect())
    }

    /// Topics by interest, highest first; ties by name.
    pub fn topics(&self) -> Result<Vec<TopicRecord>> {
        let records = self
            .store
            .scan(Category::Topic, &ScanFilter::default(), ScanOrder::Insertion)
            .map_err(|e| e.during("list topics"))?;
        let mut topics: Vec<TopicRecord> = records
            .into_iter()
            .filter_map(|r| match r {
                Record::Topic(t) => Some(t),
                _ => None,
            })
            .collect();
        topics.sort_by(|a, b| {
            b.frequency
                .total_cmp(&a.frequency)
                .then_with(|| a.topic_name.cmp(&b.topic_name))
        });
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fixture() -> (EntityStore, LearningParams) {
        (EntityStore::open_in_memory().unwrap(), LearningParams::default())
    }

    #[test]
    fn ema_moves_toward_outcome() {
        assert!((ema_update(0.0, true, 0.1).unwrap() - 0.1).abs() < 1e-12);
        assert!((ema_update(0.5, false, 0.1).unwrap() - 0.45).abs() < 1e-12);
        assert!(ema_update(1.2, true, 0.1).is_err());
        assert!(ema_update(0.5, true, 0.0).is_err());
    }

    #[test]
    fn skill_proficiency_follows_the_moving_average() {
        let (store, params) = fixture();
        let recorder = LearningRecorder::new(&store, &params);
        let s = recorder.record_skill_usage("rust", true).unwrap();
        assert!((s.proficiency - 0.1).abs() < 1e-12);
        let s = recorder.record_skill_usage("rust", true).unwrap();
        assert!((s.proficiency - 0.19).abs() < 1e-12);
        let s = recorder.record_skill_usage("rust", false).unwrap();
        assert!((s.proficiency - 0.171).abs() < 1e-12);
        assert_eq!(s.usage_count, 3);

        let skills = recorder.skills().unwrap();
        assert_eq!(skills.len(), 1);
        assert!((skills["rust"] - 0.171).abs() < 1e-12);
    }

    #[test]
    fn mistake_lifecycle() {
        let (store, params) = fixture();
        let recorder = LearningRecorder::new(&store, &params);
        let id = recorder
            .record_mistake("borrowck", "moved value used after move", None)
            .unwrap();
        assert_eq!(
            recorder.mark_learned(id, "clone before moving").unwrap(),
            MistakeTransition::Learned
        );
        assert_eq!(
            recorder.mark_learned(id, "something else").unwrap(),
            MistakeTransition::AlreadyLearned
        );

        let Record::Mistake(m) = store
            .get_by_id(RecordRef::new(Category::Mistake, id))
            .unwrap()
        else {
            panic!("expected mistake");
        };
        assert_eq!(m.solution.as_deref(), Some("clone before moving"));
        assert!(m.learned_at.is_some());
        assert_eq!(m.meta.importance, Importance::HIGH);
        assert_eq!(m.meta.confidence, Confidence::CERTAIN);
    }

    #[test]
    fn mistake_fields_must_not_be_empty() {
        let (store, params) = fixture();
        let recorder = LearningRecorder::new(&store, &params);
        assert!(recorder.record_mistake("", "ctx", None).is_err());
        assert!(recorder.record_mistake("t", " ", None).is_err());
        assert!(recorder.record_mistake("t", "ctx", Some("")).is_err());
        let id = recorder.record_mistake("t", "ctx", None).unwrap();
        assert!(recorder.mark_learned(id, "").is_err());
        assert!(recorder.mark_learned(id, " \t").is_err());
        assert!(
            recorder
                .mark_learned(RecordId(999), "fix")
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn relearning_ignores_the_solution() {
        let (store, params) = fixture();
        let recorder = LearningRecorder::new(&store, &params);
        let id = recorder.record_mistake("borrowck", "ctx", Some("clone it")).unwrap();
        assert_eq!(
            recorder.mark_learned(id, "").unwrap(),
            MistakeTransition::AlreadyLearned
        );
        let Record::Mistake(m) = store
            .get_by_id(RecordRef::new(Category::Mistake, id))
            .unwrap()
        else {
            panic!("expected mistake");
        };
        assert_eq!(m.solution.as_deref(), Some("clone it"));
    }

    #[test]
    fn listing_errors_name_the_operation() {
        let (store, params) = fixture();
        let recorder = LearningRecorder::new(&store, &params);
        store
            .with_conn(|c| c.execute_batch("DROP TABLE skills; DROP TABLE patterns; DROP TABLE topics;"))
            .unwrap();
        assert!(matches!(
            recorder.skills().unwrap_err(),
            MemoryError::Storage { operation: "list skills", .. }
        ));
        assert!(matches!(
            recorder.patterns().unwrap_err(),
            MemoryError::Storage { operation: "list patterns", .. }
        ));
        assert!(matches!(
            recorder.topics().unwrap_err(),
            MemoryError::Storage { operation: "list topics", .. }
        ));
    }

    #[test]
    fn patterns_count_by_canonical_identity() {
        let (store, params) = fixture();
        let recorder = LearningRecorder::new(&store, &params);
        let a: Value = serde_json::from_str(r#"{"tool":"git","op":"rebase"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"op":"rebase","tool":"git"}"#).unwrap();
        recorder.record_pattern("workflow", &a, true).unwrap();
        let p = recorder.record_pattern("workflow", &b, false).unwrap();
        assert_eq!(p.frequency, 2);
        assert_eq!(p.total_count, 2);
        assert_eq!(p.success_count, 1);
        assert!((p.success_rate() - 0.5).abs() < 1e-12);

        recorder.record_pattern("other", &json!(1), true).unwrap();
        assert_eq!(recorder.patterns().unwrap().len(), 2);
    }

    #[test]
    fn topics_accumulate_case_insensitively() {
        let (store, params) = fixture();
        let recorder = LearningRecorder::new(&store, &params);
        recorder.record_topic("Rust").unwrap();
        recorder.record_topic("rust ").unwrap();
        let t = recorder.record_topic("RUST").unwrap();
        assert_eq!(t.frequency, 3.0);
        recorder.record_topic("zig").unwrap();

        let topics = recorder.topics().unwrap();
        assert_eq!(topics[0].topic_name, "rust");
        assert!((topics[0].interest_level() - 3.0 / 8.0).abs() < 1e-12);
        assert_eq!(topics[1].topic_name, "zig");
    }

    proptest! {
        #[test]
        fn proficiency_never_leaves_unit_interval(
            start in 0.0f64..=1.0,
            rate in 0.001f64..=1.0,
            outcomes in proptest::collection::vec(any::<bool>(), 0..64),
        ) {
            let mut p = start;
            for outcome in outcomes {
                p = ema_update(p, outcome, rate).unwrap();
                prop_assert!((0.0..=1.0).contains(&p));
            }
        }

        /// A repeating run of outcomes settles where the average over one
        /// run equals its success rate.
        #[test]
        fn proficiency_settles_on_success_rate(
            (period, successes) in (1usize..=12).prop_flat_map(|m| (Just(m), 0..=m)),
        ) {
            let outcome = |i: usize| i % period < successes;
            let mut p = INITIAL_PROFICIENCY;
            for i in 0..period * 500 {
                p = ema_update(p, outcome(i), SKILL_LEARNING_RATE).unwrap();
            }
            let mut sum = 0.0;
            for i in 0..period {
                p = ema_update(p, outcome(i), SKILL_LEARNING_RATE).unwrap();
                sum += p;
            }
            let rate = successes as f64 / period as f64;
            prop_assert!((sum / period as f64 - rate).abs() < 1e-6);
        }

        #[test]
        fn successes_never_lower_proficiency(n in 1usize..200) {
            let mut p = INITIAL_PROFICIENCY;
            for _ in 0..n {
                let next = ema_update(p, true, SKILL_LEARNING_RATE).unwrap();
                prop_assert!(next >= p);
                p = next;
            }
        }
    }
}
