//! The Brain facade.
//!
//! [`Brain`] is the single entry point collaborators hold.  It owns the
//! [`EntityStore`] and the tunables and hands out short-lived component
//! views (scoring, retrieval, learning, consolidation) per call.  There is
//! no global instance: construct one and pass it by reference.
//!
//! # Example
//!
//! ```rust
//! use brainvault_memory::{Brain, BrainConfig, Budget};
//! use serde_json::json;
//!
//! let brain = Brain::open_in_memory(BrainConfig::default()).unwrap();
//! brain.store_knowledge("prefs", "editor", json!("vim"), 8, 0.9).unwrap();
//! assert_eq!(brain.recall_knowledge("prefs", "editor").unwrap(), json!("vim"));
//!
//! let window = brain.get_context("editor", Budget::records(3)).unwrap();
//! assert_eq!(window.entries[0].title, "editor");
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use brainvault_types::{
    Category, Confidence, Importance, KnowledgeCategory, PatternRecord, RecordId, RecordRef,
    TopicRecord, ValidationError,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::BrainConfig;
use crate::consolidation::{CancelFlag, ConsolidationSummary, Consolidator};
use crate::error::{MemoryError, Result};
use crate::learning::{LearningRecorder, MistakeTransition};
use crate::retrieval::{Budget, ContextQuery, ContextWindow, RetrievalPlanner};
use crate::scoring::ScoringEngine;
use crate::store::{EntityStore, MemoryStats, NewRecord};

/// Outcome of a recall that must never invent a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Recall {
    Known(Value),
    Unknown,
}

impl Recall {
    pub fn known(self) -> Option<Value> {
        match self {
            Recall::Known(value) => Some(value),
            Recall::Unknown => None,
        }
    }
}

/// A record linked to another, with its current weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedRecord {
    pub record: RecordRef,
    pub label: String,
    /// `0.0` when the other end has been archived.
    pub weight: f64,
}

fn rejected<T>(result: std::result::Result<T, ValidationError>) -> Result<T> {
    result.map_err(|e| {
        debug!(error = %e, "request rejected");
        MemoryError::Validation(e)
    })
}

fn knowledge_category(name: &str) -> Result<KnowledgeCategory> {
    rejected(name.parse::<KnowledgeCategory>())
}

pub struct Brain {
    store: EntityStore,
    config: BrainConfig,
}

impl Brain {
    /// Open (or create) a brain database at `path`.
    pub fn open(path: impl AsRef<Path>, config: BrainConfig) -> Result<Self> {
        rejected(config.validate())?;
        let store = EntityStore::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "brain opened");
        Ok(Self { store, config })
    }

    pub fn open_in_memory(config: BrainConfig) -> Result<Self> {
        rejected(config.validate())?;
        Ok(Self {
            store: EntityStore::open_in_memory()?,
            config,
        })
    }

    /// Replace the time source used for ages and recency.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.store = self.store.with_clock(clock);
        self
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.store.now()
    }

    fn scoring(&self) -> ScoringEngine<'_> {
        ScoringEngine::new(&self.store, &self.config.scoring)
    }

    fn retrieval(&self) -> RetrievalPlanner<'_> {
        RetrievalPlanner::new(&self.store, &self.config.retrieval)
    }

    fn learning(&self) -> LearningRecorder<'_> {
        LearningRecorder::new(&self.store, &self.config.learning)
    }

    // ── conversations and knowledge ────────────────────────────────────────

    /// Append one exchange.  Confidence follows the outcome.
    pub fn store_conversation(&self, input: &str, response: &str, success: bool, importance: i64) -> Result<RecordId> {
        let importance = rejected(Importance::new(importance))?;
        let outcome = self
            .store
            .put(NewRecord::Conversation {
                input: input.to_string(),
                response: response.to_string(),
                success,
                importance,
                confidence: self.config.scoring.conversation_confidence(success),
            })
            .map_err(|e| e.during("store conversation"))?;
        Ok(outcome.id())
    }

    pub fn store_knowledge(
        &self,
        category: &str,
        key: &str,
        value: Value,
        importance: i64,
        confidence: f64,
    ) -> Result<RecordId> {
        let category = knowledge_category(category)?;
        let importance = rejected(Importance::new(importance))?;
        let confidence = rejected(Confidence::new(confidence))?;
        let outcome = self
            .scoring()
            .store_knowledge(category, key, value, importance, confidence)
            .map_err(|e| e.during("store knowledge"))?;
        Ok(outcome.id())
    }

    /// Value stored under `(category, key)`.  A miss is
    /// [`MemoryError::NotFound`].
    pub fn recall_knowledge(&self, category: &str, key: &str) -> Result<Value> {
        let category = knowledge_category(category)?;
        Ok(self.scoring().recall(category, key)?.value)
    }

    /// Like [`recall_knowledge`](Self::recall_knowledge) but a miss is an
    /// explicit [`Recall::Unknown`].
    pub fn recall_or_unknown(&self, category: &str, key: &str) -> Result<Recall> {
        match self.recall_knowledge(category, key) {
            Ok(value) => Ok(Recall::Known(value)),
            Err(e) if e.is_not_found() => Ok(Recall::Unknown),
            Err(e) => Err(e),
        }
    }

    /// Signal that a stored fact was wrong.  Returns its new confidence.
    pub fn contradict_knowledge(&self, category: &str, key: &str) -> Result<f64> {
        let category = knowledge_category(category)?;
        Ok(self.scoring().contradict(category, key)?.get())
    }

    pub fn forget_knowledge(&self, category: &str, key: &str) -> Result<()> {
        let category = knowledge_category(category)?.as_category();
        self.store.write(|tx| {
            let found = tx
                .find(category, key)?
                .ok_or_else(|| MemoryError::not_found(category, key))?;
            tx.delete(found.record_ref())?;
            info!(record = %found.record_ref(), "knowledge forgotten");
            Ok(())
        })
    }

    // ── retrieval ──────────────────────────────────────────────────────────

    /// Ranked context for a category name or free text.
    pub fn get_context(&self, query: &str, budget: Budget) -> Result<ContextWindow> {
        self.get_context_for(&ContextQuery::parse(query), &budget)
    }

    pub fn get_context_for(&self, query: &ContextQuery, budget: &Budget) -> Result<ContextWindow> {
        self.retrieval()
            .get_context(query, budget)
            .map_err(|e| e.during("get context"))
    }

    pub fn default_budget(&self) -> Budget {
        self.config.retrieval.default_budget()
    }

    // ── learning ───────────────────────────────────────────────────────────

    pub fn record_mistake(&self, mistake_type: &str, context: &str, solution: Option<&str>) -> Result<RecordId> {
        self.learning().record_mistake(mistake_type, context, solution)
    }

    pub fn mark_learned(&self, id: RecordId, solution: &str) -> Result<MistakeTransition> {
        self.learning().mark_learned(id, solution)
    }

    /// Returns the updated proficiency.
    pub fn record_skill_usage(&self, skill_name: &str, success: bool) -> Result<f64> {
        Ok(self.learning().record_skill_usage(skill_name, success)?.proficiency)
    }

    pub fn get_skills(&self) -> Result<BTreeMap<String, f64>> {
        self.learning().skills()
    }

    pub fn record_pattern(&self, pattern_type: &str, data: &Value, success: bool) -> Result<PatternRecord> {
        self.learning().record_pattern(pattern_type, data, success)
    }

    pub fn get_patterns(&self) -> Result<Vec<PatternRecord>> {
        self.learning().patterns()
    }

    pub fn record_topic(&self, topic_name: &str) -> Result<TopicRecord> {
        self.learning().record_topic(topic_name)
    }

    pub fn get_topics(&self) -> Result<Vec<TopicRecord>> {
        self.learning().topics()
    }

    // ── relations ──────────────────────────────────────────────────────────

    pub fn link(&self, from: RecordRef, to: RecordRef, label: &str) -> Result<bool> {
        self.store.link(from, to, label)
    }

    /// Records linked to `record`, heaviest first.
    pub fn related(&self, record: RecordRef) -> Result<Vec<RelatedRecord>> {
        let scoring = self.scoring();
        let mut related = self
            .store
            .neighbors(record)?
            .into_iter()
            .map(|n| {
                Ok(RelatedRecord {
                    record: n.record,
                    weight: scoring.weight_of(n.record)?,
                    label: n.label,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        related.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.record.cmp(&b.record))
                .then_with(|| a.label.cmp(&b.label))
        });
        Ok(related)
    }

    // ── maintenance ────────────────────────────────────────────────────────

    pub fn consolidate(&self) -> Result<ConsolidationSummary> {
        self.consolidate_with(&CancelFlag::default())
    }

    /// Consolidate, stopping between chunks once `cancel` is raised.
    pub fn consolidate_with(&self, cancel: &CancelFlag) -> Result<ConsolidationSummary> {
        Consolidator::new(
            &self.store,
            &self.config.scoring,
            &self.config.consolidation,
            cancel,
        )
        .run()
    }

    pub fn get_memory_stats(&self) -> Result<MemoryStats> {
        self.store.counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::consolidation::ConsolidationScheduler;
    use chrono::TimeDelta;
    use proptest::prelude::*;
    use serde_json::json;

    fn brain() -> (Brain, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let brain = Brain::open_in_memory(BrainConfig::default())
            .unwrap()
            .with_clock(clock.clone());
        (brain, clock)
    }

    #[test]
    fn preference_round_trip() {
        let (brain, _) = brain();
        brain
            .store_knowledge("prefs", "editor", json!("vim"), 8, 0.9)
            .unwrap();
        assert_eq!(
            brain.recall_knowledge("prefs", "editor").unwrap(),
            json!("vim")
        );
    }

    #[test]
    fn old_unimportant_conversation_is_archived() {
        let (brain, clock) = brain();
        clock.advance(-TimeDelta::days(120));
        brain.store_conversation("hi", "hello", true, 2).unwrap();
        brain.store_conversation("deploy plan", "ok", true, 9).unwrap();
        clock.advance(TimeDelta::days(120));

        let before = brain.get_memory_stats().unwrap();
        let summary = brain.consolidate().unwrap();
        let after = brain.get_memory_stats().unwrap();

        assert_eq!(summary.archived_count, 1);
        assert_eq!(
            after.active[&Category::Conversation],
            before.active[&Category::Conversation] - 1
        );
        assert_eq!(after.archived_conversations, before.archived_conversations + 1);
    }

    #[test]
    fn learned_mistake_outranks_unrelated_fact() {
        let (brain, _) = brain();
        brain
            .store_knowledge("facts", "server_port", json!(8080), 8, 1.0)
            .unwrap();
        let id = brain
            .record_mistake(
                "port_conflict",
                "start server on port 5000",
                Some("use port 5001"),
            )
            .unwrap();
        let window = brain
            .get_context("starting server on port 5000", Budget::records(3))
            .unwrap();
        assert_eq!(window.entries[0].record, RecordRef::new(Category::Mistake, id));
        assert_eq!(window.entries[1].title, "server_port");
    }

    #[test]
    fn skill_recovers_after_failure() {
        let (brain, _) = brain();
        let after_failure = brain.record_skill_usage("scripting", false).unwrap();
        let mut latest = after_failure;
        for _ in 0..5 {
            latest = brain.record_skill_usage("scripting", true).unwrap();
        }
        assert!(latest > after_failure);
        assert!(latest <= 1.0);
        assert_eq!(brain.get_skills().unwrap()["scripting"], latest);
    }

    #[test]
    fn out_of_range_scores_write_nothing() {
        let (brain, _) = brain();
        for (importance, confidence) in [(0, 0.5), (11, 0.5), (5, -0.1), (5, 1.01), (5, f64::NAN)] {
            let err = brain
                .store_knowledge("facts", "k", json!(1), importance, confidence)
                .unwrap_err();
            assert!(matches!(err, MemoryError::Validation(_)));
        }
        assert!(matches!(
            brain.store_conversation("a", "b", true, 0).unwrap_err(),
            MemoryError::Validation(ValidationError::ImportanceOutOfRange(0))
        ));
        assert_eq!(brain.get_memory_stats().unwrap().total_active(), 0);
    }

    #[test]
    fn malformed_category_is_rejected() {
        let (brain, _) = brain();
        let err = brain
            .store_knowledge("feelings", "k", json!(1), 5, 0.5)
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Validation(ValidationError::UnknownCategory(_))
        ));
        let err = brain
            .store_knowledge("skill", "k", json!(1), 5, 0.5)
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Validation(ValidationError::NotKnowledge(Category::Skill))
        ));
    }

    #[test]
    fn missing_knowledge_is_unknown_not_invented() {
        let (brain, _) = brain();
        assert!(
            brain
                .recall_knowledge("facts", "capital_of_mars")
                .unwrap_err()
                .is_not_found()
        );
        assert_eq!(
            brain.recall_or_unknown("facts", "capital_of_mars").unwrap(),
            Recall::Unknown
        );
    }

    #[test]
    fn forget_removes_the_fact() {
        let (brain, _) = brain();
        brain.store_knowledge("facts", "tmp", json!(1), 5, 0.5).unwrap();
        brain.forget_knowledge("facts", "tmp").unwrap();
        assert_eq!(
            brain.recall_or_unknown("facts", "tmp").unwrap(),
            Recall::Unknown
        );
        assert!(brain.forget_knowledge("facts", "tmp").unwrap_err().is_not_found());
    }

    #[test]
    fn contradiction_lowers_ranking() {
        let (brain, _) = brain();
        brain.store_knowledge("facts", "a", json!("x"), 5, 0.8).unwrap();
        brain.store_knowledge("facts", "b", json!("y"), 5, 0.6).unwrap();
        assert!((brain.contradict_knowledge("facts", "a").unwrap() - 0.4).abs() < 1e-9);
        let window = brain.get_context("facts", Budget::records(2)).unwrap();
        assert_eq!(window.entries[0].title, "b");
    }

    #[test]
    fn consolidation_is_idempotent() {
        let (brain, clock) = brain();
        clock.advance(-TimeDelta::days(100));
        for i in 0..5 {
            brain
                .store_conversation(&format!("old chat {i}"), "ok", true, 1)
                .unwrap();
        }
        brain.record_topic("rust").unwrap();
        clock.advance(TimeDelta::days(100));
        brain.store_knowledge("facts", "hot", json!(1), 5, 0.5).unwrap();
        for _ in 0..6 {
            brain.recall_knowledge("facts", "hot").unwrap();
        }

        let first = brain.consolidate().unwrap();
        assert_eq!(first.archived_count, 5);
        assert_eq!(first.strengthened_count, 1);
        assert_eq!(first.decayed_count, 1);
        assert!(!first.is_noop());

        let second = brain.consolidate().unwrap();
        assert!(second.is_noop(), "second pass changed state: {second}");
    }

    #[test]
    fn strengthening_requires_strictly_more_than_threshold() {
        let (brain, _) = brain();
        brain.store_knowledge("facts", "warm", json!(1), 5, 0.5).unwrap();
        for _ in 0..5 {
            brain.recall_knowledge("facts", "warm").unwrap();
        }
        assert_eq!(brain.consolidate().unwrap().strengthened_count, 0);
        brain.recall_knowledge("facts", "warm").unwrap();
        assert_eq!(brain.consolidate().unwrap().strengthened_count, 1);
    }

    #[test]
    fn topic_decay_applies_whole_periods() {
        let (brain, clock) = brain();
        for _ in 0..10 {
            brain.record_topic("databases").unwrap();
        }
        clock.advance(TimeDelta::days(15));
        let summary = brain.consolidate().unwrap();
        assert_eq!(summary.decayed_count, 1);
        let topics = brain.get_topics().unwrap();
        assert!((topics[0].frequency - 10.0 * 0.81).abs() < 1e-9);
        // One day of the third period has elapsed; nothing more to apply.
        assert!(brain.consolidate().unwrap().is_noop());
    }

    #[test]
    fn cancelled_pass_keeps_committed_chunks_and_resumes() {
        let mut config = BrainConfig::default();
        config.consolidation.chunk_size = 2;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let brain = Brain::open_in_memory(config).unwrap().with_clock(clock.clone());
        clock.advance(-TimeDelta::days(91));
        for i in 0..5 {
            brain.store_conversation(&format!("chat {i}"), "ok", true, 1).unwrap();
        }
        clock.advance(TimeDelta::days(91));

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = brain.consolidate_with(&cancel).unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            MemoryError::ConsolidationInterrupted { partial, .. } if partial.is_noop()
        ));

        cancel.reset();
        let summary = brain.consolidate_with(&cancel).unwrap();
        assert_eq!(summary.archived_count, 5);
        assert_eq!(brain.get_memory_stats().unwrap().archived_conversations, 5);
    }

    #[test]
    fn scheduler_runs_only_when_due() {
        let (brain, clock) = brain();
        let mut scheduler = ConsolidationScheduler::from_policy(&brain.config().consolidation);
        let cancel = CancelFlag::new();
        assert!(scheduler.run_if_due(&brain, &cancel).unwrap().is_some());
        assert!(scheduler.run_if_due(&brain, &cancel).unwrap().is_none());
        clock.advance(TimeDelta::hours(24));
        assert!(scheduler.run_if_due(&brain, &cancel).unwrap().is_some());

        clock.advance(TimeDelta::hours(24));
        cancel.cancel();
        let last = scheduler.last_run();
        assert!(scheduler.run_if_due(&brain, &cancel).unwrap().is_none());
        assert_eq!(scheduler.last_run(), last);
    }

    #[test]
    fn related_orders_by_weight() {
        let (brain, _) = brain();
        let topic = brain.record_topic("networking").unwrap();
        let mistake = brain
            .record_mistake("port_conflict", "port 5000 busy", None)
            .unwrap();
        let fact = brain
            .store_knowledge("facts", "default_port", json!(5000), 3, 0.5)
            .unwrap();
        let topic_ref = RecordRef::new(Category::Topic, topic.id);
        brain
            .link(RecordRef::new(Category::Mistake, mistake), topic_ref, "about")
            .unwrap();
        brain
            .link(RecordRef::new(Category::Fact, fact), topic_ref, "about")
            .unwrap();

        let related = brain.related(topic_ref).unwrap();
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].record.category, Category::Mistake);
        assert_eq!(related[1].record.category, Category::Fact);
    }

    #[test]
    fn links_survive_archival_of_one_end() {
        let (brain, clock) = brain();
        clock.advance(-TimeDelta::days(200));
        let chat = brain.store_conversation("talked about rust", "ok", true, 1).unwrap();
        clock.advance(TimeDelta::days(200));
        let topic = brain.record_topic("rust").unwrap();
        let chat_ref = RecordRef::new(Category::Conversation, chat);
        let topic_ref = RecordRef::new(Category::Topic, topic.id);
        brain.link(chat_ref, topic_ref, "mentions").unwrap();

        brain.consolidate().unwrap();
        let related = brain.related(topic_ref).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].record, chat_ref);
        assert_eq!(related[0].weight, 0.0);
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let brain = Brain::open_in_memory(BrainConfig::default()).unwrap();
        std::thread::scope(|s| {
            for t in 0..4 {
                let brain = &brain;
                s.spawn(move || {
                    for i in 0..25 {
                        brain.record_skill_usage("shared", (i + t) % 2 == 0).unwrap();
                        brain
                            .store_knowledge("facts", &format!("k{t}-{i}"), json!(i), 5, 0.5)
                            .unwrap();
                        brain.get_context("facts", Budget::records(5)).unwrap();
                    }
                });
            }
        });
        let stats = brain.get_memory_stats().unwrap();
        assert_eq!(stats.active[&Category::Fact], 100);
        let skill = brain
            .learning()
            .record_skill_usage("shared", true)
            .unwrap();
        assert_eq!(skill.usage_count, 101);
    }

    #[test]
    fn data_persists_in_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain.db");
        {
            let brain = Brain::open(&path, BrainConfig::default()).unwrap();
            brain.store_knowledge("facts", "lang", json!("rust"), 7, 0.8).unwrap();
            brain.record_mistake("typo", "wrong flag", Some("use --release")).unwrap();
        }
        let brain = Brain::open(&path, BrainConfig::default()).unwrap();
        assert_eq!(brain.recall_knowledge("facts", "lang").unwrap(), json!("rust"));
        assert_eq!(brain.get_memory_stats().unwrap().active[&Category::Mistake], 1);
    }

    #[test]
    fn consolidation_merges_duplicate_knowledge() {
        let (brain, _) = brain();
        let ids: Vec<RecordId> = brain
            .store()
            .write(|tx| {
                [("a", 0.4, 2), ("b", 0.9, 3), ("c", 0.4, 1)]
                    .into_iter()
                    .map(|(value, confidence, accesses)| {
                        tx.insert_duplicate(KnowledgeCategory::Fact, "dup", &json!(value), confidence, accesses)
                    })
                    .collect()
            })
            .unwrap();
        let chat = RecordRef::new(
            Category::Conversation,
            brain.store_conversation("which one?", "the dup", true, 5).unwrap(),
        );
        brain
            .link(RecordRef::new(Category::Fact, ids[0]), chat, "mentions")
            .unwrap();

        let summary = brain.consolidate().unwrap();
        assert_eq!(summary.deduplicated_count, 2);
        // Six summed accesses cross the strengthening threshold.
        assert_eq!(summary.strengthened_count, 1);

        let survivor = brain
            .store()
            .write(|tx| tx.find(Category::Fact, "dup"))
            .unwrap()
            .unwrap();
        assert_eq!(survivor.id(), ids[1]);
        assert_eq!(survivor.meta().access_count, 6);
        assert!(survivor.meta().confidence.get() > 0.9);
        assert_eq!(brain.get_memory_stats().unwrap().active[&Category::Fact], 1);

        let related = brain.related(chat).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].record, RecordRef::new(Category::Fact, ids[1]));
        assert_eq!(related[0].label, "mentions");

        assert!(brain.consolidate().unwrap().is_noop());
    }

    #[test]
    fn context_is_deterministic_under_fixed_clock() {
        let (brain, _) = brain();
        for (key, importance) in [("a", 5), ("b", 5), ("c", 7), ("d", 5)] {
            brain
                .store_knowledge("facts", key, json!("shared term"), importance, 0.5)
                .unwrap();
        }
        let first = brain.get_context("shared", Budget::records(3)).unwrap();
        let second = brain.get_context("shared", Budget::records(3)).unwrap();
        assert_eq!(first, second);
        let titles: Vec<_> = first.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "a", "b"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn knowledge_round_trips(
            key in "[a-z][a-z0-9_]{0,15}",
            value in "[ -~]{0,40}",
            importance in 1i64..=10,
            confidence in 0.0f64..=1.0,
        ) {
            let brain = Brain::open_in_memory(BrainConfig::default()).unwrap();
            brain.store_knowledge("facts", &key, json!(value), importance, confidence).unwrap();
            prop_assert_eq!(brain.recall_knowledge("facts", &key).unwrap(), json!(value));
        }

        #[test]
        fn mistakes_never_unlearn(solutions in proptest::collection::vec("[a-z]{1,8}", 1..5)) {
            let brain = Brain::open_in_memory(BrainConfig::default()).unwrap();
            let id = brain.record_mistake("t", "ctx", None).unwrap();
            let mut transitions = Vec::new();
            for s in &solutions {
                transitions.push(brain.mark_learned(id, s).unwrap());
            }
            prop_assert_eq!(transitions[0], MistakeTransition::Learned);
            for t in &transitions[1..] {
                prop_assert_eq!(*t, MistakeTransition::AlreadyLearned);
            }
            let window = brain.get_context("mistake", Budget::records(1)).unwrap();
            let expected = format!("ctx => {}", solutions[0]);
            prop_assert_eq!(&window.entries[0].body, &expected);
        }
    }
}
