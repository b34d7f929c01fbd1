//! Retrieval Planner.
//!
//! Assembles a ranked, budget-bounded [`ContextWindow`] for a query.  A
//! query names either a category (every active record of it) or free text
//! (every record sharing at least one index term with it).
//!
//! Candidates are ranked by [`RankKey`]: effective weight, then recency,
//! then insertion order.  A learned mistake's weight is raised by
//! [`LEARNED_MISTAKE_BOOST`] so that known fixes surface ahead of
//! equally-scored records.
//!
//! Every returned entry counts as one access on its record.  Accesses are
//! stamped in rank order, no earlier than any candidate's previous access,
//! so the recency tie-break keeps the order just served even when the
//! clock moves between calls.  Retrieval never changes confidence, and
//! entries carry no bookkeeping counters, so repeating a query over
//! unchanged data returns an identical window.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use brainvault_types::{Category, Record, RecordRef, ValidationError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::scoring::RankKey;
use crate::store::{EntityStore, ScanFilter, ScanOrder, StoreTx};
use crate::text;

/// Weight added to a learned mistake inside a candidate set.
pub const LEARNED_MISTAKE_BOOST: f64 = 5.0;

/// Record budget used when a caller does not supply one.
pub const DEFAULT_CONTEXT_RECORDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalParams {
    pub learned_mistake_boost: f64,
    pub default_max_records: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            learned_mistake_boost: LEARNED_MISTAKE_BOOST,
            default_max_records: DEFAULT_CONTEXT_RECORDS,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let boost = self.learned_mistake_boost;
        if !boost.is_finite() || boost < 0.0 {
            return Err(ValidationError::InvalidParameter {
                name: "learned_mistake_boost",
                value: boost,
            });
        }
        Ok(())
    }

    pub fn default_budget(&self) -> Budget {
        Budget::records(self.default_max_records)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query and budget
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextQuery {
    Category(Category),
    Text(String),
}

impl ContextQuery {
    /// A category name (or alias) selects that category; anything else is a
    /// free-text query.
    pub fn parse(input: &str) -> Self {
        match input.parse::<Category>() {
            Ok(category) => ContextQuery::Category(category),
            Err(_) => ContextQuery::Text(input.to_string()),
        }
    }
}

impl From<Category> for ContextQuery {
    fn from(category: Category) -> Self {
        ContextQuery::Category(category)
    }
}

/// Upper bounds on one retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_records: usize,
    /// Cap on the summed size of entry titles and bodies, in bytes.
    pub max_bytes: Option<usize>,
    /// Candidates not loaded before the deadline are skipped and the window
    /// is flagged `partial`.  Whatever was loaded is still ranked and
    /// returned.
    pub deadline: Option<Duration>,
}

impl Budget {
    pub fn records(max_records: usize) -> Self {
        Self {
            max_records,
            max_bytes: None,
            deadline: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl Default for Budget {
    fn default() -> Self {
        Budget::records(DEFAULT_CONTEXT_RECORDS)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context window
// ─────────────────────────────────────────────────────────────────────────────

/// One ranked record as handed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub record: RecordRef,
    pub title: String,
    pub body: String,
    pub importance: u8,
    pub confidence: f64,
    /// Effective ranking weight, boost included.
    pub weight: f64,
    pub boosted: bool,
}

impl ContextEntry {
    /// Bytes this entry counts against a `max_bytes` budget.
    pub fn size(&self) -> usize {
        self.title.len() + self.body.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextWindow {
    pub entries: Vec<ContextEntry>,
    /// `true` when the deadline cut candidate loading short.
    pub partial: bool,
}

impl ContextWindow {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn refs(&self) -> Vec<RecordRef> {
        self.entries.iter().map(|e| e.record).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RetrievalPlanner
// ─────────────────────────────────────────────────────────────────────────────

pub struct RetrievalPlanner<'a> {
    store: &'a EntityStore,
    params: &'a RetrievalParams,
}

impl<'a> RetrievalPlanner<'a> {
    pub fn new(store: &'a EntityStore, params: &'a RetrievalParams) -> Self {
        Self { store, params }
    }

    /// Ranked window for `query`, bounded by `budget`.
    pub fn get_context(&self, query: &ContextQuery, budget: &Budget) -> Result<ContextWindow> {
        let started = Instant::now();
        self.store.write(|tx| {
            let (candidates, partial) = self.gather(tx, query, budget, started)?;
            let considered = candidates.len();
            let base = candidates
                .iter()
                .map(|r| r.meta().last_accessed_at)
                .fold(tx.now(), |a, b| a.max(b));
            let mut window = self.assemble(candidates, budget);
            window.partial = partial;
            tx.touch_ranked(&window.refs(), base)?;
            debug!(
                ?query,
                considered,
                returned = window.len(),
                partial,
                "context assembled"
            );
            Ok(window)
        })
    }

    fn gather(
        &self,
        tx: &StoreTx<'_>,
        query: &ContextQuery,
        budget: &Budget,
        started: Instant,
    ) -> Result<(Vec<Record>, bool)> {
        let expired = |at: Instant| budget.deadline.is_some_and(|d| at.duration_since(started) >= d);
        match query {
            ContextQuery::Category(category) => {
                let records = tx.select(*category, &ScanFilter::default(), ScanOrder::Insertion)?;
                let partial = expired(Instant::now());
                if partial {
                    warn!(category = %category, loaded = records.len(), "context deadline elapsed during scan");
                }
                Ok((records, partial))
            }
            ContextQuery::Text(text) => {
                let terms: BTreeSet<String> = text::terms(text);
                let mut records = Vec::new();
                for handle in tx.matching(&terms)? {
                    // At least one match is always loaded.
                    if !records.is_empty() && expired(Instant::now()) {
                        warn!(loaded = records.len(), "context deadline elapsed, returning partial window");
                        return Ok((records, true));
                    }
                    if let Some(record) = tx.find_by_id(handle)? {
                        records.push(record);
                    }
                }
                Ok((records, false))
            }
        }
    }

    /// Rank `candidates` and cut the result to `budget`.  Pure: the output
    /// depends only on the records' contents, not on their input order.
    pub fn assemble(&self, candidates: Vec<Record>, budget: &Budget) -> ContextWindow {
        let mut ranked: Vec<(RankKey, ContextEntry)> = candidates
            .into_iter()
            .map(|record| {
                let boosted = matches!(&record, Record::Mistake(m) if m.is_learned());
                let mut weight = record.meta().weight();
                if boosted {
                    weight += self.params.learned_mistake_boost;
                }
                let entry = ContextEntry {
                    record: record.record_ref(),
                    title: record.title(),
                    body: record.body(),
                    importance: record.meta().importance.get(),
                    confidence: record.meta().confidence.get(),
                    weight,
                    boosted,
                };
                (RankKey::of(&record, weight), entry)
            })
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = Vec::new();
        let mut used = 0usize;
        for (_, entry) in ranked {
            if entries.len() >= budget.max_records {
                break;
            }
            if let Some(max) = budget.max_bytes {
                if used + entry.size() > max {
                    break;
                }
            }
            used += entry.size();
            entries.push(entry);
        }
        ContextWindow {
            entries,
            partial: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::NewRecord;
    use brainvault_types::{Confidence, Importance, KnowledgeCategory};
    use chrono::{TimeDelta, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> (EntityStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = EntityStore::open_in_memory().unwrap().with_clock(clock.clone());
        (store, clock)
    }

    fn pref(store: &EntityStore, key: &str, value: &str, importance: i64, confidence: f64) {
        store
            .put(NewRecord::Knowledge {
                category: KnowledgeCategory::Preference,
                key: key.into(),
                value: json!(value),
                importance: Importance::new(importance).unwrap(),
                confidence: Confidence::new(confidence).unwrap(),
            })
            .unwrap();
    }

    fn mistake(store: &EntityStore, kind: &str, context: &str, solution: Option<&str>) {
        store
            .put(NewRecord::Mistake {
                mistake_type: kind.into(),
                context: context.into(),
                solution: solution.map(str::to_string),
                importance: Importance::HIGH,
                confidence: Confidence::CERTAIN,
            })
            .unwrap();
    }

    #[test]
    fn parse_distinguishes_categories_from_text() {
        assert_eq!(
            ContextQuery::parse("prefs"),
            ContextQuery::Category(Category::Preference)
        );
        assert_eq!(
            ContextQuery::parse("deploy failures"),
            ContextQuery::Text("deploy failures".into())
        );
    }

    #[test]
    fn category_query_ranks_by_weight() {
        let (store, _) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        pref(&store, "theme", "dark", 3, 0.9);
        pref(&store, "editor", "vim", 9, 0.9);
        pref(&store, "font", "mono", 5, 0.9);

        let window = planner
            .get_context(&Category::Preference.into(), &Budget::records(2))
            .unwrap();
        let titles: Vec<_> = window.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["editor", "font"]);
        assert!(!window.partial);
    }

    #[test]
    fn learned_mistake_outranks_unresolved_one() {
        let (store, _) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        mistake(&store, "deploy", "timeout during deploy", None);
        mistake(&store, "deploy", "deploy failed on migration", Some("run migrations first"));

        let window = planner
            .get_context(&ContextQuery::Text("deploy".into()), &Budget::records(5))
            .unwrap();
        assert_eq!(window.len(), 2);
        assert!(window.entries[0].boosted);
        assert_eq!(window.entries[0].body, "deploy failed on migration => run migrations first");
        assert!(window.entries[0].weight > window.entries[1].weight);
    }

    #[test]
    fn text_query_without_shared_terms_is_empty() {
        let (store, _) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        pref(&store, "editor", "vim", 5, 0.5);
        let window = planner
            .get_context(&ContextQuery::Text("kubernetes".into()), &Budget::default())
            .unwrap();
        assert!(window.is_empty());
        let window = planner
            .get_context(&ContextQuery::Text("a an".into()), &Budget::default())
            .unwrap();
        assert!(window.is_empty());
    }

    #[test]
    fn zero_record_budget_returns_nothing_and_touches_nothing() {
        let (store, _) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        pref(&store, "editor", "vim", 5, 0.5);
        let window = planner
            .get_context(&Category::Preference.into(), &Budget::records(0))
            .unwrap();
        assert!(window.is_empty());
        let r = store
            .write(|tx| tx.find(Category::Preference, "editor"))
            .unwrap()
            .unwrap();
        assert_eq!(r.meta().access_count, 0);
    }

    #[test]
    fn byte_budget_truncates() {
        let (store, _) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        pref(&store, "aaaa", "bbbb", 9, 1.0);
        pref(&store, "cccc", "dddd", 5, 1.0);
        let window = planner
            .get_context(
                &Category::Preference.into(),
                &Budget::records(10).with_max_bytes(10),
            )
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window.entries[0].title, "aaaa");
    }

    #[test]
    fn retrieval_counts_access_but_keeps_confidence() {
        let (store, clock) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        pref(&store, "editor", "vim", 5, 0.5);
        clock.advance(TimeDelta::seconds(10));
        planner
            .get_context(&Category::Preference.into(), &Budget::default())
            .unwrap();
        let r = store
            .write(|tx| tx.find(Category::Preference, "editor"))
            .unwrap()
            .unwrap();
        assert_eq!(r.meta().access_count, 1);
        assert_eq!(r.meta().confidence.get(), 0.5);
    }

    #[test]
    fn repeated_query_is_identical() {
        let (store, _) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        for (i, key) in ["alpha", "beta", "gamma", "delta"].iter().enumerate() {
            pref(&store, key, "value", 5, 0.5 + i as f64 * 0.1);
        }
        // The clock never moves, so touched records keep equal recency.
        let first = planner
            .get_context(&Category::Preference.into(), &Budget::records(3))
            .unwrap();
        let second = planner
            .get_context(&Category::Preference.into(), &Budget::records(3))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn assemble_ignores_candidate_order() {
        let (store, clock) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        for key in ["one", "two", "three", "four", "five"] {
            pref(&store, key, "same", 5, 0.5);
            clock.advance(TimeDelta::seconds(1));
        }
        mistake(&store, "oops", "same thing", Some("fix"));
        let mut candidates = store
            .write(|tx| tx.select(Category::Preference, &ScanFilter::default(), ScanOrder::Insertion))
            .unwrap();
        candidates.extend(
            store
                .write(|tx| tx.select(Category::Mistake, &ScanFilter::default(), ScanOrder::Insertion))
                .unwrap(),
        );
        let forward = planner.assemble(candidates.clone(), &Budget::records(10));
        candidates.reverse();
        candidates.swap(0, 3);
        let shuffled = planner.assemble(candidates, &Budget::records(10));
        assert_eq!(forward, shuffled);
        assert_eq!(forward.entries[0].title, "oops");
        // Equal weight and recency: newest access first, i.e. latest created.
        assert_eq!(forward.entries[1].title, "five");
    }

    #[test]
    fn order_is_stable_while_the_clock_moves() {
        let (store, clock) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        for key in ["alpha", "beta", "gamma", "delta"] {
            pref(&store, key, "value", 5, 0.5);
        }
        let titles = |w: &ContextWindow| w.entries.iter().map(|e| e.title.clone()).collect::<Vec<_>>();

        let first = planner
            .get_context(&Category::Preference.into(), &Budget::records(4))
            .unwrap();
        for _ in 0..3 {
            clock.advance(TimeDelta::seconds(30));
            let again = planner
                .get_context(&Category::Preference.into(), &Budget::records(4))
                .unwrap();
            assert_eq!(titles(&again), titles(&first));
        }
        assert_eq!(titles(&first), vec!["alpha", "beta", "gamma", "delta"]);
    }

    #[test]
    fn records_left_out_stay_behind_served_ones() {
        let (store, clock) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        for key in ["alpha", "beta", "gamma", "delta"] {
            pref(&store, key, "value", 5, 0.5);
            clock.advance(TimeDelta::seconds(1));
        }
        let titles = |w: &ContextWindow| w.entries.iter().map(|e| e.title.clone()).collect::<Vec<_>>();

        let first = planner
            .get_context(&Category::Preference.into(), &Budget::records(2))
            .unwrap();
        assert_eq!(titles(&first), vec!["delta", "gamma"]);
        clock.advance(TimeDelta::minutes(5));
        let second = planner
            .get_context(&Category::Preference.into(), &Budget::records(2))
            .unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn category_deadline_keeps_loaded_records() {
        let (store, _) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        pref(&store, "editor", "vim", 9, 0.9);
        pref(&store, "theme", "dark", 3, 0.9);

        let window = planner
            .get_context(
                &Category::Preference.into(),
                &Budget::records(10).with_deadline(Duration::ZERO),
            )
            .unwrap();
        assert!(window.partial);
        assert_eq!(window.len(), 2);
        assert_eq!(window.entries[0].title, "editor");
    }

    #[test]
    fn text_deadline_returns_what_was_loaded() {
        let (store, _) = store();
        let params = RetrievalParams::default();
        let planner = RetrievalPlanner::new(&store, &params);
        mistake(&store, "deploy", "timeout during deploy", None);
        mistake(&store, "deploy", "deploy failed on migration", None);

        let window = planner
            .get_context(
                &ContextQuery::Text("deploy".into()),
                &Budget::records(10).with_deadline(Duration::ZERO),
            )
            .unwrap();
        assert!(window.partial);
        assert_eq!(window.len(), 1);

        let full = planner
            .get_context(&ContextQuery::Text("deploy".into()), &Budget::records(10))
            .unwrap();
        assert!(!full.partial);
        assert_eq!(full.len(), 2);
    }
}
