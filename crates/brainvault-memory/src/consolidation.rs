//! Consolidation Scheduler.
//!
//! Periodic maintenance over the whole store, run as an ordered sequence of
//! steps:
//!
//! 1. **archive** conversations older than [`ARCHIVE_MIN_AGE_DAYS`] with
//!    importance below [`ARCHIVE_IMPORTANCE_BELOW`];
//! 2. **strengthen** knowledge accessed more than
//!    [`STRENGTHEN_ACCESS_THRESHOLD`] times;
//! 3. **decay topics** by [`TOPIC_DECAY_FACTOR`] per elapsed
//!    [`TOPIC_DECAY_PERIOD_DAYS`];
//! 4. **deduplicate** knowledge rows sharing a `(category, key)`;
//! 5. **compact** the database file;
//! 6. **reindex** the keyword index and prune dangling relations.
//!
//! Each step works in chunks of [`CONSOLIDATION_CHUNK_SIZE`] records, one
//! transaction per chunk.  A [`CancelFlag`] is checked between chunks; when
//! it is raised the pass stops with
//! [`MemoryError::ConsolidationInterrupted`] and every finished chunk stays
//! committed.  Every step is idempotent, so a second pass over unchanged
//! data reports a no-op summary.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use brainvault_types::{
    Category, KnowledgeCategory, RecordId, RecordRef, ValidationError,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::brain::Brain;
use crate::error::{MemoryError, Result};
use crate::scoring::ScoringParams;
use crate::store::{EntityStore, freelist_count};

/// Conversations with importance strictly below this are archivable.
pub const ARCHIVE_IMPORTANCE_BELOW: u8 = 3;

/// Minimum age, strictly exceeded, before a conversation is archived.
pub const ARCHIVE_MIN_AGE_DAYS: i64 = 90;

/// Accesses a fact must strictly exceed to be strengthened.
pub const STRENGTHEN_ACCESS_THRESHOLD: u64 = 5;

pub const CONSOLIDATION_CHUNK_SIZE: usize = 100;

pub const TOPIC_DECAY_FACTOR: f64 = 0.9;

pub const TOPIC_DECAY_PERIOD_DAYS: i64 = 7;

pub const DEFAULT_CONSOLIDATION_INTERVAL_HOURS: i64 = 24;

/// Pages released per incremental vacuum round.
const VACUUM_PAGES_PER_ROUND: u32 = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationPolicy {
    pub archive_importance_below: u8,
    pub archive_min_age_days: i64,
    pub strengthen_access_threshold: u64,
    pub chunk_size: usize,
    pub topic_decay_factor: f64,
    pub topic_decay_period_days: i64,
    pub interval_hours: i64,
}

impl Default for ConsolidationPolicy {
    fn default() -> Self {
        Self {
            archive_importance_below: ARCHIVE_IMPORTANCE_BELOW,
            archive_min_age_days: ARCHIVE_MIN_AGE_DAYS,
            strengthen_access_threshold: STRENGTHEN_ACCESS_THRESHOLD,
            chunk_size: CONSOLIDATION_CHUNK_SIZE,
            topic_decay_factor: TOPIC_DECAY_FACTOR,
            topic_decay_period_days: TOPIC_DECAY_PERIOD_DAYS,
            interval_hours: DEFAULT_CONSOLIDATION_INTERVAL_HOURS,
        }
    }
}

impl ConsolidationPolicy {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let invalid = |name: &'static str, value: f64| ValidationError::InvalidParameter { name, value };
        if !(1..=11).contains(&self.archive_importance_below) {
            return Err(invalid(
                "archive_importance_below",
                f64::from(self.archive_importance_below),
            ));
        }
        if self.archive_min_age_days < 0 {
            return Err(invalid("archive_min_age_days", self.archive_min_age_days as f64));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", 0.0));
        }
        let factor = self.topic_decay_factor;
        if !factor.is_finite() || factor <= 0.0 || factor > 1.0 {
            return Err(invalid("topic_decay_factor", factor));
        }
        if self.topic_decay_period_days < 1 {
            return Err(invalid(
                "topic_decay_period_days",
                self.topic_decay_period_days as f64,
            ));
        }
        if self.interval_hours < 1 {
            return Err(invalid("interval_hours", self.interval_hours as f64));
        }
        Ok(())
    }

    pub fn interval(&self) -> TimeDelta {
        TimeDelta::hours(self.interval_hours)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStep {
    Archive,
    Strengthen,
    DecayTopics,
    Deduplicate,
    Compact,
    Reindex,
}

impl ConsolidationStep {
    /// Execution order.
    pub const ALL: [ConsolidationStep; 6] = [
        ConsolidationStep::Archive,
        ConsolidationStep::Strengthen,
        ConsolidationStep::DecayTopics,
        ConsolidationStep::Deduplicate,
        ConsolidationStep::Compact,
        ConsolidationStep::Reindex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationStep::Archive => "archive",
            ConsolidationStep::Strengthen => "strengthen",
            ConsolidationStep::DecayTopics => "decay_topics",
            ConsolidationStep::Deduplicate => "deduplicate",
            ConsolidationStep::Compact => "compact",
            ConsolidationStep::Reindex => "reindex",
        }
    }
}

impl fmt::Display for ConsolidationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records changed by one pass, per step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationSummary {
    pub archived_count: usize,
    pub strengthened_count: usize,
    pub decayed_count: usize,
    pub deduplicated_count: usize,
    pub reindexed_count: usize,
}

impl ConsolidationSummary {
    pub fn is_noop(&self) -> bool {
        *self == ConsolidationSummary::default()
    }
}

impl fmt::Display for ConsolidationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "archived {}, strengthened {}, decayed {}, deduplicated {}, reindexed {}",
            self.archived_count,
            self.strengthened_count,
            self.decayed_count,
            self.deduplicated_count,
            self.reindexed_count
        )
    }
}

/// Cooperative stop signal, shareable across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Consolidator
// ─────────────────────────────────────────────────────────────────────────────

/// One consolidation pass over a store.
pub struct Consolidator<'a> {
    store: &'a EntityStore,
    scoring: &'a ScoringParams,
    policy: &'a ConsolidationPolicy,
    cancel: &'a CancelFlag,
}

impl<'a> Consolidator<'a> {
    pub fn new(
        store: &'a EntityStore,
        scoring: &'a ScoringParams,
        policy: &'a ConsolidationPolicy,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            store,
            scoring,
            policy,
            cancel,
        }
    }

    pub fn run(&self) -> Result<ConsolidationSummary> {
        let mut summary = ConsolidationSummary::default();
        for step in ConsolidationStep::ALL {
            match step {
                ConsolidationStep::Archive => self.archive(&mut summary)?,
                ConsolidationStep::Strengthen => self.strengthen(&mut summary)?,
                ConsolidationStep::DecayTopics => self.decay_topics(&mut summary)?,
                ConsolidationStep::Deduplicate => self.deduplicate(&mut summary)?,
                ConsolidationStep::Compact => self.compact(&summary)?,
                ConsolidationStep::Reindex => self.reindex(&mut summary)?,
            }
            debug!(%step, "consolidation step finished");
        }
        info!(%summary, "consolidation complete");
        Ok(summary)
    }

    /// Stop point between chunks.
    fn checkpoint(&self, step: ConsolidationStep, summary: &ConsolidationSummary) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(%step, partial = %summary, "consolidation interrupted");
            return Err(MemoryError::ConsolidationInterrupted {
                step,
                partial: summary.clone(),
            });
        }
        Ok(())
    }

    fn archive(&self, summary: &mut ConsolidationSummary) -> Result<()> {
        let cutoff = self.store.now() - TimeDelta::days(self.policy.archive_min_age_days);
        let chunk = self.policy.chunk_size;
        loop {
            self.checkpoint(ConsolidationStep::Archive, summary)?;
            let moved = self
                .store
                .write(|tx| {
                    let ids = tx.archive_candidates(cutoff, self.policy.archive_importance_below, chunk)?;
                    for id in &ids {
                        tx.archive(RecordRef::new(Category::Conversation, *id))?;
                    }
                    Ok(ids.len())
                })
                .map_err(|e| e.during("archive conversations"))?;
            summary.archived_count += moved;
            if moved < chunk {
                return Ok(());
            }
        }
    }

    fn strengthen(&self, summary: &mut ConsolidationSummary) -> Result<()> {
        let chunk = self.policy.chunk_size;
        let threshold = self.policy.strengthen_access_threshold;
        for category in KnowledgeCategory::ALL {
            loop {
                self.checkpoint(ConsolidationStep::Strengthen, summary)?;
                let done = self
                    .store
                    .write(|tx| {
                        let candidates = tx.strengthen_candidates(category, threshold, chunk)?;
                        for c in &candidates {
                            let boosted = self.scoring.strengthened(c.confidence);
                            tx.mark_strengthened(category, c.id, boosted, c.access_count)?;
                        }
                        Ok(candidates.len())
                    })
                    .map_err(|e| e.during("strengthen knowledge"))?;
                summary.strengthened_count += done;
                if done < chunk {
                    break;
                }
            }
        }
        Ok(())
    }

    fn decay_topics(&self, summary: &mut ConsolidationSummary) -> Result<()> {
        let chunk = self.policy.chunk_size;
        let period = TimeDelta::days(self.policy.topic_decay_period_days);
        let factor = self.policy.topic_decay_factor;
        loop {
            self.checkpoint(ConsolidationStep::DecayTopics, summary)?;
            let done = self
                .store
                .write(|tx| {
                    let candidates = tx.decay_candidates(period, chunk)?;
                    for c in &candidates {
                        let (frequency, decayed_at) =
                            decay(c.frequency, c.decayed_at, tx.now(), period, factor);
                        tx.set_topic_decay(c.id, frequency, decayed_at)?;
                    }
                    Ok(candidates.len())
                })
                .map_err(|e| e.during("decay topics"))?;
            summary.decayed_count += done;
            if done < chunk {
                return Ok(());
            }
        }
    }

    fn deduplicate(&self, summary: &mut ConsolidationSummary) -> Result<()> {
        let chunk = self.policy.chunk_size;
        let threshold = self.policy.strengthen_access_threshold;
        for category in KnowledgeCategory::ALL {
            loop {
                self.checkpoint(ConsolidationStep::Deduplicate, summary)?;
                let (keys, removed, strengthened) = self
                    .store
                    .write(|tx| {
                        let keys = tx.duplicate_keys(category, chunk)?;
                        let (mut removed, mut strengthened) = (0, 0);
                        for key in &keys {
                            let Some(merged) = tx.merge_duplicates(category, key)? else {
                                continue;
                            };
                            removed += merged.removed;
                            // The summed count may cross the threshold; settle
                            // it now so the next pass has nothing to do.
                            if merged.access_count > threshold
                                && merged.access_count > merged.strengthened_at_count
                            {
                                let boosted = self.scoring.strengthened(merged.confidence);
                                tx.mark_strengthened(category, merged.survivor, boosted, merged.access_count)?;
                                strengthened += 1;
                            }
                        }
                        Ok((keys.len(), removed, strengthened))
                    })
                    .map_err(|e| e.during("deduplicate knowledge"))?;
                summary.strengthened_count += strengthened;
                summary.deduplicated_count += removed;
                if keys < chunk {
                    break;
                }
            }
        }
        Ok(())
    }

    fn compact(&self, summary: &ConsolidationSummary) -> Result<()> {
        let mut reclaimed = 0u64;
        loop {
            self.checkpoint(ConsolidationStep::Compact, summary)?;
            let (before, after) = self
                .store
                .with_conn(|conn| {
                    let before = freelist_count(conn)?;
                    if before == 0 {
                        return Ok((0, 0));
                    }
                    conn.execute_batch(&format!(
                        "PRAGMA incremental_vacuum({VACUUM_PAGES_PER_ROUND});"
                    ))?;
                    Ok((before, freelist_count(conn)?))
                })
                .map_err(|e| e.during("compact database"))?;
            if before == 0 || after >= before {
                break;
            }
            reclaimed += before - after;
        }
        debug!(pages = reclaimed, "database compacted");
        Ok(())
    }

    fn reindex(&self, summary: &mut ConsolidationSummary) -> Result<()> {
        let chunk = self.policy.chunk_size;
        for category in Category::ALL {
            let mut after = RecordId(0);
            loop {
                self.checkpoint(ConsolidationStep::Reindex, summary)?;
                let (seen, changed, last) = self
                    .store
                    .write(|tx| {
                        let records = tx.select_after(category, after, chunk)?;
                        let mut changed = 0;
                        for record in &records {
                            if tx.reindex(record)? {
                                changed += 1;
                            }
                        }
                        Ok((records.len(), changed, records.last().map(|r| r.id())))
                    })
                    .map_err(|e| e.during("reindex"))?;
                summary.reindexed_count += changed;
                match last {
                    Some(id) if seen == chunk => after = id,
                    _ => break,
                }
            }
            let pruned = self
                .store
                .write(|tx| Ok(tx.prune_orphan_postings(category)? + tx.prune_dangling_relations(category)?))
                .map_err(|e| e.during("prune index"))?;
            summary.reindexed_count += pruned;
        }
        Ok(())
    }
}

/// Apply every whole decay period elapsed between `decayed_at` and `now`.
/// The remainder carries over, so repeated application never decays twice.
pub fn decay(
    frequency: f64,
    decayed_at: DateTime<Utc>,
    now: DateTime<Utc>,
    period: TimeDelta,
    factor: f64,
) -> (f64, DateTime<Utc>) {
    let elapsed = now - decayed_at;
    let period_secs = period.num_seconds().max(1);
    let periods = (elapsed.num_seconds() / period_secs).max(0);
    if periods == 0 {
        return (frequency, decayed_at);
    }
    let exponent = i32::try_from(periods).unwrap_or(i32::MAX);
    (
        frequency * factor.powi(exponent),
        decayed_at + TimeDelta::seconds(period_secs * periods),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// ConsolidationScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Decides when a consolidation pass is due and runs it.
#[derive(Debug, Clone)]
pub struct ConsolidationScheduler {
    interval: TimeDelta,
    last_run: Option<DateTime<Utc>>,
}

impl ConsolidationScheduler {
    pub fn new(interval: TimeDelta) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    pub fn from_policy(policy: &ConsolidationPolicy) -> Self {
        Self::new(policy.interval())
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// Due when it has never run or a full interval has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run {
            None => true,
            Some(last) => now - last >= self.interval,
        }
    }

    /// Run a pass when due.  An interrupted pass is logged, leaves
    /// `last_run` untouched and yields `Ok(None)` so the next call retries.
    pub fn run_if_due(&mut self, brain: &Brain, cancel: &CancelFlag) -> Result<Option<ConsolidationSummary>> {
        let now = brain.now();
        if !self.is_due(now) {
            return Ok(None);
        }
        match brain.consolidate_with(cancel) {
            Ok(summary) => {
                self.last_run = Some(now);
                Ok(Some(summary))
            }
            Err(MemoryError::ConsolidationInterrupted { step, partial }) => {
                warn!(%step, %partial, "scheduled consolidation interrupted; will retry");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
