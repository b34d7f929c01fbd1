//! `brainvault-memory` – The Brain.
//!
//! Persistent knowledge and memory on a local SQLite substrate: a
//! multi-category fact store with dual scoring (importance, confidence),
//! ranked contextual retrieval, mistake learning, skill proficiency and a
//! resumable consolidation pass.
//!
//! # Modules
//!
//! - [`store`] – [`EntityStore`]: transactional storage of every record
//!   category, the keyword index and the relation graph.
//! - [`scoring`] – [`ScoringEngine`]: confidence transitions on upsert,
//!   recall and contradiction; the total ranking order.
//! - [`retrieval`] – [`RetrievalPlanner`]: ranked, budget-bounded context
//!   windows for a category or free-text query.
//! - [`learning`] – [`LearningRecorder`]: the mistake state machine, skill
//!   proficiency, pattern and topic counters.
//! - [`consolidation`] – [`Consolidator`] and [`ConsolidationScheduler`]:
//!   archive, strengthen, decay, deduplicate, compact and reindex.
//! - [`brain`] – [`Brain`]: the facade collaborators hold.

pub mod brain;
pub mod clock;
pub mod config;
pub mod consolidation;
pub mod error;
pub mod learning;
pub mod retrieval;
pub mod schema;
pub mod scoring;
pub mod store;
pub mod text;

pub use brain::{Brain, Recall, RelatedRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BrainConfig;
pub use consolidation::{
    CancelFlag, ConsolidationPolicy, ConsolidationScheduler, ConsolidationStep,
    ConsolidationSummary, Consolidator,
};
pub use error::{MemoryError, Result};
pub use learning::{LearningRecorder, MistakeTransition};
pub use retrieval::{Budget, ContextEntry, ContextQuery, ContextWindow, RetrievalPlanner};
pub use scoring::ScoringEngine;
pub use store::{EntityStore, MemoryStats, NewRecord, PutOutcome, ScanFilter, ScanOrder};
