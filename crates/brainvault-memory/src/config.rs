//! Tunables of the memory subsystem.
//!
//! Every section defaults to the built-in constants, so an empty TOML table
//! (or none at all) yields the stock behaviour.

use brainvault_types::ValidationError;
use serde::{Deserialize, Serialize};

use crate::consolidation::ConsolidationPolicy;
use crate::learning::LearningParams;
use crate::retrieval::RetrievalParams;
use crate::scoring::ScoringParams;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    pub scoring: ScoringParams,
    pub retrieval: RetrievalParams,
    pub learning: LearningParams,
    pub consolidation: ConsolidationPolicy,
}

impl BrainConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.scoring.validate()?;
        self.retrieval.validate()?;
        self.learning.validate()?;
        self.consolidation.validate()
    }
}
