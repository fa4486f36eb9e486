use crate::error::{NormalizationError, Result};
use crate::schema::Taxonomy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    #[schemars(
        description = "Minimum summed confidence a us-gaap line item needs to be accepted. Items below it are emitted as 0 with confidence 0."
    )]
    pub primary_tolerance: f64,

    #[schemars(
        description = "Minimum summed confidence for ifrs-full line items. The ifrs-full label history is sparse, so the default accepts anything."
    )]
    pub secondary_tolerance: f64,

    #[schemars(
        description = "Confidence at or above which triangulation treats a line item as independently known and never recalculates it."
    )]
    pub lock_threshold: f64,

    #[schemars(
        description = "Confidence assigned to a triangulated value. Must be below lock_threshold."
    )]
    pub derived_confidence: f64,

    #[schemars(
        description = "Label rows observed fewer times than this across historical filings are discarded when a label table is loaded."
    )]
    pub min_label_occurrences: u32,

    #[schemars(
        description = "If true, headline income statement items (revenue, profit lines) receive their layout's confidence boost before triangulation."
    )]
    pub apply_confidence_boosts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            primary_tolerance: 0.4,
            secondary_tolerance: 0.0,
            lock_threshold: 3.0,
            derived_confidence: 1.0,
            min_label_occurrences: 2,
            apply_confidence_boosts: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn tolerance(&self, taxonomy: Taxonomy) -> f64 {
        match taxonomy {
            Taxonomy::UsGaap => self.primary_tolerance,
            Taxonomy::IfrsFull => self.secondary_tolerance,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("primary_tolerance", self.primary_tolerance),
            ("secondary_tolerance", self.secondary_tolerance),
            ("lock_threshold", self.lock_threshold),
            ("derived_confidence", self.derived_confidence),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(NormalizationError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if self.derived_confidence >= self.lock_threshold {
            return Err(NormalizationError::InvalidConfig(format!(
                "derived_confidence ({}) must be below lock_threshold ({})",
                self.derived_confidence, self.lock_threshold
            )));
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }
}
