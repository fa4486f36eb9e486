//! # Statement Normalizer
//!
//! Turns the raw XBRL facts a company files with a regulator into standardized income
//! statements, balance sheets and cash flow statements that can be compared across
//! filers.
//!
//! ## Core Concepts
//!
//! - **Facts**: tagged numeric values with a reporting period, unit and filing form
//! - **Period normalization**: cumulative year-to-date figures become single quarters and
//!   every fact is placed on a calendar frame (`CY2023Q2`, `CY2023Q2I`)
//! - **Canonical trees**: per-taxonomy hierarchies of concepts; a node without its own
//!   fact is the signed sum of its children (debit/credit polarity decides the sign)
//! - **Label selection**: historical label tables vote on which node feeds each canonical
//!   line item; agreeing tags pool their confidence
//! - **Triangulation**: accounting identities (`Gross Profit = Total Revenue - Cost Of
//!   Revenue`) recalculate weakly supported rows from well supported ones
//!
//! Missing data never becomes an error: unresolved rows are emitted as value 0 with
//! confidence 0. Only a missing taxonomy or label table fails a request.
//!
//! ## Example
//!
//! ```rust,ignore
//! use statement_normalizer::*;
//!
//! let processor = FinancialStatementProcessor::new(
//!     JsonTaxonomySource::new("data/taxonomies"),
//!     EngineConfig::default(),
//! )?;
//!
//! let facts = EntityFacts::from_fact_set(&parse_company_facts(&json)?);
//! let income = processor.build_statement(StatementType::Income, &facts, Period::Year(2023))?;
//! println!("{}", income.to_markdown());
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod labels;
pub mod period;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod statement;
pub mod tree;
pub mod triangulation;
pub mod utils;

pub use config::EngineConfig;
pub use engine::{build_statement, CacheKey, EntityFacts, StatementCache, StatementEngine};
pub use error::{NormalizationError, Result};
pub use ingestion::{parse_company_facts, FactStore, InMemoryFactStore};
pub use labels::{LabelEntry, LabelSelector, LabelTable, LineItemCandidate};
pub use period::{FactValues, FiscalAlignment, FrameOrigin, NormalizedFact, NormalizedFacts, PeriodNormalizer};
pub use registry::{
    InMemoryTaxonomySource, JsonTaxonomySource, TaxonomyData, TaxonomyRegistry, TaxonomySource,
};
pub use resolver::{resolve_all, signed_children_sum, ValueResolver};
pub use schema::*;
pub use statement::{
    RowOrigin, StatementDraft, StatementLayout, StatementRow, StatementTable, SHARES_OUTSTANDING,
};
pub use tree::{
    CanonicalForest, NodeDefinition, NodeId, Resolution, ResolvedNode, ResolvedValue,
    TaxonomyTrees, ValueOrigin,
};
pub use triangulation::{triangulate, RuleBook, TriangulationRule, Triangulator};

use log::{debug, info};
use rayon::prelude::*;
use std::sync::Arc;

/// One statement to build in a batch.
#[derive(Debug, Clone, Copy)]
pub struct StatementRequest<'a> {
    pub facts: &'a EntityFacts,
    pub statement: StatementType,
    pub period: Period,
}

/// Owns the taxonomy registry, the configuration and the statement cache.
///
/// Safe to share across threads; independent requests can be built concurrently with
/// [`build_statements`](Self::build_statements).
pub struct FinancialStatementProcessor<S: TaxonomySource> {
    registry: TaxonomyRegistry<S>,
    config: EngineConfig,
    rules: RuleBook,
    cache: StatementCache,
}

impl<S: TaxonomySource> FinancialStatementProcessor<S> {
    pub fn new(source: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        debug!("Statement processor configured: {:?}", config);

        Ok(Self {
            registry: TaxonomyRegistry::new(source, config.min_label_occurrences),
            config,
            rules: RuleBook::compile()?,
            cache: StatementCache::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &StatementCache {
        &self.cache
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    fn engine<'a>(&'a self, data: &'a TaxonomyData) -> StatementEngine<'a> {
        StatementEngine::with_rules(data, &self.config, &self.rules)
    }

    pub fn taxonomy(&self, taxonomy: Taxonomy) -> Result<Arc<TaxonomyData>> {
        self.registry.get(taxonomy)
    }

    /// Builds (or returns the memoized) statement for one entity and period.
    pub fn build_statement(
        &self,
        statement: StatementType,
        facts: &EntityFacts,
        period: Period,
    ) -> Result<Arc<StatementDraft>> {
        let key = CacheKey::new(&facts.entity_id, statement, period);
        self.cache.get_or_try_insert_with(key, || {
            let data = self.registry.get(facts.taxonomy)?;
            self.engine(&data).build_statement(statement, &facts.facts, period)
        })
    }

    /// Uncached build that also returns the triangulation log.
    pub fn build_statement_with_log(
        &self,
        statement: StatementType,
        facts: &EntityFacts,
        period: Period,
    ) -> Result<(StatementDraft, Vec<String>)> {
        let data = self.registry.get(facts.taxonomy)?;
        self.engine(&data).build_statement_with_log(statement, &facts.facts, period)
    }

    /// Builds independent requests on the rayon pool. Results keep the request order.
    pub fn build_statements(&self, requests: &[StatementRequest<'_>]) -> Vec<Result<Arc<StatementDraft>>> {
        info!("Building {} statements", requests.len());
        requests
            .par_iter()
            .map(|r| self.build_statement(r.statement, r.facts, r.period))
            .collect()
    }

    pub fn trailing_twelve_months(
        &self,
        statement: StatementType,
        facts: &EntityFacts,
        as_of: Period,
    ) -> Result<Arc<StatementDraft>> {
        let key = CacheKey::new(&facts.entity_id, statement, as_of).trailing();
        self.cache.get_or_try_insert_with(key, || {
            let data = self.registry.get(facts.taxonomy)?;
            self.engine(&data).trailing_twelve_months(statement, &facts.facts, as_of)
        })
    }

    pub fn statement_range(
        &self,
        statement: StatementType,
        facts: &EntityFacts,
        start_year: i32,
        end_year: i32,
        quarterly: bool,
    ) -> Result<StatementTable> {
        let data = self.registry.get(facts.taxonomy)?;
        self.engine(&data).build_statement_range(
            statement,
            &facts.facts,
            start_year,
            end_year,
            quarterly,
        )
    }
}

/// Parses a company-facts document and normalizes its periods in one step.
pub fn load_entity_facts(company_facts_json: &str) -> Result<EntityFacts> {
    let set = parse_company_facts(company_facts_json)?;
    Ok(EntityFacts::from_fact_set(&set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn source() -> InMemoryTaxonomySource {
        let trees: BTreeMap<String, Vec<NodeDefinition>> = serde_json::from_str(
            r#"{"income": [
                {"code": "GrossProfit", "polarity": "credit", "children": [
                    {"code": "Revenues", "polarity": "credit"},
                    {"code": "CostOfRevenue", "polarity": "debit"}
                ]}
            ]}"#,
        )
        .unwrap();
        let labels: Vec<LabelEntry> = serde_json::from_str(
            r#"[
                {"code": "Revenues", "yf": "Total Revenue", "type": "income_statement", "prob": 3.0, "count": 9},
                {"code": "CostOfRevenue", "yf": "Cost Of Revenue", "type": "income_statement", "prob": 3.0, "count": 9},
                {"code": "GrossProfit", "yf": "Gross Profit", "type": "income_statement", "prob": 1.2, "count": 9}
            ]"#,
        )
        .unwrap();
        InMemoryTaxonomySource::new().with_taxonomy(Taxonomy::UsGaap, trees, labels)
    }

    fn entity(entity_id: &str, taxonomy: Taxonomy, revenue: f64) -> EntityFacts {
        let fact = |tag: &str, value: f64| Fact {
            tag: tag.to_string(),
            start: NaiveDate::from_ymd_opt(2023, 1, 1),
            end: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
            value,
            unit: Unit::Currency("USD".to_string()),
            form: FormType::TenK,
            fiscal_period: Some("FY".to_string()),
            fiscal_year: Some(2023),
            frame: Some(Frame::annual(2023)),
        };
        EntityFacts::from_fact_set(&FactSet {
            entity_id: entity_id.to_string(),
            entity_name: None,
            taxonomy,
            facts: vec![fact("Revenues", revenue), fact("CostOfRevenue", 40.0)],
        })
    }

    #[test]
    fn test_processor_caches_statements() {
        let processor = FinancialStatementProcessor::new(source(), EngineConfig::default()).unwrap();
        let facts = entity("0000000001", Taxonomy::UsGaap, 100.0);

        let first = processor
            .build_statement(StatementType::Income, &facts, Period::Year(2023))
            .unwrap();
        let second = processor
            .build_statement(StatementType::Income, &facts, Period::Year(2023))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.value("Gross Profit"), Some(60.0));
        assert_eq!(processor.cache().len(), 1);
    }

    #[test]
    fn test_batch_keeps_request_order() {
        let processor = FinancialStatementProcessor::new(source(), EngineConfig::default()).unwrap();
        let a = entity("0000000001", Taxonomy::UsGaap, 100.0);
        let b = entity("0000000002", Taxonomy::UsGaap, 250.0);
        let c = entity("0000000003", Taxonomy::IfrsFull, 10.0);

        let requests = [
            StatementRequest { facts: &a, statement: StatementType::Income, period: Period::Year(2023) },
            StatementRequest { facts: &b, statement: StatementType::Income, period: Period::Year(2023) },
            StatementRequest { facts: &c, statement: StatementType::Income, period: Period::Year(2023) },
        ];
        let results = processor.build_statements(&requests);

        assert_eq!(results[0].as_ref().unwrap().value("Total Revenue"), Some(100.0));
        assert_eq!(results[1].as_ref().unwrap().value("Total Revenue"), Some(250.0));
        assert!(matches!(
            results[2],
            Err(NormalizationError::TaxonomyNotLoaded(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            derived_confidence: 5.0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            FinancialStatementProcessor::new(source(), config),
            Err(NormalizationError::InvalidConfig(_))
        ));
    }
}
