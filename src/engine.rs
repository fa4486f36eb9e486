//! The statement pipeline: period lookup, tree resolution, label selection, statement
//! specific adjustments and triangulation.

use crate::config::EngineConfig;
use crate::error::{NormalizationError, Result};
use crate::ingestion::DEI_SHARES_OUTSTANDING;
use crate::labels::LabelSelector;
use crate::period::{NormalizedFacts, PeriodNormalizer};
use crate::registry::TaxonomyData;
use crate::resolver::resolve_all;
use crate::schema::{FactSet, Frame, Period, StatementType, Taxonomy, Unit};
use crate::statement::{RowOrigin, StatementDraft, StatementRow, StatementTable, SHARES_OUTSTANDING};
use crate::triangulation::{RuleBook, TriangulationRule, Triangulator};
use crate::utils::{previous_quarter, previous_quarters};
use log::{debug, info};
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Share-count concepts, in order of preference.
const SHARE_COUNT_TAGS: [&str; 3] = [
    DEI_SHARES_OUTSTANDING,
    "CommonStockSharesOutstanding",
    "WeightedAverageNumberOfSharesOutstandingBasic",
];

const SUPPLEMENTED_CONFIDENCE: f64 = 1.0;

/// One entity's facts, normalized once and reused for every statement request.
#[derive(Debug, Clone)]
pub struct EntityFacts {
    pub entity_id: String,
    pub taxonomy: Taxonomy,
    pub facts: NormalizedFacts,
}

impl EntityFacts {
    pub fn from_fact_set(set: &FactSet) -> Self {
        Self {
            entity_id: set.entity_id.clone(),
            taxonomy: set.taxonomy,
            facts: PeriodNormalizer::normalize(&set.facts),
        }
    }
}

pub struct StatementEngine<'a> {
    data: &'a TaxonomyData,
    config: &'a EngineConfig,
    rules: Cow<'a, RuleBook>,
}

impl<'a> StatementEngine<'a> {
    /// Validates `config` and compiles the layout rules for this engine alone.
    pub fn new(data: &'a TaxonomyData, config: &'a EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            data,
            config,
            rules: Cow::Owned(RuleBook::compile()?),
        })
    }

    /// Engine over rules compiled elsewhere. `config` must already be validated.
    pub fn with_rules(data: &'a TaxonomyData, config: &'a EngineConfig, rules: &'a RuleBook) -> Self {
        Self {
            data,
            config,
            rules: Cow::Borrowed(rules),
        }
    }

    pub fn rules_for(&self, statement: StatementType) -> &[TriangulationRule] {
        self.rules.rules_for(statement)
    }

    pub fn build_statement(
        &self,
        statement: StatementType,
        facts: &NormalizedFacts,
        period: Period,
    ) -> Result<StatementDraft> {
        self.build_statement_with_log(statement, facts, period)
            .map(|(draft, _)| draft)
    }

    /// Like [`build_statement`](Self::build_statement), also returning the triangulation log.
    pub fn build_statement_with_log(
        &self,
        statement: StatementType,
        facts: &NormalizedFacts,
        period: Period,
    ) -> Result<(StatementDraft, Vec<String>)> {
        self.check_loaded(statement)?;

        let mut draft = if statement.layout().is_duration() && facts.is_annual_quarter(period) {
            self.annual_remainder(statement, facts, period)
        } else {
            self.select(statement, facts, period)
        };

        match statement {
            StatementType::Income => self.apply_confidence_boosts(&mut draft),
            StatementType::Balance => attach_shares_outstanding(&mut draft, facts),
            StatementType::CashFlow => {}
        }

        let (draft, log) = Triangulator::new(self.config).apply(&draft, self.rules_for(statement));
        for line in &log {
            debug!("{} {}: {}", statement, period, line);
        }

        info!(
            "Built {} for {}: {}/{} rows resolved, {} recalculated",
            statement,
            period,
            draft.rows().iter().filter(|r| r.is_resolved()).count(),
            draft.len(),
            log.len()
        );

        Ok((draft, log))
    }

    fn check_loaded(&self, statement: StatementType) -> Result<()> {
        if self.data.trees.is_empty() {
            return Err(NormalizationError::TaxonomyNotLoaded(
                self.data.taxonomy.to_string(),
            ));
        }
        if !self.data.labels.has_statement(statement) {
            return Err(NormalizationError::MissingLabels {
                taxonomy: self.data.taxonomy.to_string(),
                statement: statement.to_string(),
            });
        }
        Ok(())
    }

    /// Label selection for one period, before any adjustment.
    fn select(&self, statement: StatementType, facts: &NormalizedFacts, period: Period) -> StatementDraft {
        let layout = statement.layout();
        let values = facts.values_for(period);
        if values.is_empty() {
            debug!("No facts for {} in {}", statement, period);
            return StatementDraft::unresolved(statement, period);
        }

        let resolved = resolve_all(&self.data.trees, &values, Some(period));
        let selector = LabelSelector::new(
            &self.data.labels,
            self.config.tolerance(self.data.taxonomy),
        );
        let candidates =
            selector.candidates(statement, &resolved, layout.line_items, layout.period_types);

        selector.select(statement, period, &candidates, layout.line_items)
    }

    /// The fiscal year's closing quarter is rarely filed on its own, so it is the annual
    /// figure minus the three quarters before it. Cash positions are carried over instead.
    fn annual_remainder(
        &self,
        statement: StatementType,
        facts: &NormalizedFacts,
        period: Period,
    ) -> StatementDraft {
        let Period::Quarter { year, quarter } = period else {
            return self.select(statement, facts, period);
        };

        let fiscal_year = year - facts.alignment().year_offset;
        let annual = self.select(statement, facts, Period::Year(fiscal_year));
        let earlier: Vec<StatementDraft> = previous_quarters(year, quarter, 3)
            .into_iter()
            .map(|(y, q)| self.select(statement, facts, Period::Quarter { year: y, quarter: q }))
            .collect();

        let mut draft = StatementDraft::unresolved(statement, period);
        for row in annual.rows().iter().filter(|r| r.is_resolved()) {
            let reported: f64 = earlier.iter().filter_map(|d| d.value(&row.line_item)).sum();
            draft.set(
                &row.line_item,
                row.value - reported,
                row.confidence,
                RowOrigin::AnnualRemainder,
            );
        }

        if let Some(cash) = statement.layout().cash_positions {
            match earlier.first().and_then(|d| d.get(cash.closing)) {
                Some(prior) if prior.is_resolved() => {
                    draft.set(cash.opening, prior.value, prior.confidence, RowOrigin::AnnualRemainder);
                }
                _ => {
                    draft.set(cash.opening, 0.0, 0.0, RowOrigin::Unresolved);
                }
            }
            match annual.get(cash.closing) {
                Some(closing) if closing.is_resolved() => {
                    draft.set(cash.closing, closing.value, closing.confidence, RowOrigin::AnnualRemainder);
                }
                _ => {
                    draft.set(cash.closing, 0.0, 0.0, RowOrigin::Unresolved);
                }
            }
        }

        debug!(
            "Derived {} {} from fiscal year {} less three quarters",
            statement, period, fiscal_year
        );

        draft
    }

    fn apply_confidence_boosts(&self, draft: &mut StatementDraft) {
        if !self.config.apply_confidence_boosts {
            return;
        }
        for &(line_item, boost) in draft.statement.layout().confidence_boosts {
            if let Some(row) = draft.get_mut(line_item) {
                if row.confidence != 0.0 {
                    row.confidence += boost;
                }
            }
        }
    }

    /// Income and cash flow sum the four quarters ending at `as_of`; cash positions take the
    /// oldest opening and the newest closing. The balance sheet is the `as_of` quarter.
    pub fn trailing_twelve_months(
        &self,
        statement: StatementType,
        facts: &NormalizedFacts,
        as_of: Period,
    ) -> Result<StatementDraft> {
        let Period::Quarter { year, quarter } = as_of else {
            return Err(NormalizationError::DateError(format!(
                "trailing twelve months need a quarter, got {}",
                as_of
            )));
        };

        if statement == StatementType::Balance {
            let mut draft = self.build_statement(statement, facts, as_of)?;
            draft.trailing_twelve_months = true;
            return Ok(draft);
        }

        let mut quarters = vec![(year, quarter)];
        quarters.extend(previous_quarters(year, quarter, 3));
        let drafts = quarters
            .into_iter()
            .map(|(y, q)| self.build_statement(statement, facts, Period::Quarter { year: y, quarter: q }))
            .collect::<Result<Vec<_>>>()?;

        let layout = statement.layout();
        let mut ttm = StatementDraft::unresolved(statement, as_of);
        ttm.trailing_twelve_months = true;

        for &line_item in layout.line_items {
            let rows: Vec<&StatementRow> = drafts.iter().filter_map(|d| d.get(line_item)).collect();
            if !rows.iter().any(|r| r.is_resolved()) {
                continue;
            }
            let value = rows.iter().map(|r| r.value).sum();
            let confidence = rows.iter().map(|r| r.confidence).fold(f64::INFINITY, f64::min);
            ttm.set(line_item, value, confidence, RowOrigin::Summed);
        }

        if let (Some(cash), Some(newest), Some(oldest)) =
            (layout.cash_positions, drafts.first(), drafts.last())
        {
            for (line_item, source) in [(cash.opening, oldest), (cash.closing, newest)] {
                match source.get(line_item) {
                    Some(row) => ttm.set(line_item, row.value, row.confidence, row.origin),
                    None => ttm.set(line_item, 0.0, 0.0, RowOrigin::Unresolved),
                };
            }

            let opening = ttm.get(cash.opening).cloned();
            let closing = ttm.get(cash.closing).cloned();
            if let (Some(opening), Some(closing)) = (opening, closing) {
                if opening.is_resolved() && closing.is_resolved() {
                    ttm.set(
                        cash.change,
                        closing.value - opening.value,
                        opening.confidence.min(closing.confidence),
                        RowOrigin::Summed,
                    );
                }
            }
        }

        Ok(ttm)
    }

    /// Builds every period from `end_year` back to `start_year` on the rayon pool.
    pub fn build_statement_range(
        &self,
        statement: StatementType,
        facts: &NormalizedFacts,
        start_year: i32,
        end_year: i32,
        quarterly: bool,
    ) -> Result<StatementTable> {
        if start_year > end_year {
            return Err(NormalizationError::DateError(format!(
                "start year {} is after end year {}",
                start_year, end_year
            )));
        }

        let periods: Vec<Period> = (start_year..=end_year)
            .rev()
            .flat_map(|year| {
                if quarterly {
                    (1..=4u8)
                        .rev()
                        .map(|quarter| Period::Quarter { year, quarter })
                        .collect::<Vec<_>>()
                } else {
                    vec![Period::Year(year)]
                }
            })
            .collect();

        let drafts = periods
            .par_iter()
            .map(|&period| self.build_statement(statement, facts, period))
            .collect::<Result<Vec<_>>>()?;

        Ok(StatementTable::from_drafts(statement, drafts))
    }
}

/// Fills the share-count row from share-unit facts, falling back to the prior quarter's
/// balance date when the period's own date has no count.
fn attach_shares_outstanding(draft: &mut StatementDraft, facts: &NormalizedFacts) {
    let (duration, instant) = facts.frames_for(draft.period);
    let prior = match instant.quarter {
        Some(q) => {
            let (year, quarter) = previous_quarter(instant.year, q);
            Frame::instant(year, quarter)
        }
        None => instant,
    };

    for tag in SHARE_COUNT_TAGS {
        for frame in [instant, prior, duration] {
            if let Some(shares) = facts.value_at(tag, frame, Some(&Unit::Shares)) {
                draft.set(SHARES_OUTSTANDING, shares, SUPPLEMENTED_CONFIDENCE, RowOrigin::Supplemented);
                return;
            }
        }
    }
}

/// Builds one statement with the default configuration.
pub fn build_statement(
    data: &TaxonomyData,
    statement: StatementType,
    facts: &EntityFacts,
    period: Period,
) -> Result<StatementDraft> {
    let config = EngineConfig::default();
    StatementEngine::new(data, &config)?.build_statement(statement, &facts.facts, period)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entity_id: String,
    pub statement: StatementType,
    pub period: Period,
    pub trailing_twelve_months: bool,
}

impl CacheKey {
    pub fn new(entity_id: &str, statement: StatementType, period: Period) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            statement,
            period,
            trailing_twelve_months: false,
        }
    }

    pub fn trailing(mut self) -> Self {
        self.trailing_twelve_months = true;
        self
    }
}

/// Memoized drafts. Entries are immutable once inserted and shared as `Arc`s.
#[derive(Debug, Default)]
pub struct StatementCache {
    entries: RwLock<HashMap<CacheKey, Arc<StatementDraft>>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Result<Option<Arc<StatementDraft>>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| NormalizationError::LockPoisoned(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    pub fn get_or_try_insert_with<F>(&self, key: CacheKey, build: F) -> Result<Arc<StatementDraft>>
    where
        F: FnOnce() -> Result<StatementDraft>,
    {
        if let Some(draft) = self.get(&key)? {
            return Ok(draft);
        }

        let draft = Arc::new(build()?);
        let mut entries = self
            .entries
            .write()
            .map_err(|e| NormalizationError::LockPoisoned(e.to_string()))?;
        Ok(Arc::clone(entries.entry(key).or_insert(draft)))
    }

    /// Entry count. A poisoned lock reads as empty here; `get` and the insert path report
    /// it as [`NormalizationError::LockPoisoned`].
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<()> {
        self.entries
            .write()
            .map_err(|e| NormalizationError::LockPoisoned(e.to_string()))?
            .clear();
        Ok(())
    }
}
