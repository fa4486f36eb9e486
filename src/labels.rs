use crate::error::Result;
use crate::schema::{PeriodType, Period, StatementType};
use crate::statement::{RowOrigin, StatementDraft, StatementRow};
use crate::tree::{CanonicalForest, Resolution};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// One historical mapping from a source tag to a canonical line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LabelEntry {
    #[serde(alias = "code")]
    #[schemars(description = "Taxonomy element name, matching a canonical tree node code")]
    pub source_code: String,

    #[serde(alias = "yf")]
    #[schemars(description = "Canonical line item the element feeds, e.g. 'Gross Profit'")]
    pub line_item: String,

    #[serde(alias = "type")]
    pub statement: StatementType,

    #[serde(alias = "prob")]
    #[schemars(
        description = "Historical co-occurrence weight. Not a probability: may exceed 1 and is summed across agreeing tags."
    )]
    pub confidence: f64,

    #[serde(default, alias = "count")]
    #[schemars(description = "How many historical filings exhibited this mapping")]
    pub occurrences: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    by_code: HashMap<String, Vec<LabelEntry>>,
    statements: BTreeSet<StatementType>,
}

impl LabelTable {
    /// Builds a table, discarding mappings seen fewer than `min_occurrences` times.
    /// Entries without an occurrence count are kept.
    pub fn from_entries(entries: Vec<LabelEntry>, min_occurrences: u32) -> Self {
        let mut table = Self::default();
        let mut discarded = 0;

        for entry in entries {
            if entry.occurrences.is_some_and(|n| n < min_occurrences) {
                discarded += 1;
                continue;
            }

            let rows = table.by_code.entry(entry.source_code.clone()).or_default();
            let duplicate = rows
                .iter()
                .any(|r| r.line_item == entry.line_item && r.statement == entry.statement);
            if duplicate {
                continue;
            }

            table.statements.insert(entry.statement);
            rows.push(entry);
        }

        if discarded > 0 {
            debug!(
                "Discarded {} label rows observed fewer than {} times",
                discarded, min_occurrences
            );
        }

        table
    }

    pub fn from_json_str(json: &str, min_occurrences: u32) -> Result<Self> {
        let entries: Vec<LabelEntry> = serde_json::from_str(json)?;
        Ok(Self::from_entries(entries, min_occurrences))
    }

    pub fn has_statement(&self, statement: StatementType) -> bool {
        self.statements.contains(&statement)
    }

    pub fn len(&self) -> usize {
        self.by_code.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    pub fn entries_for<'a>(
        &'a self,
        source_code: &str,
        statement: StatementType,
    ) -> impl Iterator<Item = &'a LabelEntry> + 'a {
        self.by_code
            .get(source_code)
            .into_iter()
            .flatten()
            .filter(move |e| e.statement == statement)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemCandidate {
    pub line_item: String,
    pub source_code: String,
    pub value: f64,
    pub confidence: f64,
}

/// Picks one value per canonical line item from every resolved tree node.
///
/// Candidates with identical `(line_item, value)` pool their confidence. The winner per
/// line item is the highest pooled confidence; ties go to the lexically smallest source
/// code, then to the smaller value.
pub struct LabelSelector<'a> {
    labels: &'a LabelTable,
    tolerance: f64,
}

impl<'a> LabelSelector<'a> {
    pub fn new(labels: &'a LabelTable, tolerance: f64) -> Self {
        Self { labels, tolerance }
    }

    /// Joins resolved nodes to the label table, keeping only `line_items` and nodes whose
    /// period type is accepted (nodes without a period type are accepted).
    pub fn candidates(
        &self,
        statement: StatementType,
        resolved: &[(&CanonicalForest, Resolution)],
        line_items: &[&str],
        period_types: &[PeriodType],
    ) -> Vec<LineItemCandidate> {
        let wanted: HashSet<&str> = line_items.iter().copied().collect();
        let mut seen: HashSet<(&str, u64)> = HashSet::new();
        let mut candidates = Vec::new();

        for (forest, resolution) in resolved {
            for id in forest.ids() {
                let Some(value) = resolution.value(id) else {
                    continue;
                };
                let node = forest.node(id);
                if node
                    .period_type
                    .is_some_and(|pt| !period_types.contains(&pt))
                {
                    continue;
                }
                // the same code may sit in several hierarchies
                if !seen.insert((node.code.as_str(), value_key(value))) {
                    continue;
                }

                for entry in self.labels.entries_for(&node.code, statement) {
                    if wanted.contains(entry.line_item.as_str()) {
                        candidates.push(LineItemCandidate {
                            line_item: entry.line_item.clone(),
                            source_code: node.code.clone(),
                            value,
                            confidence: entry.confidence,
                        });
                    }
                }
            }
        }

        candidates
    }

    pub fn select(
        &self,
        statement: StatementType,
        period: Period,
        candidates: &[LineItemCandidate],
        line_items: &[&str],
    ) -> StatementDraft {
        // (line_item, value) -> (pooled confidence, smallest source code, value)
        let mut pooled: BTreeMap<(&str, u64), (f64, &str, f64)> = BTreeMap::new();
        for candidate in candidates {
            let key = (candidate.line_item.as_str(), value_key(candidate.value));
            let slot = pooled
                .entry(key)
                .or_insert((0.0, candidate.source_code.as_str(), candidate.value));
            slot.0 += candidate.confidence;
            if candidate.source_code.as_str() < slot.1 {
                slot.1 = candidate.source_code.as_str();
            }
        }

        let mut best: HashMap<&str, (f64, &str, f64)> = HashMap::new();
        for ((line_item, _), group) in pooled {
            let replace = match best.get(line_item) {
                None => true,
                Some(current) => outranks(&group, current),
            };
            if replace {
                best.insert(line_item, group);
            }
        }

        let rows = line_items
            .iter()
            .map(|&line_item| match best.get(line_item) {
                Some(&(confidence, source, value)) if confidence >= self.tolerance => StatementRow {
                    line_item: line_item.to_string(),
                    value,
                    confidence,
                    source_code: Some(source.to_string()),
                    origin: RowOrigin::Selected,
                },
                Some(&(confidence, _, _)) => {
                    debug!(
                        "'{}' best confidence {} is below tolerance {}",
                        line_item, confidence, self.tolerance
                    );
                    StatementRow::unresolved(line_item)
                }
                None => StatementRow::unresolved(line_item),
            })
            .collect();

        StatementDraft::from_rows(statement, period, rows)
    }
}

fn outranks(candidate: &(f64, &str, f64), current: &(f64, &str, f64)) -> bool {
    candidate
        .0
        .total_cmp(&current.0)
        .then_with(|| current.1.cmp(candidate.1))
        .then_with(|| current.2.total_cmp(&candidate.2))
        .is_gt()
}

/// Hashable identity of a value; `-0.0` and `0.0` are the same value.
fn value_key(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ValueResolver;
    use crate::schema::Polarity;
    use crate::tree::NodeDefinition;

    fn entry(code: &str, line_item: &str, confidence: f64) -> LabelEntry {
        LabelEntry {
            source_code: code.to_string(),
            line_item: line_item.to_string(),
            statement: StatementType::Income,
            confidence,
            occurrences: Some(10),
        }
    }

    fn candidate(line_item: &str, code: &str, value: f64, confidence: f64) -> LineItemCandidate {
        LineItemCandidate {
            line_item: line_item.to_string(),
            source_code: code.to_string(),
            value,
            confidence,
        }
    }

    const ITEMS: [&str; 3] = ["Total Revenue", "Cost Of Revenue", "Gross Profit"];

    #[test]
    fn test_confidence_accumulates_for_identical_values() {
        let table = LabelTable::default();
        let selector = LabelSelector::new(&table, 0.4);
        let candidates = vec![
            candidate("Total Revenue", "Revenues", 100.0, 0.6),
            candidate("Total Revenue", "SalesRevenueNet", 100.0, 0.5),
            candidate("Total Revenue", "RevenueFromContractWithCustomer", 90.0, 0.9),
        ];

        let draft = selector.select(StatementType::Income, Period::Year(2023), &candidates, &ITEMS);
        let row = draft.get("Total Revenue").unwrap();
        assert_eq!(row.value, 100.0);
        assert!((row.confidence - 1.1).abs() < 1e-12);
        assert_eq!(row.source_code.as_deref(), Some("Revenues"));
    }

    #[test]
    fn test_ties_break_on_source_code_not_input_order() {
        let table = LabelTable::default();
        let selector = LabelSelector::new(&table, 0.0);

        let forward = vec![
            candidate("Gross Profit", "GrossProfit", 60.0, 1.0),
            candidate("Gross Profit", "AGrossMargin", 61.0, 1.0),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let a = selector.select(StatementType::Income, Period::Year(2023), &forward, &ITEMS);
        let b = selector.select(StatementType::Income, Period::Year(2023), &backward, &ITEMS);

        assert_eq!(a, b);
        assert_eq!(a.value("Gross Profit"), Some(61.0));
    }

    #[test]
    fn test_below_tolerance_is_unresolved_and_order_is_fixed() {
        let table = LabelTable::default();
        let selector = LabelSelector::new(&table, 0.4);
        let candidates = vec![
            candidate("Gross Profit", "GrossProfit", 60.0, 0.3),
            candidate("Total Revenue", "Revenues", 100.0, 2.0),
        ];

        let draft = selector.select(StatementType::Income, Period::Year(2023), &candidates, &ITEMS);
        let names: Vec<&str> = draft.rows().iter().map(|r| r.line_item.as_str()).collect();
        assert_eq!(names, ITEMS.to_vec());

        let gross = draft.get("Gross Profit").unwrap();
        assert_eq!(gross.value, 0.0);
        assert_eq!(gross.confidence, 0.0);
        assert_eq!(gross.origin, RowOrigin::Unresolved);
        assert_eq!(draft.get("Cost Of Revenue").unwrap().origin, RowOrigin::Unresolved);
    }

    #[test]
    fn test_min_occurrence_filter() {
        let mut rare = entry("Revenues", "Total Revenue", 0.9);
        rare.occurrences = Some(1);
        let mut unknown = entry("SalesRevenueNet", "Total Revenue", 0.9);
        unknown.occurrences = None;

        let table = LabelTable::from_entries(vec![rare, unknown], 2);
        assert_eq!(table.len(), 1);
        assert!(table.has_statement(StatementType::Income));
        assert!(!table.has_statement(StatementType::Balance));
    }

    #[test]
    fn test_legacy_column_names() {
        let json = r#"[{"code": "Revenues", "yf": "Total Revenue", "type": "income_statement", "prob": 0.8, "count": 12}]"#;
        let table = LabelTable::from_json_str(json, 2).unwrap();
        let rows: Vec<&LabelEntry> = table.entries_for("Revenues", StatementType::Income).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].line_item, "Total Revenue");
    }

    #[test]
    fn test_candidates_from_resolved_forest() {
        let defs = vec![NodeDefinition::new("GrossProfit", Polarity::Credit)
            .with_period_type(PeriodType::Duration)
            .with_children(vec![
                NodeDefinition::new("Revenues", Polarity::Credit).with_period_type(PeriodType::Duration),
                NodeDefinition::new("CostOfRevenue", Polarity::Debit).with_period_type(PeriodType::Instant),
            ])];
        let forest = CanonicalForest::from_definitions("income", &defs).unwrap();
        let facts = [("Revenues".to_string(), 100.0), ("CostOfRevenue".to_string(), 40.0)]
            .into_iter()
            .collect();
        let resolution = ValueResolver::new(&forest).resolve(&facts);

        let table = LabelTable::from_entries(
            vec![
                entry("GrossProfit", "Gross Profit", 1.0),
                entry("Revenues", "Total Revenue", 1.0),
                entry("CostOfRevenue", "Cost Of Revenue", 1.0),
                entry("Revenues", "Operating Revenue", 1.0),
            ],
            2,
        );
        let selector = LabelSelector::new(&table, 0.4);
        let candidates = selector.candidates(
            StatementType::Income,
            &[(&forest, resolution)],
            &ITEMS,
            &[PeriodType::Duration],
        );

        let items: Vec<&str> = candidates.iter().map(|c| c.line_item.as_str()).collect();
        assert_eq!(items, vec!["Gross Profit", "Total Revenue"]);
        assert_eq!(candidates[0].value, 60.0);
    }
}
