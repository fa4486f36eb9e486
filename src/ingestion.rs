//! Conversion of SEC "company facts" documents into a [`FactSet`], and the fact store seam.

use crate::error::{NormalizationError, Result};
use crate::schema::{Fact, FactSet, FormType, Frame, Taxonomy, Unit};
use chrono::NaiveDate;
use log::{debug, info};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Cover-page concept carrying the latest share count.
pub const DEI_SHARES_OUTSTANDING: &str = "EntityCommonStockSharesOutstanding";

#[derive(Debug, Deserialize)]
struct CompanyFactsDocument {
    cik: u64,
    #[serde(rename = "entityName", default)]
    entity_name: Option<String>,
    #[serde(default)]
    facts: BTreeMap<String, BTreeMap<String, Concept>>,
}

#[derive(Debug, Deserialize)]
struct Concept {
    #[serde(default)]
    units: BTreeMap<String, Vec<RawEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    start: Option<NaiveDate>,
    end: NaiveDate,
    val: f64,
    #[serde(default)]
    fy: Option<i32>,
    #[serde(default)]
    fp: Option<String>,
    form: String,
    #[serde(default)]
    frame: Option<String>,
}

/// Parses a company-facts document.
///
/// The taxonomy is `us-gaap` when present, otherwise `ifrs-full`. Only facts in the main
/// currency (the monetary unit used by the most concepts) or in shares are kept, and only
/// from the periodic report forms listed in [`FormType`].
pub fn parse_company_facts(json: &str) -> Result<FactSet> {
    let document: CompanyFactsDocument = serde_json::from_str(json)?;

    let taxonomy = detect_taxonomy(&document.facts)?;
    let concepts = &document.facts[taxonomy.as_str()];
    let currency = main_currency(concepts);

    let mut facts = Vec::new();
    let mut skipped = 0usize;

    for (tag, concept) in concepts {
        for (unit_key, entries) in &concept.units {
            let unit = Unit::parse(unit_key);
            let keep = match &unit {
                Unit::Shares => true,
                Unit::Currency(code) => Some(code) == currency.as_ref(),
            };
            if !keep {
                skipped += entries.len();
                continue;
            }
            collect_entries(tag, &unit, entries, &mut facts, &mut skipped);
        }
    }

    if let Some(shares) = document
        .facts
        .get("dei")
        .and_then(|dei| dei.get(DEI_SHARES_OUTSTANDING))
        .and_then(|concept| concept.units.get("shares"))
    {
        collect_entries(DEI_SHARES_OUTSTANDING, &Unit::Shares, shares, &mut facts, &mut skipped);
    }

    let entity_id = format!("{:010}", document.cik);
    info!(
        "Parsed {} {} facts for entity {} (main currency {}, {} entries skipped)",
        facts.len(),
        taxonomy,
        entity_id,
        currency.as_deref().unwrap_or("none"),
        skipped
    );

    Ok(FactSet {
        entity_id,
        entity_name: document.entity_name,
        taxonomy,
        facts,
    })
}

fn detect_taxonomy(facts: &BTreeMap<String, BTreeMap<String, Concept>>) -> Result<Taxonomy> {
    Taxonomy::ALL
        .into_iter()
        .find(|t| facts.contains_key(t.as_str()))
        .ok_or_else(|| {
            let found: Vec<&str> = facts.keys().map(String::as_str).collect();
            NormalizationError::UnknownTaxonomy(format!(
                "no supported taxonomy among [{}]",
                found.join(", ")
            ))
        })
}

/// Currency unit reported by the most concepts; ties go to the smaller code.
fn main_currency(concepts: &BTreeMap<String, Concept>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for concept in concepts.values() {
        for unit_key in concept.units.keys() {
            if Unit::parse(unit_key).is_currency() {
                *counts.entry(unit_key.as_str()).or_default() += 1;
            }
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (unit, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((unit, count));
        }
    }
    best.map(|(unit, _)| unit.to_string())
}

fn collect_entries(
    tag: &str,
    unit: &Unit,
    entries: &[RawEntry],
    facts: &mut Vec<Fact>,
    skipped: &mut usize,
) {
    for entry in entries {
        let Some(form) = FormType::parse(&entry.form) else {
            *skipped += 1;
            continue;
        };

        let frame = entry.frame.as_deref().and_then(|raw| match raw.parse::<Frame>() {
            Ok(frame) => Some(frame),
            Err(e) => {
                debug!("Ignoring frame on {}: {}", tag, e);
                None
            }
        });

        facts.push(Fact {
            tag: tag.to_string(),
            start: entry.start,
            end: entry.end,
            value: entry.val,
            unit: unit.clone(),
            form,
            fiscal_period: entry.fp.clone(),
            fiscal_year: entry.fy,
            frame,
        });
    }
}

/// Supplies already-fetched facts for an entity.
pub trait FactStore: Send + Sync {
    fn get_facts(&self, entity_id: &str) -> Result<FactSet>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryFactStore {
    sets: HashMap<String, FactSet>,
}

impl InMemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, facts: FactSet) {
        self.sets.insert(facts.entity_id.clone(), facts);
    }

    pub fn insert_company_facts(&mut self, json: &str) -> Result<String> {
        let facts = parse_company_facts(json)?;
        let entity_id = facts.entity_id.clone();
        self.insert(facts);
        Ok(entity_id)
    }
}

impl FactStore for InMemoryFactStore {
    fn get_facts(&self, entity_id: &str) -> Result<FactSet> {
        self.sets
            .get(entity_id)
            .cloned()
            .ok_or_else(|| NormalizationError::UnknownEntity(entity_id.to_string()))
    }
}
