//! Period normalization: frame back-filling, quarter-over-quarter deltas and fiscal alignment.
//!
//! Filers report most duration facts cumulatively (Q1, first half, nine months, full
//! year, all sharing one start date). The normalizer isolates each quarter's
//! contribution and gives every fact a calendar [`Frame`] so facts from different fiscal
//! calendars line up on one period axis.

use crate::schema::{Fact, Frame, Period, PeriodType, Unit};
use crate::utils::{calendar_quarter, is_annual_length, is_quarter_length, is_year_to_date_length};
use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, HashMap};

/// Tag → value mapping for one target period, as consumed by the value resolver.
pub type FactValues = HashMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FrameOrigin {
    /// The filing API supplied the frame.
    Reported,
    /// Copied from a sibling fact with the same start and end.
    MatchedPeriod,
    /// Copied from a sibling fact sharing only the end date.
    MatchedEnd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedFact {
    pub fact: Fact,
    pub frame: Frame,
    pub frame_origin: FrameOrigin,
    /// Isolated single-quarter contribution. `None` when the delta is zero, which is
    /// treated as "not reported" rather than a reported zero.
    pub quarter_value: Option<f64>,
}

impl NormalizedFact {
    pub fn period_type(&self) -> PeriodType {
        self.fact.period_type()
    }

    fn selection_key(&self) -> (FrameOrigin, bool, bool, i64, Reverse<NaiveDate>) {
        (
            self.frame_origin,
            !self.fact.unit.is_currency(),
            self.fact.is_instant(),
            self.fact.duration_days().unwrap_or(0),
            Reverse(self.fact.end),
        )
    }

    /// Deterministic preference between two facts for the same tag in the same frame.
    fn preferred_over(&self, other: &NormalizedFact) -> bool {
        match self.selection_key().cmp(&other.selection_key()) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.fact.value.total_cmp(&other.fact.value) == Ordering::Less,
        }
    }
}

/// How the filer's fiscal year sits on the calendar axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalAlignment {
    /// Calendar quarter (1-4) containing the fiscal-year end.
    pub annual_quarter: u8,
    /// Calendar year of the fiscal-year end minus the year of its annual frame.
    pub year_offset: i32,
    /// True when no FY-tagged fact was found and calendar alignment was assumed.
    pub defaulted: bool,
}

impl Default for FiscalAlignment {
    fn default() -> Self {
        Self {
            annual_quarter: 4,
            year_offset: 0,
            defaulted: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedFacts {
    facts: Vec<NormalizedFact>,
    alignment: FiscalAlignment,
    unresolved: usize,
}

impl NormalizedFacts {
    pub fn facts(&self) -> &[NormalizedFact] {
        &self.facts
    }

    pub fn alignment(&self) -> FiscalAlignment {
        self.alignment
    }

    /// Number of facts dropped because no frame could be back-filled.
    pub fn unresolved_count(&self) -> usize {
        self.unresolved
    }

    /// Duration and instant frames that make up `period`.
    pub fn frames_for(&self, period: Period) -> (Frame, Frame) {
        match period {
            Period::Year(year) => (
                Frame::annual(year),
                Frame::instant(
                    year + self.alignment.year_offset,
                    self.alignment.annual_quarter,
                ),
            ),
            Period::Quarter { year, quarter } => {
                (Frame::quarterly(year, quarter), Frame::instant(year, quarter))
            }
        }
    }

    /// Whether `period` is the quarter that closes the filer's fiscal year.
    pub fn is_annual_quarter(&self, period: Period) -> bool {
        matches!(period, Period::Quarter { quarter, .. } if quarter == self.alignment.annual_quarter)
    }

    /// Tag → value for every tag reported in `period`.
    ///
    /// Duration facts contribute their isolated quarter value for quarterly periods and
    /// their raw value for annual periods; instant facts always contribute the raw value.
    pub fn values_for(&self, period: Period) -> FactValues {
        let (duration, instant) = self.frames_for(period);
        let mut chosen: HashMap<&str, &NormalizedFact> = HashMap::new();

        for fact in &self.facts {
            if fact.frame != duration && fact.frame != instant {
                continue;
            }
            if Self::period_value(fact, period).is_none() {
                continue;
            }
            let replace = chosen
                .get(fact.fact.tag.as_str())
                .map_or(true, |current| fact.preferred_over(current));
            if replace {
                chosen.insert(fact.fact.tag.as_str(), fact);
            }
        }

        chosen
            .into_iter()
            .filter_map(|(tag, fact)| Self::period_value(fact, period).map(|v| (tag.to_string(), v)))
            .collect()
    }

    /// Best value reported for `tag` in exactly `frame`, restricted to `unit` when given.
    pub fn value_at(&self, tag: &str, frame: Frame, unit: Option<&Unit>) -> Option<f64> {
        let mut best: Option<&NormalizedFact> = None;
        for fact in &self.facts {
            if fact.fact.tag != tag || fact.frame != frame {
                continue;
            }
            if unit.is_some_and(|u| *u != fact.fact.unit) {
                continue;
            }
            if best.map_or(true, |current| fact.preferred_over(current)) {
                best = Some(fact);
            }
        }
        best.map(|fact| fact.fact.value)
    }

    fn period_value(fact: &NormalizedFact, period: Period) -> Option<f64> {
        match (fact.period_type(), period) {
            (PeriodType::Instant, _) => Some(fact.fact.value),
            (PeriodType::Duration, Period::Year(_)) => Some(fact.fact.value),
            (PeriodType::Duration, Period::Quarter { .. }) => fact.quarter_value,
        }
    }
}

type PeriodKey = (Option<NaiveDate>, NaiveDate);

pub struct PeriodNormalizer;

impl PeriodNormalizer {
    pub fn normalize(facts: &[Fact]) -> NormalizedFacts {
        let facts = Self::deduplicate(facts);
        let quarter_values = Self::derive_quarter_values(&facts);
        let frames = Self::backfill_frames(&facts);

        let mut normalized = Vec::with_capacity(facts.len());
        let mut unresolved = 0;

        for ((fact, quarter_value), frame) in facts.into_iter().zip(quarter_values).zip(frames) {
            match frame {
                Some((frame, frame_origin)) => normalized.push(NormalizedFact {
                    fact,
                    frame,
                    frame_origin,
                    quarter_value,
                }),
                None => unresolved += 1,
            }
        }

        if unresolved > 0 {
            warn!(
                "{} facts have no frame and no sibling to borrow one from; they are excluded",
                unresolved
            );
        }

        let alignment = Self::fiscal_alignment(&normalized);
        debug!(
            "Normalized {} facts (annual quarter Q{}, fiscal year offset {})",
            normalized.len(),
            alignment.annual_quarter,
            alignment.year_offset
        );

        NormalizedFacts {
            facts: normalized,
            alignment,
            unresolved,
        }
    }

    /// Keeps the last occurrence of each (tag, unit, start, end); later filings restate earlier ones.
    fn deduplicate(facts: &[Fact]) -> Vec<Fact> {
        let mut positions: HashMap<(&str, &Unit, Option<NaiveDate>, NaiveDate), usize> =
            HashMap::new();
        let mut unique: Vec<Fact> = Vec::with_capacity(facts.len());

        for fact in facts {
            let key = (fact.tag.as_str(), &fact.unit, fact.start, fact.end);
            match positions.get(&key) {
                Some(&idx) => unique[idx] = fact.clone(),
                None => {
                    positions.insert(key, unique.len());
                    unique.push(fact.clone());
                }
            }
        }

        unique
    }

    /// Quarter value per fact, index-aligned with `facts`.
    pub fn derive_quarter_values(facts: &[Fact]) -> Vec<Option<f64>> {
        let mut result: Vec<Option<f64>> = vec![None; facts.len()];
        let mut groups: BTreeMap<(&str, &Unit, NaiveDate), Vec<usize>> = BTreeMap::new();

        for (idx, fact) in facts.iter().enumerate() {
            match fact.start {
                None => result[idx] = Some(fact.value),
                Some(start) => groups
                    .entry((fact.tag.as_str(), &fact.unit, start))
                    .or_default()
                    .push(idx),
            }
        }

        let mut zero_deltas = 0;
        for (_, mut members) in groups {
            members.sort_by_key(|&idx| facts[idx].end);

            let mut previous: Option<f64> = None;
            for idx in members {
                let value = facts[idx].value;
                let delta = match previous {
                    Some(prior) => value - prior,
                    None => value,
                };
                previous = Some(value);

                if delta == 0.0 {
                    zero_deltas += 1;
                    continue;
                }
                result[idx] = Some(delta);
            }
        }

        if zero_deltas > 0 {
            debug!("{} duration facts carry a zero quarter delta", zero_deltas);
        }

        result
    }

    /// Frame per fact, index-aligned with `facts`. Exact (start, end) siblings win over end-only ones.
    fn backfill_frames(facts: &[Fact]) -> Vec<Option<(Frame, FrameOrigin)>> {
        let mut by_period: HashMap<PeriodKey, BTreeMap<Frame, usize>> = HashMap::new();
        let mut by_end: HashMap<NaiveDate, BTreeMap<Frame, usize>> = HashMap::new();

        for fact in facts {
            if let Some(frame) = fact.frame {
                let frame = frame.with_instant(false);
                *by_period
                    .entry((fact.start, fact.end))
                    .or_default()
                    .entry(frame)
                    .or_default() += 1;
                *by_end.entry(fact.end).or_default().entry(frame).or_default() += 1;
            }
        }

        let mut backfilled = 0;
        let frames = facts
            .iter()
            .map(|fact| {
                if let Some(frame) = fact.frame {
                    return Some((frame, FrameOrigin::Reported));
                }

                let fits = |frame: &Frame| frame_fits(fact, frame);
                let borrowed = by_period
                    .get(&(fact.start, fact.end))
                    .and_then(|counts| dominant_frame(counts, fits))
                    .map(|frame| (frame, FrameOrigin::MatchedPeriod))
                    .or_else(|| {
                        by_end
                            .get(&fact.end)
                            .and_then(|counts| dominant_frame(counts, fits))
                            .map(|frame| (frame, FrameOrigin::MatchedEnd))
                    })?;

                backfilled += 1;
                Some((fit_frame(fact, borrowed.0), borrowed.1))
            })
            .collect();

        debug!("Back-filled frames for {} facts", backfilled);
        frames
    }

    fn fiscal_alignment(facts: &[NormalizedFact]) -> FiscalAlignment {
        let fiscal_year_facts = || {
            facts.iter().filter(|f| {
                f.frame_origin == FrameOrigin::Reported
                    && f.fact.form.reports_fiscal_year()
                    && f.fact.is_fiscal_year()
            })
        };

        let mut quarter_counts: BTreeMap<u8, usize> = BTreeMap::new();
        for fact in fiscal_year_facts().filter(|f| f.frame.instant) {
            if let Some(q) = fact.frame.quarter {
                *quarter_counts.entry(q).or_default() += 1;
            }
        }

        let mut annual_quarter: Option<(u8, usize)> = None;
        for (&quarter, &count) in &quarter_counts {
            if annual_quarter.map_or(true, |(_, best)| count > best) {
                annual_quarter = Some((quarter, count));
            }
        }

        let Some((annual_quarter, _)) = annual_quarter else {
            warn!("No FY-tagged instant fact found; assuming the fiscal year matches the calendar year");
            return FiscalAlignment::default();
        };

        let year_offset = fiscal_year_facts()
            .filter(|f| !f.frame.instant && f.frame.quarter.is_none())
            .max_by_key(|f| f.fact.end)
            .map(|f| f.fact.end.year() - f.frame.year)
            .unwrap_or(0);

        FiscalAlignment {
            annual_quarter,
            year_offset,
            defaulted: false,
        }
    }
}

/// Most common frame accepted by `fits`; ties go to the smallest frame so the choice never
/// depends on input order.
fn dominant_frame(counts: &BTreeMap<Frame, usize>, fits: impl Fn(&Frame) -> bool) -> Option<Frame> {
    let mut best: Option<(Frame, usize)> = None;
    for (&frame, &count) in counts.iter().filter(|(frame, _)| fits(*frame)) {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((frame, count));
        }
    }
    best.map(|(frame, _)| frame)
}

/// Whether a sibling's frame describes a span as long as the fact's own.
///
/// Annual spans take annual frames. Quarters and year-to-date spans take quarter frames,
/// the latter isolated later through their quarter value. Stub periods take neither.
fn frame_fits(fact: &Fact, frame: &Frame) -> bool {
    match fact.duration_days() {
        None => true,
        Some(days) if is_annual_length(days) => frame.quarter.is_none(),
        Some(days) if is_quarter_length(days) || is_year_to_date_length(days) => {
            frame.quarter.is_some()
        }
        Some(_) => false,
    }
}

/// Adapts a borrowed frame to the borrowing fact's own kind.
fn fit_frame(fact: &Fact, borrowed: Frame) -> Frame {
    if !fact.is_instant() {
        return borrowed.with_instant(false);
    }
    match borrowed.quarter {
        Some(_) => borrowed.with_instant(true),
        None => Frame::instant(fact.end.year(), calendar_quarter(fact.end)),
    }
}
