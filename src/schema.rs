use crate::error::{NormalizationError, Result};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    #[schemars(description = "Normal debit balance: assets, expenses, cash outflows")]
    Debit,

    #[schemars(description = "Normal credit balance: liabilities, equity, revenue")]
    Credit,
}

impl Polarity {
    /// +1 when the child shares the parent's polarity, -1 for a contra account.
    pub fn sign_within(self, parent: Polarity) -> f64 {
        if self == parent {
            1.0
        } else {
            -1.0
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    #[schemars(description = "Balance at a point in time (balance sheet items)")]
    Instant,

    #[schemars(description = "Activity over a period (income statement and cash flow items)")]
    Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    Shares,
    Currency(String),
}

impl Unit {
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("shares") {
            Unit::Shares
        } else {
            Unit::Currency(raw.to_string())
        }
    }

    /// Monetary units only; per-share ratios (`USD/shares`) and `pure` do not count.
    pub fn is_currency(&self) -> bool {
        match self {
            Unit::Shares => false,
            Unit::Currency(code) => !code.contains('/') && !code.eq_ignore_ascii_case("pure"),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Shares => write!(f, "shares"),
            Unit::Currency(code) => write!(f, "{}", code),
        }
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Unit::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
pub enum FormType {
    #[serde(rename = "10-K")]
    TenK,
    #[serde(rename = "10-Q")]
    TenQ,
    #[serde(rename = "8-K")]
    EightK,
    #[serde(rename = "20-F")]
    TwentyF,
    #[serde(rename = "40-F")]
    FortyF,
    #[serde(rename = "6-K")]
    SixK,
    #[serde(rename = "6-F")]
    SixF,
}

impl FormType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "10-K" => Some(FormType::TenK),
            "10-Q" => Some(FormType::TenQ),
            "8-K" => Some(FormType::EightK),
            "20-F" => Some(FormType::TwentyF),
            "40-F" => Some(FormType::FortyF),
            "6-K" => Some(FormType::SixK),
            "6-F" => Some(FormType::SixF),
            _ => None,
        }
    }

    /// Forms whose FY-tagged facts may be used to locate the fiscal-year end.
    pub fn reports_fiscal_year(self) -> bool {
        !matches!(self, FormType::TenQ)
    }
}

/// Calendar period label assigned by the filing API, e.g. `CY2023`, `CY2023Q2`, `CY2023Q2I`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Frame {
    pub year: i32,
    pub quarter: Option<u8>,
    pub instant: bool,
}

impl Frame {
    pub fn annual(year: i32) -> Self {
        Self {
            year,
            quarter: None,
            instant: false,
        }
    }

    pub fn quarterly(year: i32, quarter: u8) -> Self {
        Self {
            year,
            quarter: Some(quarter),
            instant: false,
        }
    }

    pub fn instant(year: i32, quarter: u8) -> Self {
        Self {
            year,
            quarter: Some(quarter),
            instant: true,
        }
    }

    pub fn with_instant(self, instant: bool) -> Self {
        Self { instant, ..self }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CY{}", self.year)?;
        if let Some(q) = self.quarter {
            write!(f, "Q{}", q)?;
        }
        if self.instant {
            write!(f, "I")?;
        }
        Ok(())
    }
}

impl FromStr for Frame {
    type Err = NormalizationError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || NormalizationError::InvalidFrame(raw.to_string());

        let body = raw.trim().strip_prefix("CY").ok_or_else(invalid)?;
        let (body, instant) = match body.strip_suffix('I') {
            Some(rest) => (rest, true),
            None => (body, false),
        };

        let (year_part, quarter) = match body.split_once('Q') {
            Some((year, q)) => {
                let q: u8 = q.parse().map_err(|_| invalid())?;
                if !(1..=4).contains(&q) {
                    return Err(invalid());
                }
                (year, Some(q))
            }
            None => (body, None),
        };

        if year_part.len() != 4 {
            return Err(invalid());
        }
        let year: i32 = year_part.parse().map_err(|_| invalid())?;

        if instant && quarter.is_none() {
            return Err(invalid());
        }

        Ok(Self {
            year,
            quarter,
            instant,
        })
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Canonical period a statement is built for: a calendar year or calendar-year quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    Year(i32),
    Quarter { year: i32, quarter: u8 },
}

impl Period {
    pub fn quarter(year: i32, quarter: u8) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(NormalizationError::DateError(format!(
                "Quarter {} is out of range 1-4",
                quarter
            )));
        }
        Ok(Period::Quarter { year, quarter })
    }

    pub fn year(&self) -> i32 {
        match self {
            Period::Year(year) => *year,
            Period::Quarter { year, .. } => *year,
        }
    }

    pub fn is_quarter(&self) -> bool {
        matches!(self, Period::Quarter { .. })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Year(year) => write!(f, "{}", year),
            Period::Quarter { year, quarter } => write!(f, "{}Q{}", year, quarter),
        }
    }
}

impl FromStr for Period {
    type Err = NormalizationError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || {
            NormalizationError::DateError(format!(
                "Invalid period '{}'. Expected 'YYYY' or 'YYYYQn'",
                raw
            ))
        };

        match raw.trim().split_once('Q') {
            Some((year, quarter)) => {
                let year: i32 = year.parse().map_err(|_| invalid())?;
                let quarter: u8 = quarter.parse().map_err(|_| invalid())?;
                Period::quarter(year, quarter)
            }
            None => raw.trim().parse().map(Period::Year).map_err(|_| invalid()),
        }
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
pub enum Taxonomy {
    #[serde(rename = "us-gaap")]
    UsGaap,
    #[serde(rename = "ifrs-full")]
    IfrsFull,
}

impl Taxonomy {
    pub const ALL: [Taxonomy; 2] = [Taxonomy::UsGaap, Taxonomy::IfrsFull];

    pub fn as_str(self) -> &'static str {
        match self {
            Taxonomy::UsGaap => "us-gaap",
            Taxonomy::IfrsFull => "ifrs-full",
        }
    }
}

impl fmt::Display for Taxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Taxonomy {
    type Err = NormalizationError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "us-gaap" => Ok(Taxonomy::UsGaap),
            "ifrs-full" => Ok(Taxonomy::IfrsFull),
            other => Err(NormalizationError::UnknownTaxonomy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
pub enum StatementType {
    #[serde(rename = "income_statement")]
    Income,
    #[serde(rename = "balance_sheet")]
    Balance,
    #[serde(rename = "cash_flow", alias = "cashflow")]
    CashFlow,
}

impl StatementType {
    pub const ALL: [StatementType; 3] = [
        StatementType::Income,
        StatementType::Balance,
        StatementType::CashFlow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatementType::Income => "income_statement",
            StatementType::Balance => "balance_sheet",
            StatementType::CashFlow => "cash_flow",
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Fact {
    #[schemars(description = "Taxonomy element name without prefix, e.g. 'Revenues' or 'NetIncomeLoss'")]
    pub tag: String,

    #[serde(default)]
    #[schemars(description = "Start of the reporting period. Absent for instant (point-in-time) facts.")]
    pub start: Option<NaiveDate>,

    #[schemars(description = "End of the reporting period, or the balance date for instant facts")]
    pub end: NaiveDate,

    pub value: f64,

    #[schemars(with = "String", description = "'shares' or an ISO currency code such as 'USD'")]
    pub unit: Unit,

    pub form: FormType,

    #[serde(default)]
    #[schemars(description = "Fiscal period of the filing the fact came from ('FY', 'Q1'..'Q3')")]
    pub fiscal_period: Option<String>,

    #[serde(default)]
    #[schemars(description = "Fiscal year of the filing the fact came from")]
    pub fiscal_year: Option<i32>,

    #[serde(default)]
    #[schemars(
        with = "Option<String>",
        description = "Calendar frame assigned by the filing API, e.g. 'CY2023Q2I'. Back-filled when absent."
    )]
    pub frame: Option<Frame>,
}

impl Fact {
    pub fn is_instant(&self) -> bool {
        self.start.is_none()
    }

    pub fn period_type(&self) -> PeriodType {
        if self.is_instant() {
            PeriodType::Instant
        } else {
            PeriodType::Duration
        }
    }

    pub fn duration_days(&self) -> Option<i64> {
        self.start.map(|start| (self.end - start).num_days())
    }

    pub fn is_fiscal_year(&self) -> bool {
        self.fiscal_period
            .as_deref()
            .map(|fp| fp.contains("FY"))
            .unwrap_or(false)
    }
}

/// All facts fetched for one reporting entity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FactSet {
    #[schemars(description = "Identifier of the reporting entity (e.g. a zero-padded CIK)")]
    pub entity_id: String,

    #[serde(default)]
    pub entity_name: Option<String>,

    #[schemars(description = "Reporting standard the facts are tagged with")]
    pub taxonomy: Taxonomy,

    pub facts: Vec<Fact>,
}

impl FactSet {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(FactSet)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
