//! Statement drafts, the fixed layout of each statement type, and rendering.

use crate::error::Result;
use crate::schema::{Period, PeriodType, StatementType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowOrigin {
    /// Chosen by the label selector.
    Selected,
    /// No candidate cleared the tolerance; value and confidence are 0.
    Unresolved,
    /// Recalculated from an accounting identity.
    Triangulated,
    /// Fiscal-year total minus the three preceding quarters.
    AnnualRemainder,
    /// Sum over the quarters of a trailing twelve month window.
    Summed,
    /// Read straight from a share-count fact.
    Supplemented,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRow {
    pub line_item: String,
    pub value: f64,
    pub confidence: f64,
    /// Tag the value came from, when it came from a single tag.
    pub source_code: Option<String>,
    pub origin: RowOrigin,
}

impl StatementRow {
    pub fn unresolved(line_item: &str) -> Self {
        Self {
            line_item: line_item.to_string(),
            value: 0.0,
            confidence: 0.0,
            source_code: None,
            origin: RowOrigin::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.origin != RowOrigin::Unresolved
    }
}

/// Ordered line item → (value, confidence) rows for one statement and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementDraft {
    pub statement: StatementType,
    pub period: Period,
    /// Set when the draft covers the four quarters ending at `period`.
    #[serde(default)]
    pub trailing_twelve_months: bool,
    rows: Vec<StatementRow>,
}

impl StatementDraft {
    pub fn from_rows(statement: StatementType, period: Period, rows: Vec<StatementRow>) -> Self {
        Self {
            statement,
            period,
            trailing_twelve_months: false,
            rows,
        }
    }

    /// A draft with every line item of the layout unresolved.
    pub fn unresolved(statement: StatementType, period: Period) -> Self {
        let rows = statement
            .layout()
            .line_items
            .iter()
            .map(|item| StatementRow::unresolved(item))
            .collect();
        Self::from_rows(statement, period, rows)
    }

    pub fn rows(&self) -> &[StatementRow] {
        &self.rows
    }

    pub fn line_items(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.line_item.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, line_item: &str) -> Option<&StatementRow> {
        self.rows.iter().find(|r| r.line_item == line_item)
    }

    pub fn get_mut(&mut self, line_item: &str) -> Option<&mut StatementRow> {
        self.rows.iter_mut().find(|r| r.line_item == line_item)
    }

    pub fn value(&self, line_item: &str) -> Option<f64> {
        self.get(line_item).map(|r| r.value)
    }

    pub fn confidence(&self, line_item: &str) -> Option<f64> {
        self.get(line_item).map(|r| r.confidence)
    }

    /// Overwrites an existing row. Returns false if the line item is not in the draft.
    pub fn set(&mut self, line_item: &str, value: f64, confidence: f64, origin: RowOrigin) -> bool {
        match self.get_mut(line_item) {
            Some(row) => {
                row.value = value;
                row.confidence = confidence;
                row.origin = origin;
                if origin != RowOrigin::Selected {
                    row.source_code = None;
                }
                true
            }
            None => false,
        }
    }

    /// Every row zero, ignoring rows taken verbatim from share-count facts.
    pub fn is_blank(&self) -> bool {
        self.rows
            .iter()
            .filter(|r| r.origin != RowOrigin::Supplemented)
            .all(|r| r.value == 0.0)
    }

    pub fn column_label(&self) -> String {
        if self.trailing_twelve_months {
            format!("TTM {}", self.period)
        } else {
            self.period.to_string()
        }
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        output.push_str("Line Item,Value,Confidence,Origin,Source\n");

        for row in &self.rows {
            output.push_str(&format!(
                "{},{},{},{:?},{}\n",
                row.line_item,
                row.value,
                row.confidence,
                row.origin,
                row.source_code.as_deref().unwrap_or("")
            ));
        }

        output
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "# {} - {}\n\n",
            statement_title(self.statement),
            self.column_label()
        ));
        output.push_str("| Line Item | Value | Confidence |\n");
        output.push_str("|---|---:|---:|\n");

        for row in &self.rows {
            let marker = match row.origin {
                RowOrigin::Triangulated => " *(derived)*",
                RowOrigin::Unresolved => " *(missing)*",
                _ => "",
            };
            output.push_str(&format!(
                "| {}{} | {:.2} | {:.2} |\n",
                row.line_item, marker, row.value, row.confidence
            ));
        }

        output
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn statement_title(statement: StatementType) -> &'static str {
    match statement {
        StatementType::Income => "Income Statement",
        StatementType::Balance => "Balance Sheet",
        StatementType::CashFlow => "Cash Flow Statement",
    }
}

/// Line items whose quarterly values are positions rather than flows.
#[derive(Debug, Clone, Copy)]
pub struct CashPositions {
    pub opening: &'static str,
    pub closing: &'static str,
    pub change: &'static str,
}

/// A linear identity over line items, e.g. `Gross Profit = Total Revenue - Cost Of Revenue`.
#[derive(Debug, Clone, Copy)]
pub struct RuleSpec {
    pub equation: &'static str,
    pub prefer_balance: &'static [&'static str],
}

#[derive(Debug)]
pub struct StatementLayout {
    pub statement: StatementType,
    pub line_items: &'static [&'static str],
    /// Node period types that may feed this statement.
    pub period_types: &'static [PeriodType],
    pub rules: &'static [RuleSpec],
    /// Added to a row's confidence when the row is non-zero before triangulation.
    pub confidence_boosts: &'static [(&'static str, f64)],
    pub cash_positions: Option<CashPositions>,
}

impl StatementLayout {
    /// Whether the statement reports flows over a period (as opposed to a position at a date).
    pub fn is_duration(&self) -> bool {
        !matches!(self.statement, StatementType::Balance)
    }
}

pub const SHARES_OUTSTANDING: &str = "Shares Outstanding";

const HEADLINE_BOOST: f64 = 0.5;

static INCOME_STATEMENT: StatementLayout = StatementLayout {
    statement: StatementType::Income,
    line_items: &[
        "Total Revenue",
        "Cost Of Revenue",
        "Gross Profit",
        "Selling General And Administration",
        "Research And Development",
        "Other Operating Income Expense",
        "Operating Income",
        "Interest Expense",
        "Other Non Operating Income Expense",
        "Pretax Income",
        "Tax Provision",
        "Net Income",
    ],
    period_types: &[PeriodType::Duration],
    rules: &[
        RuleSpec {
            equation: "Gross Profit = Total Revenue - Cost Of Revenue",
            prefer_balance: &["Gross Profit"],
        },
        RuleSpec {
            equation: "Operating Income = Gross Profit - Selling General And Administration - Research And Development - Other Operating Income Expense",
            prefer_balance: &["Other Operating Income Expense"],
        },
        RuleSpec {
            equation: "Pretax Income = Operating Income - Interest Expense + Other Non Operating Income Expense",
            prefer_balance: &["Other Non Operating Income Expense"],
        },
        RuleSpec {
            equation: "Net Income = Pretax Income - Tax Provision",
            prefer_balance: &[],
        },
    ],
    confidence_boosts: &[
        ("Total Revenue", HEADLINE_BOOST),
        ("Gross Profit", HEADLINE_BOOST),
        ("Operating Income", HEADLINE_BOOST),
        ("Pretax Income", HEADLINE_BOOST),
        ("Net Income", HEADLINE_BOOST),
    ],
    cash_positions: None,
};

static BALANCE_SHEET: StatementLayout = StatementLayout {
    statement: StatementType::Balance,
    line_items: &[
        "Total Assets",
        "Current Assets",
        "Other Short Term Investments",
        "Receivables",
        "Inventory",
        "Other Current Assets",
        "Total Non Current Assets",
        "Net PPE",
        "Goodwill",
        "Investments And Advances",
        "Other Non-Current Assets",
        "Total Liabilities Net Minority Interest",
        "Current Liabilities",
        "Accounts Payable",
        "Current Debt",
        "Current Capital Lease Obligation",
        "Other Current Liabilities",
        "Total Non Current Liabilities Net Minority Interest",
        "Long Term Debt",
        "Long Term Capital Lease Obligation",
        "Other Non-Current Liabilities",
        "Stockholders Equity",
        "Capital Stock",
        "Retained Earnings",
        SHARES_OUTSTANDING,
    ],
    period_types: &[PeriodType::Instant, PeriodType::Duration],
    rules: &[
        RuleSpec {
            equation: "Total Assets = Current Assets + Total Non Current Assets",
            prefer_balance: &[],
        },
        RuleSpec {
            equation: "Current Assets = Receivables + Inventory + Other Short Term Investments + Other Current Assets",
            prefer_balance: &["Other Current Assets"],
        },
        RuleSpec {
            equation: "Total Non Current Assets = Net PPE + Goodwill + Investments And Advances + Other Non-Current Assets",
            prefer_balance: &["Other Non-Current Assets"],
        },
        RuleSpec {
            equation: "Total Liabilities Net Minority Interest = Current Liabilities + Total Non Current Liabilities Net Minority Interest",
            prefer_balance: &[],
        },
        RuleSpec {
            equation: "Current Liabilities = Accounts Payable + Current Debt + Current Capital Lease Obligation + Other Current Liabilities",
            prefer_balance: &["Other Current Liabilities"],
        },
        RuleSpec {
            equation: "Total Non Current Liabilities Net Minority Interest = Long Term Debt + Long Term Capital Lease Obligation + Other Non-Current Liabilities",
            prefer_balance: &["Other Non-Current Liabilities"],
        },
        RuleSpec {
            equation: "Total Assets = Total Liabilities Net Minority Interest + Stockholders Equity",
            prefer_balance: &[],
        },
    ],
    confidence_boosts: &[],
    cash_positions: None,
};

static CASH_FLOW_STATEMENT: StatementLayout = StatementLayout {
    statement: StatementType::CashFlow,
    line_items: &[
        "Operating Cash Flow",
        "Depreciation And Amortization",
        "Investing Cash Flow",
        "Financing Cash Flow",
        "Beginning Cash Position",
        "End Cash Position",
        "Changes In Cash",
    ],
    period_types: &[PeriodType::Duration, PeriodType::Instant],
    rules: &[RuleSpec {
        equation: "End Cash Position = Beginning Cash Position + Changes In Cash",
        prefer_balance: &[],
    }],
    confidence_boosts: &[],
    cash_positions: Some(CashPositions {
        opening: "Beginning Cash Position",
        closing: "End Cash Position",
        change: "Changes In Cash",
    }),
};

impl StatementType {
    pub fn layout(self) -> &'static StatementLayout {
        match self {
            StatementType::Income => &INCOME_STATEMENT,
            StatementType::Balance => &BALANCE_SHEET,
            StatementType::CashFlow => &CASH_FLOW_STATEMENT,
        }
    }
}

/// Several drafts of one statement side by side, newest period first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementTable {
    pub statement: StatementType,
    pub columns: Vec<String>,
    pub line_items: Vec<String>,
    /// `values[row][column]`
    pub values: Vec<Vec<f64>>,
}

impl StatementTable {
    /// Orders drafts newest first and drops periods with nothing reported.
    pub fn from_drafts(statement: StatementType, mut drafts: Vec<StatementDraft>) -> Self {
        drafts.retain(|d| !d.is_blank());
        drafts.sort_by(|a, b| b.period.cmp(&a.period));

        let line_items: Vec<String> = statement
            .layout()
            .line_items
            .iter()
            .map(|s| s.to_string())
            .collect();

        let values = line_items
            .iter()
            .map(|item| {
                drafts
                    .iter()
                    .map(|d| d.value(item).unwrap_or(0.0))
                    .collect()
            })
            .collect();

        Self {
            statement,
            columns: drafts.iter().map(|d| d.column_label()).collect(),
            line_items,
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn value(&self, line_item: &str, column: &str) -> Option<f64> {
        let row = self.line_items.iter().position(|l| l == line_item)?;
        let col = self.columns.iter().position(|c| c == column)?;
        Some(self.values[row][col])
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        output.push_str("Line Item");
        for column in &self.columns {
            output.push_str(&format!(",{}", column));
        }
        output.push('\n');

        for (item, row) in self.line_items.iter().zip(&self.values) {
            output.push_str(item);
            for value in row {
                output.push_str(&format!(",{}", value));
            }
            output.push('\n');
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_draft_follows_layout() {
        let draft = StatementDraft::unresolved(StatementType::CashFlow, Period::Year(2023));
        let items: Vec<&str> = draft.line_items().collect();
        assert_eq!(items, StatementType::CashFlow.layout().line_items.to_vec());
        assert!(draft.rows().iter().all(|r| r.value == 0.0 && r.confidence == 0.0));
        assert!(draft.is_blank());
    }

    #[test]
    fn test_set_clears_source_on_derived_rows() {
        let mut draft = StatementDraft::from_rows(
            StatementType::Income,
            Period::Year(2023),
            vec![StatementRow {
                line_item: "Net Income".to_string(),
                value: 10.0,
                confidence: 0.5,
                source_code: Some("NetIncomeLoss".to_string()),
                origin: RowOrigin::Selected,
            }],
        );

        assert!(draft.set("Net Income", 12.0, 1.0, RowOrigin::Triangulated));
        assert!(!draft.set("Gross Profit", 1.0, 1.0, RowOrigin::Triangulated));

        let row = draft.get("Net Income").unwrap();
        assert_eq!(row.value, 12.0);
        assert_eq!(row.source_code, None);
    }

    #[test]
    fn test_balance_sheet_has_share_row() {
        let layout = StatementType::Balance.layout();
        assert_eq!(layout.line_items.last(), Some(&SHARES_OUTSTANDING));
        assert!(!layout.is_duration());
        assert!(StatementType::CashFlow.layout().cash_positions.is_some());
    }

    #[test]
    fn test_csv_and_markdown_rendering() {
        let mut draft = StatementDraft::unresolved(StatementType::Income, Period::Year(2023));
        draft.set("Total Revenue", 100.0, 2.5, RowOrigin::Selected);

        let csv = draft.to_csv();
        assert!(csv.starts_with("Line Item,Value,Confidence,Origin,Source\n"));
        assert!(csv.contains("Total Revenue,100,2.5,Selected,\n"));

        let md = draft.to_markdown();
        assert!(md.starts_with("# Income Statement - 2023"));
        assert!(md.contains("| Total Revenue | 100.00 | 2.50 |"));
        assert!(md.contains("| Net Income *(missing)* | 0.00 | 0.00 |"));
    }

    #[test]
    fn test_table_orders_newest_first_and_drops_blank_columns() {
        let mut older = StatementDraft::unresolved(StatementType::Income, Period::Year(2022));
        older.set("Total Revenue", 80.0, 1.0, RowOrigin::Selected);
        let mut newer = StatementDraft::unresolved(StatementType::Income, Period::Year(2023));
        newer.set("Total Revenue", 100.0, 1.0, RowOrigin::Selected);
        let blank = StatementDraft::unresolved(StatementType::Income, Period::Year(2021));

        let table = StatementTable::from_drafts(StatementType::Income, vec![older, blank, newer]);
        assert_eq!(table.columns, vec!["2023", "2022"]);
        assert_eq!(table.value("Total Revenue", "2022"), Some(80.0));

        let csv = table.to_csv();
        assert!(csv.starts_with("Line Item,2023,2022\n"));
        assert!(csv.contains("Total Revenue,100,80\n"));
    }
}
