//! Rule-based reconciliation of weakly supported statement rows.

use crate::config::EngineConfig;
use crate::error::{NormalizationError, Result};
use crate::schema::StatementType;
use crate::statement::{RowOrigin, RuleSpec, StatementDraft, StatementRow};
use log::debug;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub variable: String,
    pub sign: f64,
}

/// A parsed linear identity `lhs = ±a ± b ...`.
///
/// Operators must stand alone between spaces, so hyphenated names such as
/// `Other Non-Current Assets` are read as one variable.
#[derive(Debug, Clone)]
pub struct TriangulationRule {
    equation: String,
    lhs: String,
    terms: Vec<Term>,
    prefer_balance: Vec<String>,
}

impl TriangulationRule {
    pub fn new(equation: &str, prefer_balance: &[&str]) -> Result<Self> {
        let invalid = |details: &str| NormalizationError::InvalidRule {
            equation: equation.to_string(),
            details: details.to_string(),
        };

        let (lhs, rhs) = equation
            .split_once('=')
            .ok_or_else(|| invalid("missing '='"))?;
        if rhs.contains('=') {
            return Err(invalid("more than one '='"));
        }

        let lhs = lhs.split_whitespace().collect::<Vec<_>>().join(" ");
        if lhs.is_empty() {
            return Err(invalid("empty left-hand side"));
        }
        if lhs.split(' ').any(|w| w == "+" || w == "-") {
            return Err(invalid("left-hand side must be a single variable"));
        }

        let mut terms = Vec::new();
        let mut sign = 1.0;
        let mut words: Vec<&str> = Vec::new();
        let mut expect_term = true;

        for word in rhs.split_whitespace() {
            match word {
                "+" | "-" => {
                    if !words.is_empty() {
                        terms.push(Term {
                            variable: words.join(" "),
                            sign,
                        });
                        words.clear();
                    } else if !(expect_term && terms.is_empty()) {
                        return Err(invalid("operator without a preceding term"));
                    }
                    sign = if word == "-" { -1.0 } else { 1.0 };
                    expect_term = true;
                }
                _ => {
                    words.push(word);
                    expect_term = false;
                }
            }
        }
        if words.is_empty() {
            return Err(invalid("right-hand side ends without a term"));
        }
        terms.push(Term {
            variable: words.join(" "),
            sign,
        });

        let mut seen = HashSet::new();
        seen.insert(lhs.as_str());
        for term in &terms {
            if !seen.insert(term.variable.as_str()) {
                return Err(invalid(&format!("'{}' appears more than once", term.variable)));
            }
        }

        for name in prefer_balance {
            if !seen.contains(name) {
                return Err(invalid(&format!("prefer_balance member '{}' is not in the rule", name)));
            }
        }

        Ok(Self {
            equation: equation.trim().to_string(),
            lhs,
            terms,
            prefer_balance: prefer_balance.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn from_spec(spec: &RuleSpec) -> Result<Self> {
        Self::new(spec.equation, spec.prefer_balance)
    }

    pub fn equation(&self) -> &str {
        &self.equation
    }

    pub fn lhs(&self) -> &str {
        &self.lhs
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Left-hand side first, then the right-hand terms in written order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.lhs.as_str()).chain(self.terms.iter().map(|t| t.variable.as_str()))
    }

    pub fn prefers_balance(&self, variable: &str) -> bool {
        self.prefer_balance.iter().any(|v| v == variable)
    }

    /// Solves the identity for `target` from the other variables' values.
    pub fn solve_for<F>(&self, target: &str, known: F) -> Option<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        if target == self.lhs {
            return self
                .terms
                .iter()
                .try_fold(0.0, |acc, t| Some(acc + t.sign * known(&t.variable)?));
        }

        let target_sign = self.terms.iter().find(|t| t.variable == target)?.sign;
        let mut residual = known(&self.lhs)?;
        for term in self.terms.iter().filter(|t| t.variable != target) {
            residual -= term.sign * known(&term.variable)?;
        }
        Some(residual * target_sign)
    }
}

/// Parses a layout's rule table.
pub fn compile_rules(specs: &[RuleSpec]) -> Result<Vec<TriangulationRule>> {
    specs.iter().map(TriangulationRule::from_spec).collect()
}

/// Every layout's rules, parsed once and shared by all requests.
#[derive(Debug, Clone)]
pub struct RuleBook {
    rules: HashMap<StatementType, Vec<TriangulationRule>>,
}

impl RuleBook {
    pub fn compile() -> Result<Self> {
        let mut rules = HashMap::new();
        for statement in StatementType::ALL {
            rules.insert(statement, compile_rules(statement.layout().rules)?);
        }
        Ok(Self { rules })
    }

    pub fn rules_for(&self, statement: StatementType) -> &[TriangulationRule] {
        self.rules.get(&statement).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub struct Triangulator {
    lock_threshold: f64,
    derived_confidence: f64,
}

impl Default for Triangulator {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self::new(&config)
    }
}

impl Triangulator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            lock_threshold: config.lock_threshold,
            derived_confidence: config.derived_confidence,
        }
    }

    /// Applies `rules` in order and returns the updated draft with one log line per
    /// recalculated value. Rules that cannot be evaluated are skipped.
    pub fn apply(
        &self,
        draft: &StatementDraft,
        rules: &[TriangulationRule],
    ) -> (StatementDraft, Vec<String>) {
        let mut draft = draft.clone();
        let mut locked: HashSet<String> = HashSet::new();
        let mut log = Vec::new();

        for rule in rules {
            let Some(target) = self.pick_target(&draft, rule, &locked) else {
                continue;
            };

            // unresolved rows count as zero, but a rule needs at least one real input
            let has_input = rule
                .variables()
                .filter(|&name| name != target)
                .any(|name| draft.get(name).is_some_and(StatementRow::is_resolved));
            if !has_input {
                debug!("Skipping rule '{}': no input is resolved", rule.equation());
                continue;
            }

            let known = |name: &str| draft.value(name).filter(|v| v.is_finite());
            let Some(value) = rule.solve_for(&target, known) else {
                debug!("Skipping rule '{}': an input has no value", rule.equation());
                continue;
            };

            draft.set(&target, value, self.derived_confidence, RowOrigin::Triangulated);
            log.push(format!(
                "Recalculated '{}' using rule '{}'",
                target,
                rule.equation()
            ));
            locked.insert(target);
        }

        (draft, log)
    }

    /// The unlocked low-confidence variable to solve for. `prefer_balance` members go first,
    /// then the lowest confidence, then the earliest position in the rule.
    fn pick_target(
        &self,
        draft: &StatementDraft,
        rule: &TriangulationRule,
        locked: &HashSet<String>,
    ) -> Option<String> {
        let mut best: Option<(bool, f64, usize, &str)> = None;

        for (index, name) in rule.variables().enumerate() {
            // a variable missing from the draft makes the whole rule unusable
            let row = draft.get(name)?;
            if locked.contains(name) || row.confidence >= self.lock_threshold {
                continue;
            }

            let plug = rule.prefers_balance(name);
            let effective = if plug { 0.0 } else { row.confidence };
            let key = (!plug, effective, index, name);

            let better = match best {
                None => true,
                Some((b_plug, b_conf, b_index, _)) => (key.0, key.1, key.2)
                    .partial_cmp(&(b_plug, b_conf, b_index))
                    .is_some_and(|o| o.is_lt()),
            };
            if better {
                best = Some(key);
            }
        }

        best.map(|(_, _, _, name)| name.to_string())
    }
}

/// Triangulates with the default thresholds.
pub fn triangulate(
    draft: &StatementDraft,
    rules: &[TriangulationRule],
) -> (StatementDraft, Vec<String>) {
    Triangulator::default().apply(draft, rules)
}
