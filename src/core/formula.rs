//! Gross formulas and formula queries
//!
//! The canonical text form is Hill order (carbon, hydrogen, then the rest
//! alphabetically; plain alphabetical when there is no carbon) with counts
//! of one omitted and elements separated by a space: `C6 H12 O6`.

use crate::core::error::{ChemdexError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

const ELEMENT_PATTERN: &str = r"([A-Z][a-z]?)\s*(\d*)";
const QUERY_PATTERN: &str = r"^\s*(>=|<=|=)?\s*(.*?)\s*$";

fn compiled(
    cell: &'static OnceLock<std::result::Result<Regex, regex::Error>>,
    pattern: &'static str,
) -> Result<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern))
        .as_ref()
        .map_err(|e| ChemdexError::InvalidOption(format!("formula pattern: {}", e)))
}

fn element_regex() -> Result<&'static Regex> {
    static CELL: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    compiled(&CELL, ELEMENT_PATTERN)
}

fn query_regex() -> Result<&'static Regex> {
    static CELL: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    compiled(&CELL, QUERY_PATTERN)
}

/// Element counts of a structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrossFormula {
    counts: BTreeMap<String, u32>,
}

impl GrossFormula {
    /// Parse `C6H6`, `C6 H6` or any element order; repeated elements add up
    pub fn parse(text: &str) -> Result<Self> {
        let regex = element_regex()?;
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        let mut consumed = 0usize;

        for caps in regex.captures_iter(text) {
            let (whole, element, count) = match (caps.get(0), caps.get(1), caps.get(2)) {
                (Some(w), Some(e), Some(c)) => (w, e, c),
                _ => continue,
            };
            if !text[consumed..whole.start()].trim().is_empty() {
                return Err(invalid_formula(text));
            }
            consumed = whole.end();

            let count = if count.as_str().is_empty() {
                1
            } else {
                count
                    .as_str()
                    .parse::<u32>()
                    .map_err(|_| invalid_formula(text))?
            };
            let total = counts.entry(element.as_str().to_string()).or_insert(0);
            *total = total.checked_add(count).ok_or_else(|| invalid_formula(text))?;
        }

        if !text[consumed..].trim().is_empty() {
            return Err(invalid_formula(text));
        }
        counts.retain(|_, n| *n > 0);
        Ok(GrossFormula { counts })
    }

    pub fn count(&self, element: &str) -> u32 {
        self.counts.get(element).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Elements in Hill order
    pub fn elements(&self) -> Vec<(&str, u32)> {
        let mut out: Vec<(&str, u32)> = Vec::with_capacity(self.counts.len());
        let has_carbon = self.counts.contains_key("C");
        if has_carbon {
            for first in ["C", "H"] {
                if let Some(&n) = self.counts.get(first) {
                    out.push((first, n));
                }
            }
        }
        for (element, &n) in &self.counts {
            if has_carbon && (element == "C" || element == "H") {
                continue;
            }
            out.push((element.as_str(), n));
        }
        out
    }

    /// Every element count of `self` is at least the count in `other`
    pub fn contains(&self, other: &GrossFormula) -> bool {
        other
            .counts
            .iter()
            .all(|(element, &n)| self.count(element) >= n)
    }
}

impl fmt::Display for GrossFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .elements()
            .into_iter()
            .map(|(element, n)| {
                if n == 1 {
                    element.to_string()
                } else {
                    format!("{}{}", element, n)
                }
            })
            .collect();
        f.write_str(&parts.join(" "))
    }
}

fn invalid_formula(text: &str) -> ChemdexError {
    ChemdexError::InvalidOption(format!("invalid gross formula '{}'", text))
}

/// How a target formula must relate to the query formula
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaRelation {
    /// Identical element counts
    Equal,
    /// Target contains at least the query's counts
    AtLeast,
    /// Target has at most the query's counts and no other elements
    AtMost,
}

/// A parsed formula search: `[= | >= | <=] formula`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaQuery {
    pub relation: FormulaRelation,
    pub formula: GrossFormula,
}

impl FormulaQuery {
    pub fn parse(text: &str) -> Result<Self> {
        let caps = query_regex()?
            .captures(text)
            .ok_or_else(|| invalid_formula(text))?;
        let relation = match caps.get(1).map(|m| m.as_str()) {
            Some(">=") => FormulaRelation::AtLeast,
            Some("<=") => FormulaRelation::AtMost,
            _ => FormulaRelation::Equal,
        };
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let formula = GrossFormula::parse(body)?;
        if formula.is_empty() {
            return Err(invalid_formula(text));
        }
        Ok(FormulaQuery { relation, formula })
    }

    pub fn matches(&self, target: &GrossFormula) -> bool {
        match self.relation {
            FormulaRelation::Equal => *target == self.formula,
            FormulaRelation::AtLeast => target.contains(&self.formula),
            FormulaRelation::AtMost => self.formula.contains(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_canonicalize() {
        let glucose = GrossFormula::parse("C6H12O6").unwrap();
        assert_eq!(glucose.count("C"), 6);
        assert_eq!(glucose.count("O"), 6);
        assert_eq!(glucose.to_string(), "C6 H12 O6");

        let spaced = GrossFormula::parse("O6 C6 H12").unwrap();
        assert_eq!(spaced, glucose);
    }

    #[test]
    fn test_hill_order_without_carbon() {
        let f = GrossFormula::parse("NaCl").unwrap();
        assert_eq!(f.to_string(), "Cl Na");
        let water = GrossFormula::parse("H2O").unwrap();
        assert_eq!(water.to_string(), "H2 O");
    }

    #[test]
    fn test_repeated_elements_add_up() {
        let f = GrossFormula::parse("CH3CH2OH").unwrap();
        assert_eq!(f.to_string(), "C2 H6 O");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(GrossFormula::parse("C6H6!").is_err());
        assert!(GrossFormula::parse("c6h6").is_err());
        assert!(FormulaQuery::parse(">=").is_err());
    }

    #[test]
    fn test_relations() {
        let benzene = GrossFormula::parse("C6H6").unwrap();
        let phenol = GrossFormula::parse("C6H6O").unwrap();

        let eq = FormulaQuery::parse("C6 H6").unwrap();
        assert!(eq.matches(&benzene));
        assert!(!eq.matches(&phenol));

        let at_least = FormulaQuery::parse(">= C6H6").unwrap();
        assert!(at_least.matches(&benzene));
        assert!(at_least.matches(&phenol));

        let at_most = FormulaQuery::parse("<=C6H6").unwrap();
        assert!(at_most.matches(&benzene));
        assert!(!at_most.matches(&phenol));
        assert!(at_most.matches(&GrossFormula::parse("C2H2").unwrap()));
    }
}
