#![no_main]
use chemdex::{FormulaQuery, GrossFormula};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(formula) = GrossFormula::parse(text) {
        // Canonical text parses back to the same counts
        let canonical = formula.to_string();
        assert_eq!(GrossFormula::parse(&canonical).ok(), Some(formula));
    }

    if let Ok(query) = FormulaQuery::parse(text) {
        assert!(query.matches(&query.formula));
    }
});
