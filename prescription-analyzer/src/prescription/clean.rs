use std::sync::LazyLock;

use regex::Regex;

use crate::models::DoseSchedule;

/// Formulation words that precede the name on a prescription, e.g. "Tab." or "Syp".
const FORM_PREFIXES: &[&str] = &[
    "tab", "tabs", "tablet", "tablets", "cap", "caps", "capsule", "capsules", "inj", "injection",
    "syp", "syrup", "susp", "suspension", "oint", "ointment", "cream", "lotion", "gel", "drop",
    "drops", "spray", "powder", "sachet", "t",
];

static PREFIX_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    FORM_PREFIXES
        .iter()
        .map(|prefix| Regex::new(&format!(r"(?i)^{prefix}\.?\s+")).unwrap())
        .collect()
});
/// A dash with whitespace on at least one side starts the dosing part.
static DOSING_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s-|-\s").unwrap());
static STRENGTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d+\s*(?:mg|ml|mcg|g)\b").unwrap());
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\b").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Searchable name from a prescription line: "Tab. Metformin 500mg - 1-0-1" → "metformin".
pub fn clean_medicine_name(full_name: &str) -> String {
    let lower = full_name.to_lowercase();
    let head = match DOSING_SEPARATOR.find(&lower) {
        Some(m) => &lower[..m.start()],
        None => lower.as_str(),
    };

    let mut name = head.trim().to_string();
    for pattern in PREFIX_PATTERNS.iter() {
        name = pattern.replace(&name, "").into_owned();
    }
    let name = STRENGTH.replace_all(&name, "");
    let name = NUMBER.replace_all(&name, "");
    SPACES.replace_all(&name, " ").trim().to_string()
}

/// Read a timing code such as "1-0-1" or "0-1/2-0".
///
/// "0" and "0/0" mean no dose. Anything that is not three dash-separated
/// parts gives an empty schedule.
pub fn parse_timing(code: &str) -> DoseSchedule {
    let parts: Vec<&str> = code.trim().split('-').map(str::trim).collect();
    let [morning, afternoon, night] = parts.as_slice() else {
        return DoseSchedule::default();
    };
    let dose = |part: &str| {
        (!part.is_empty() && part != "0" && part != "0/0").then(|| part.to_string())
    };
    DoseSchedule {
        morning: dose(morning),
        afternoon: dose(afternoon),
        night: dose(night),
    }
}
