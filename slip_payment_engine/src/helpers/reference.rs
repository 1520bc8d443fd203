use once_cell::sync::Lazy;
use regex::Regex;

static REFERENCE_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-_.:/]+").unwrap());

/// Canonical form of a bank transfer reference, used for duplicate detection.
///
/// Slip readers return the same reference with different spacing, dashes and letter case depending on the bank and
/// the photo. All of those variants normalise to the same upper-case, separator-free string. A reference that is
/// empty after normalisation is treated as absent.
pub fn normalize_reference(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let cleaned = REFERENCE_NOISE.replace_all(raw.trim(), "").to_uppercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
