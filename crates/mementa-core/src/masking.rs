//! Sensitive-value masking applied at log-emission time.
//!
//! Pure text transform: every email address, phone number, and card-like
//! digit run is replaced by a bracketed placeholder before the text reaches
//! a log sink. Masking order matters: phone patterns run before card
//! patterns, otherwise a long international number reads as a card run.
//! Phone patterns require group separators (or an international `+` prefix)
//! so UIDs, ISO dates, and plain counters pass through untouched.

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex is valid")
});

static CARD: Lazy<Regex> = Lazy::new(|| {
    // 13-16 digits, optionally grouped by spaces or dashes.
    Regex::new(r"\b(?:\d[ -]?){12,15}\d\b").expect("card regex is valid")
});

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[ .-]?)?\b\(?\d{3}\)?[ .-]\d{3,4}[ .-]\d{4}\b|\+\d{7,15}\b")
        .expect("phone regex is valid")
});

/// Replace sensitive values in `text` with placeholders.
pub fn mask_sensitive(text: &str) -> String {
    let masked = EMAIL.replace_all(text, "[email]");
    let masked = PHONE.replace_all(&masked, "[phone]");
    CARD.replace_all(&masked, "[card]").into_owned()
}
