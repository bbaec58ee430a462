//! Finds and validates email addresses in free text such as profile bios.

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest address accepted, per RFC 5321 path limits.
pub(crate) const MAX_EMAIL_LEN: usize = 254;
/// Longest local part accepted.
pub(crate) const MAX_LOCAL_PART_LEN: usize = 64;

/// Deliberately loose: anything shaped like `word@word`. Validation does the
/// real filtering.
static CANDIDATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\w.-]+@[\w.-]+")
        .expect("Failed to compile candidate email regex. This should not happen.")
});

static STRICT_EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\w.-]+@[\w.-]+\.\w+$")
        .expect("Failed to compile strict email regex. This should not happen.")
});

/// Returns every email-shaped substring of `text`, in order of appearance.
pub(crate) fn find_candidates(text: &str) -> Vec<&str> {
    CANDIDATE_REGEX.find_iter(text).map(|m| m.as_str()).collect()
}

/// The acceptance predicate applied to every candidate.
///
/// A candidate passes when it matches `local@domain.tld` as a whole, is at most
/// [`MAX_EMAIL_LEN`] bytes long, its local part is at most
/// [`MAX_LOCAL_PART_LEN`] bytes, and the domain does not end with a separator.
pub(crate) fn validate_email(candidate: &str) -> bool {
    if candidate.len() > MAX_EMAIL_LEN || !STRICT_EMAIL_REGEX.is_match(candidate) {
        return false;
    }
    match candidate.split_once('@') {
        Some((local, domain)) => {
            local.len() <= MAX_LOCAL_PART_LEN && !domain.ends_with(['.', '-'])
        }
        None => false,
    }
}

/// Candidates from `text` that pass [`validate_email`], in order of appearance.
pub(crate) fn extract_valid_emails(text: &str) -> Vec<String> {
    let mut valid = Vec::new();
    for candidate in find_candidates(text) {
        if validate_email(candidate) {
            valid.push(candidate.to_string());
        } else {
            tracing::trace!("Discarding invalid email candidate: {}", candidate);
        }
    }
    valid
}
