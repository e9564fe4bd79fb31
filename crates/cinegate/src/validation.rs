//! Field validation.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use crate::error::AppError;

/// Collects per-field validation errors. The first error for a field wins.
///
/// ```
/// use cinegate::validation::Validator;
///
/// let mut v = Validator::new();
/// v.check(!"".is_empty(), "title", "must be provided");
/// v.check(false, "title", "must not be more than 500 bytes long");
/// assert_eq!(v.errors()["title"], "must be provided");
/// assert!(v.finish().is_err());
/// ```
#[derive(Debug, Default)]
pub struct Validator {
    errors: BTreeMap<String, String>,
}

impl Validator {
    /// Creates an empty validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no error was recorded.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records `message` for `field` unless the field already has an error.
    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }

    /// Records `message` for `field` when `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add_error(field, message);
        }
    }

    /// Returns the recorded errors.
    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Fails with [`AppError::Validation`] if any error was recorded.
    pub fn finish(self) -> Result<(), AppError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

/// Returns `true` if every value in `values` is distinct.
pub fn unique<T: Eq + Hash>(values: &[T]) -> bool {
    let mut seen = HashSet::with_capacity(values.len());
    values.iter().all(|v| seen.insert(v))
}

/// Loose e-mail shape check: one `@`, a non-empty local part, and a dotted
/// domain without empty labels.
pub fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique() {
        assert!(unique(&["drama", "crime"]));
        assert!(!unique(&["drama", "crime", "drama"]));
        assert!(unique::<&str>(&[]));
    }

    #[test]
    fn test_email_shapes() {
        assert!(looks_like_email("alice@example.com"));
        assert!(looks_like_email("a.b+movies@mail.example.co.uk"));
        assert!(!looks_like_email("alice"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("alice@example"));
        assert!(!looks_like_email("alice@@example.com"));
        assert!(!looks_like_email("alice@example..com"));
        assert!(!looks_like_email("al ice@example.com"));
    }

    #[test]
    fn test_valid_validator_finishes_ok() {
        let mut v = Validator::new();
        v.check(true, "year", "must be provided");
        assert!(v.is_valid());
        assert!(v.finish().is_ok());
    }
}
