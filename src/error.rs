use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Field-keyed validation messages, ordered by field name.
///
/// Keys follow the wire/form names (`paymentMethod`, `location`, `phoneNumber`,
/// `binancePayId`) so callers can attach each message to its input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    /// Creates an empty set of field errors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message for a field, replacing any earlier one.
    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.insert(field.into(), message.into());
    }

    /// Drops the message for a field, returning it if there was one.
    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.0.remove(field)
    }

    /// Message recorded for a field.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Removes every message.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterates `(field, message)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns `Ok(())` when no field failed, otherwise the collected errors.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(PlatformError::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in self.iter() {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Invalid input: {0}")]
    Validation(FieldErrors),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Payment provider error: {0}")]
    Provider(String),
    #[error("Unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),
    #[error("A payment request is already in progress")]
    Busy,
    #[error("The payment flow was closed before the response arrived")]
    Stale,
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PlatformError {
    /// Single-field validation failure.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field, message);
        Self::Validation(errors)
    }

    /// Errors the user can fix by clicking again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::Network(_) | PlatformError::Provider(_) | PlatformError::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_errors_display_is_sorted() {
        let mut errors = FieldErrors::new();
        errors.insert("paymentMethod", "Payment method is required");
        errors.insert("location", "Location is required");
        assert_eq!(
            errors.to_string(),
            "location: Location is required; paymentMethod: Payment method is required"
        );
    }

    #[test]
    fn test_empty_field_errors_is_ok() {
        assert!(FieldErrors::new().into_result().is_ok());
        let err = PlatformError::invalid("phoneNumber", "bad").to_string();
        assert_eq!(err, "Invalid input: phoneNumber: bad");
    }

    #[test]
    fn test_retryable_taxonomy() {
        assert!(PlatformError::Provider("declined".into()).is_retryable());
        assert!(!PlatformError::Busy.is_retryable());
        assert!(!PlatformError::Unauthenticated("expired".into()).is_retryable());
        assert!(!PlatformError::invalid("location", "required").is_retryable());
    }
}
