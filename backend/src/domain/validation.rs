//! Request input validation.

/// Field-level validation failure. Always safe to show to clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    field: String,
    message: String,
}

impl ValidationError {
    /// Failure for `field`.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Offending field.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// What is wrong with it.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Inputs that check and normalise themselves after decoding.
///
/// # Examples
/// ```
/// use starter::domain::validation::{Validate, ValidationError};
///
/// struct Signup {
///     email: String,
/// }
///
/// impl Validate for Signup {
///     fn validate(&mut self) -> Result<(), ValidationError> {
///         self.email = self.email.trim().to_lowercase();
///         if self.email.contains('@') {
///             Ok(())
///         } else {
///             Err(ValidationError::new("email", "must contain @"))
///         }
///     }
/// }
///
/// let mut input = Signup { email: "  Ada@Example.org ".into() };
/// assert!(input.validate().is_ok());
/// assert_eq!(input.email, "ada@example.org");
/// ```
pub trait Validate {
    /// Check the value, possibly normalising it in place.
    ///
    /// # Errors
    ///
    /// The first invalid field.
    fn validate(&mut self) -> Result<(), ValidationError>;
}

/// Helper for the common "must not be blank" rule.
///
/// # Errors
///
/// When `value` is empty after trimming.
pub fn require_non_blank(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new(field, "must not be empty"))
    } else {
        Ok(())
    }
}
