use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use super::cache::CacheKey;

/// A single validation failure with a user-facing message. An empty message
/// marks the value invalid without surfacing any error text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Invalid, but without any visible message.
    pub fn silent() -> Self {
        Self {
            message: String::new(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_silent(&self) -> bool {
        self.message.is_empty()
    }

    /// The same failure with a blanked-out message, used to suppress error
    /// text on fields the user has not touched yet.
    pub(super) fn muted(&self) -> Self {
        Self::silent()
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validation failures keyed by their target: a specific field or the form
/// itself.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ErrorMapping {
    errors: BTreeMap<CacheKey, ValidationError>,
}

impl ErrorMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single bare error associated with the form itself.
    pub fn form(error: ValidationError) -> Self {
        let mut mapping = Self::new();
        mapping.insert(CacheKey::WholeForm, error);
        mapping
    }

    /// A single error associated with one field.
    pub fn field(name: impl Into<String>, error: ValidationError) -> Self {
        let mut mapping = Self::new();
        mapping.insert(CacheKey::field(name), error);
        mapping
    }

    pub fn insert(&mut self, key: CacheKey, error: ValidationError) {
        self.errors.insert(key, error);
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<ValidationError> {
        self.errors.remove(key)
    }

    pub fn get(&self, key: &CacheKey) -> Option<&ValidationError> {
        self.errors.get(key)
    }

    pub fn form_error(&self) -> Option<&ValidationError> {
        self.errors.get(&CacheKey::WholeForm)
    }

    pub fn field_error(&self, name: &str) -> Option<&ValidationError> {
        self.errors.get(&CacheKey::field(name))
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &ValidationError)> {
        self.errors.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&CacheKey, &mut ValidationError)> {
        self.errors.iter_mut()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().filter_map(CacheKey::field_name)
    }
}

impl From<ValidationError> for ErrorMapping {
    fn from(error: ValidationError) -> Self {
        Self::form(error)
    }
}

impl FromIterator<(CacheKey, ValidationError)> for ErrorMapping {
    fn from_iter<I: IntoIterator<Item = (CacheKey, ValidationError)>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

/// Outcome of an apply hook that did not succeed. A cancelled apply exits
/// progress silently; a rejected one carries the errors to display.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApplyError {
    Cancelled,
    Rejected(ErrorMapping),
}

impl ApplyError {
    /// A rejection with a single form-level message.
    pub fn message(message: impl Into<String>) -> Self {
        ApplyError::Rejected(ErrorMapping::form(ValidationError::new(message)))
    }
}

impl From<ValidationError> for ApplyError {
    fn from(error: ValidationError) -> Self {
        ApplyError::Rejected(ErrorMapping::form(error))
    }
}

impl From<ErrorMapping> for ApplyError {
    fn from(errors: ErrorMapping) -> Self {
        ApplyError::Rejected(errors)
    }
}

/// Infrastructure failures of the form engine itself. Validation and apply
/// failures are never reported through this type; they surface as
/// `ValidationError`/`ErrorMapping` outcomes instead.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FormError {
    StatePoisoned(&'static str),
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::StatePoisoned(context) => {
                write!(f, "form state lock poisoned while {context}")
            }
        }
    }
}

impl std::error::Error for FormError {}

pub type FormResult<T> = Result<T, FormError>;
