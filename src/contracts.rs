use crate::form::{FieldValue, FormResult};

/// Value storage and structural validation surface a field widget exposes to
/// the form engine. Widget wrappers (text inputs, toggles, steppers) implement
/// this; the engine never touches their rendering.
pub trait FieldWidget: Send + Sync {
    /// Read the current value out of the underlying input representation.
    fn value(&self) -> FieldValue;

    /// Write a value into the underlying input representation. Writing a
    /// value never triggers validation by itself; the owning form decides
    /// when to validate.
    fn set_value(&mut self, value: FieldValue);

    /// Kind-specific structural check (numeric range, pattern). `None` means
    /// valid; `Some(message)` invalid. An empty message marks the value
    /// invalid without surfacing any error text.
    fn validate_widget(&self, _value: &FieldValue) -> Option<String> {
        None
    }

    fn set_enabled(&mut self, _enabled: bool) {}

    fn set_readonly(&mut self, _readonly: bool) {}
}

/// Progress indication capability, shared by fields and forms.
pub trait Progressable {
    fn set_progress(&mut self);
    fn clear_progress(&mut self);
    fn has_progress(&self) -> bool;
}

/// Dismissal capability of a form-like container.
pub trait Closable {
    fn close(&self) -> FormResult<()>;
    fn is_closed(&self) -> FormResult<bool>;
}
