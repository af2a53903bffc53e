use std::sync::Arc;

use futures::future::BoxFuture;

use crate::contracts::{FieldWidget, Progressable};

use super::errors::ValidationError;
use super::value::{FieldValue, FormData};
use super::view_state::ViewState;

pub(super) const REQUIRED_MESSAGE: &str = "This field is required.";

/// Custom asynchronous validation hook attached to a single field. Receives
/// the value under validation and the raw data of the whole form.
pub type FieldValidatorFn =
    Arc<dyn Fn(FieldValue, FormData) -> BoxFuture<'static, Result<(), ValidationError>> + Send + Sync>;

/// Callback invoked with the new value whenever the user edits the field.
pub type FieldChangeFn = Arc<dyn Fn(&FieldValue) + Send + Sync>;

/// A named, independently validatable unit of form input. The value lives in
/// the widget; flags, change tracking and visual state live here.
pub struct FormField {
    name: String,
    widget: Box<dyn FieldWidget>,
    label: String,
    description: String,
    unit: String,
    required: bool,
    readonly: bool,
    disabled: bool,
    hidden: bool,
    changed: bool,
    focused: bool,
    orig_value: FieldValue,
    view: ViewState,
    validator: Option<FieldValidatorFn>,
    on_change: Option<FieldChangeFn>,
}

impl FormField {
    pub fn new(name: impl Into<String>, widget: impl FieldWidget + 'static) -> Self {
        let widget = Box::new(widget);
        let orig_value = widget.value();
        Self {
            name: name.into(),
            widget,
            label: String::new(),
            description: String::new(),
            unit: String::new(),
            required: false,
            readonly: false,
            disabled: false,
            hidden: false,
            changed: false,
            focused: false,
            orig_value,
            view: ViewState::Normal,
            validator: None,
            on_change: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self.widget.set_readonly(readonly);
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self.widget.set_enabled(!disabled);
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn initial_value(mut self, value: impl Into<FieldValue>) -> Self {
        let value = value.into();
        self.widget.set_value(value.clone());
        self.orig_value = value;
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(FieldValue, FormData) -> BoxFuture<'static, Result<(), ValidationError>>
            + Send
            + Sync
            + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&FieldValue) + Send + Sync + 'static,
    {
        self.on_change = Some(Arc::new(callback));
        self
    }

    /* Identity and presentation */

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label_text(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn description_text(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn unit_text(&self) -> &str {
        &self.unit
    }

    pub fn set_unit(&mut self, unit: impl Into<String>) {
        self.unit = unit.into();
    }

    /* Value */

    pub fn value(&self) -> FieldValue {
        self.widget.value()
    }

    /// Programmatic value update: resets the original value and the changed
    /// flag. Does not trigger validation by itself.
    pub fn set_value(&mut self, value: FieldValue) {
        self.orig_value = value.clone();
        self.changed = false;
        self.widget.set_value(value);
    }

    /// A user edit: writes the value through to the widget and marks the
    /// field as changed with pending unapplied state.
    pub(super) fn edit_value(&mut self, value: FieldValue) {
        self.widget.set_value(value);
        self.clear_applied();
        self.changed = true;
    }

    /// The last value that was applied or programmatically set, before any
    /// user edits.
    pub fn orig_value(&self) -> &FieldValue {
        &self.orig_value
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.orig_value = self.widget.value();
        self.changed = false;
    }

    /* Flags */

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn set_required(&mut self, required: bool) {
        self.required = required;
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
        self.widget.set_readonly(readonly);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn enable(&mut self) {
        if !self.disabled {
            return;
        }
        self.disabled = false;
        self.widget.set_enabled(true);
    }

    pub fn disable(&mut self) {
        if self.disabled {
            return;
        }
        self.disabled = true;
        self.widget.set_enabled(false);
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub(super) fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /* Focus */

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub(super) fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    /* Visual state */

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn is_applied(&self) -> bool {
        self.view.is_applied()
    }

    /// Mark the current value as committed: the original value catches up and
    /// the changed flag clears.
    pub fn set_applied(&mut self) {
        self.orig_value = self.widget.value();
        self.changed = false;
        self.view = ViewState::Applied;
    }

    pub fn clear_applied(&mut self) {
        self.view.clear_applied();
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.view = ViewState::Error(message.into());
    }

    pub fn clear_error(&mut self) {
        self.view.clear_error();
    }

    pub fn error_message(&self) -> Option<&str> {
        self.view.error_message()
    }

    pub fn set_warning(&mut self, message: impl Into<String>) {
        self.view = ViewState::Warning(message.into());
    }

    pub fn clear_warning(&mut self) {
        if matches!(self.view, ViewState::Warning(_)) {
            self.view = ViewState::Normal;
        }
    }

    /* Validation */

    /// The synchronous half of the composed field validation: required check
    /// first, then the widget's structural check. The asynchronous custom
    /// hook runs afterwards, driven by the form.
    pub(super) fn run_sync_checks(&self, value: &FieldValue) -> Result<(), ValidationError> {
        if self.required && !self.hidden && value.is_missing() {
            return Err(ValidationError::new(REQUIRED_MESSAGE));
        }

        if let Some(message) = self.widget.validate_widget(value) {
            return Err(ValidationError::new(message));
        }

        Ok(())
    }

    pub(super) fn validator_hook(&self) -> Option<FieldValidatorFn> {
        self.validator.clone()
    }

    pub(super) fn change_callback(&self) -> Option<FieldChangeFn> {
        self.on_change.clone()
    }
}

impl Progressable for FormField {
    fn set_progress(&mut self) {
        self.view = ViewState::Progress;
    }

    fn clear_progress(&mut self) {
        self.view.clear_progress();
    }

    fn has_progress(&self) -> bool {
        self.view.is_progress()
    }
}
