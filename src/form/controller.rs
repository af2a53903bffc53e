use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use futures_timer::Delay;

use crate::contracts::{Closable, Progressable};

/// How long a scheduled validation pass waits before running, giving later
/// requests in the same burst a chance to supersede it.
const ASAP_DELAY: Duration = Duration::from_millis(1);

use super::button::FormButton;
use super::cache::{CacheEntry, CacheKey, ValidationCache, ValidationHandle};
use super::errors::{ApplyError, ErrorMapping, FormError, FormResult, ValidationError};
use super::field::FormField;
use super::value::{FieldValue, FormData};
use super::view_state::ViewState;

/// Last broadcast validity of the form, used to detect the edges on which
/// `on_valid`/`on_invalid` fire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Validity {
    Unknown,
    Valid,
    Invalid,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FormOptions {
    /// Validate (and optionally apply) each field upon change instead of
    /// waiting for `proceed`.
    pub continuous_validation: bool,
    /// Close the form automatically once `apply_data` succeeds.
    pub close_on_apply: bool,
    /// Keep the default button's enablement in sync with validity and
    /// changed state.
    pub auto_disable_default_button: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            continuous_validation: false,
            close_on_apply: true,
            auto_disable_default_button: true,
        }
    }
}

pub type ValidationFuture = BoxFuture<'static, Result<(), ValidationError>>;
pub type ApplyFuture = BoxFuture<'static, Result<(), ApplyError>>;

/// Application-supplied override points. Every method has a neutral default;
/// implement the ones the form needs. Hooks returning futures must not borrow
/// from their arguments; clone what the future needs.
pub trait FormDelegate: Send + Sync + 'static {
    /// Whole-form validation. Only ever invoked with field-valid data.
    fn validate(&self, _data: &FormData) -> ValidationFuture {
        future::ready(Ok(())).boxed()
    }

    /// Per-field validation in the context of this form, run after the
    /// field's own composed validation.
    fn validate_field(
        &self,
        _name: &str,
        _value: &FieldValue,
        _data: &FormData,
    ) -> ValidationFuture {
        future::ready(Ok(())).boxed()
    }

    /// Apply validated form data. Invoked by `proceed`.
    fn apply_data(&self, _data: FormData) -> ApplyFuture {
        future::ready(Ok(())).boxed()
    }

    /// Apply a single validated field value upon change (continuous mode).
    /// `None` means values cannot be applied continuously for this field.
    fn apply_field(&self, _value: FieldValue, _name: &str) -> Option<ApplyFuture> {
        None
    }

    /// Called on every field change with the raw, unvalidated data.
    fn on_change(&self, _data: &FormData, _name: &str) {}

    /// Called after a field change once the form is entirely valid.
    /// Continuous mode only.
    fn on_change_valid(&self, _data: &FormData, _name: &str) {}

    /// Called when the form data becomes valid.
    fn on_valid(&self, _data: &FormData) {}

    /// Called when the form data becomes invalid.
    fn on_invalid(&self) {}

    /// Called when the form is closed without its data applied.
    fn on_cancel(&self) {}
}

/// Delegate with all hooks left at their defaults.
pub struct NoopDelegate;

impl FormDelegate for NoopDelegate {}

/// Outcome of `proceed`. Validation and apply failures are ordinary,
/// recoverable outcomes, not errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProceedOutcome {
    Applied,
    Cancelled,
    Rejected(ErrorMapping),
}

pub(super) struct FormState {
    fields: Vec<FormField>,
    buttons: Vec<FormButton>,
    cache: ValidationCache,
    validity: Validity,
    view: ViewState,
    closed: bool,
    asap_generation: u64,
}

/// A form: named fields, buttons, the validation cache and the apply/commit
/// protocol. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Form {
    options: FormOptions,
    delegate: Arc<dyn FormDelegate>,
    state: Arc<RwLock<FormState>>,
}

impl Form {
    pub fn new(options: FormOptions) -> Self {
        Self::with_delegate(options, NoopDelegate)
    }

    pub fn with_delegate(options: FormOptions, delegate: impl FormDelegate) -> Self {
        Self {
            options,
            delegate: Arc::new(delegate),
            state: Arc::new(RwLock::new(FormState {
                fields: Vec::new(),
                buttons: Vec::new(),
                cache: ValidationCache::default(),
                validity: Validity::Unknown,
                view: ViewState::Normal,
                closed: false,
                asap_generation: 0,
            })),
        }
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub fn validity(&self) -> FormResult<Validity> {
        Ok(read_lock(&self.state, "reading form validity")?.validity)
    }

    pub fn view(&self) -> FormResult<ViewState> {
        Ok(read_lock(&self.state, "reading form view state")?.view.clone())
    }

    /* Fields */

    /// Add a field at the end of the form. A duplicate field name is a fatal
    /// assertion.
    pub fn add_field(&self, field: FormField) -> FormResult<()> {
        self.insert_field(None, field)
    }

    pub fn insert_field(&self, index: Option<usize>, field: FormField) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "adding a field")?;
            assert!(
                !state.fields.iter().any(|f| f.name() == field.name()),
                "field `{}` already present on form",
                field.name()
            );
            // The form as a whole may no longer be valid.
            state.cache.invalidate_form();
            state.validity = Validity::Unknown;
            match index {
                Some(index) if index < state.fields.len() => state.fields.insert(index, field),
                _ => state.fields.push(field),
            }
        }
        self.update_buttons_state()
    }

    pub fn remove_field(&self, name: &str) -> FormResult<bool> {
        let removed = {
            let mut state = write_lock(&self.state, "removing a field")?;
            match state.fields.iter().position(|f| f.name() == name) {
                Some(index) => {
                    state.fields.remove(index);
                    state.cache.invalidate_field(name);
                    state.validity = Validity::Unknown;
                    true
                }
                None => false,
            }
        };
        self.update_buttons_state()?;
        Ok(removed)
    }

    pub fn has_field(&self, name: &str) -> FormResult<bool> {
        let state = read_lock(&self.state, "checking field membership")?;
        Ok(state.fields.iter().any(|field| field.name() == name))
    }

    pub fn field_names(&self) -> FormResult<Vec<String>> {
        let state = read_lock(&self.state, "listing field names")?;
        Ok(state.fields.iter().map(|f| f.name().to_owned()).collect())
    }

    pub fn field_index(&self, name: &str) -> FormResult<Option<usize>> {
        let state = read_lock(&self.state, "looking up a field index")?;
        Ok(state.fields.iter().position(|f| f.name() == name))
    }

    pub fn changed_field_names(&self) -> FormResult<Vec<String>> {
        let state = read_lock(&self.state, "listing changed fields")?;
        Ok(state
            .fields
            .iter()
            .filter(|field| field.is_changed())
            .map(|field| field.name().to_owned())
            .collect())
    }

    /// Run a closure against a field. Operating on a field that is not part
    /// of this form is a fatal assertion.
    pub fn with_field<R>(&self, name: &str, f: impl FnOnce(&FormField) -> R) -> FormResult<R> {
        let state = read_lock(&self.state, "reading a field")?;
        let index = field_index_of(&state, name);
        Ok(f(&state.fields[index]))
    }

    pub fn with_field_mut<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut FormField) -> R,
    ) -> FormResult<R> {
        let mut state = write_lock(&self.state, "updating a field")?;
        let index = field_index_of(&state, name);
        Ok(f(&mut state.fields[index]))
    }

    /* Visibility and flags */

    pub async fn show_field(&self, name: &str) -> FormResult<()> {
        self.set_field_hidden(name, false).await
    }

    pub async fn hide_field(&self, name: &str) -> FormResult<()> {
        self.set_field_hidden(name, true).await
    }

    async fn set_field_hidden(&self, name: &str, hidden: bool) -> FormResult<()> {
        let toggled = {
            let mut state = write_lock(&self.state, "toggling field visibility")?;
            let index = field_index_of(&state, name);
            if state.fields[index].is_hidden() == hidden {
                false
            } else {
                state.fields[index].set_hidden(hidden);
                // Hidden fields are always considered valid, so visibility
                // affects overall validity.
                state.cache.invalidate_field(name);
                state.validity = Validity::Unknown;
                true
            }
        };
        if toggled && self.options.continuous_validation {
            self.update_validation_state_asap().await?;
        }
        Ok(())
    }

    pub fn set_field_required(&self, name: &str, required: bool) -> FormResult<()> {
        let mut state = write_lock(&self.state, "toggling the required flag")?;
        let index = field_index_of(&state, name);
        state.fields[index].set_required(required);
        state.cache.invalidate_field(name);
        state.validity = Validity::Unknown;
        Ok(())
    }

    pub fn set_field_readonly(&self, name: &str, readonly: bool) -> FormResult<()> {
        self.with_field_mut(name, |field| field.set_readonly(readonly))
    }

    pub fn enable_field(&self, name: &str) -> FormResult<()> {
        self.with_field_mut(name, FormField::enable)
    }

    pub fn disable_field(&self, name: &str) -> FormResult<()> {
        self.with_field_mut(name, FormField::disable)
    }

    pub fn focus_field(&self, name: &str) -> FormResult<()> {
        self.with_field_mut(name, |field| field.set_focused(true))
    }

    pub fn blur_field(&self, name: &str) -> FormResult<()> {
        self.with_field_mut(name, |field| field.set_focused(false))
    }

    pub fn is_field_focused(&self, name: &str) -> FormResult<bool> {
        self.with_field(name, FormField::is_focused)
    }

    /* Buttons */

    pub fn add_button(&self, button: FormButton) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "adding a button")?;
            assert!(
                !state.buttons.iter().any(|b| b.id() == button.id()),
                "button `{}` already present on form",
                button.id()
            );
            state.buttons.push(button);
        }
        self.update_buttons_state()
    }

    pub fn remove_button(&self, id: &str) -> FormResult<bool> {
        let removed = {
            let mut state = write_lock(&self.state, "removing a button")?;
            match state.buttons.iter().position(|b| b.id() == id) {
                Some(index) => {
                    state.buttons.remove(index);
                    true
                }
                None => false,
            }
        };
        self.update_buttons_state()?;
        Ok(removed)
    }

    pub fn button_ids(&self) -> FormResult<Vec<String>> {
        let state = read_lock(&self.state, "listing button ids")?;
        Ok(state.buttons.iter().map(|b| b.id().to_owned()).collect())
    }

    /// Run a closure against a button. Operating on a button that is not part
    /// of this form is a fatal assertion.
    pub fn with_button<R>(&self, id: &str, f: impl FnOnce(&FormButton) -> R) -> FormResult<R> {
        let state = read_lock(&self.state, "reading a button")?;
        let button = state
            .buttons
            .iter()
            .find(|button| button.id() == id)
            .unwrap_or_else(|| panic!("button `{id}` is not part of this form"));
        Ok(f(button))
    }

    /// Dispatch a button press: the default button runs `proceed`, the cancel
    /// button closes the form. Disabled buttons are ignored.
    pub async fn press_button(&self, id: &str) -> FormResult<Option<ProceedOutcome>> {
        let (enabled, is_default, is_cancel) =
            self.with_button(id, |b| (b.is_enabled(), b.is_default(), b.is_cancel()))?;
        if !enabled {
            return Ok(None);
        }
        if is_default {
            Ok(Some(self.default_action().await?))
        } else if is_cancel {
            self.cancel_action()?;
            Ok(None)
        } else {
            Ok(None)
        }
    }

    /// Sync the default button's enablement with the current form state. In
    /// continuous mode the button follows validity; otherwise it follows
    /// whether anything changed (a form without fields is trivially
    /// submittable).
    pub fn update_buttons_state(&self) -> FormResult<()> {
        if !self.options.auto_disable_default_button {
            return Ok(());
        }
        let mut state = write_lock(&self.state, "refreshing button state")?;
        let enabled = if self.options.continuous_validation {
            state.validity != Validity::Invalid
        } else {
            state.fields.is_empty() || state.fields.iter().any(FormField::is_changed)
        };
        if let Some(button) = state.buttons.iter_mut().find(|b| b.is_default()) {
            if enabled {
                button.enable();
            } else {
                button.disable();
            }
        }
        Ok(())
    }

    /* Data */

    /// Current form data without any validation.
    pub fn unvalidated_data(&self) -> FormResult<FormData> {
        let state = read_lock(&self.state, "snapshotting unvalidated data")?;
        Ok(snapshot_data(&state))
    }

    /// Current value of one field without validation, or `None` if no such
    /// field exists.
    pub fn unvalidated_field_value(&self, name: &str) -> FormResult<Option<FieldValue>> {
        let state = read_lock(&self.state, "reading an unvalidated field value")?;
        Ok(state
            .fields
            .iter()
            .find(|field| field.name() == name)
            .map(FormField::value))
    }

    /// Current form data, after making sure it is valid. Resolves with the
    /// data, or with the mapping of errors keeping it invalid.
    pub async fn data(&self) -> FormResult<Result<FormData, ErrorMapping>> {
        self.validate_all().await
    }

    /// Current value of one field, after validating that field. The
    /// validation failure propagates to the caller here, unlike the
    /// state-updating entry points.
    pub async fn field_value(
        &self,
        name: &str,
    ) -> FormResult<Result<FieldValue, ValidationError>> {
        let value = self.with_field(name, FormField::value)?;
        Ok(match self.validate_one(name).await? {
            Ok(()) => Ok(value),
            Err(error) => Err(error),
        })
    }

    /// Replace form data in bulk. Silent: affected fields lose their changed
    /// flag and the whole validation cache is dropped.
    pub async fn set_data(&self, data: FormData) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "replacing form data")?;
            state.cache.clear();
            state.validity = Validity::Unknown;
            for (name, value) in data {
                if let Some(field) = state.fields.iter_mut().find(|f| f.name() == name) {
                    field.set_value(value);
                }
            }
        }
        if self.options.continuous_validation {
            self.update_validation_state(None).await?;
        }
        Ok(())
    }

    /// Programmatic single-field update. Silent like `set_data`, but
    /// invalidates only the affected cache entries.
    pub async fn set_field_value(
        &self,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "setting a field value")?;
            let index = field_index_of(&state, name);
            state.fields[index].set_value(value.into());
            state.cache.invalidate_field(name);
            state.validity = Validity::Unknown;
        }
        if self.options.continuous_validation {
            self.update_validation_state(None).await?;
        }
        Ok(())
    }

    /* Change pipeline */

    /// A user edit of a field value: writes the value through, marks the
    /// field changed, invokes its change callback and runs the change
    /// pipeline.
    pub async fn change_field_value(
        &self,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> FormResult<()> {
        let value = value.into();
        let callback = {
            let mut state = write_lock(&self.state, "recording a field edit")?;
            let index = field_index_of(&state, name);
            state.fields[index].edit_value(value.clone());
            state.fields[index].change_callback()
        };
        if let Some(callback) = callback {
            callback(&value);
        }
        self.field_changed(name).await
    }

    /// React to a field whose value changed. Without continuous validation
    /// this only notifies the delegate and refreshes buttons; with it, the
    /// field is revalidated, optionally applied, and the whole-form validity
    /// is rebroadcast.
    pub async fn field_changed(&self, name: &str) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "invalidating a changed field")?;
            let index = field_index_of(&state, name);
            state.view.clear_applied();
            state.cache.invalidate_field(name);
            state.validity = Validity::Unknown;
            if self.options.continuous_validation {
                // Deferred mode leaves any displayed error alone until the
                // next proceed; continuous mode is about to recompute it.
                state.fields[index].clear_error();
            }
        }

        if !self.options.continuous_validation {
            let data = self.unvalidated_data()?;
            self.delegate.on_change(&data, name);
            self.update_buttons_state()?;
            return Ok(());
        }

        let mut extra_error = None;
        match self.validate_one(name).await? {
            Ok(()) => {
                let value = self.with_field(name, FormField::value)?;
                if let Some(pending) = self.delegate.apply_field(value, name) {
                    self.with_field_mut(name, |field| field.set_progress())?;
                    match pending.await {
                        Ok(()) => self.with_field_mut(name, FormField::set_applied)?,
                        Err(ApplyError::Cancelled) => {
                            self.with_field_mut(name, |field| field.clear_progress())?;
                        }
                        Err(ApplyError::Rejected(errors)) => {
                            let error = field_apply_error(&errors, name);
                            self.with_field_mut(name, |field| field.set_error(error.message()))?;
                            extra_error = Some(error);
                        }
                    }
                }
            }
            Err(error) => {
                self.with_field_mut(name, |field| field.set_error(error.message()))?;
                extra_error = Some(error);
            }
        }

        let data = self.unvalidated_data()?;
        self.delegate.on_change(&data, name);

        let extra = extra_error.map(|error| ErrorMapping::field(name, error));
        if let Some(data) = self.update_validation_state(extra).await? {
            self.delegate.on_change_valid(&data, name);
        }
        Ok(())
    }

    /* Validation */

    /// Validate one field through the cache, enforcing at most one in-flight
    /// validation per field: a request finding a pending entry awaits it
    /// (outcome ignored) and then re-observes the fresh cache.
    async fn validate_one(&self, name: &str) -> FormResult<Result<(), ValidationError>> {
        let key = CacheKey::field(name);
        loop {
            let pending = {
                let mut state = write_lock(&self.state, "consulting the validation cache")?;
                match state.cache.lookup(&key) {
                    Some(CacheEntry::Valid) => return Ok(Ok(())),
                    Some(CacheEntry::Invalid(error)) => return Ok(Err(error)),
                    Some(CacheEntry::Pending { task, .. }) => task,
                    None => self.start_field_validation(&mut state, name),
                }
            };
            pending.await;
        }
    }

    /// Validate every field concurrently, then the form as a whole.
    /// Whole-form validation runs only on field-valid data; field failures
    /// reject with the aggregated mapping instead.
    async fn validate_all(&self) -> FormResult<Result<FormData, ErrorMapping>> {
        let names = self.field_names()?;

        let outcomes = future::join_all(names.iter().map(|name| self.validate_one(name))).await;

        let mut mapping = ErrorMapping::new();
        for (name, outcome) in names.iter().zip(outcomes) {
            if let Err(error) = outcome? {
                mapping.insert(CacheKey::field(name), error);
            }
        }
        if !mapping.is_empty() {
            return Ok(Err(mapping));
        }

        loop {
            let pending = {
                let mut state =
                    write_lock(&self.state, "consulting the whole-form validation cache")?;
                match state.cache.lookup(&CacheKey::WholeForm) {
                    Some(CacheEntry::Valid) => return Ok(Ok(snapshot_data(&state))),
                    Some(CacheEntry::Invalid(error)) => {
                        return Ok(Err(ErrorMapping::form(error)));
                    }
                    Some(CacheEntry::Pending { task, .. }) => task,
                    None => {
                        let data = snapshot_data(&state);
                        self.start_form_validation(&mut state, data)
                    }
                }
            };
            pending.await;
        }
    }

    /// Start a field validation task and register it as the pending cache
    /// entry. Hidden fields are force-recorded valid before any validator
    /// runs.
    fn start_field_validation(&self, state: &mut FormState, name: &str) -> ValidationHandle {
        let index = field_index_of(state, name);
        let data = snapshot_data(state);
        let field = &state.fields[index];
        let hidden = field.is_hidden();
        let value = field.value();
        let sync_outcome = if hidden {
            Ok(())
        } else {
            field.run_sync_checks(&value)
        };
        let validator = field.validator_hook();

        let delegate = Arc::clone(&self.delegate);
        let shared_state = Arc::clone(&self.state);
        let key = CacheKey::field(name);
        let ticket = state.cache.allocate_ticket();
        let task_key = key.clone();
        let name = name.to_owned();
        let task: BoxFuture<'static, ()> = async move {
            let outcome = if hidden {
                Ok(())
            } else if let Err(error) = sync_outcome {
                Err(error)
            } else {
                let mut outcome = Ok(());
                if let Some(validator) = validator {
                    outcome = validator(value.clone(), data.clone()).await;
                }
                if outcome.is_ok() {
                    outcome = delegate.validate_field(&name, &value, &data).await;
                }
                outcome
            };
            if let Ok(mut state) = shared_state.write() {
                state.cache.settle(&task_key, ticket, outcome);
            }
        }
        .boxed();
        let task = task.shared();
        state.cache.insert_pending(key, ticket, task.clone());
        task
    }

    fn start_form_validation(&self, state: &mut FormState, data: FormData) -> ValidationHandle {
        let delegate = Arc::clone(&self.delegate);
        let shared_state = Arc::clone(&self.state);
        let ticket = state.cache.allocate_ticket();
        let task: BoxFuture<'static, ()> = async move {
            let outcome = delegate.validate(&data).await;
            if let Ok(mut state) = shared_state.write() {
                state.cache.settle(&CacheKey::WholeForm, ticket, outcome);
            }
        }
        .boxed();
        let task = task.shared();
        state.cache.insert_pending(CacheKey::WholeForm, ticket, task.clone());
        task
    }

    /// Background validation pass: show or clear errors, rebroadcast
    /// validity on transitions and re-sync buttons. Resolves with the form
    /// data when valid, `None` otherwise; never rejects on validation
    /// failure. `extra_errors` merges apply failures into the display
    /// without re-running validation.
    pub async fn update_validation_state(
        &self,
        extra_errors: Option<ErrorMapping>,
    ) -> FormResult<Option<FormData>> {
        let extra = extra_errors.filter(|errors| !errors.is_empty());
        match self.validate_all().await? {
            Ok(data) => {
                if let Some(errors) = extra {
                    self.enter_invalid_state(errors)?;
                    return Ok(None);
                }
                {
                    let mut state = write_lock(&self.state, "clearing displayed errors")?;
                    clear_errors(&mut state);
                }
                self.mark_valid(&data)?;
                Ok(Some(data))
            }
            Err(errors) => {
                self.enter_invalid_state(errors)?;
                Ok(None)
            }
        }
    }

    /// Schedule `update_validation_state` shortly after the current burst of
    /// changes, coalescing: a newer request supersedes an already scheduled
    /// one.
    pub async fn update_validation_state_asap(&self) -> FormResult<Option<FormData>> {
        let generation = {
            let mut state = write_lock(&self.state, "scheduling a validation pass")?;
            state.asap_generation += 1;
            state.asap_generation
        };
        Delay::new(ASAP_DELAY).await;
        {
            let state = read_lock(&self.state, "checking a scheduled validation pass")?;
            if state.asap_generation != generation {
                return Ok(None);
            }
        }
        self.update_validation_state(None).await
    }

    fn mark_valid(&self, data: &FormData) -> FormResult<()> {
        let became_valid = {
            let mut state = write_lock(&self.state, "recording form validity")?;
            if state.validity != Validity::Valid {
                state.validity = Validity::Valid;
                true
            } else {
                false
            }
        };
        if became_valid {
            self.delegate.on_valid(data);
            self.update_buttons_state()?;
        }
        Ok(())
    }

    fn enter_invalid_state(&self, mut errors: ErrorMapping) -> FormResult<()> {
        let became_invalid = {
            let mut state = write_lock(&self.state, "displaying validation errors")?;

            // Mute error messages on fields the user has not changed.
            for (key, error) in errors.iter_mut() {
                if let Some(name) = key.field_name() {
                    let changed = state
                        .fields
                        .iter()
                        .find(|field| field.name() == name)
                        .is_some_and(FormField::is_changed);
                    if !changed {
                        *error = error.muted();
                    }
                }
            }

            // No form-level error unless at least one field changed.
            if !state.fields.iter().any(FormField::is_changed) {
                errors.remove(&CacheKey::WholeForm);
            }

            clear_errors(&mut state);
            set_errors(&mut state, &errors);

            if state.validity != Validity::Invalid {
                state.validity = Validity::Invalid;
                true
            } else {
                false
            }
        };
        if became_invalid {
            self.delegate.on_invalid();
            self.update_buttons_state()?;
        }
        Ok(())
    }

    /* Applying */

    /// Gather, validate and apply form data. Enter the progress state for
    /// the duration; on success mark everything applied and close the form
    /// unless configured otherwise. Failures resolve as outcomes, never as
    /// errors.
    pub async fn proceed(&self) -> FormResult<ProceedOutcome> {
        self.set_progress()?;

        if !self.options.continuous_validation {
            // Deferred mode starts from a clean slate and displays whatever
            // validation finds; continuous mode reuses the incrementally
            // maintained cache and error display.
            let mut state = write_lock(&self.state, "resetting state for proceed")?;
            state.cache.clear();
            state.validity = Validity::Unknown;
            clear_errors(&mut state);
        }

        let data = match self.validate_all().await? {
            Ok(data) => data,
            Err(errors) => {
                if !self.options.continuous_validation {
                    let mut state = write_lock(&self.state, "displaying validation errors")?;
                    clear_errors(&mut state);
                    set_errors(&mut state, &errors);
                }
                self.clear_progress()?;
                return Ok(ProceedOutcome::Rejected(errors));
            }
        };

        match self.delegate.apply_data(data).await {
            Ok(()) => {
                {
                    let mut state = write_lock(&self.state, "recording applied form data")?;
                    state.view = ViewState::Applied;
                    for field in &mut state.fields {
                        field.set_applied();
                    }
                }
                self.update_buttons_state()?;
                if self.options.close_on_apply && !self.is_closed()? {
                    self.close()?;
                }
                Ok(ProceedOutcome::Applied)
            }
            Err(ApplyError::Cancelled) => {
                self.clear_progress()?;
                Ok(ProceedOutcome::Cancelled)
            }
            Err(ApplyError::Rejected(errors)) => {
                self.clear_progress()?;
                {
                    let mut state = write_lock(&self.state, "displaying apply errors")?;
                    clear_errors(&mut state);
                    set_errors(&mut state, &errors);
                }
                Ok(ProceedOutcome::Rejected(errors))
            }
        }
    }

    pub async fn default_action(&self) -> FormResult<ProceedOutcome> {
        self.proceed().await
    }

    pub fn cancel_action(&self) -> FormResult<()> {
        self.close()
    }

    /// The form counts as applied when it is itself in the applied state or
    /// when every field is.
    pub fn is_applied(&self) -> FormResult<bool> {
        let state = read_lock(&self.state, "reading applied state")?;
        Ok(state.view.is_applied() || state.fields.iter().all(FormField::is_applied))
    }

    pub fn close(&self) -> FormResult<()> {
        let was_applied = self.is_applied()?;
        let already_closed = {
            let mut state = write_lock(&self.state, "closing the form")?;
            let already_closed = state.closed;
            state.closed = true;
            already_closed
        };
        if !already_closed && !was_applied {
            self.delegate.on_cancel();
        }
        Ok(())
    }

    pub fn is_closed(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading closed state")?.closed)
    }

    /* Form-level view state */

    pub fn set_progress(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "entering progress state")?;
        state.view = ViewState::Progress;
        Ok(())
    }

    pub fn clear_progress(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "leaving progress state")?;
        state.view.clear_progress();
        Ok(())
    }

    pub fn has_progress(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading progress state")?.view.is_progress())
    }

    pub fn set_error(&self, message: impl Into<String>) -> FormResult<()> {
        let mut state = write_lock(&self.state, "setting the form error")?;
        state.view = ViewState::Error(message.into());
        Ok(())
    }

    pub fn clear_error(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "clearing the form error")?;
        state.view.clear_error();
        Ok(())
    }

    pub fn error_message(&self) -> FormResult<Option<String>> {
        let state = read_lock(&self.state, "reading the form error")?;
        Ok(state.view.error_message().map(str::to_owned))
    }
}

impl Closable for Form {
    fn close(&self) -> FormResult<()> {
        Form::close(self)
    }

    fn is_closed(&self) -> FormResult<bool> {
        Form::is_closed(self)
    }
}

fn snapshot_data(state: &FormState) -> FormData {
    state
        .fields
        .iter()
        .map(|field| (field.name().to_owned(), field.value()))
        .collect()
}

fn field_index_of(state: &FormState, name: &str) -> usize {
    state
        .fields
        .iter()
        .position(|field| field.name() == name)
        .unwrap_or_else(|| panic!("field `{name}` is not part of this form"))
}

fn clear_errors(state: &mut FormState) {
    state.view.clear_error();
    for field in &mut state.fields {
        field.clear_error();
    }
}

fn set_errors(state: &mut FormState, errors: &ErrorMapping) {
    for (key, error) in errors.iter() {
        match key {
            CacheKey::WholeForm => state.view = ViewState::Error(error.message().to_owned()),
            CacheKey::Field(name) => {
                if let Some(field) = state.fields.iter_mut().find(|f| f.name() == name) {
                    field.set_error(error.message());
                }
            }
        }
    }
}

/// The error an apply-field rejection surfaces on the field itself: the
/// field's own entry when present, the form-level one otherwise.
fn field_apply_error(errors: &ErrorMapping, name: &str) -> ValidationError {
    errors
        .field_error(name)
        .or_else(|| errors.form_error())
        .cloned()
        .unwrap_or_else(ValidationError::silent)
}

fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
