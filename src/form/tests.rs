use super::*;
use futures::FutureExt;
use futures::executor::block_on;
use futures::future;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Delegate whose hooks count their invocations and whose outcomes can be
/// scripted per test.
#[derive(Clone, Default)]
struct ScriptedDelegate {
    state: Arc<DelegateState>,
}

#[derive(Default)]
struct DelegateState {
    validate_calls: AtomicUsize,
    apply_calls: AtomicUsize,
    valid_events: AtomicUsize,
    invalid_events: AtomicUsize,
    cancel_events: AtomicUsize,
    change_events: Mutex<Vec<String>>,
    change_valid_events: Mutex<Vec<String>>,
    form_error: Mutex<Option<&'static str>>,
    apply_error: Mutex<Option<ApplyError>>,
    applied_data: Mutex<Option<FormData>>,
    apply_field_names: Mutex<Vec<&'static str>>,
    applied_values: Mutex<Vec<(String, FieldValue)>>,
}

impl ScriptedDelegate {
    fn reject_form(&self, message: &'static str) {
        *self.state.form_error.lock().expect("form error lock") = Some(message);
    }

    fn fail_apply(&self, error: ApplyError) {
        *self.state.apply_error.lock().expect("apply error lock") = Some(error);
    }

    fn restore_apply(&self) {
        *self.state.apply_error.lock().expect("apply error lock") = None;
    }

    fn apply_field_for(&self, name: &'static str) {
        self.state
            .apply_field_names
            .lock()
            .expect("apply field lock")
            .push(name);
    }

    fn validate_calls(&self) -> usize {
        self.state.validate_calls.load(Ordering::SeqCst)
    }

    fn apply_calls(&self) -> usize {
        self.state.apply_calls.load(Ordering::SeqCst)
    }

    fn valid_events(&self) -> usize {
        self.state.valid_events.load(Ordering::SeqCst)
    }

    fn invalid_events(&self) -> usize {
        self.state.invalid_events.load(Ordering::SeqCst)
    }

    fn cancel_events(&self) -> usize {
        self.state.cancel_events.load(Ordering::SeqCst)
    }

    fn change_events(&self) -> Vec<String> {
        self.state.change_events.lock().expect("change lock").clone()
    }

    fn change_valid_events(&self) -> Vec<String> {
        self.state
            .change_valid_events
            .lock()
            .expect("change valid lock")
            .clone()
    }

    fn applied_data(&self) -> Option<FormData> {
        self.state
            .applied_data
            .lock()
            .expect("applied data lock")
            .clone()
    }

    fn applied_values(&self) -> Vec<(String, FieldValue)> {
        self.state
            .applied_values
            .lock()
            .expect("applied values lock")
            .clone()
    }
}

impl FormDelegate for ScriptedDelegate {
    fn validate(&self, _data: &FormData) -> ValidationFuture {
        self.state.validate_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = match *self.state.form_error.lock().expect("form error lock") {
            Some(message) => Err(ValidationError::new(message)),
            None => Ok(()),
        };
        future::ready(outcome).boxed()
    }

    fn apply_data(&self, data: FormData) -> ApplyFuture {
        self.state.apply_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.state.apply_error.lock().expect("apply error lock").clone();
        let outcome = match scripted {
            Some(error) => Err(error),
            None => {
                *self.state.applied_data.lock().expect("applied data lock") = Some(data);
                Ok(())
            }
        };
        future::ready(outcome).boxed()
    }

    fn apply_field(&self, value: FieldValue, name: &str) -> Option<ApplyFuture> {
        let scripted = self
            .state
            .apply_field_names
            .lock()
            .expect("apply field lock")
            .iter()
            .any(|scripted| *scripted == name);
        if !scripted {
            return None;
        }
        let failure = self.state.apply_error.lock().expect("apply error lock").clone();
        if let Some(error) = failure {
            return Some(future::ready(Err(error)).boxed());
        }
        self.state
            .applied_values
            .lock()
            .expect("applied values lock")
            .push((name.to_owned(), value));
        Some(future::ready(Ok(())).boxed())
    }

    fn on_change(&self, _data: &FormData, name: &str) {
        self.state
            .change_events
            .lock()
            .expect("change lock")
            .push(name.to_owned());
    }

    fn on_change_valid(&self, _data: &FormData, name: &str) {
        self.state
            .change_valid_events
            .lock()
            .expect("change valid lock")
            .push(name.to_owned());
    }

    fn on_valid(&self, _data: &FormData) {
        self.state.valid_events.fetch_add(1, Ordering::SeqCst);
    }

    fn on_invalid(&self) {
        self.state.invalid_events.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancel(&self) {
        self.state.cancel_events.fetch_add(1, Ordering::SeqCst);
    }
}

fn text_field(name: &str, value: &str) -> FormField {
    FormField::new(name, TextWidget::new(value))
}

fn counted_ok_validator(
    counter: Arc<AtomicUsize>,
) -> impl Fn(FieldValue, FormData) -> futures::future::BoxFuture<'static, Result<(), ValidationError>>
+ Send
+ Sync
+ 'static {
    move |_value, _data| {
        counter.fetch_add(1, Ordering::SeqCst);
        future::ready(Ok(())).boxed()
    }
}

fn continuous() -> FormOptions {
    FormOptions {
        continuous_validation: true,
        ..FormOptions::default()
    }
}

#[test]
fn validation_results_are_cached_until_invalidated() {
    let delegate = ScriptedDelegate::default();
    let form = Form::with_delegate(FormOptions::default(), delegate.clone());
    let runs = Arc::new(AtomicUsize::new(0));
    form.add_field(text_field("email", "user@example.com").validator(counted_ok_validator(runs.clone())))
        .expect("add field");

    block_on(form.data()).expect("first pass").expect("valid data");
    block_on(form.data()).expect("second pass").expect("valid data");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(delegate.validate_calls(), 1);

    block_on(form.change_field_value("email", "other@example.com")).expect("change value");
    block_on(form.data()).expect("third pass").expect("valid data");
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(delegate.validate_calls(), 2);
}

#[test]
fn hidden_fields_are_valid_without_running_validators() {
    let form = Form::new(FormOptions::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let validator_runs = runs.clone();
    form.add_field(
        text_field("secret", "")
            .required(true)
            .hidden(true)
            .validator(move |_value, _data| {
                validator_runs.fetch_add(1, Ordering::SeqCst);
                future::ready(Err(ValidationError::new("never acceptable"))).boxed()
            }),
    )
    .expect("add field");

    let data = block_on(form.data()).expect("data").expect("hidden field must be valid");
    assert_eq!(data.get("secret"), Some(&FieldValue::Text(String::new())));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn showing_a_field_restores_its_validation() {
    let form = Form::new(FormOptions::default());
    form.add_field(text_field("secret", "").required(true).hidden(true))
        .expect("add field");

    block_on(form.data()).expect("data").expect("hidden field must be valid");

    block_on(form.show_field("secret")).expect("show field");
    let errors = block_on(form.data())
        .expect("data")
        .expect_err("visible empty required field must fail");
    assert_eq!(
        errors.field_error("secret").map(ValidationError::message),
        Some("This field is required.")
    );
}

#[test]
fn required_empty_rule_covers_value_shapes() {
    let form = Form::new(FormOptions::default());
    form.add_field(text_field("name", "").required(true))
        .expect("add text field");
    form.add_field(FormField::new("accept", ToggleWidget::new(false)).required(true))
        .expect("add toggle field");
    form.add_field(
        FormField::new("count", NumberWidget::new(Decimal::ZERO)).required(true),
    )
    .expect("add number field");

    let errors = block_on(form.data()).expect("data").expect_err("must fail");
    assert!(errors.field_error("name").is_some());
    assert!(errors.field_error("accept").is_some());
    // Zero is a present value, not a missing one.
    assert!(errors.field_error("count").is_none());
    assert!(errors.form_error().is_none());
}

#[test]
fn whole_form_validation_requires_field_valid_data() {
    let delegate = ScriptedDelegate::default();
    delegate.reject_form("passwords do not match");
    let form = Form::with_delegate(FormOptions::default(), delegate.clone());
    form.add_field(text_field("password", "").required(true))
        .expect("add field");

    let errors = block_on(form.data()).expect("data").expect_err("must fail");
    assert!(errors.field_error("password").is_some());
    assert!(errors.form_error().is_none());
    assert_eq!(delegate.validate_calls(), 0);
}

#[test]
fn errors_aggregate_per_failing_field() {
    let form = Form::new(FormOptions::default());
    form.add_field(
        text_field("a", "x")
            .validator(|_value, _data| future::ready(Err(ValidationError::new("bad a"))).boxed()),
    )
    .expect("add a");
    form.add_field(text_field("b", "x")).expect("add b");
    form.add_field(
        text_field("c", "x")
            .validator(|_value, _data| future::ready(Err(ValidationError::new("bad c"))).boxed()),
    )
    .expect("add c");

    let errors = block_on(form.data()).expect("data").expect_err("must fail");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors.field_error("a").map(ValidationError::message), Some("bad a"));
    assert!(errors.field_error("b").is_none());
    assert_eq!(errors.field_error("c").map(ValidationError::message), Some("bad c"));
}

#[test]
fn overlapping_requests_share_one_validation_run() {
    let form = Form::new(FormOptions::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let validator_runs = runs.clone();
    form.add_field(text_field("slow", "x").validator(move |_value, _data| {
        validator_runs.fetch_add(1, Ordering::SeqCst);
        async move {
            futures_timer::Delay::new(Duration::from_millis(10)).await;
            Ok(())
        }
        .boxed()
    }))
    .expect("add field");

    let (first, second) = block_on(future::join(form.data(), form.data()));
    first.expect("first").expect("valid");
    second.expect("second").expect("valid");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn stale_results_are_discarded_after_invalidation() {
    let form = Form::new(FormOptions::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let validator_runs = runs.clone();
    form.add_field(text_field("x", "old").validator(move |value, _data| {
        validator_runs.fetch_add(1, Ordering::SeqCst);
        async move {
            if value.as_text() == Some("old") {
                thread::sleep(Duration::from_millis(60));
                Err(ValidationError::new("stale value"))
            } else {
                Ok(())
            }
        }
        .boxed()
    }))
    .expect("add field");

    let background = form.clone();
    let pending = thread::spawn(move || block_on(background.data()));
    thread::sleep(Duration::from_millis(10));
    block_on(form.set_field_value("x", "new")).expect("set value");

    let outcome = pending
        .join()
        .expect("join validation thread")
        .expect("lock health")
        .expect("validation of the fresh value must pass");
    assert_eq!(outcome.get("x"), Some(&FieldValue::Text("new".to_owned())));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn proceed_applies_data_and_closes_the_form() {
    let delegate = ScriptedDelegate::default();
    let form = Form::with_delegate(FormOptions::default(), delegate.clone());
    form.add_field(text_field("name", "")).expect("add name");
    form.add_field(FormField::new("accept", ToggleWidget::new(false)))
        .expect("add accept");

    block_on(form.change_field_value("name", "alex")).expect("edit name");
    block_on(form.change_field_value("accept", true)).expect("edit accept");

    let outcome = block_on(form.proceed()).expect("proceed");
    assert_eq!(outcome, ProceedOutcome::Applied);
    assert_eq!(delegate.apply_calls(), 1);

    let applied = delegate.applied_data().expect("delegate received data");
    assert_eq!(applied.get("name"), Some(&FieldValue::Text("alex".to_owned())));
    assert_eq!(applied.get("accept"), Some(&FieldValue::Bool(true)));

    assert!(form.is_applied().expect("applied state"));
    assert!(form.is_closed().expect("closed state"));
    assert!(form.changed_field_names().expect("changed names").is_empty());
    assert_eq!(delegate.cancel_events(), 0);
}

#[test]
fn proceed_rejects_and_displays_validation_errors() {
    let delegate = ScriptedDelegate::default();
    let form = Form::with_delegate(FormOptions::default(), delegate.clone());
    form.add_field(text_field("name", "").required(true))
        .expect("add field");

    let outcome = block_on(form.proceed()).expect("proceed");
    let ProceedOutcome::Rejected(errors) = outcome else {
        panic!("expected a rejection");
    };
    assert!(errors.field_error("name").is_some());
    assert_eq!(delegate.apply_calls(), 0);
    assert!(!form.is_closed().expect("closed state"));
    assert!(!form.has_progress().expect("progress state"));
    assert_eq!(
        form.with_field("name", |field| field.error_message().map(str::to_owned))
            .expect("field view"),
        Some("This field is required.".to_owned())
    );
}

#[test]
fn cancelled_apply_exits_silently() {
    let delegate = ScriptedDelegate::default();
    delegate.fail_apply(ApplyError::Cancelled);
    let form = Form::with_delegate(FormOptions::default(), delegate.clone());
    form.add_field(text_field("name", "alex")).expect("add field");

    let outcome = block_on(form.proceed()).expect("proceed");
    assert_eq!(outcome, ProceedOutcome::Cancelled);
    assert!(!form.is_closed().expect("closed state"));
    assert!(!form.has_progress().expect("progress state"));
    assert_eq!(form.error_message().expect("form error"), None);
    assert!(
        form.with_field("name", |field| field.view().is_normal())
            .expect("field view")
    );

    // The same form can proceed again once the delegate accepts.
    delegate.restore_apply();
    let outcome = block_on(form.proceed()).expect("proceed again");
    assert_eq!(outcome, ProceedOutcome::Applied);
}

#[test]
fn rejected_apply_displays_its_errors() {
    let delegate = ScriptedDelegate::default();
    delegate.fail_apply(ApplyError::message("storage unavailable"));
    let form = Form::with_delegate(FormOptions::default(), delegate.clone());
    form.add_field(text_field("name", "alex")).expect("add field");

    let outcome = block_on(form.proceed()).expect("proceed");
    let ProceedOutcome::Rejected(errors) = outcome else {
        panic!("expected a rejection");
    };
    assert_eq!(errors.form_error().map(ValidationError::message), Some("storage unavailable"));
    assert_eq!(
        form.error_message().expect("form error"),
        Some("storage unavailable".to_owned())
    );
    assert!(!form.is_closed().expect("closed state"));
}

#[test]
fn pristine_fields_show_muted_errors() {
    let delegate = ScriptedDelegate::default();
    let form = Form::with_delegate(continuous(), delegate.clone());
    form.add_field(text_field("email", "").required(true))
        .expect("add email");
    form.add_field(text_field("note", "")).expect("add note");

    block_on(form.change_field_value("note", "hello")).expect("edit note");

    assert_eq!(form.validity().expect("validity"), Validity::Invalid);
    assert_eq!(delegate.invalid_events(), 1);
    // The untouched required field is marked invalid but its message stays
    // suppressed until the user touches it.
    let (is_error, message) = form
        .with_field("email", |field| {
            (field.view().is_error(), field.error_message().map(str::to_owned))
        })
        .expect("email view");
    assert!(is_error);
    assert_eq!(message, Some(String::new()));

    block_on(form.change_field_value("email", "")).expect("edit email");
    assert_eq!(
        form.with_field("email", |field| field.error_message().map(str::to_owned))
            .expect("email view"),
        Some("This field is required.".to_owned())
    );
}

#[test]
fn whole_form_error_waits_for_the_first_change() {
    let delegate = ScriptedDelegate::default();
    delegate.reject_form("quota exceeded");
    let form = Form::with_delegate(continuous(), delegate.clone());
    form.add_field(text_field("name", "alex")).expect("add field");

    let outcome = block_on(form.update_validation_state(None)).expect("update");
    assert_eq!(outcome, None);
    assert_eq!(form.validity().expect("validity"), Validity::Invalid);
    assert_eq!(form.error_message().expect("form error"), None);

    block_on(form.change_field_value("name", "alexa")).expect("edit name");
    assert_eq!(
        form.error_message().expect("form error"),
        Some("quota exceeded".to_owned())
    );
}

#[test]
fn scheduled_validation_passes_coalesce() {
    let delegate = ScriptedDelegate::default();
    let form = Form::with_delegate(FormOptions::default(), delegate.clone());

    let (first, second) = block_on(future::join(
        form.update_validation_state_asap(),
        form.update_validation_state_asap(),
    ));
    assert_eq!(first.expect("first pass"), None);
    assert!(second.expect("second pass").is_some());
    assert_eq!(delegate.validate_calls(), 1);
}

#[test]
fn continuous_change_applies_field_values() {
    let delegate = ScriptedDelegate::default();
    delegate.apply_field_for("email");
    let form = Form::with_delegate(continuous(), delegate.clone());
    form.add_field(text_field("email", "")).expect("add field");

    block_on(form.change_field_value("email", "user@example.com")).expect("edit email");

    assert_eq!(
        delegate.applied_values(),
        vec![("email".to_owned(), FieldValue::Text("user@example.com".to_owned()))]
    );
    assert!(form.with_field("email", FormField::is_applied).expect("field view"));
    assert_eq!(delegate.change_events(), vec!["email".to_owned()]);
    assert_eq!(delegate.change_valid_events(), vec!["email".to_owned()]);
    assert_eq!(form.validity().expect("validity"), Validity::Valid);
    assert_eq!(delegate.valid_events(), 1);
}

#[test]
fn continuous_change_surfaces_apply_rejections() {
    let delegate = ScriptedDelegate::default();
    delegate.apply_field_for("email");
    delegate.fail_apply(ApplyError::Rejected(ErrorMapping::field(
        "email",
        ValidationError::new("address already taken"),
    )));
    let form = Form::with_delegate(continuous(), delegate.clone());
    form.add_field(text_field("email", "")).expect("add field");

    block_on(form.change_field_value("email", "user@example.com")).expect("edit email");

    assert_eq!(
        form.with_field("email", |field| field.error_message().map(str::to_owned))
            .expect("field view"),
        Some("address already taken".to_owned())
    );
    assert_eq!(form.validity().expect("validity"), Validity::Invalid);
    assert!(delegate.change_valid_events().is_empty());
}

#[test]
fn default_button_follows_changed_state() {
    let delegate = ScriptedDelegate::default();
    let form = Form::with_delegate(FormOptions::default(), delegate.clone());
    form.add_field(text_field("name", "")).expect("add field");
    form.add_button(FormButton::new("ok", "Save").default_button(true))
        .expect("add button");

    assert!(!form.with_button("ok", FormButton::is_enabled).expect("button"));
    assert_eq!(block_on(form.press_button("ok")).expect("press"), None);

    block_on(form.change_field_value("name", "alex")).expect("edit name");
    assert!(form.with_button("ok", FormButton::is_enabled).expect("button"));
    assert_eq!(
        block_on(form.press_button("ok")).expect("press"),
        Some(ProceedOutcome::Applied)
    );
}

#[test]
fn default_button_is_enabled_on_an_empty_form() {
    let form = Form::new(FormOptions::default());
    form.add_button(FormButton::new("ok", "Save").default_button(true))
        .expect("add button");
    assert!(form.with_button("ok", FormButton::is_enabled).expect("button"));
}

#[test]
fn default_button_follows_validity_in_continuous_mode() {
    let form = Form::with_delegate(continuous(), ScriptedDelegate::default());
    form.add_field(text_field("name", "alex").required(true))
        .expect("add field");
    form.add_button(FormButton::new("ok", "Save").default_button(true))
        .expect("add button");

    assert!(form.with_button("ok", FormButton::is_enabled).expect("button"));

    block_on(form.change_field_value("name", "")).expect("clear name");
    assert!(!form.with_button("ok", FormButton::is_enabled).expect("button"));

    block_on(form.change_field_value("name", "sam")).expect("restore name");
    assert!(form.with_button("ok", FormButton::is_enabled).expect("button"));
}

#[test]
fn closing_without_apply_reports_cancel_once() {
    let delegate = ScriptedDelegate::default();
    let form = Form::with_delegate(FormOptions::default(), delegate.clone());
    form.add_field(text_field("name", "")).expect("add field");

    form.close().expect("close");
    form.close().expect("close again");
    assert_eq!(delegate.cancel_events(), 1);
}

#[test]
fn field_value_propagates_its_rejection() {
    let form = Form::new(FormOptions::default());
    form.add_field(text_field("name", "").required(true))
        .expect("add field");

    let rejection = block_on(form.field_value("name"))
        .expect("field value")
        .expect_err("empty required field must fail");
    assert_eq!(rejection.message(), "This field is required.");

    block_on(form.set_field_value("name", "alex")).expect("set value");
    let value = block_on(form.field_value("name"))
        .expect("field value")
        .expect("filled field must pass");
    assert_eq!(value, FieldValue::Text("alex".to_owned()));
}

#[test]
fn set_data_resets_changed_state_and_cache() {
    let form = Form::new(FormOptions::default());
    let runs = Arc::new(AtomicUsize::new(0));
    form.add_field(text_field("name", "a").validator(counted_ok_validator(runs.clone())))
        .expect("add field");

    block_on(form.change_field_value("name", "b")).expect("edit name");
    block_on(form.data()).expect("data").expect("valid");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(form.changed_field_names().expect("changed"), vec!["name".to_owned()]);

    let mut replacement = FormData::new();
    replacement.insert("name".to_owned(), FieldValue::Text("c".to_owned()));
    block_on(form.set_data(replacement)).expect("set data");

    assert!(form.changed_field_names().expect("changed").is_empty());
    assert_eq!(
        form.unvalidated_field_value("name").expect("value"),
        Some(FieldValue::Text("c".to_owned()))
    );
    block_on(form.data()).expect("data").expect("valid");
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn number_widget_enforces_its_range() {
    let form = Form::new(FormOptions::default());
    form.add_field(FormField::new(
        "count",
        NumberWidget::new(Decimal::ZERO).min(Decimal::ONE).max(Decimal::TEN),
    ))
    .expect("add field");

    let errors = block_on(form.data()).expect("data").expect_err("zero is below range");
    assert_eq!(
        errors.field_error("count").map(ValidationError::message),
        Some("Value must be at least 1.")
    );

    block_on(form.set_field_value("count", Decimal::TWO)).expect("set value");
    block_on(form.data()).expect("data").expect("in-range value must pass");
}

#[test]
#[should_panic(expected = "already present")]
fn duplicate_field_names_are_fatal() {
    let form = Form::new(FormOptions::default());
    form.add_field(text_field("name", "")).expect("add field");
    let _ = form.add_field(text_field("name", ""));
}
