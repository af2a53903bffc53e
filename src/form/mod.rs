//! Asynchronous form engine: named fields backed by value widgets, a
//! cache-coherent validation pipeline and the apply/commit protocol.
//!
//! A [`Form`] owns an ordered set of [`FormField`]s and [`FormButton`]s.
//! Validation results are memoized per field plus one whole-form slot, with
//! at most one validation in flight per slot; a field change invalidates its
//! slot and the whole-form slot. [`Form::proceed`] validates everything,
//! hands the data to the delegate's apply hook and marks the form applied.

mod button;
mod cache;
mod controller;
mod errors;
mod field;
mod value;
mod view_state;
mod widgets;

pub use button::{ButtonStyle, FormButton};
pub use cache::CacheKey;
pub use controller::{
    ApplyFuture, Form, FormDelegate, FormOptions, NoopDelegate, ProceedOutcome, ValidationFuture,
    Validity,
};
pub use errors::{ApplyError, ErrorMapping, FormError, FormResult, ValidationError};
pub use field::{FieldChangeFn, FieldValidatorFn, FormField};
pub use value::{FieldValue, FormData};
pub use view_state::ViewState;
pub use widgets::{NumberWidget, TextWidget, ToggleWidget};

#[cfg(test)]
mod tests;
