//! quietform: an asynchronous form validation and data-application engine
//! for UI toolkits. Rendering stays with the host toolkit; this crate owns
//! field values, validation caching and the apply/commit protocol.

pub mod contracts;
pub mod form;

pub use form::{
    ApplyError, ButtonStyle, CacheKey, ErrorMapping, FieldValue, Form, FormButton, FormData,
    FormDelegate, FormError, FormField, FormOptions, FormResult, NoopDelegate, NumberWidget,
    ProceedOutcome, TextWidget, ToggleWidget, ValidationError, Validity, ViewState,
};
