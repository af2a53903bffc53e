use rust_decimal::Decimal;

use crate::contracts::FieldWidget;

use super::value::FieldValue;

/// Plain text storage backing a single-line or multi-line text field.
#[derive(Clone, Debug, Default)]
pub struct TextWidget {
    value: String,
    readonly: bool,
    enabled: bool,
}

impl TextWidget {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            readonly: false,
            enabled: true,
        }
    }
}

impl FieldWidget for TextWidget {
    fn value(&self) -> FieldValue {
        FieldValue::Text(self.value.clone())
    }

    fn set_value(&mut self, value: FieldValue) {
        self.value = match value {
            FieldValue::Text(text) => text,
            FieldValue::Null => String::new(),
            other => format!("{other:?}"),
        };
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
    }
}

/// Boolean storage backing a checkbox or switch field.
#[derive(Clone, Debug, Default)]
pub struct ToggleWidget {
    value: bool,
}

impl ToggleWidget {
    pub fn new(value: bool) -> Self {
        Self { value }
    }
}

impl FieldWidget for ToggleWidget {
    fn value(&self) -> FieldValue {
        FieldValue::Bool(self.value)
    }

    fn set_value(&mut self, value: FieldValue) {
        self.value = value.as_bool().unwrap_or(false);
    }
}

/// Decimal storage backing a numeric up-down field, with an optional range
/// enforced as the structural check.
#[derive(Clone, Debug, Default)]
pub struct NumberWidget {
    value: Option<Decimal>,
    min: Option<Decimal>,
    max: Option<Decimal>,
}

impl NumberWidget {
    pub fn new(value: impl Into<Option<Decimal>>) -> Self {
        Self {
            value: value.into(),
            min: None,
            max: None,
        }
    }

    pub fn min(mut self, min: Decimal) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: Decimal) -> Self {
        self.max = Some(max);
        self
    }
}

impl FieldWidget for NumberWidget {
    fn value(&self) -> FieldValue {
        match self.value {
            Some(number) => FieldValue::Number(number),
            None => FieldValue::Null,
        }
    }

    fn set_value(&mut self, value: FieldValue) {
        self.value = value.as_number();
    }

    fn validate_widget(&self, value: &FieldValue) -> Option<String> {
        let number = match value {
            FieldValue::Number(number) => *number,
            FieldValue::Null => return None,
            _ => return Some("Value must be a number.".to_owned()),
        };

        match (self.min, self.max) {
            (Some(min), _) if number < min => Some(format!("Value must be at least {min}.")),
            (_, Some(max)) if number > max => Some(format!("Value must be at most {max}.")),
            _ => None,
        }
    }
}
