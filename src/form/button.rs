/// Button styles, resolved from the button's role when not set explicitly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ButtonStyle {
    Foreground,
    Interactive,
    Highlight,
    Danger,
}

/// A form button. Rendering is external; the engine tracks identity, role and
/// enablement.
pub struct FormButton {
    id: String,
    caption: String,
    style: Option<ButtonStyle>,
    default_button: bool,
    cancel_button: bool,
    enabled: bool,
}

impl FormButton {
    pub fn new(id: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            caption: caption.into(),
            style: None,
            default_button: false,
            cancel_button: false,
            enabled: true,
        }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn default_button(mut self, default_button: bool) -> Self {
        self.default_button = default_button;
        self
    }

    pub fn cancel_button(mut self, cancel_button: bool) -> Self {
        self.cancel_button = cancel_button;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn set_caption(&mut self, caption: impl Into<String>) {
        self.caption = caption.into();
    }

    pub fn resolved_style(&self) -> ButtonStyle {
        match self.style {
            Some(style) => style,
            None if self.default_button => ButtonStyle::Highlight,
            None if self.cancel_button => ButtonStyle::Foreground,
            None => ButtonStyle::Interactive,
        }
    }

    pub fn is_default(&self) -> bool {
        self.default_button
    }

    pub fn is_cancel(&self) -> bool {
        self.cancel_button
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }
}
