/// Visual state of a field or form, reflected by the rendering layer.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ViewState {
    #[default]
    Normal,
    Progress,
    Warning(String),
    Error(String),
    Applied,
}

impl ViewState {
    pub fn is_normal(&self) -> bool {
        matches!(self, ViewState::Normal)
    }

    pub fn is_progress(&self) -> bool {
        matches!(self, ViewState::Progress)
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ViewState::Applied)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ViewState::Error(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ViewState::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn warning_message(&self) -> Option<&str> {
        match self {
            ViewState::Warning(message) => Some(message),
            _ => None,
        }
    }

    /// Leave the applied state, if that is the current state.
    pub(super) fn clear_applied(&mut self) {
        if self.is_applied() {
            *self = ViewState::Normal;
        }
    }

    /// Leave the error state, if that is the current state.
    pub(super) fn clear_error(&mut self) {
        if self.is_error() {
            *self = ViewState::Normal;
        }
    }

    /// Leave the progress state, if that is the current state.
    pub(super) fn clear_progress(&mut self) {
        if self.is_progress() {
            *self = ViewState::Normal;
        }
    }
}
