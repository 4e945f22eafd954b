//! Control-plane vocabulary.

use std::fmt;

/// Acknowledgment code: kill request, kill reply, barrier release, toggle request.
pub const MSG_OK: &str = "OK";

/// Toggle label for the streaming state.
pub const MSG_ON: &str = "ON";

/// Toggle label for the paused state.
pub const MSG_PAUSED: &str = "PAUSED";

/// Two-state toggle carried by the pause channel. Starts `On`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToggleState {
    #[default]
    On,
    Paused,
}

impl ToggleState {
    pub fn label(&self) -> &'static str {
        match self {
            ToggleState::On => MSG_ON,
            ToggleState::Paused => MSG_PAUSED,
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            MSG_ON => Some(ToggleState::On),
            MSG_PAUSED => Some(ToggleState::Paused),
            _ => None,
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            ToggleState::On => ToggleState::Paused,
            ToggleState::Paused => ToggleState::On,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, ToggleState::Paused)
    }
}

impl fmt::Display for ToggleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
