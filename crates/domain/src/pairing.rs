//! Pairing vocabulary shared by agents and registries.

use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// IO capability announced when registering a pairing agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AgentCapability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    /// No input, no output: pairing is always accepted.
    #[default]
    NoInputNoOutput,
    KeyboardDisplay,
}

impl AgentCapability {
    /// The capability string understood by BlueZ.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DisplayOnly => "DisplayOnly",
            Self::DisplayYesNo => "DisplayYesNo",
            Self::KeyboardOnly => "KeyboardOnly",
            Self::NoInputNoOutput => "NoInputNoOutput",
            Self::KeyboardDisplay => "KeyboardDisplay",
        }
    }

    /// Whether the agent can type a PIN or passkey.
    #[must_use]
    pub fn has_input(self) -> bool {
        matches!(self, Self::KeyboardOnly | Self::KeyboardDisplay)
    }

    /// Whether the agent can show a PIN or passkey.
    #[must_use]
    pub fn has_display(self) -> bool {
        matches!(
            self,
            Self::DisplayOnly | Self::DisplayYesNo | Self::KeyboardDisplay
        )
    }

    /// Whether the agent can answer a yes/no confirmation.
    #[must_use]
    pub fn can_confirm(self) -> bool {
        matches!(self, Self::DisplayYesNo | Self::KeyboardDisplay)
    }
}

impl fmt::Display for AgentCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentCapability {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "displayonly" => Ok(Self::DisplayOnly),
            "displayyesno" => Ok(Self::DisplayYesNo),
            "keyboardonly" => Ok(Self::KeyboardOnly),
            "noinputnooutput" => Ok(Self::NoInputNoOutput),
            "keyboarddisplay" => Ok(Self::KeyboardDisplay),
            _ => Err(ValidationError::UnknownCapability(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_to_no_input_no_output() {
        assert_eq!(AgentCapability::default(), AgentCapability::NoInputNoOutput);
    }

    #[test]
    fn should_parse_bluez_and_snake_case_names() {
        assert_eq!(
            "DisplayYesNo".parse::<AgentCapability>().unwrap(),
            AgentCapability::DisplayYesNo
        );
        assert_eq!(
            "keyboard_display".parse::<AgentCapability>().unwrap(),
            AgentCapability::KeyboardDisplay
        );
    }

    #[test]
    fn should_reject_unknown_capability() {
        let result = "telepathy".parse::<AgentCapability>();
        assert!(matches!(result, Err(ValidationError::UnknownCapability(_))));
    }

    #[test]
    fn should_roundtrip_through_display() {
        let cap = AgentCapability::KeyboardOnly;
        assert_eq!(cap.to_string().parse::<AgentCapability>().unwrap(), cap);
    }
}
