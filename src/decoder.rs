//! Payload decoding for live sensors
//!
//! One decoder per sensor topic. Each holds the last successfully decoded
//! state and is only ever fed by its own subscription, so there is exactly
//! one writer per state value.

use crate::classifier::SensorKind;
use crate::topics::{PAYLOAD_CLOSED, PAYLOAD_OFF, PAYLOAD_ON, PAYLOAD_OPEN};
use std::fmt;
use thiserror::Error;

/// Decoded value of one sensor
#[derive(Debug, Clone, PartialEq)]
pub enum SensorState {
    /// Zone inputs: `true` while open
    Binary(bool),
    /// Temperature in °C
    Numeric(f64),
    /// Outputs, keypad lines and version strings
    Text(String),
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorState::Binary(true) => f.write_str("on"),
            SensorState::Binary(false) => f.write_str("off"),
            SensorState::Numeric(value) => write!(f, "{}", value),
            SensorState::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Zone payload other than the open/closed markers
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),

    /// Temperature payload that is not a number
    #[error("invalid temperature value: {0}")]
    InvalidNumber(String),
}

/// Canonical output states; outputs accept any payload, these are advisory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    On,
    Off,
}

impl OutputState {
    pub fn from_payload(payload: &str) -> Option<Self> {
        match payload {
            PAYLOAD_ON => Some(OutputState::On),
            PAYLOAD_OFF => Some(OutputState::Off),
            _ => None,
        }
    }
}

/// Decoder bound to one sensor kind
#[derive(Debug, Clone)]
pub struct PayloadDecoder {
    kind: SensorKind,
    state: Option<SensorState>,
}

impl PayloadDecoder {
    pub fn for_kind(kind: SensorKind) -> Self {
        Self { kind, state: None }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Last successfully decoded state
    pub fn state(&self) -> Option<&SensorState> {
        self.state.as_ref()
    }

    /// Decodes `payload` and stores the result.
    ///
    /// On error the previous state is kept untouched.
    pub fn decode(&mut self, payload: &str) -> Result<&SensorState, DecodeError> {
        let next = match self.kind {
            SensorKind::ZoneInput => match payload {
                PAYLOAD_OPEN => SensorState::Binary(true),
                PAYLOAD_CLOSED => SensorState::Binary(false),
                other => return Err(DecodeError::UnexpectedPayload(other.to_string())),
            },
            SensorKind::Temperature => payload
                .trim()
                .parse::<f64>()
                .map(SensorState::Numeric)
                .map_err(|_| DecodeError::InvalidNumber(payload.to_string()))?,
            SensorKind::Output | SensorKind::KeypadLine | SensorKind::Version => {
                SensorState::Text(payload.to_string())
            }
        };
        Ok(self.state.insert(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_keeps_last_valid_state() {
        let mut decoder = PayloadDecoder::for_kind(SensorKind::ZoneInput);
        assert_eq!(decoder.state(), None);
        assert_eq!(decoder.decode("OPEN"), Ok(&SensorState::Binary(true)));
        assert_eq!(decoder.decode("CLOSED"), Ok(&SensorState::Binary(false)));
        assert_eq!(
            decoder.decode("garbage"),
            Err(DecodeError::UnexpectedPayload("garbage".to_string()))
        );
        assert_eq!(decoder.state(), Some(&SensorState::Binary(false)));
        // markers are exact
        assert!(decoder.decode("open").is_err());
    }

    #[test]
    fn temperature_keeps_last_valid_state() {
        let mut decoder = PayloadDecoder::for_kind(SensorKind::Temperature);
        assert_eq!(decoder.decode("21.5"), Ok(&SensorState::Numeric(21.5)));
        assert!(matches!(decoder.decode("abc"), Err(DecodeError::InvalidNumber(_))));
        assert_eq!(decoder.state(), Some(&SensorState::Numeric(21.5)));
        assert_eq!(decoder.decode(" -3 "), Ok(&SensorState::Numeric(-3.0)));
    }

    #[test]
    fn invalid_first_payload_leaves_no_state() {
        let mut decoder = PayloadDecoder::for_kind(SensorKind::Temperature);
        assert!(decoder.decode("").is_err());
        assert_eq!(decoder.state(), None);
    }

    #[test]
    fn text_kinds_pass_through() {
        for kind in [SensorKind::Output, SensorKind::KeypadLine, SensorKind::Version] {
            let mut decoder = PayloadDecoder::for_kind(kind);
            assert_eq!(
                decoder.decode("UNSET 12:00"),
                Ok(&SensorState::Text("UNSET 12:00".to_string()))
            );
            assert_eq!(decoder.decode(""), Ok(&SensorState::Text(String::new())));
        }
    }

    #[test]
    fn output_tokens_are_advisory() {
        assert_eq!(OutputState::from_payload("ON"), Some(OutputState::On));
        assert_eq!(OutputState::from_payload("OFF"), Some(OutputState::Off));
        assert_eq!(OutputState::from_payload("PULSE"), None);
        let mut decoder = PayloadDecoder::for_kind(SensorKind::Output);
        assert_eq!(decoder.decode("PULSE"), Ok(&SensorState::Text("PULSE".to_string())));
    }

    #[test]
    fn state_display() {
        assert_eq!(SensorState::Binary(true).to_string(), "on");
        assert_eq!(SensorState::Numeric(21.5).to_string(), "21.5");
        assert_eq!(SensorState::Text("v1".to_string()).to_string(), "v1");
    }
}
