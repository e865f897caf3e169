use chrono::NaiveDateTime;
use std::borrow::Cow;
use std::fmt;

const PREVIEW_CHARS: usize = 24;

/// One inbound MQTT message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Delivered from the broker's retained store rather than live
    pub retained: bool,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = self.payload_str();
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        if text.chars().count() > PREVIEW_CHARS {
            write!(f, "{} - {}: {}...", self.timestamp, self.topic, preview)
        } else {
            write!(f, "{} - {}: {}", self.timestamp, self.topic, preview)
        }
    }
}

impl MqttMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retained: bool) -> Self {
        MqttMessage {
            topic: topic.into(),
            payload: payload.into(),
            retained,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    /// Payload as text; invalid UTF-8 is replaced rather than rejected
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_previews_long_payloads() {
        let msg = MqttMessage::new("a/b", "x".repeat(100), false);
        let shown = msg.to_string();
        assert!(shown.ends_with("..."));
        assert!(shown.contains("a/b"));

        let short = MqttMessage::new("a/b", "OPEN", true);
        assert!(short.to_string().ends_with("a/b: OPEN"));
    }

    #[test]
    fn payload_str_is_lossy() {
        let msg = MqttMessage::new("t", vec![0x4f, 0xff, 0x4b], false);
        assert_eq!(msg.payload_str(), "O\u{fffd}K");
    }
}
