use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Button press payload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Callback {
    /// Index of the pressed button within the current step's button list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_index: Option<usize>,

    /// Raw callback data as delivered by the channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// An inbound conversational event: a chat message or a button callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Message text, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Present when the event is a button callback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<Callback>,

    /// Sender of the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    /// When the event reached the router
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// A plain text message
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            callback: None,
            sender_id: None,
            received_at: Utc::now(),
        }
    }

    /// A button press
    pub fn button(index: usize) -> Self {
        Self {
            text: None,
            callback: Some(Callback {
                button_index: Some(index),
                data: None,
            }),
            sender_id: None,
            received_at: Utc::now(),
        }
    }

    /// Set the sender
    pub fn from_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// Whether this is a button callback
    pub fn is_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Index of the pressed button, for callbacks that carry one
    pub fn button_index(&self) -> Option<usize> {
        self.callback.as_ref().and_then(|cb| cb.button_index)
    }

    /// Text and sender only, as handed to the outbound transport
    pub fn minimal(&self, user_id: &str) -> Self {
        Self {
            text: self.text.clone(),
            callback: None,
            sender_id: Some(user_id.to_string()),
            received_at: self.received_at,
        }
    }
}

/// Caller-supplied context travelling with a turn
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TurnContext {
    /// Channel credential for outbound sends, when the caller has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_token: Option<String>,

    /// Free-form data made available to condition evaluation
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_callback_detection() {
        let event = InboundEvent::button(1);
        assert!(event.is_callback());
        assert_eq!(event.button_index(), Some(1));

        let message = InboundEvent::message("hi");
        assert!(!message.is_callback());
        assert_eq!(message.button_index(), None);
    }

    #[test]
    fn test_minimal_drops_callback() {
        let event = InboundEvent::button(0);
        let minimal = event.minimal("user-1");
        assert!(!minimal.is_callback());
        assert_eq!(minimal.sender_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_deserialize_without_timestamp() {
        let event: InboundEvent = serde_json::from_value(json!({
            "callback": {"button_index": 2, "data": "opt_2"}
        }))
        .unwrap();
        assert_eq!(event.button_index(), Some(2));
        assert!(event.text.is_none());
    }
}
