use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Value object: Step ID
///
/// Flow editors emit ids either as strings or as bare numbers; both
/// deserialize into the same string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    /// Create a step id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for StepId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        step_id_from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid step id: {}", value)))
    }
}

/// Interpret a JSON value as a step reference. Empty strings and nulls are no reference.
pub fn step_id_from_value(value: &Value) -> Option<StepId> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(StepId(s.trim().to_string())),
        Value::Number(n) => Some(StepId(n.to_string())),
        _ => None,
    }
}

fn optional_step_id<'de, D>(deserializer: D) -> Result<Option<StepId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(step_id_from_value))
}

/// Kind of a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    /// Sends content to the user
    #[default]
    Message,
    /// Payment collection
    Payment,
    /// Access granting
    Access,
    /// Branches on an evaluated condition
    Condition,
    /// Any type the router does not interpret
    Other(String),
}

impl From<String> for StepType {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "message" => StepType::Message,
            "payment" => StepType::Payment,
            "access" => StepType::Access,
            "condition" => StepType::Condition,
            _ => StepType::Other(raw),
        }
    }
}

impl From<StepType> for String {
    fn from(step_type: StepType) -> Self {
        match step_type {
            StepType::Message => "message".to_string(),
            StepType::Payment => "payment".to_string(),
            StepType::Access => "access".to_string(),
            StepType::Condition => "condition".to_string(),
            StepType::Other(raw) => raw,
        }
    }
}

/// An inline button attached to a step
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Button {
    /// Label shown to the user
    #[serde(default)]
    pub text: String,

    /// Step to jump to when pressed
    #[serde(
        default,
        deserialize_with = "optional_step_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_step: Option<StepId>,

    /// Remaining button payload (urls, callback data, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Type-specific step payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepConfig {
    /// Buttons, in display order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,

    /// Branch taken when a condition step evaluates to true
    #[serde(
        default,
        deserialize_with = "optional_step_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub true_step_id: Option<StepId>,

    /// Branch taken when a condition step evaluates to false
    #[serde(
        default,
        deserialize_with = "optional_step_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub false_step_id: Option<StepId>,

    /// Everything else the editor attached to the step
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Named outgoing edges of a step
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Connections {
    /// Automatic successor
    #[serde(
        default,
        deserialize_with = "optional_step_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub next: Option<StepId>,

    /// Successor while an external action is pending
    #[serde(
        default,
        deserialize_with = "optional_step_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub pending: Option<StepId>,

    /// Successor when the step should be retried
    #[serde(
        default,
        deserialize_with = "optional_step_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub retry: Option<StepId>,
}

/// Name of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// `next` edge
    Next,
    /// `pending` edge
    Pending,
    /// `retry` edge
    Retry,
}

impl Connections {
    /// Look up an edge by name
    pub fn get(&self, kind: ConnectionKind) -> Option<&StepId> {
        match kind {
            ConnectionKind::Next => self.next.as_ref(),
            ConnectionKind::Pending => self.pending.as_ref(),
            ConnectionKind::Retry => self.retry.as_ref(),
        }
    }
}

/// A node in a conversation flow, authored externally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Identity, unique within a flow
    pub id: StepId,

    /// Step kind
    #[serde(rename = "type", default)]
    pub step_type: StepType,

    /// Position used to pick the start step when none is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,

    /// Type-specific configuration
    #[serde(default)]
    pub config: StepConfig,

    /// Outgoing edges
    #[serde(default)]
    pub connections: Connections,
}

impl Step {
    /// Create a message step without edges
    pub fn new(id: impl Into<StepId>) -> Self {
        Self {
            id: id.into(),
            step_type: StepType::Message,
            order: None,
            config: StepConfig::default(),
            connections: Connections::default(),
        }
    }

    /// Set the step type
    pub fn with_type(mut self, step_type: StepType) -> Self {
        self.step_type = step_type;
        self
    }

    /// Set the ordering hint
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    /// Set the `next` edge
    pub fn with_next(mut self, next: impl Into<StepId>) -> Self {
        self.connections.next = Some(next.into());
        self
    }

    /// Append a button
    pub fn with_button(mut self, text: impl Into<String>, target: Option<StepId>) -> Self {
        self.config.buttons.push(Button {
            text: text.into(),
            target_step: target,
            extra: Map::new(),
        });
        self
    }

    /// Set both condition branches
    pub fn with_branches(mut self, on_true: Option<StepId>, on_false: Option<StepId>) -> Self {
        self.config.true_step_id = on_true;
        self.config.false_step_id = on_false;
        self
    }

    /// Whether this is a condition step
    pub fn is_condition(&self) -> bool {
        self.step_type == StepType::Condition
    }

    /// Target of the button at `index`, if that button exists and has one
    pub fn button_target(&self, index: usize) -> Option<&StepId> {
        self.config
            .buttons
            .get(index)
            .and_then(|button| button.target_step.as_ref())
    }

    /// All step ids this step references
    pub fn referenced_steps(&self) -> impl Iterator<Item = &StepId> {
        self.config
            .buttons
            .iter()
            .filter_map(|b| b.target_step.as_ref())
            .chain(self.config.true_step_id.iter())
            .chain(self.config.false_step_id.iter())
            .chain(self.connections.next.iter())
            .chain(self.connections.pending.iter())
            .chain(self.connections.retry.iter())
    }
}
