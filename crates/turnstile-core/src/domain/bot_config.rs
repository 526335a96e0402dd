//! Bot configuration as delivered by the configuration collaborator, and the
//! single predicate that decides whether a bot's flow is active.
//!
//! Both the router and the traditional engine call [`flow_is_active`]; no
//! other code path may re-derive the decision.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::step::{step_id_from_value, Step, StepId};

/// Read-only bot configuration
///
/// `flow_enabled` and `flow_steps` are kept raw because upstream storage
/// hands them over as booleans, numbers, strings or serialized JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot identifier
    #[serde(default)]
    pub bot_id: String,

    /// Raw flow switch
    #[serde(default)]
    pub flow_enabled: Value,

    /// Raw step list, structured or serialized
    #[serde(default)]
    pub flow_steps: Value,

    /// Explicit entry step
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub flow_start_step_id: Value,

    /// Channel credential used by the outbound transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_token: Option<String>,

    /// Remaining configuration, passed through to the transport
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BotConfig {
    /// Normalized `flow_enabled`
    pub fn flow_enabled(&self) -> bool {
        normalize_flow_enabled(&self.flow_enabled)
    }

    /// Normalized `flow_steps`
    pub fn flow_steps(&self) -> Vec<Step> {
        normalize_flow_steps(&self.flow_steps)
    }

    /// Normalized `flow_start_step_id`
    pub fn start_step(&self) -> Option<StepId> {
        step_id_from_value(&self.flow_start_step_id)
    }
}

/// Interpret a stringy, boolean or numeric switch
pub fn normalize_flow_enabled(raw: &Value) -> bool {
    match raw {
        Value::Bool(enabled) => *enabled,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on" | "enabled"
        ),
        _ => false,
    }
}

/// Interpret a structured or serialized step list; unparsable input is an empty list
pub fn normalize_flow_steps(raw: &Value) -> Vec<Step> {
    match raw {
        Value::Array(_) => parse_steps(raw.clone()),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Array(_)) => parse_steps(parsed),
            Ok(_) => {
                warn!("flow_steps string does not hold a list, treating as empty");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "flow_steps string is not valid JSON, treating as empty");
                Vec::new()
            }
        },
        _ => Vec::new(),
    }
}

fn parse_steps(list: Value) -> Vec<Step> {
    match serde_json::from_value::<Vec<Step>>(list) {
        Ok(steps) => steps,
        Err(e) => {
            warn!(error = %e, "flow_steps contains malformed steps, treating as empty");
            Vec::new()
        }
    }
}

/// A flow is active iff the switch is on and the step list is non-empty.
/// A missing configuration is inactive.
pub fn flow_is_active(config: Option<&BotConfig>) -> bool {
    match config {
        Some(config) => config.flow_enabled() && !config.flow_steps().is_empty(),
        None => false,
    }
}
