use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::step::{Step, StepId};
use crate::error::{CoreError, CoreResult};

/// Persisted execution cursor plus step graph snapshot for one conversation
///
/// `current_step == None` while active means the flow has completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FlowStateRecord", into = "FlowStateRecord")]
pub struct FlowState {
    /// Bot the flow belongs to
    pub bot_id: String,

    /// Conversation the cursor tracks
    pub conversation_id: String,

    /// Whether the flow drives this conversation
    pub is_active: bool,

    /// Entry step
    pub start_step: Option<StepId>,

    /// Cursor; `None` is terminal
    pub current_step: Option<StepId>,

    steps: Vec<Step>,

    index: HashMap<StepId, usize>,
}

/// Wire shape of a flow state; the lookup index is rebuilt on load
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowStateRecord {
    bot_id: String,
    conversation_id: String,
    is_active: bool,
    start_step: Option<StepId>,
    current_step: Option<StepId>,
    #[serde(default)]
    steps: Vec<Step>,
}

impl From<FlowStateRecord> for FlowState {
    fn from(record: FlowStateRecord) -> Self {
        let (steps, index) = build_index(record.steps);
        Self {
            bot_id: record.bot_id,
            conversation_id: record.conversation_id,
            is_active: record.is_active,
            start_step: record.start_step,
            current_step: record.current_step,
            steps,
            index,
        }
    }
}

impl From<FlowState> for FlowStateRecord {
    fn from(state: FlowState) -> Self {
        Self {
            bot_id: state.bot_id,
            conversation_id: state.conversation_id,
            is_active: state.is_active,
            start_step: state.start_step,
            current_step: state.current_step,
            steps: state.steps,
        }
    }
}

/// Deduplicate by id (first occurrence wins) and index positions
fn build_index(raw: Vec<Step>) -> (Vec<Step>, HashMap<StepId, usize>) {
    let mut steps = Vec::with_capacity(raw.len());
    let mut index = HashMap::with_capacity(raw.len());
    for step in raw {
        if index.contains_key(&step.id) {
            tracing::warn!(step_id = %step.id, "Dropping duplicate step id from flow snapshot");
            continue;
        }
        index.insert(step.id.clone(), steps.len());
        steps.push(step);
    }
    (steps, index)
}

impl FlowState {
    /// Build a fresh, active flow state positioned at its start step
    ///
    /// The start step is `explicit_start` when given (it must exist), otherwise
    /// the step with the lowest `order`, falling back to list position.
    pub fn new(
        bot_id: impl Into<String>,
        conversation_id: impl Into<String>,
        steps: Vec<Step>,
        explicit_start: Option<StepId>,
    ) -> CoreResult<Self> {
        let (steps, index) = build_index(steps);

        let start_step = match explicit_start {
            Some(id) if index.contains_key(&id) => Some(id),
            Some(id) => return Err(CoreError::StepNotFound(id.0)),
            None => steps
                .iter()
                .enumerate()
                .min_by_key(|(position, step)| (step.order.unwrap_or(i64::MAX), *position))
                .map(|(_, step)| step.id.clone()),
        };

        Ok(Self {
            bot_id: bot_id.into(),
            conversation_id: conversation_id.into(),
            is_active: true,
            current_step: start_step.clone(),
            start_step,
            steps,
            index,
        })
    }

    /// Snapshot of the step graph
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Look up a step by id
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.index.get(id).map(|&position| &self.steps[position])
    }

    /// Look up a step by id, failing when the snapshot lacks it
    pub fn require_step(&self, id: &StepId) -> CoreResult<&Step> {
        self.step(id)
            .ok_or_else(|| CoreError::StepNotFound(id.0.clone()))
    }

    /// Whether the cursor has reached terminal
    pub fn is_completed(&self) -> bool {
        self.current_step.is_none()
    }

    /// Move the cursor. The target must be terminal or present in the snapshot.
    pub fn advance_to(&mut self, target: Option<StepId>) -> CoreResult<()> {
        if let Some(id) = &target {
            self.require_step(id)?;
        }
        self.current_step = target;
        Ok(())
    }

    /// Check the cursor invariant: an active cursor names a step in the snapshot
    pub fn validate(&self) -> CoreResult<()> {
        match (&self.current_step, self.is_active) {
            (Some(id), true) => self.require_step(id).map(|_| ()),
            _ => Ok(()),
        }
    }
}
