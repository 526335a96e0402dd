//! Step-graph interpreter
//!
//! Each inbound event moves the conversation cursor through the graph. The
//! first hop of a turn applies the full transition function, including the
//! event's button press and the fall-through to terminal. Later hops follow
//! only deterministic edges (condition branches and `next`) and stop at the
//! first step that has none, where the flow waits for the next event.
//!
//! The cursor is persisted after every hop. A per-turn hop ceiling stops
//! cyclic graphs; when it trips, the cursor stays at the last persisted step.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::application::config_resolver::BotConfigResolver;
use crate::application::flow_state_store::FlowStateStore;
use crate::domain::bot_config::{flow_is_active, BotConfig};
use crate::domain::collaborators::ConditionEvaluator;
use crate::domain::event::{InboundEvent, TurnContext};
use crate::domain::flow_state::FlowState;
use crate::domain::step::{Step, StepId};
use crate::error::{CoreError, CoreResult};

/// Flow engine settings
#[derive(Debug, Clone)]
pub struct FlowEngineConfig {
    /// Hop ceiling per inbound event
    pub max_hops: usize,

    /// Expiry of persisted flow state
    pub state_ttl: Duration,
}

impl Default for FlowEngineConfig {
    fn default() -> Self {
        Self {
            max_hops: 50,
            state_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Edge a transition followed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// A pressed button's target
    Button,
    /// Condition evaluated true
    ConditionTrue,
    /// Condition evaluated false
    ConditionFalse,
    /// The `next` connection
    Next,
}

/// Result of the transition function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Move to a step
    Goto(StepId, EdgeKind),
    /// No edge applies
    Terminal,
}

/// Result of processing one event through a flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowOutcome {
    /// Whether the cursor is at terminal
    pub completed: bool,

    /// Cursor after the turn
    pub current_step: Option<StepId>,

    /// Hops taken this turn
    pub hops: usize,

    /// Steps entered this turn, in order
    pub visited: Vec<StepId>,
}

/// Interprets conversation flows
pub struct FlowEngine {
    states: FlowStateStore,
    configs: Arc<BotConfigResolver>,
    evaluator: Option<Arc<dyn ConditionEvaluator>>,
    config: FlowEngineConfig,
}

impl FlowEngine {
    /// Create a flow engine
    pub fn new(
        states: FlowStateStore,
        configs: Arc<BotConfigResolver>,
        config: FlowEngineConfig,
    ) -> Self {
        Self {
            states,
            configs,
            evaluator: None,
            config,
        }
    }

    /// Use `evaluator` for condition steps
    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Engine settings
    pub fn config(&self) -> &FlowEngineConfig {
        &self.config
    }

    /// Whether the bot's flow owns its conversations
    pub async fn is_flow_active(&self, bot_id: &str) -> CoreResult<bool> {
        self.configs.is_flow_active(bot_id).await
    }

    /// Whether the flow engine owns this conversation's turns
    ///
    /// A flow state this process holds decides, as long as the store still
    /// carries its active marker. Otherwise the bot configuration decides,
    /// and the store is not read.
    pub async fn owns_conversation(&self, bot_id: &str, conversation_id: &str) -> CoreResult<bool> {
        if let Some(cached) = self.states.cached(bot_id, conversation_id) {
            if self.states.is_active(bot_id, conversation_id).await? {
                debug!(bot_id, conversation_id, active = cached.is_active, "Engine chosen by flow state");
                return Ok(cached.is_active);
            }
            debug!(bot_id, conversation_id, "Cached flow state lost its active marker, evicting");
            self.states.evict(bot_id, conversation_id);
        }
        self.is_flow_active(bot_id).await
    }

    /// Current state of a conversation, if any
    pub async fn flow_state(&self, bot_id: &str, conversation_id: &str) -> CoreResult<Option<FlowState>> {
        self.states.load(bot_id, conversation_id).await
    }

    /// Build, persist and cache a fresh flow state from `flow_config`
    ///
    /// Activating twice with the same configuration yields the same state.
    pub async fn activate_flow(
        &self,
        bot_id: &str,
        conversation_id: &str,
        flow_config: &BotConfig,
    ) -> CoreResult<FlowState> {
        let state = FlowState::new(
            bot_id,
            conversation_id,
            flow_config.flow_steps(),
            flow_config.start_step(),
        )?;

        self.states.save(&state).await?;
        self.states.set_active(bot_id, conversation_id, true).await?;
        self.mirror_active_flag(bot_id, conversation_id, true).await;

        info!(
            bot_id,
            conversation_id,
            start_step = ?state.start_step,
            steps = state.steps().len(),
            "Activated flow"
        );
        Ok(state)
    }

    /// Clear the active flag and drop cached and persisted state
    pub async fn deactivate_flow(&self, bot_id: &str, conversation_id: &str) -> CoreResult<()> {
        self.states.delete(bot_id, conversation_id).await?;
        self.mirror_active_flag(bot_id, conversation_id, false).await;
        info!(bot_id, conversation_id, "Deactivated flow");
        Ok(())
    }

    async fn mirror_active_flag(&self, bot_id: &str, conversation_id: &str, active: bool) {
        if let Err(e) = self
            .configs
            .provider()
            .set_flow_active_flag(bot_id, conversation_id, active)
            .await
        {
            warn!(bot_id, conversation_id, active, error = %e, "Failed to mirror flow active flag");
        }
    }

    /// Advance the conversation's flow for one inbound event
    ///
    /// The caller must hold the conversation lock.
    pub async fn process(
        &self,
        event: &InboundEvent,
        bot_id: &str,
        conversation_id: &str,
        user_id: &str,
        context: &TurnContext,
    ) -> CoreResult<FlowOutcome> {
        let mut state = match self.states.load(bot_id, conversation_id).await? {
            Some(state) => state,
            None => self.start_from_config(bot_id, conversation_id).await?,
        };

        if !state.is_active {
            return Err(CoreError::FlowInactive {
                bot_id: bot_id.to_string(),
                conversation_id: conversation_id.to_string(),
            });
        }

        debug!(bot_id, conversation_id, user_id, current_step = ?state.current_step, "Processing flow event");
        self.advance(&mut state, event, context).await
    }

    async fn start_from_config(&self, bot_id: &str, conversation_id: &str) -> CoreResult<FlowState> {
        let config = self
            .configs
            .resolve(bot_id)
            .await?
            .ok_or_else(|| CoreError::ConfigNotFound(bot_id.to_string()))?;

        if !flow_is_active(Some(&config)) {
            return Err(CoreError::FlowInactive {
                bot_id: bot_id.to_string(),
                conversation_id: conversation_id.to_string(),
            });
        }
        self.activate_flow(bot_id, conversation_id, &config).await
    }

    /// Bounded hop loop. Every hop is persisted before the next is computed.
    async fn advance(
        &self,
        state: &mut FlowState,
        event: &InboundEvent,
        context: &TurnContext,
    ) -> CoreResult<FlowOutcome> {
        let mut hops = 0usize;
        let mut visited = Vec::new();

        while let Some(current_id) = state.current_step.clone() {
            let step = state.require_step(&current_id)?;

            let inbound = (hops == 0).then_some(event);
            let target = match self.next_step(step, inbound, context)? {
                Transition::Goto(target, edge) => {
                    debug!(from = %current_id, to = %target, ?edge, hop = hops + 1, "Flow transition");
                    Some(target)
                }
                Transition::Terminal if hops == 0 => {
                    debug!(from = %current_id, "Flow reached terminal");
                    None
                }
                // Waiting for the next external event
                Transition::Terminal => break,
            };

            if hops >= self.config.max_hops {
                error!(
                    bot_id = %state.bot_id,
                    conversation_id = %state.conversation_id,
                    step = %current_id,
                    max_hops = self.config.max_hops,
                    "Flow hop ceiling exceeded"
                );
                return Err(CoreError::FlowCycleExceeded {
                    max_hops: self.config.max_hops,
                    last_step: current_id.0,
                });
            }

            state.advance_to(target.clone())?;
            self.states.save(state).await?;
            hops += 1;

            match target {
                Some(id) => visited.push(id),
                None => break,
            }
        }

        Ok(FlowOutcome {
            completed: state.is_completed(),
            current_step: state.current_step.clone(),
            hops,
            visited,
        })
    }

    /// Transition function
    ///
    /// With an event: button target, then condition branch, then `next`,
    /// then terminal. Without one only the condition branch and `next` apply.
    pub fn next_step(
        &self,
        step: &Step,
        event: Option<&InboundEvent>,
        context: &TurnContext,
    ) -> CoreResult<Transition> {
        if let Some(index) = event.filter(|e| e.is_callback()).and_then(|e| e.button_index()) {
            if let Some(target) = step.button_target(index) {
                return Ok(Transition::Goto(target.clone(), EdgeKind::Button));
            }
        }

        if step.is_condition() {
            let outcome = match &self.evaluator {
                Some(evaluator) => evaluator.evaluate(step, event, context)?,
                None => {
                    warn!(step_id = %step.id, "Condition step evaluated without an evaluator, taking the true branch");
                    true
                }
            };
            let branch = if outcome {
                step.config.true_step_id.as_ref().map(|id| (id, EdgeKind::ConditionTrue))
            } else {
                step.config.false_step_id.as_ref().map(|id| (id, EdgeKind::ConditionFalse))
            };
            if let Some((target, edge)) = branch {
                return Ok(Transition::Goto(target.clone(), edge));
            }
        }

        if let Some(next) = &step.connections.next {
            return Ok(Transition::Goto(next.clone(), EdgeKind::Next));
        }

        Ok(Transition::Terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collaborators::ConfigProvider;
    use crate::domain::step::StepType;
    use crate::store::{InMemoryStore, SharedStore};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StaticProvider {
        configs: HashMap<String, BotConfig>,
        flags: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl ConfigProvider for StaticProvider {
        async fn get_bot_config(&self, bot_id: &str) -> CoreResult<Option<BotConfig>> {
            Ok(self.configs.get(bot_id).cloned())
        }

        async fn set_flow_active_flag(&self, _bot: &str, conversation_id: &str, active: bool) -> CoreResult<()> {
            self.flags.lock().unwrap().push((conversation_id.to_string(), active));
            Ok(())
        }
    }

    /// In-memory store counting writes per key
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryStore,
        writes: Mutex<HashMap<String, usize>>,
    }

    impl CountingStore {
        fn writes_to(&self, key: &str) -> usize {
            self.writes.lock().unwrap().get(key).copied().unwrap_or(0)
        }

        async fn is_empty(&self) -> bool {
            self.inner.is_empty().await
        }
    }

    #[async_trait]
    impl SharedStore for CountingStore {
        async fn get(&self, key: &str) -> CoreResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<bool> {
            self.inner.set_nx(key, value, ttl).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<()> {
            *self.writes.lock().unwrap().entry(key.to_string()).or_default() += 1;
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> CoreResult<()> {
            self.inner.delete(key).await
        }

        fn kind(&self) -> &'static str {
            "counting"
        }
    }

    struct FixedEvaluator(bool);

    impl ConditionEvaluator for FixedEvaluator {
        fn evaluate(&self, _: &Step, _: Option<&InboundEvent>, _: &TurnContext) -> CoreResult<bool> {
            Ok(self.0)
        }
    }

    fn bot_config(steps: serde_json::Value) -> BotConfig {
        BotConfig {
            bot_id: "bot".to_string(),
            flow_enabled: json!(true),
            flow_steps: steps,
            ..Default::default()
        }
    }

    struct Fixture {
        engine: FlowEngine,
        store: Arc<CountingStore>,
        provider: Arc<StaticProvider>,
    }

    fn fixture(steps: serde_json::Value, max_hops: usize) -> Fixture {
        let store = Arc::new(CountingStore::default());
        let provider = Arc::new(StaticProvider {
            configs: HashMap::from([("bot".to_string(), bot_config(steps))]),
            flags: Mutex::new(Vec::new()),
        });
        let config = FlowEngineConfig {
            max_hops,
            ..Default::default()
        };
        let engine = FlowEngine::new(
            FlowStateStore::new(store.clone(), config.state_ttl),
            Arc::new(BotConfigResolver::new(provider.clone(), Duration::from_secs(60))),
            config,
        );
        Fixture { engine, store, provider }
    }

    async fn send(engine: &FlowEngine, event: InboundEvent) -> CoreResult<FlowOutcome> {
        engine
            .process(&event, "bot", "conv", "user", &TurnContext::default())
            .await
    }

    #[tokio::test]
    async fn test_linear_flow_advances_then_completes() {
        let f = fixture(
            json!([
                {"id": "1", "order": 1, "connections": {"next": "2"}},
                {"id": "2", "order": 2}
            ]),
            50,
        );

        let first = send(&f.engine, InboundEvent::message("hi")).await.unwrap();
        assert_eq!(first.current_step, Some(StepId::new("2")));
        assert!(!first.completed);
        assert_eq!(first.visited, vec![StepId::new("2")]);

        let second = send(&f.engine, InboundEvent::message("again")).await.unwrap();
        assert!(second.completed);
        assert_eq!(second.current_step, None);

        let value = serde_json::to_value(&second).unwrap();
        assert_eq!(value["completed"], json!(true));
        assert_eq!(value["currentStep"], json!(null));
    }

    #[tokio::test]
    async fn test_button_routes_to_pressed_target() {
        let f = fixture(
            json!([
                {"id": "1", "config": {"buttons": [
                    {"text": "Yes", "target_step": "3"},
                    {"text": "No", "target_step": "4"}
                ]}},
                {"id": "3"},
                {"id": "4"}
            ]),
            50,
        );

        let outcome = send(&f.engine, InboundEvent::button(1)).await.unwrap();
        assert_eq!(outcome.current_step, Some(StepId::new("4")));
        assert_eq!(outcome.visited, vec![StepId::new("4")]);
    }

    #[tokio::test]
    async fn test_button_without_target_falls_through_to_next() {
        let f = fixture(
            json!([
                {"id": "1", "config": {"buttons": [{"text": "Link", "url": "https://x"}]},
                 "connections": {"next": "2"}},
                {"id": "2"}
            ]),
            50,
        );

        let outcome = send(&f.engine, InboundEvent::button(0)).await.unwrap();
        assert_eq!(outcome.current_step, Some(StepId::new("2")));
    }

    #[tokio::test]
    async fn test_automatic_edges_chain_within_one_turn() {
        let f = fixture(
            json!([
                {"id": "1", "order": 0, "connections": {"next": "2"}},
                {"id": "2", "connections": {"next": "3"}},
                {"id": "3", "connections": {"next": "4"}},
                {"id": "4"}
            ]),
            50,
        );

        let outcome = send(&f.engine, InboundEvent::message("go")).await.unwrap();
        assert_eq!(outcome.hops, 3);
        assert_eq!(
            outcome.visited,
            vec![StepId::new("2"), StepId::new("3"), StepId::new("4")]
        );
        assert_eq!(outcome.current_step, Some(StepId::new("4")));
    }

    #[tokio::test]
    async fn test_condition_branches_use_evaluator() {
        let steps = json!([
            {"id": "start", "order": 0, "connections": {"next": "check"}},
            {"id": "check", "type": "condition",
             "config": {"true_step_id": "paid", "false_step_id": "unpaid"}},
            {"id": "paid"},
            {"id": "unpaid"}
        ]);

        for (verdict, expected) in [(true, "paid"), (false, "unpaid")] {
            let mut f = fixture(steps.clone(), 50);
            f.engine = f.engine.with_condition_evaluator(Arc::new(FixedEvaluator(verdict)));

            let outcome = send(&f.engine, InboundEvent::message("x")).await.unwrap();
            assert_eq!(outcome.current_step, Some(StepId::new(expected)));
            assert_eq!(outcome.hops, 2);
        }
    }

    #[tokio::test]
    async fn test_condition_without_evaluator_takes_true_branch() {
        let f = fixture(
            json!([
                {"id": "check", "type": "condition",
                 "config": {"true_step_id": "yes", "false_step_id": "no"}},
                {"id": "yes"},
                {"id": "no"}
            ]),
            50,
        );

        let outcome = send(&f.engine, InboundEvent::message("x")).await.unwrap();
        assert_eq!(outcome.current_step, Some(StepId::new("yes")));
    }

    #[tokio::test]
    async fn test_self_loop_hits_hop_ceiling() {
        let f = fixture(json!([{"id": "1", "connections": {"next": "1"}}]), 7);
        let config = bot_config(json!([{"id": "1", "connections": {"next": "1"}}]));
        f.engine.activate_flow("bot", "conv", &config).await.unwrap();
        let before = f.store.writes_to("flow_state:bot:conv");
        assert_eq!(before, 1);

        let err = send(&f.engine, InboundEvent::message("loop")).await.unwrap_err();
        assert_eq!(f.store.writes_to("flow_state:bot:conv") - before, 7);
        assert_eq!(
            err,
            CoreError::FlowCycleExceeded {
                max_hops: 7,
                last_step: "1".to_string(),
            }
        );

        let state = f.engine.flow_state("bot", "conv").await.unwrap().unwrap();
        assert_eq!(state.current_step, Some(StepId::new("1")));
    }

    #[tokio::test]
    async fn test_missing_target_leaves_state_unchanged() {
        let f = fixture(json!([{"id": "1", "connections": {"next": "ghost"}}]), 50);

        let err = send(&f.engine, InboundEvent::message("x")).await.unwrap_err();
        assert_eq!(err, CoreError::StepNotFound("ghost".to_string()));

        let state = f.engine.flow_state("bot", "conv").await.unwrap().unwrap();
        assert_eq!(state.current_step, Some(StepId::new("1")));
    }

    #[tokio::test]
    async fn test_inactive_state_is_rejected() {
        let f = fixture(json!([{"id": "1"}]), 50);
        let mut state = FlowState::new("bot", "conv", vec![Step::new("1")], None).unwrap();
        state.is_active = false;
        f.store
            .set(
                "flow_state:bot:conv",
                &serde_json::to_string(&state).unwrap(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let err = send(&f.engine, InboundEvent::message("x")).await.unwrap_err();
        assert!(matches!(err, CoreError::FlowInactive { .. }));
    }

    #[tokio::test]
    async fn test_completed_flow_stays_completed() {
        let f = fixture(json!([{"id": "only"}]), 50);

        assert!(send(&f.engine, InboundEvent::message("a")).await.unwrap().completed);
        let again = send(&f.engine, InboundEvent::message("b")).await.unwrap();
        assert!(again.completed);
        assert_eq!(again.hops, 0);
    }

    #[tokio::test]
    async fn test_activation_is_idempotent() {
        let f = fixture(json!([]), 50);
        let config = bot_config(json!([
            {"id": "b", "order": 2},
            {"id": "a", "order": 1, "connections": {"next": "b"}}
        ]));

        let once = f.engine.activate_flow("bot", "conv", &config).await.unwrap();
        let twice = f.engine.activate_flow("bot", "conv", &config).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.steps().len(), 2);
        assert_eq!(twice.start_step, Some(StepId::new("a")));

        let stored = f.engine.flow_state("bot", "conv").await.unwrap().unwrap();
        assert_eq!(stored, once);
        assert_eq!(
            f.store.get("flow_active:bot:conv").await.unwrap().as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_deactivation_clears_everything() {
        let f = fixture(json!([{"id": "1"}]), 50);
        let config = bot_config(json!([{"id": "1"}]));

        f.engine.activate_flow("bot", "conv", &config).await.unwrap();
        f.engine.deactivate_flow("bot", "conv").await.unwrap();
        f.engine.deactivate_flow("bot", "conv").await.unwrap();

        assert!(f.engine.flow_state("bot", "conv").await.unwrap().is_none());
        assert!(f.store.is_empty().await);
        assert_eq!(
            *f.provider.flags.lock().unwrap(),
            vec![
                ("conv".to_string(), true),
                ("conv".to_string(), false),
                ("conv".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_transition_priority() {
        let f = fixture(json!([]), 50);
        let ctx = TurnContext::default();
        let step = Step::new("1")
            .with_type(StepType::Condition)
            .with_button("b", Some(StepId::new("btn")))
            .with_branches(Some(StepId::new("t")), None)
            .with_next("n");

        let press = InboundEvent::button(0);
        assert_eq!(
            f.engine.next_step(&step, Some(&press), &ctx).unwrap(),
            Transition::Goto(StepId::new("btn"), EdgeKind::Button)
        );
        assert_eq!(
            f.engine.next_step(&step, None, &ctx).unwrap(),
            Transition::Goto(StepId::new("t"), EdgeKind::ConditionTrue)
        );

        let plain = Step::new("2").with_next("n");
        assert_eq!(
            f.engine.next_step(&plain, Some(&press), &ctx).unwrap(),
            Transition::Goto(StepId::new("n"), EdgeKind::Next)
        );
        assert_eq!(
            f.engine.next_step(&Step::new("3"), None, &ctx).unwrap(),
            Transition::Terminal
        );
    }
}
