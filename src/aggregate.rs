//! Aggregate value and root configuration.
//!
//! An [`Aggregate`] is the in-memory `(id, sequence, state)` triple owned
//! by its actor. Its behavior is configured -- not inherited -- through
//! [`RootConfig`]: handler namespace prefixes, commit-time projections,
//! and the [`RootBehavior`] callback bundle.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::clock::AggregateId;
use crate::event::Snapshot;
use crate::store::Projection;

/// In-memory aggregate state owned by a single actor.
///
/// `sequence` is always the highest event sequence folded into `state`.
/// `state` is produced only by the initial-state constructor,
/// `use_snapshot`, or successive event folds -- never mutated directly.
#[derive(Debug, Clone)]
pub struct Aggregate {
    /// Globally unique identity minted at creation.
    pub id: AggregateId,
    /// Highest event sequence folded into `state`; 0 before any event.
    pub sequence: u64,
    /// Opaque application state.
    pub state: Value,
}

impl Aggregate {
    /// Build a fresh aggregate at sequence 0 with the root's initial
    /// state.
    pub fn new(id: AggregateId, root: &RootConfig) -> Self {
        Self {
            id,
            sequence: 0,
            state: (root.behavior.initial_state)(),
        }
    }
}

type InitialStateFn = Arc<dyn Fn() -> Value + Send + Sync>;
type PrepareSnapshotFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
type UseSnapshotFn = Arc<dyn Fn(&Aggregate, &Snapshot) -> Value + Send + Sync>;
type HandleCallFn = Arc<dyn Fn(&Aggregate, Value) -> Value + Send + Sync>;

/// Overridable lifecycle callbacks with defaults.
///
/// | Callback | Default |
/// |---|---|
/// | `initial_state` | `{}` |
/// | `prepare_snapshot` | identity |
/// | `use_snapshot` | the snapshot body |
/// | `handle_call` | `null` |
#[derive(Clone)]
pub struct RootBehavior {
    /// Constructs the state of a never-hydrated aggregate.
    pub initial_state: InitialStateFn,
    /// Turns live state into a serializable snapshot body.
    pub prepare_snapshot: PrepareSnapshotFn,
    /// Turns a stored snapshot back into live state during hydration.
    pub use_snapshot: UseSnapshotFn,
    /// Handles extension messages delivered through the `call` escape
    /// hatch, inside the actor's serialized turn.
    pub handle_call: HandleCallFn,
}

impl Default for RootBehavior {
    fn default() -> Self {
        Self {
            initial_state: Arc::new(|| Value::Object(Map::new())),
            prepare_snapshot: Arc::new(|state: &Value| state.clone()),
            use_snapshot: Arc::new(|_aggregate, snapshot| snapshot.body.clone()),
            handle_call: Arc::new(|_aggregate, _msg| Value::Null),
        }
    }
}

impl std::fmt::Debug for RootBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootBehavior").finish_non_exhaustive()
    }
}

impl RootBehavior {
    /// Replace the initial-state constructor.
    pub fn with_initial_state(
        mut self,
        f: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.initial_state = Arc::new(f);
        self
    }

    /// Replace the snapshot preparation callback.
    pub fn with_prepare_snapshot(
        mut self,
        f: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.prepare_snapshot = Arc::new(f);
        self
    }

    /// Replace the snapshot restoration callback.
    pub fn with_use_snapshot(
        mut self,
        f: impl Fn(&Aggregate, &Snapshot) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.use_snapshot = Arc::new(f);
        self
    }

    /// Replace the extension-call handler.
    pub fn with_handle_call(
        mut self,
        f: impl Fn(&Aggregate, Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.handle_call = Arc::new(f);
        self
    }
}

/// Static configuration of an aggregate root.
///
/// Both prefixes default to the root's name; projections default to
/// empty.
#[derive(Clone)]
pub struct RootConfig {
    /// Root name, e.g. `Bank`.
    pub name: String,
    /// Namespace prefix for command handler lookup.
    pub command_prefix: String,
    /// Namespace prefix for event handler lookup.
    pub event_prefix: String,
    /// Projections committed atomically with every append.
    pub projections: Vec<Arc<dyn Projection>>,
    /// Lifecycle callbacks.
    pub behavior: RootBehavior,
}

impl std::fmt::Debug for RootConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootConfig")
            .field("name", &self.name)
            .field("command_prefix", &self.command_prefix)
            .field("event_prefix", &self.event_prefix)
            .field(
                "projections",
                &self.projections.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl RootConfig {
    /// Configure a root with both prefixes defaulting to `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            command_prefix: name.clone(),
            event_prefix: name.clone(),
            name,
            projections: Vec::new(),
            behavior: RootBehavior::default(),
        }
    }

    /// Override the command handler prefix.
    pub fn command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    /// Override the event handler prefix.
    pub fn event_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.event_prefix = prefix.into();
        self
    }

    /// Attach a commit-time projection.
    pub fn projection(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projections.push(projection);
        self
    }

    /// Replace the lifecycle callbacks.
    pub fn behavior(mut self, behavior: RootBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    //! A bank-account aggregate used as a fixture across the crate's
    //! tests: deposits and withdrawals over a `{"balance": n}` state,
    //! with overdrafts rejected by emitting no events.

    use std::sync::Arc;

    use serde_json::{Value, json};

    use super::{Aggregate, RootBehavior, RootConfig};
    use crate::command::Command;
    use crate::event::{ProposedEvent, RecordedEvent};
    use crate::registry::{BoxError, CommandHandler, EventHandler, HandlerRegistry};

    fn amount_of(data: &Value) -> Result<i64, BoxError> {
        data["amount"]
            .as_i64()
            .ok_or_else(|| "amount must be an integer".into())
    }

    fn balance_of(state: &Value) -> i64 {
        state["balance"].as_i64().unwrap_or(0)
    }

    pub(crate) struct Deposit;

    impl CommandHandler for Deposit {
        fn eval(
            &self,
            _aggregate: &Aggregate,
            command: &Command,
        ) -> Result<Vec<ProposedEvent>, BoxError> {
            let amount = amount_of(&command.data)?;
            Ok(vec![ProposedEvent::new(
                "account.deposited",
                json!({"amount": amount}),
            )])
        }
    }

    pub(crate) struct Withdraw;

    impl CommandHandler for Withdraw {
        fn eval(
            &self,
            aggregate: &Aggregate,
            command: &Command,
        ) -> Result<Vec<ProposedEvent>, BoxError> {
            let amount = amount_of(&command.data)?;
            if amount > balance_of(&aggregate.state) {
                // Overdraft: reject by emitting nothing.
                return Ok(vec![]);
            }
            Ok(vec![ProposedEvent::new(
                "account.withdrawn",
                json!({"amount": amount}),
            )])
        }
    }

    /// Always fails; exercises the eval fault path.
    pub(crate) struct Broken;

    impl CommandHandler for Broken {
        fn eval(
            &self,
            _aggregate: &Aggregate,
            _command: &Command,
        ) -> Result<Vec<ProposedEvent>, BoxError> {
            Err("ledger offline".into())
        }
    }

    /// Always panics; exercises the panic fault path.
    pub(crate) struct Explosive;

    impl CommandHandler for Explosive {
        fn eval(
            &self,
            _aggregate: &Aggregate,
            _command: &Command,
        ) -> Result<Vec<ProposedEvent>, BoxError> {
            panic!("handler exploded");
        }
    }

    pub(crate) struct Deposited;

    impl EventHandler for Deposited {
        fn apply(&self, mut state: Value, event: &RecordedEvent) -> Value {
            let next = balance_of(&state) + event.data["amount"].as_i64().unwrap_or(0);
            state["balance"] = json!(next);
            state
        }
    }

    pub(crate) struct Withdrawn;

    impl EventHandler for Withdrawn {
        fn apply(&self, mut state: Value, event: &RecordedEvent) -> Value {
            let next = balance_of(&state) - event.data["amount"].as_i64().unwrap_or(0);
            state["balance"] = json!(next);
            state
        }
    }

    /// Registry covering the bank-account fixture handlers.
    pub(crate) fn bank_registry() -> HandlerRegistry {
        HandlerRegistry::new()
            .command("Bank.Account.Deposit", Deposit)
            .command("Bank.Account.Withdraw", Withdraw)
            .command("Bank.Account.Broken", Broken)
            .command("Bank.Account.Explosive", Explosive)
            .event("Bank.Account.Deposited", Deposited)
            .event("Bank.Account.Withdrawn", Withdrawn)
    }

    /// Root configuration for the account aggregate.
    pub(crate) fn account_root() -> Arc<RootConfig> {
        Arc::new(RootConfig::new("Bank").behavior(
            RootBehavior::default().with_initial_state(|| json!({"balance": 0})),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::{Deposit, Deposited, Withdraw, account_root};
    use super::*;
    use crate::clock::HybridClock;
    use crate::command::Command;
    use crate::event::RecordedEvent;
    use crate::registry::{CommandHandler, EventHandler};
    use serde_json::json;

    fn fresh_aggregate(root: &RootConfig) -> Aggregate {
        let clock = HybridClock::with_node(1);
        Aggregate::new(
            AggregateId::new(clock.now().expect("now should succeed")),
            root,
        )
    }

    #[test]
    fn default_initial_state_is_empty_object() {
        let root = RootConfig::new("Bank");
        let aggregate = fresh_aggregate(&root);
        assert_eq!(aggregate.state, json!({}));
        assert_eq!(aggregate.sequence, 0);
    }

    #[test]
    fn default_prepare_snapshot_is_identity() {
        let behavior = RootBehavior::default();
        let state = json!({"balance": 12});
        assert_eq!((behavior.prepare_snapshot)(&state), state);
    }

    #[test]
    fn default_use_snapshot_returns_body() {
        let root = RootConfig::new("Bank");
        let aggregate = fresh_aggregate(&root);
        let snapshot = Snapshot {
            aggregate_id: aggregate.id,
            sequence: 3,
            body: json!({"balance": 9}),
        };
        assert_eq!(
            (root.behavior.use_snapshot)(&aggregate, &snapshot),
            json!({"balance": 9})
        );
    }

    #[test]
    fn default_handle_call_returns_null() {
        let root = RootConfig::new("Bank");
        let aggregate = fresh_aggregate(&root);
        assert_eq!(
            (root.behavior.handle_call)(&aggregate, json!({"ping": true})),
            Value::Null
        );
    }

    #[test]
    fn prefixes_default_to_name() {
        let root = RootConfig::new("Bank");
        assert_eq!(root.command_prefix, "Bank");
        assert_eq!(root.event_prefix, "Bank");
        assert!(root.projections.is_empty());
    }

    #[test]
    fn prefixes_can_be_overridden() {
        let root = RootConfig::new("Bank")
            .command_prefix("Bank.Commands")
            .event_prefix("Bank.Events");
        assert_eq!(root.command_prefix, "Bank.Commands");
        assert_eq!(root.event_prefix, "Bank.Events");
    }

    #[test]
    fn deposit_emits_deposited() {
        let root = account_root();
        let aggregate = fresh_aggregate(&root);
        let cmd = Command::new(aggregate.id, "account.deposit", json!({"amount": 100}));

        let events = Deposit.eval(&aggregate, &cmd).expect("eval should succeed");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "account.deposited");
        assert_eq!(events[0].data["amount"], 100);
    }

    #[test]
    fn overdraft_emits_nothing() {
        let root = account_root();
        let aggregate = fresh_aggregate(&root);
        let cmd = Command::new(aggregate.id, "account.withdraw", json!({"amount": 1000}));

        let events = Withdraw
            .eval(&aggregate, &cmd)
            .expect("eval should succeed");
        assert!(events.is_empty());
    }

    #[test]
    fn deposited_folds_balance() {
        let root = account_root();
        let aggregate = fresh_aggregate(&root);
        let clock = HybridClock::with_node(2);
        let event = RecordedEvent {
            aggregate_id: aggregate.id,
            sequence: 1,
            event_type: "account.deposited".to_string(),
            data: json!({"amount": 40}),
            timestamp: clock.now().expect("now should succeed"),
        };

        let state = Deposited.apply(aggregate.state, &event);
        assert_eq!(state["balance"], 40);
    }

    #[test]
    fn non_integer_amount_is_an_eval_error() {
        let root = account_root();
        let aggregate = fresh_aggregate(&root);
        let cmd = Command::new(aggregate.id, "account.deposit", json!({"amount": "ten"}));

        let result = Deposit.eval(&aggregate, &cmd);
        assert!(result.is_err());
    }
}
