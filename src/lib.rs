//! Embedded event-sourced aggregate runtime.
//!
//! `rootline` serializes a stream of commands per business entity (an
//! *aggregate*), evaluates each command against the entity's current
//! state to produce events, appends those events atomically with any
//! commit-time projections under optimistic concurrency, and folds them
//! back into in-memory state. Aggregates are addressed by hybrid-logical-
//! clock ids, hydrated from a snapshot plus trailing events, and run as
//! independent actors: parallel across aggregates, strictly serialized
//! within one.
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`Directory`] | Maps aggregate ids to running actors, starting them on demand |
//! | [`Handle`] | Async handle to one aggregate actor (`evaluate`, `get`, `fetch`, `replay`, `snapshot`, `call`) |
//! | [`HandlerRegistry`] | Declared table routing type tags to command/event handlers |
//! | [`RootConfig`] / [`RootBehavior`] | Aggregate root configuration and lifecycle callbacks |
//! | [`EventStore`] | Store adapter contract: optimistic append + snapshot row |
//! | [`MemoryStore`] / [`JournalStore`] | In-memory and durable JSONL adapters |
//! | [`HybridClock`] | Strictly monotone timestamp source; mints [`AggregateId`]s |
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use rootline::{
//!     Aggregate, BoxError, Command, CommandHandler, Directory, EventHandler,
//!     HandlerRegistry, MemoryStore, ProposedEvent, RecordedEvent, RootBehavior,
//!     RootConfig,
//! };
//! use serde_json::{Value, json};
//!
//! // 1. Write handlers for your command and event type tags.
//! struct Deposit;
//!
//! impl CommandHandler for Deposit {
//!     fn eval(
//!         &self,
//!         _aggregate: &Aggregate,
//!         command: &Command,
//!     ) -> Result<Vec<ProposedEvent>, BoxError> {
//!         Ok(vec![ProposedEvent::new(
//!             "account.deposited",
//!             command.data.clone(),
//!         )])
//!     }
//! }
//!
//! struct Deposited;
//!
//! impl EventHandler for Deposited {
//!     fn apply(&self, mut state: Value, event: &RecordedEvent) -> Value {
//!         let balance = state["balance"].as_i64().unwrap_or(0);
//!         let amount = event.data["amount"].as_i64().unwrap_or(0);
//!         state["balance"] = json!(balance + amount);
//!         state
//!     }
//! }
//!
//! # async fn run() -> Result<(), rootline::Error> {
//! // 2. Declare the registry and open a directory over a store.
//! let registry = Arc::new(
//!     HandlerRegistry::new()
//!         .command("Bank.Account.Deposit", Deposit)
//!         .event("Bank.Account.Deposited", Deposited),
//! );
//! let directory = Directory::builder(Arc::new(MemoryStore::new()), registry).build();
//!
//! // 3. Create an aggregate and send it commands.
//! let root = Arc::new(RootConfig::new("Bank").behavior(
//!     RootBehavior::default().with_initial_state(|| json!({"balance": 0})),
//! ));
//! let (id, handle) = directory.create(&root).await?;
//! handle
//!     .evaluate(Command::new(id, "account.deposit", json!({"amount": 100})))
//!     .await?;
//!
//! let state = handle.get().await?;
//! assert_eq!(state["balance"], 100);
//! # Ok(())
//! # }
//! ```

mod actor;
pub use actor::Handle;
mod aggregate;
pub use aggregate::{Aggregate, RootBehavior, RootConfig};
mod clock;
pub use clock::{AggregateId, ClockError, HlcTimestamp, HybridClock, ParseTimestampError};
mod command;
pub use command::Command;
mod directory;
pub use directory::{Directory, DirectoryBuilder};
mod error;
pub use error::{Error, FaultKind};
mod event;
pub use event::{ProposedEvent, RecordedEvent, Snapshot};
mod journal;
pub use journal::{JournalLayout, JournalStore};
mod memory;
pub use memory::MemoryStore;
mod registry;
pub use registry::{
    BoxError, CommandHandler, EventHandler, HandlerRegistry, qualified_name, tag_for,
};
mod runtime;
pub use runtime::RetryPolicy;
mod store;
pub use store::{EventStore, Projection, ProjectionError, StoreError};
