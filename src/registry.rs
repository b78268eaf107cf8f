//! Handler registry: routes command and event type tags to handler values.
//!
//! Dispatch is a declared table populated at startup, keyed by a
//! fully-qualified dotted CamelCase name (e.g. `Bank.Account.Deposit`).
//! A type tag is resolved by splitting on `.`, camelizing each segment,
//! rejoining, and prepending the aggregate root's configured prefix.
//! Lookup failure yields [`Error::InvalidHandler`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::aggregate::Aggregate;
use crate::command::Command;
use crate::error::Error;
use crate::event::{ProposedEvent, RecordedEvent};

/// Boxed error type returned by command handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Evaluates a command against an aggregate's current state.
///
/// # Contract
///
/// `eval` must be a deterministic, side-effect-free function of the
/// aggregate state and the command: the commit path retries it verbatim
/// after a concurrency conflict. It may read `aggregate.state`; it must
/// not perform I/O. Returning an empty vector makes the command a no-op.
pub trait CommandHandler: Send + Sync {
    /// Validate the command and produce the events it implies.
    fn eval(&self, aggregate: &Aggregate, command: &Command) -> Result<Vec<ProposedEvent>, BoxError>;
}

/// Folds one event into aggregate state.
///
/// # Contract
///
/// `apply` must be total and deterministic, and must not fail for any
/// event it was dispatched for: replay depends on folding the same events
/// into the same state every time.
pub trait EventHandler: Send + Sync {
    /// Produce the next state from the current state and the event.
    fn apply(&self, state: Value, event: &RecordedEvent) -> Value;
}

/// Convert a snake_case tag segment to CamelCase (`money_deposited` ->
/// `MoneyDeposited`).
fn camelize(segment: &str) -> String {
    segment
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Convert a CamelCase name segment to snake_case (`MoneyDeposited` ->
/// `money_deposited`).
fn decamelize(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    for (i, c) in segment.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Resolve a dotted lowercase tag to its fully-qualified handler name
/// under `prefix`: split on `.`, camelize each segment, rejoin, concat
/// with the prefix.
pub fn qualified_name(prefix: &str, tag: &str) -> String {
    let camelized = tag.split('.').map(camelize).collect::<Vec<_>>().join(".");
    if prefix.is_empty() {
        camelized
    } else {
        format!("{prefix}.{camelized}")
    }
}

/// Derive the type tag for a fully-qualified name under `prefix`: drop
/// the prefix segments, convert each remaining segment to
/// lowercase-with-underscores, join with `.`.
///
/// Returns `None` when `name` does not live under `prefix`.
///
/// # Examples
///
/// ```
/// use rootline::tag_for;
///
/// let tag = tag_for("Bank.Account", "Bank.Account.Transfer.MoneyDeposited");
/// assert_eq!(tag.as_deref(), Some("transfer.money_deposited"));
/// ```
pub fn tag_for(prefix: &str, name: &str) -> Option<String> {
    let rest = if prefix.is_empty() {
        name
    } else {
        name.strip_prefix(prefix)?.strip_prefix('.')?
    };
    if rest.is_empty() {
        return None;
    }
    Some(
        rest.split('.')
            .map(decamelize)
            .collect::<Vec<_>>()
            .join("."),
    )
}

/// Declared dispatch table mapping fully-qualified names to handlers.
///
/// Registration happens once at startup through the builder-style
/// [`command`](HandlerRegistry::command) and
/// [`event`](HandlerRegistry::event) methods; lookups are lock-free
/// afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    commands: HashMap<String, Arc<dyn CommandHandler>>,
    events: HashMap<String, Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command handler under a fully-qualified dotted
    /// CamelCase name (e.g. `Bank.Account.Deposit`).
    pub fn command(mut self, name: impl Into<String>, handler: impl CommandHandler + 'static) -> Self {
        self.commands.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register an event handler under a fully-qualified dotted
    /// CamelCase name (e.g. `Bank.Account.Deposited`).
    pub fn event(mut self, name: impl Into<String>, handler: impl EventHandler + 'static) -> Self {
        self.events.insert(name.into(), Arc::new(handler));
        self
    }

    /// Resolve the command handler for `tag` under `prefix`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandler`] carrying the unresolved tag.
    pub fn resolve_command(&self, prefix: &str, tag: &str) -> Result<Arc<dyn CommandHandler>, Error> {
        self.commands
            .get(&qualified_name(prefix, tag))
            .cloned()
            .ok_or_else(|| Error::InvalidHandler(tag.to_string()))
    }

    /// Resolve the event handler for `tag` under `prefix`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandler`] carrying the unresolved tag.
    pub fn resolve_event(&self, prefix: &str, tag: &str) -> Result<Arc<dyn EventHandler>, Error> {
        self.events
            .get(&qualified_name(prefix, tag))
            .cloned()
            .ok_or_else(|| Error::InvalidHandler(tag.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl CommandHandler for Echo {
        fn eval(
            &self,
            _aggregate: &Aggregate,
            command: &Command,
        ) -> Result<Vec<ProposedEvent>, BoxError> {
            Ok(vec![ProposedEvent::new("echoed", command.data.clone())])
        }
    }

    struct Keep;

    impl EventHandler for Keep {
        fn apply(&self, state: Value, _event: &RecordedEvent) -> Value {
            state
        }
    }

    #[test]
    fn camelize_segments() {
        assert_eq!(camelize("deposit"), "Deposit");
        assert_eq!(camelize("money_deposited"), "MoneyDeposited");
        assert_eq!(camelize("a_b_c"), "ABC");
    }

    #[test]
    fn decamelize_segments() {
        assert_eq!(decamelize("Deposit"), "deposit");
        assert_eq!(decamelize("MoneyDeposited"), "money_deposited");
    }

    #[test]
    fn qualified_name_concats_prefix() {
        assert_eq!(
            qualified_name("Bank.Account", "transfer.money_deposited"),
            "Bank.Account.Transfer.MoneyDeposited"
        );
        assert_eq!(qualified_name("", "account.deposit"), "Account.Deposit");
    }

    #[test]
    fn tag_for_drops_prefix_and_decamelizes() {
        assert_eq!(
            tag_for("Bank.Account", "Bank.Account.Transfer.MoneyDeposited").as_deref(),
            Some("transfer.money_deposited")
        );
    }

    #[test]
    fn tag_for_rejects_foreign_prefix() {
        assert_eq!(tag_for("Bank.Account", "Shop.Cart.ItemAdded"), None);
        assert_eq!(tag_for("Bank.Account", "Bank.Account"), None);
    }

    #[test]
    fn tag_and_lookup_are_inverse() {
        let prefix = "Bank.Account";
        let name = "Bank.Account.Transfer.MoneyDeposited";
        let tag = tag_for(prefix, name).expect("tag should derive");
        assert_eq!(qualified_name(prefix, &tag), name);
    }

    #[test]
    fn resolve_registered_command() {
        let registry = HandlerRegistry::new().command("Bank.Account.Deposit", Echo);
        let handler = registry.resolve_command("Bank", "account.deposit");
        assert!(handler.is_ok());
    }

    #[test]
    fn resolve_unknown_command_is_invalid_handler() {
        let registry = HandlerRegistry::new();
        let err = match registry.resolve_command("Bank", "account.unknown") {
            Err(e) => e,
            Ok(_) => panic!("resolution should fail"),
        };
        match err {
            Error::InvalidHandler(tag) => assert_eq!(tag, "account.unknown"),
            other => panic!("expected InvalidHandler, got: {other:?}"),
        }
    }

    #[test]
    fn resolve_registered_event() {
        let registry = HandlerRegistry::new().event("Bank.Account.Deposited", Keep);
        assert!(registry.resolve_event("Bank", "account.deposited").is_ok());
    }

    #[test]
    fn commands_and_events_are_separate_namespaces() {
        let registry = HandlerRegistry::new().command("Bank.Account.Deposit", Echo);
        assert!(registry.resolve_event("Bank", "account.deposit").is_err());
    }

    #[test]
    fn debug_lists_registered_names() {
        let registry = HandlerRegistry::new()
            .command("Bank.Account.Deposit", Echo)
            .event("Bank.Account.Deposited", Keep);
        let dbg = format!("{registry:?}");
        assert!(dbg.contains("Bank.Account.Deposit"));
        assert!(dbg.contains("Bank.Account.Deposited"));
    }
}
