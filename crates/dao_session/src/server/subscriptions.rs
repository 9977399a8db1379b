use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::debug;

use crate::dao::{Dao, Observable, ObserverFn};
use crate::error::SessionError;
use crate::message::ServerMessage;
use crate::path::PathKey;
use crate::server::reporter::Reporter;

/// A live subscription: the observable and the callback registered on it.
///
/// Both halves live in one record so they are always added and removed
/// together.
struct Subscription {
    observable: Arc<dyn Observable>,
    observer: ObserverFn,
}

impl Subscription {
    fn detach(self) {
        self.observable.unobserve(&self.observer);
    }
}

/// At most one subscription per canonical path.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: HashMap<PathKey, Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe `what` on the DAO and forward every signal as a `notify`.
    ///
    /// A second observation of the same path is a protocol violation. A DAO
    /// that cannot produce the observable is answered with an `error` signal
    /// on that path and leaves the session open.
    pub fn subscribe(
        &mut self,
        dao: &dyn Dao,
        what: Value,
        reporter: &Reporter,
    ) -> Result<(), SessionError> {
        match self.entries.entry(PathKey::new(&what)) {
            Entry::Occupied(entry) => Err(SessionError::Client(format!(
                "second observation of the same observable {}",
                entry.key()
            ))),
            Entry::Vacant(slot) => {
                let observable = match dao.observable(&what) {
                    Ok(observable) => observable,
                    Err(e) => {
                        reporter.send(&ServerMessage::Notify {
                            what,
                            signal: "error".to_owned(),
                            args: vec![Value::from(e.message.clone())],
                        });
                        reporter.report(&SessionError::Observe(e));
                        return Ok(());
                    }
                };

                debug!(
                    connection_id = %reporter.connection_id(),
                    path = %slot.key(),
                    "Observing"
                );
                let observer = forward_to_client(what, reporter.clone());
                observable.observe(Arc::clone(&observer));
                slot.insert(Subscription {
                    observable,
                    observer,
                });
                Ok(())
            }
        }
    }

    /// Stop observing `what`. Unknown paths are ignored.
    pub fn unsubscribe(&mut self, what: &Value) -> bool {
        match self.entries.remove(&PathKey::new(what)) {
            Some(subscription) => {
                subscription.detach();
                true
            }
            None => false,
        }
    }

    /// Detach every subscription. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, subscription) in self.entries.drain() {
            subscription.detach();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn forward_to_client(what: Value, reporter: Reporter) -> ObserverFn {
    Arc::new(move |signal: &str, args: &[Value]| {
        reporter.send(&ServerMessage::Notify {
            what: what.clone(),
            signal: signal.to_owned(),
            args: args.to_vec(),
        });
    })
}
