use dao_session::{
    Dao, DaoError, DaoFactory, DaoFuture, DaoResolution, Observable, ObserverFn, SessionContext,
};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One observable value. Observers get `set` with the current value when
/// they attach and again on every change.
///
/// Observers run while the value is locked, so every observer sees `set`
/// events in the order the values were stored. An observer must not write
/// back into the cell it observes.
#[derive(Default)]
pub struct ValueCell {
    value: Mutex<Value>,
    observers: Mutex<Vec<ObserverFn>>,
}

impl ValueCell {
    pub fn current(&self) -> Value {
        lock(&self.value).clone()
    }

    /// Replace the value and notify observers. Returns the previous value.
    pub fn replace(&self, value: Value) -> Value {
        let mut slot = lock(&self.value);
        let previous = std::mem::replace(&mut *slot, value);
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer("set", std::slice::from_ref(&*slot));
        }
        previous
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }
}

impl Observable for ValueCell {
    fn observe(&self, observer: ObserverFn) {
        let slot = lock(&self.value);
        lock(&self.observers).push(Arc::clone(&observer));
        observer("set", std::slice::from_ref(&*slot));
    }

    fn unobserve(&self, observer: &ObserverFn) {
        lock(&self.observers).retain(|o| !Arc::ptr_eq(o, observer));
    }
}

// A panicking observer must not take the cell down with it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Key/value cells shared by every session of one server.
#[derive(Default)]
pub struct MemoryStore {
    cells: DashMap<String, Arc<ValueCell>, ahash::RandomState>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cell(&self, key: &str) -> Arc<ValueCell> {
        if let Some(cell) = self.cells.get(key) {
            return Arc::clone(cell.value());
        }
        Arc::clone(self.cells.entry(key.to_owned()).or_default().value())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// The DAO one session talks to.
pub struct MemoryDao {
    store: Arc<MemoryStore>,
    session_id: String,
    disposed: AtomicBool,
}

impl MemoryDao {
    pub fn new(store: Arc<MemoryStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn call(&self, method: &Value, args: &[Value]) -> Result<Value, DaoError> {
        if self.is_disposed() {
            return Err(DaoError::new("dao disposed"));
        }

        match (method.as_str(), args) {
            (Some("set"), [key, value]) => {
                let cell = self.store.cell(string_key(key)?);
                cell.replace(value.clone());
                Ok(value.clone())
            }
            (Some("delete"), [key]) => {
                let previous = self.store.cell(string_key(key)?).replace(Value::Null);
                Ok(Value::Bool(!previous.is_null()))
            }
            (Some("set" | "delete"), _) => Err(DaoError::new(format!(
                "wrong number of arguments for {method}"
            ))
            .with_code(json!("BAD_ARGUMENTS"))),
            _ => Err(DaoError::new(format!("unknown method {method}"))
                .with_code(json!("UNKNOWN_METHOD"))),
        }
    }
}

impl Dao for MemoryDao {
    fn request(&self, method: &Value, args: Vec<Value>) -> DaoFuture {
        future::ready(self.call(method, &args)).boxed()
    }

    fn get(&self, what: &Value) -> DaoFuture {
        let result = value_path(what).map(|key| self.store.cell(key).current());
        future::ready(result).boxed()
    }

    fn observable(&self, what: &Value) -> Result<Arc<dyn Observable>, DaoError> {
        let key = value_path(what)?;
        let cell: Arc<dyn Observable> = self.store.cell(key);
        Ok(cell)
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            debug!(session_id = %self.session_id, "Disposed memory dao");
        }
    }
}

/// Hands every session a [`MemoryDao`] over the same store.
#[derive(Clone)]
pub struct MemoryDaoFactory {
    store: Arc<MemoryStore>,
}

impl MemoryDaoFactory {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl DaoFactory for MemoryDaoFactory {
    fn create(&self, ctx: SessionContext<'_>) -> Result<DaoResolution, DaoError> {
        if ctx.session_id.is_empty() {
            return Err(DaoError::new("empty session id"));
        }
        debug!(
            connection_id = ctx.connection_id,
            session_id = ctx.session_id,
            "Creating memory dao"
        );
        Ok(DaoResolution::Ready(Box::new(MemoryDao::new(
            Arc::clone(&self.store),
            ctx.session_id,
        ))))
    }
}

fn string_key(key: &Value) -> Result<&str, DaoError> {
    key.as_str()
        .ok_or_else(|| DaoError::new("key must be a string").with_code(json!("BAD_ARGUMENTS")))
}

fn value_path(what: &Value) -> Result<&str, DaoError> {
    match what.as_array().map(Vec::as_slice) {
        Some([kind, key]) if kind.as_str() == Some("value") => string_key(key),
        _ => Err(DaoError::new(format!("unknown path {what}")).with_code(json!("NOT_FOUND"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dao_session::transport;
    use dao_session::{SessionRegistry, SessionSettings};
    use serde_json::Map;
    use std::time::Duration;

    fn dao() -> MemoryDao {
        MemoryDao::new(MemoryStore::new(), "s-1")
    }

    fn recorder() -> (ObserverFn, Arc<Mutex<Vec<(String, Vec<Value>)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: ObserverFn = Arc::new(move |signal: &str, args: &[Value]| {
            sink.lock().unwrap().push((signal.to_owned(), args.to_vec()));
        });
        (observer, seen)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dao = dao();

        let stored = dao
            .request(&json!("set"), vec![json!("a"), json!({"n": 1})])
            .await
            .unwrap();
        assert_eq!(stored, json!({"n": 1}));
        assert_eq!(dao.get(&json!(["value", "a"])).await.unwrap(), json!({"n": 1}));
        assert_eq!(dao.get(&json!(["value", "b"])).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_delete_reports_whether_value_existed() {
        let dao = dao();
        dao.request(&json!("set"), vec![json!("a"), json!(1)])
            .await
            .unwrap();

        let deleted = dao.request(&json!("delete"), vec![json!("a")]).await;
        assert_eq!(deleted.unwrap(), json!(true));
        let again = dao.request(&json!("delete"), vec![json!("a")]).await;
        assert_eq!(again.unwrap(), json!(false));
    }

    #[tokio::test]
    async fn test_bad_requests_fail_with_codes() {
        let dao = dao();

        let err = dao.request(&json!("frobnicate"), vec![]).await.unwrap_err();
        assert_eq!(err.code, Some(json!("UNKNOWN_METHOD")));

        let err = dao.request(&json!("set"), vec![json!("a")]).await.unwrap_err();
        assert_eq!(err.code, Some(json!("BAD_ARGUMENTS")));

        let err = dao.get(&json!(["other", "a"])).await.unwrap_err();
        assert_eq!(err.code, Some(json!("NOT_FOUND")));
        assert!(dao.observable(&json!("value")).is_err());
    }

    #[test]
    fn test_observe_emits_current_value_then_changes() {
        let dao = dao();
        let (observer, seen) = recorder();

        let observable = dao.observable(&json!(["value", "a"])).unwrap();
        observable.observe(Arc::clone(&observer));
        dao.store.cell("a").replace(json!(5));
        observable.unobserve(&observer);
        dao.store.cell("a").replace(json!(6));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("set".to_owned(), vec![Value::Null]),
                ("set".to_owned(), vec![json!(5)]),
            ]
        );
        assert_eq!(dao.store.cell("a").observer_count(), 0);
    }

    #[test]
    fn test_concurrent_writes_notify_in_storage_order() {
        let store = MemoryStore::new();
        let cell = store.cell("n");
        let (observer, seen) = recorder();
        cell.observe(Arc::clone(&observer));

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        cell.replace(json!(i * 100 + j));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1 + 8 * 50);
        assert_eq!(seen.last().map(|(_, args)| args[0].clone()), Some(cell.current()));
    }

    #[test]
    fn test_cell_survives_panicking_observer() {
        let cell = Arc::new(ValueCell::default());
        let panicking: ObserverFn = Arc::new(|_: &str, args: &[Value]| {
            if args[0] == json!("boom") {
                panic!("observer failed");
            }
        });
        cell.observe(Arc::clone(&panicking));

        let writer = Arc::clone(&cell);
        assert!(std::thread::spawn(move || writer.replace(json!("boom"))).join().is_err());

        cell.unobserve(&panicking);
        assert_eq!(cell.current(), json!("boom"));
        assert_eq!(cell.replace(json!(1)), json!("boom"));
        assert_eq!(cell.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_disposed_dao_rejects_requests() {
        let dao = dao();
        dao.dispose();
        dao.dispose();

        assert!(dao.is_disposed());
        assert!(
            dao.request(&json!("set"), vec![json!("a"), json!(1)])
                .await
                .is_err()
        );
    }

    #[test]
    fn test_factory_rejects_empty_session_id() {
        let factory = MemoryDaoFactory::new(MemoryStore::new());
        let init = Map::new();

        let rejected = factory.create(SessionContext {
            connection_id: "c-1",
            session_id: "",
            init: &init,
        });
        assert_eq!(rejected.err().map(|e| e.message), Some("empty session id".into()));

        let accepted = factory.create(SessionContext {
            connection_id: "c-1",
            session_id: "s-1",
            init: &init,
        });
        assert!(matches!(accepted, Ok(DaoResolution::Ready(_))));
    }

    #[tokio::test]
    async fn test_sessions_share_the_store() {
        let store = MemoryStore::new();
        let registry = SessionRegistry::new(
            Arc::new(MemoryDaoFactory::new(Arc::clone(&store))),
            SessionSettings::default(),
        );

        let (t1, mut watcher) = transport::channel();
        let (t2, mut writer) = transport::channel();
        registry.accept(t1).unwrap();
        registry.accept(t2).unwrap();

        watcher
            .send(&json!({"type": "initializeSession", "sessionId": "w"}))
            .unwrap();
        watcher
            .send(&json!({"type": "observe", "what": ["value", "k"]}))
            .unwrap();
        assert_eq!(
            watcher.recv().await,
            Some(json!({"type": "notify", "what": ["value", "k"], "signal": "set", "args": [null]}))
        );

        writer
            .send(&json!({"type": "initializeSession", "sessionId": "x"}))
            .unwrap();
        writer
            .send(&json!({"type": "request", "requestId": 1, "method": "set", "args": ["k", 7]}))
            .unwrap();
        assert_eq!(
            writer.recv().await,
            Some(json!({"type": "response", "responseId": 1, "response": 7}))
        );
        assert_eq!(
            watcher.recv().await,
            Some(json!({"type": "notify", "what": ["value", "k"], "signal": "set", "args": [7]}))
        );

        watcher.close();
        writer.close();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sessions did not close");
        assert_eq!(store.cell("k").observer_count(), 0);
    }
}
