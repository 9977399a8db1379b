//! Scripted DAO and factories for unit tests.

use futures::FutureExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::dao::{
    Dao, DaoFactory, DaoFuture, DaoResolution, Observable, ObserverFn, SessionContext,
};
use crate::error::DaoError;
use crate::path::PathKey;

#[derive(Clone, Default)]
pub(crate) struct TestObservable {
    observers: Arc<Mutex<Vec<ObserverFn>>>,
}

impl TestObservable {
    pub fn emit(&self, signal: &str, args: &[Value]) {
        let observers = self.observers.lock().unwrap().clone();
        for observer in observers {
            observer(signal, args);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }
}

impl Observable for TestObservable {
    fn observe(&self, observer: ObserverFn) {
        self.observers.lock().unwrap().push(observer);
    }

    fn unobserve(&self, observer: &ObserverFn) {
        self.observers
            .lock()
            .unwrap()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }
}

#[derive(Default)]
struct TestDaoState {
    calls: Mutex<Vec<String>>,
    observables: Mutex<HashMap<PathKey, TestObservable>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<Value>>>,
    disposed: AtomicUsize,
    used_after_dispose: AtomicUsize,
}

/// A DAO whose behaviour is keyed on the method or path it is called with.
///
/// - `request("echo", [v])` resolves to `v`
/// - `request("fail", _)` rejects with `{message: "bad", code: 42}`
/// - `request("gate", [name])` resolves once the test releases [`TestDao::gate`]
/// - `get(["missing"])` rejects; any other `get` resolves to `{"path": what}`
/// - `observable(["broken"])` fails
#[derive(Clone, Default)]
pub(crate) struct TestDao {
    state: Arc<TestDaoState>,
}

impl TestDao {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request, event and get the DAO has seen, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn disposed(&self) -> usize {
        self.state.disposed.load(Ordering::SeqCst)
    }

    pub fn used_after_dispose(&self) -> usize {
        self.state.used_after_dispose.load(Ordering::SeqCst)
    }

    pub fn observable_at(&self, what: &Value) -> TestObservable {
        self.state
            .observables
            .lock()
            .unwrap()
            .entry(PathKey::new(what))
            .or_default()
            .clone()
    }

    /// Hold `request("gate", [name])` until the returned sender fires.
    pub fn gate(&self, name: &str) -> oneshot::Sender<Value> {
        let (tx, rx) = oneshot::channel();
        self.state
            .gates
            .lock()
            .unwrap()
            .insert(name.to_owned(), rx);
        tx
    }

    fn record(&self, call: String) {
        if self.disposed() > 0 {
            self.state.used_after_dispose.fetch_add(1, Ordering::SeqCst);
        }
        self.state.calls.lock().unwrap().push(call);
    }

    /// A factory that hands this DAO out synchronously.
    pub fn factory(&self) -> Arc<dyn DaoFactory> {
        Arc::new(ReadyFactory { dao: self.clone() })
    }

    /// A factory whose resolution completes when the returned sender fires.
    pub fn pending_factory(&self) -> (Arc<dyn DaoFactory>, oneshot::Sender<Result<(), DaoError>>) {
        let (tx, rx) = oneshot::channel();
        let factory = PendingFactory {
            dao: self.clone(),
            release: Mutex::new(Some(rx)),
        };
        (Arc::new(factory), tx)
    }
}

impl Dao for TestDao {
    fn request(&self, method: &Value, args: Vec<Value>) -> DaoFuture {
        self.record(format!("request {method} {}", Value::Array(args.clone())));
        match method.as_str() {
            Some("echo") => {
                let value = args.into_iter().next().unwrap_or(Value::Null);
                async move { Ok(value) }.boxed()
            }
            Some("fail") => async { Err(DaoError::new("bad").with_code(42)) }.boxed(),
            Some("gate") => {
                let name = args.first().and_then(Value::as_str).unwrap_or_default();
                let gate = self.state.gates.lock().unwrap().remove(name);
                async move {
                    match gate {
                        Some(rx) => rx.await.map_err(|_| DaoError::new("gate dropped")),
                        None => Err(DaoError::new("no such gate")),
                    }
                }
                .boxed()
            }
            _ => async { Ok(Value::Null) }.boxed(),
        }
    }

    fn get(&self, what: &Value) -> DaoFuture {
        self.record(format!("get {what}"));
        if *what == json!(["missing"]) {
            return async { Err(DaoError::new("not found").with_code("NOT_FOUND")) }.boxed();
        }
        let response = json!({ "path": what });
        async move { Ok(response) }.boxed()
    }

    fn observable(&self, what: &Value) -> Result<Arc<dyn Observable>, DaoError> {
        if self.disposed() > 0 {
            self.state.used_after_dispose.fetch_add(1, Ordering::SeqCst);
        }
        if *what == json!(["broken"]) {
            return Err(DaoError::new("no such observable"));
        }
        Ok(Arc::new(self.observable_at(what)))
    }

    fn dispose(&self) {
        self.state.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

struct ReadyFactory {
    dao: TestDao,
}

impl DaoFactory for ReadyFactory {
    fn create(&self, _ctx: SessionContext<'_>) -> Result<DaoResolution, DaoError> {
        Ok(DaoResolution::Ready(Box::new(self.dao.clone())))
    }
}

struct PendingFactory {
    dao: TestDao,
    release: Mutex<Option<oneshot::Receiver<Result<(), DaoError>>>>,
}

impl DaoFactory for PendingFactory {
    fn create(&self, _ctx: SessionContext<'_>) -> Result<DaoResolution, DaoError> {
        let release = self
            .release
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| DaoError::new("factory already used"))?;
        let dao = self.dao.clone();
        Ok(DaoResolution::Pending(
            async move {
                match release.await {
                    Ok(Ok(())) => Ok(Box::new(dao) as Box<dyn Dao>),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(DaoError::new("factory dropped")),
                }
            }
            .boxed(),
        ))
    }
}

/// A factory that rejects every session.
pub(crate) struct RejectingFactory;

impl DaoFactory for RejectingFactory {
    fn create(&self, _ctx: SessionContext<'_>) -> Result<DaoResolution, DaoError> {
        Err(DaoError::new("invalid credentials"))
    }
}
