use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use tracing::debug;

use crate::dao::Dao;
use crate::error::{DaoError, SessionError};
use crate::message::{
    ClientMessage, EventMessage, GetMessage, PathMessage, RequestMessage, ServerMessage,
    pong_reply, time_sync_reply, unix_millis,
};
use crate::server::reporter::Reporter;
use crate::server::subscriptions::SubscriptionTable;

/// Outcome of a DAO call issued by the router, applied on the session task.
pub(crate) enum Completion {
    Reply {
        request_id: Value,
        result: Result<Value, DaoError>,
    },
    Event {
        method: Value,
        result: Result<Value, DaoError>,
    },
}

/// DAO calls in flight. They may complete in any order.
pub(crate) type Operations = FuturesUnordered<BoxFuture<'static, Completion>>;

/// Everything a routed message may touch.
pub(crate) struct RouteContext<'a> {
    pub dao: &'a dyn Dao,
    pub subscriptions: &'a mut SubscriptionTable,
    pub reporter: &'a Reporter,
    pub operations: &'a mut Operations,
}

/// Decode a raw payload for routing.
///
/// Failures are protocol errors carrying the original message (or the raw
/// text when it is not JSON at all).
pub(crate) fn decode(payload: &str) -> Result<ClientMessage, SessionError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| SessionError::malformed(e, Value::String(payload.to_owned())))?;
    ClientMessage::from_value(value.clone()).map_err(|e| SessionError::malformed(e, value))
}

/// Dispatch one message of an initialized session.
pub(crate) fn route(message: ClientMessage, ctx: RouteContext<'_>) -> Result<(), SessionError> {
    let RouteContext {
        dao,
        subscriptions,
        reporter,
        operations,
    } = ctx;

    match message {
        ClientMessage::Request(RequestMessage {
            request_id,
            method,
            args,
        }) => {
            let call = dao.request(&method, args);
            operations.push(
                async move {
                    Completion::Reply {
                        request_id,
                        result: call.await,
                    }
                }
                .boxed(),
            );
        }

        ClientMessage::Event(EventMessage { method, args }) => {
            let call = dao.request(&method, args);
            operations.push(
                async move {
                    Completion::Event {
                        method,
                        result: call.await,
                    }
                }
                .boxed(),
            );
        }

        ClientMessage::Get(GetMessage { request_id, what }) => {
            let call = dao.get(&what);
            operations.push(
                async move {
                    Completion::Reply {
                        request_id,
                        result: call.await,
                    }
                }
                .boxed(),
            );
        }

        ClientMessage::Observe(PathMessage { what }) => {
            subscriptions.subscribe(dao, what, reporter)?;
        }

        ClientMessage::Unobserve(PathMessage { what }) => {
            if !subscriptions.unsubscribe(&what) {
                debug!(
                    connection_id = %reporter.connection_id(),
                    path = %what,
                    "Unobserve of a path that is not observed"
                );
            }
        }

        ClientMessage::Ping(fields) => {
            reporter.hooks().ping(reporter.connection_id(), &fields);
            reporter.send_value(&pong_reply(fields));
        }

        ClientMessage::Pong(fields) => {
            reporter.hooks().pong(reporter.connection_id(), &fields);
        }

        ClientMessage::TimeSync(fields) => {
            reporter.send_value(&time_sync_reply(fields, unix_millis()));
        }

        ClientMessage::InitializeSession(init) => {
            let mut message = init.extra;
            message.insert("type".to_owned(), Value::from("initializeSession"));
            message.insert("sessionId".to_owned(), Value::from(init.session_id));
            return Err(SessionError::malformed(
                "session is already initialized",
                Value::Object(message),
            ));
        }
    }

    Ok(())
}

/// Write the outcome of a finished DAO call.
pub(crate) fn complete(completion: Completion, reporter: &Reporter) {
    match completion {
        Completion::Reply {
            request_id,
            result: Ok(response),
        } => reporter.send(&ServerMessage::Response {
            response_id: request_id,
            response,
        }),

        Completion::Reply {
            request_id,
            result: Err(e),
        } => {
            reporter.send(&ServerMessage::Error {
                response_id: request_id,
                error: e.message.clone(),
                code: e.code.clone(),
            });
            reporter.report(&SessionError::Server(e));
        }

        Completion::Event {
            method,
            result: Err(e),
        } => debug!(
            connection_id = %reporter.connection_id(),
            method = %method,
            error = %e,
            "Event failed"
        ),

        Completion::Event { result: Ok(_), .. } => {}
    }
}
