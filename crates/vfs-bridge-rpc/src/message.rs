//! JSON-RPC 2.0 message model.
//!
//! Incoming bodies are classified the way the base protocol defines them:
//!
//! - **Requests** have both `method` and `id`
//! - **Notifications** have `method` but no `id`
//! - **Responses** have `id` and either `result` or `error`, but no `method`

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::error::{Error, Result};

/// Protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Identifier correlating a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id (what vscode-jsonrpc sends).
    Number(i64),
    /// String id.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// Error object of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error while producing the response.
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Create an error with the given code and message.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// `-32700`: body was not JSON.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, message)
    }

    /// `-32600`: body was JSON but not a JSON-RPC message.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    /// `-32601`: no handler is registered for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    /// `-32602`: params did not match the method's shape.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    /// `-32603`: the handler could not produce a result.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// A call expecting exactly one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id.
    pub id: RequestId,
    /// Method name, e.g. `vfs/input/readFile`.
    pub method: String,
    /// Parameters; `Value::Null` when absent.
    pub params: Value,
}

impl Request {
    /// Create a request.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A one-way message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name, e.g. `vfs/watcher/emitWatch`.
    pub method: String,
    /// Parameters; `Value::Null` when absent.
    pub params: Value,
}

impl Notification {
    /// Create a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// The answer to a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered; `None` when the request id could
    /// not be determined (e.g. the body was not JSON).
    pub id: Option<RequestId>,
    /// Either the `result` or the `error` member.
    pub outcome: std::result::Result<Value, ResponseError>,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: Ok(result),
        }
    }

    /// Error response.
    #[must_use]
    pub fn error(id: Option<RequestId>, error: ResponseError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

/// Any JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// See [`Request`].
    Request(Request),
    /// See [`Notification`].
    Notification(Notification),
    /// See [`Response`].
    Response(Response),
}

impl Message {
    /// Classify a decoded JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the value is not an object, the
    /// `id` or `method` members have the wrong type, or the object is neither
    /// a request, a notification nor a response.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(Error::invalid_message("expected a JSON object", None));
        };

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<RequestId>(raw).map_err(|_| {
                Error::invalid_message("id must be a number or a string", None)
            })?),
        };

        if let Some(method) = object.remove("method") {
            let Value::String(method) = method else {
                return Err(Error::invalid_message("method must be a string", id.as_ref()));
            };
            let params = object.remove("params").unwrap_or(Value::Null);
            return Ok(match id {
                Some(id) => Self::Request(Request { id, method, params }),
                None => Self::Notification(Notification { method, params }),
            });
        }

        if let Some(error) = object.remove("error") {
            let error: ResponseError = serde_json::from_value(error).map_err(|e| {
                Error::invalid_message(format!("malformed error object: {e}"), id.as_ref())
            })?;
            return Ok(Self::Response(Response::error(id, error)));
        }

        match (id, object.remove("result")) {
            (Some(id), Some(result)) => Ok(Self::Response(Response::ok(id, result))),
            (None, Some(_)) => Err(Error::invalid_message("response is missing 'id'", None)),
            (id, None) => Err(Error::invalid_message(
                "message has neither 'method', 'result' nor 'error'",
                id.as_ref(),
            )),
        }
    }

    /// Encode as a JSON value with the `jsonrpc` tag.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("jsonrpc".to_string(), json!(JSONRPC_VERSION));

        match self {
            Self::Request(request) => {
                object.insert("id".to_string(), json!(request.id));
                object.insert("method".to_string(), json!(request.method));
                if !request.params.is_null() {
                    object.insert("params".to_string(), request.params.clone());
                }
            }
            Self::Notification(notification) => {
                object.insert("method".to_string(), json!(notification.method));
                if !notification.params.is_null() {
                    object.insert("params".to_string(), notification.params.clone());
                }
            }
            Self::Response(response) => {
                object.insert("id".to_string(), json!(response.id));
                match &response.outcome {
                    Ok(result) => object.insert("result".to_string(), result.clone()),
                    Err(error) => object.insert("error".to_string(), json!(error)),
                };
            }
        }

        Value::Object(object)
    }

    /// Method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

impl From<Notification> for Message {
    fn from(value: Notification) -> Self {
        Self::Notification(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}
