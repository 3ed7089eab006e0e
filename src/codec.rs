//! Wire form of the two message kinds exchanged between peers.
//!
//! Both kinds travel over the same channel as JSON objects. A frame carrying a
//! `method` key is a [`Request`]; any other object carrying an `id` key is a
//! [`Response`]. The discriminating key is inspected once and the frame is
//! decoded into exactly one shape.

use crate::types::Params;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Intention to invoke a method on the remote peer.
///
/// A request without an `id` is fire-and-forget: it is never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    #[serde(default)]
    pub id: Option<u64>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Params, id: Option<u64>) -> Self {
        Self {
            method: method.into(),
            args: params.args,
            kwargs: params.kwargs,
            id,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Split into the method name and its arguments.
    pub fn into_parts(self) -> (String, Params, Option<u64>) {
        (
            self.method,
            Params::new(self.args, self.kwargs),
            self.id,
        )
    }
}

/// Outcome of a previously sent [`Request`], matched to it by `id`.
///
/// When `error` is set it names the failure kind and `result` holds the
/// failure message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id: Some(id),
            result,
            error: None,
        }
    }

    pub fn failure(id: u64, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            result: Value::String(message.into()),
            error: Some(kind.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let malformed = |source| DecodeError::Malformed {
            raw: raw.to_owned(),
            source,
        };

        let object = match serde_json::from_str::<Value>(raw).map_err(malformed)? {
            Value::Object(object) => object,
            _ => return Err(DecodeError::Unrecognized { raw: raw.to_owned() }),
        };

        match Kind::of(&object) {
            Some(Kind::Request) => serde_json::from_value(Value::Object(object))
                .map(Message::Request)
                .map_err(malformed),
            Some(Kind::Response) => serde_json::from_value(Value::Object(object))
                .map(Message::Response)
                .map_err(malformed),
            None => Err(DecodeError::Unrecognized { raw: raw.to_owned() }),
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

enum Kind {
    Request,
    Response,
}

impl Kind {
    fn of(object: &Map<String, Value>) -> Option<Self> {
        if object.contains_key("method") {
            Some(Kind::Request)
        } else if object.contains_key("id") {
            Some(Kind::Response)
        } else {
            None
        }
    }
}

/// A frame that is neither a well-formed request nor a well-formed response.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame {raw:?}: {source}")]
    Malformed {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("frame {raw:?} is neither a request nor a response")]
    Unrecognized { raw: String },
}

impl DecodeError {
    /// The offending payload, kept for diagnostics.
    pub fn raw(&self) -> &str {
        match self {
            DecodeError::Malformed { raw, .. } | DecodeError::Unrecognized { raw } => raw,
        }
    }
}
