//! Typed representation of the positional argument lists accepted by gtag.
//!
//! Calls are kept exactly as received: a [`GtagCall`] converts back into the same argument list
//! it was parsed from, so whatever ends up in the data layer (or in a wrapped gtag function) is
//! indistinguishable from what the caller supplied.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::analytics::constants::{command, SEND_TO_KEY};

/// Options mapping passed alongside gtag commands.
pub type GtagParams = Map<String, Value>;

/// Gating policy class of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GtagCommandKind {
    /// `config`: scoped to the destination named by its first argument.
    Identity,
    /// `event`: scoped by its `send_to` option, or to every destination when absent.
    Report,
    /// `set`: global, never delayed.
    Update,
    /// Any other command; forwarded immediately like [`GtagCommandKind::Update`].
    Other,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GtagCall {
    Config {
        target_id: String,
        params: Option<GtagParams>,
    },
    Event {
        name: String,
        params: Option<GtagParams>,
    },
    Set {
        params: GtagParams,
    },
    /// A `config`, `event` or `set` command whose remaining arguments do not have the expected
    /// shape. Gated by its kind, forwarded with the arguments exactly as received.
    Irregular {
        kind: GtagCommandKind,
        arguments: Vec<Value>,
    },
    Other {
        arguments: Vec<Value>,
    },
}

impl GtagCall {
    pub fn config(target_id: impl Into<String>, params: GtagParams) -> Self {
        GtagCall::Config {
            target_id: target_id.into(),
            params: Some(params),
        }
    }

    pub fn event(name: impl Into<String>, params: GtagParams) -> Self {
        GtagCall::Event {
            name: name.into(),
            params: Some(params),
        }
    }

    pub fn set(params: GtagParams) -> Self {
        GtagCall::Set { params }
    }

    pub fn kind(&self) -> GtagCommandKind {
        match self {
            GtagCall::Config { .. } => GtagCommandKind::Identity,
            GtagCall::Event { .. } => GtagCommandKind::Report,
            GtagCall::Set { .. } => GtagCommandKind::Update,
            GtagCall::Irregular { kind, .. } => *kind,
            GtagCall::Other { .. } => GtagCommandKind::Other,
        }
    }

    /// Targeting of an `event` call. Every other command reports [`SendTo::Unspecified`].
    ///
    /// An irregular event is read from its third argument when that is an options object.
    pub fn send_to(&self) -> SendTo {
        match self {
            GtagCall::Event { params, .. } => SendTo::from_params(params.as_ref()),
            GtagCall::Irregular {
                kind: GtagCommandKind::Report,
                arguments,
            } => SendTo::from_params(arguments.get(2).and_then(Value::as_object)),
            _ => SendTo::Unspecified,
        }
    }

    /// Destination named by a `config` call, if it names one with a string.
    pub fn config_target(&self) -> Option<&str> {
        match self {
            GtagCall::Config { target_id, .. } => Some(target_id),
            GtagCall::Irregular {
                kind: GtagCommandKind::Identity,
                arguments,
            } => arguments.get(1).and_then(Value::as_str),
            _ => None,
        }
    }

    /// Parses a positional gtag argument list.
    ///
    /// The command is identified by its first argument alone. A `config`, `event` or `set` list
    /// with unexpected remaining arguments becomes [`GtagCall::Irregular`]; anything else is kept
    /// verbatim as [`GtagCall::Other`].
    pub fn from_arguments(arguments: Vec<Value>) -> Self {
        let kind = match arguments.first().and_then(Value::as_str) {
            Some(command::CONFIG) => GtagCommandKind::Identity,
            Some(command::EVENT) => GtagCommandKind::Report,
            Some(command::SET) => GtagCommandKind::Update,
            _ => return GtagCall::Other { arguments },
        };
        let parsed = match arguments.as_slice() {
            [Value::String(cmd), Value::String(target_id)] if cmd == command::CONFIG => {
                Some(GtagCall::Config {
                    target_id: target_id.clone(),
                    params: None,
                })
            }
            [Value::String(cmd), Value::String(target_id), Value::Object(params)]
                if cmd == command::CONFIG =>
            {
                Some(GtagCall::Config {
                    target_id: target_id.clone(),
                    params: Some(params.clone()),
                })
            }
            [Value::String(cmd), Value::String(name)] if cmd == command::EVENT => {
                Some(GtagCall::Event {
                    name: name.clone(),
                    params: None,
                })
            }
            [Value::String(cmd), Value::String(name), Value::Object(params)]
                if cmd == command::EVENT =>
            {
                Some(GtagCall::Event {
                    name: name.clone(),
                    params: Some(params.clone()),
                })
            }
            [Value::String(cmd), Value::Object(params)] if cmd == command::SET => {
                Some(GtagCall::Set {
                    params: params.clone(),
                })
            }
            _ => None,
        };
        parsed.unwrap_or(GtagCall::Irregular { kind, arguments })
    }

    pub fn to_arguments(&self) -> Vec<Value> {
        match self {
            GtagCall::Config { target_id, params } => {
                let mut arguments = vec![
                    Value::String(command::CONFIG.to_string()),
                    Value::String(target_id.clone()),
                ];
                arguments.extend(params.clone().map(Value::Object));
                arguments
            }
            GtagCall::Event { name, params } => {
                let mut arguments = vec![
                    Value::String(command::EVENT.to_string()),
                    Value::String(name.clone()),
                ];
                arguments.extend(params.clone().map(Value::Object));
                arguments
            }
            GtagCall::Set { params } => vec![
                Value::String(command::SET.to_string()),
                Value::Object(params.clone()),
            ],
            GtagCall::Irregular { arguments, .. } | GtagCall::Other { arguments } => {
                arguments.clone()
            }
        }
    }
}

impl Serialize for GtagCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_arguments().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GtagCall {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Value>::deserialize(deserializer).map(GtagCall::from_arguments)
    }
}

/// Destinations an event is addressed to, read once from its `send_to` option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendTo {
    Unspecified,
    /// A measurement ID or a group alias.
    Single(String),
    Many(Vec<String>),
}

impl SendTo {
    pub fn from_params(params: Option<&GtagParams>) -> Self {
        match params.and_then(|params| params.get(SEND_TO_KEY)) {
            None | Some(Value::Null) => SendTo::Unspecified,
            Some(Value::String(target)) => SendTo::Single(target.clone()),
            Some(Value::Array(targets)) => SendTo::Many(targets.iter().map(target_text).collect()),
            // Unrecognised shapes can only be honoured conservatively.
            Some(other) => SendTo::Many(vec![other.to_string()]),
        }
    }
}

fn target_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
