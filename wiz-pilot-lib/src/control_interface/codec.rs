use std::fmt::{Display, Formatter};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ParameterSet;
use crate::error::CodecError;
use crate::identity::HardwareId;

/// UDP port the bulbs listen on.
pub const CONTROL_PORT: u16 = 38899;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    SetPilot,
    SetState,
    GetPilot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetPilot(ParameterSet),
    SetState(bool),
    GetPilot,
}

impl Command {
    pub fn method(&self) -> Method {
        match self {
            Command::SetPilot(_) => Method::SetPilot,
            Command::SetState(_) => Method::SetState,
            Command::GetPilot => Method::GetPilot,
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum Params<'a> {
    Pilot(&'a ParameterSet),
    State { state: bool },
}

#[derive(Serialize)]
struct Request<'a> {
    method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Params<'a>>,
}

/// Why a dispatch did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Failure {
    Timeout,
    Transport(String),
    Malformed(String),
    Rejected,
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Timeout => write!(f, "no reply"),
            Failure::Transport(e) => write!(f, "transport: {}", e),
            Failure::Malformed(e) => write!(f, "malformed reply: {}", e),
            Failure::Rejected => write!(f, "device did not report success"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Serializes a command as compact JSON.
///
/// Absent parameters are omitted, never written as `null`, and `getPilot`
/// carries no `params` object at all.
pub fn encode(command: &Command) -> Bytes {
    let params = match command {
        Command::SetPilot(params) => Some(Params::Pilot(params)),
        Command::SetState(state) => Some(Params::State { state: *state }),
        Command::GetPilot => None,
    };
    let request = Request {
        method: command.method(),
        params,
    };
    // Serializing plain structs of integers and enums into a Vec cannot fail.
    Bytes::from(serde_json::to_vec(&request).unwrap_or_default())
}

/// Success requires a JSON object with a truthy `"success"` (`true` or a
/// nonzero number), either at the top level or inside `"result"`. Anything
/// else is a failure.
pub fn decode(response: &[u8]) -> Outcome {
    let value: Value = match serde_json::from_slice(response) {
        Ok(value) => value,
        Err(e) => return Outcome::Failure(Failure::Malformed(e.to_string())),
    };

    let flag = value
        .get("success")
        .or_else(|| value.get("result").and_then(|r| r.get("success")));

    if flag.map_or(false, is_truthy) {
        Outcome::Success
    } else {
        Outcome::Failure(Failure::Rejected)
    }
}

/// `true` or any nonzero number. Strings, arrays and objects never count.
fn is_truthy(flag: &Value) -> bool {
    match flag {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        _ => false,
    }
}

/// State reported by a bulb in reply to `getPilot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PilotReport {
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<u32>,
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub red: Option<u8>,
    #[serde(rename = "g", default, skip_serializing_if = "Option::is_none")]
    pub green: Option<u8>,
    #[serde(rename = "b", default, skip_serializing_if = "Option::is_none")]
    pub blue: Option<u8>,
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub cool: Option<u8>,
    #[serde(rename = "w", default, skip_serializing_if = "Option::is_none")]
    pub warm: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimming: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<u32>,
}

impl PilotReport {
    pub fn identifier(&self) -> Result<HardwareId, CodecError> {
        self.mac
            .parse()
            .map_err(|_| CodecError::BadMac(self.mac.clone()))
    }
}

#[derive(Deserialize)]
struct PilotReply {
    result: Option<PilotReport>,
}

pub fn decode_pilot(response: &[u8]) -> Result<PilotReport, CodecError> {
    let reply: PilotReply = serde_json::from_slice(response)?;
    reply.result.ok_or(CodecError::MissingResult)
}
