//! Line-delimited JSON spoken with an isolation host over its stdio.
//!
//! Every request carries a numeric `id`; every reply echoes it so that
//! concurrent requests (a stop signal during a run) can share one pipe.

use super::{Action, ActionKind, ControllerFault, Settings};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename = "create_controller")]
pub struct CreateControllerRequest<'a> {
    pub controller: &'a str,
    pub target: &'a Path,
    pub id_prefix: &'a str,
    pub settings: &'a Settings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControllerCreated {
    pub controller: String,
    pub api_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostFaultKind {
    UnknownAction,
    ContractMismatch,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostFault {
    pub kind: HostFaultKind,
    #[serde(default)]
    pub message: String,
}

impl HostFault {
    pub fn into_controller_fault(self, action: ActionKind) -> ControllerFault {
        match self.kind {
            HostFaultKind::UnknownAction => ControllerFault::UnknownAction(action),
            HostFaultKind::ContractMismatch => ControllerFault::ContractMismatch(self.message),
            HostFaultKind::Failed => ControllerFault::Failed(self.message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReplyLine {
    id: u64,
    #[serde(default)]
    report: Option<String>,
    #[serde(default)]
    created: Option<ControllerCreated>,
    #[serde(default)]
    error: Option<HostFault>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Report(String),
    Created(ControllerCreated),
    Fault(HostFault),
    /// The host finished the action. Nothing more arrives for that id.
    Done,
    /// A reply carrying a request id whose body did not match any known
    /// shape. Holds the raw line.
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedReply {
    Routed { id: u64, inbound: Inbound },
    Unroutable { reason: String },
}

pub fn encode_request<T: Serialize>(id: u64, request: &T) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(request)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("id".to_string(), serde_json::Value::from(id));
    }
    serde_json::to_string(&value)
}

pub fn encode_action(id: u64, action: &Action) -> Result<String, serde_json::Error> {
    encode_request(id, action)
}

pub fn decode_reply(line: &str) -> DecodedReply {
    match serde_json::from_str::<ReplyLine>(line) {
        Ok(reply) => {
            let inbound = match (reply.report, reply.created, reply.error, reply.done) {
                (Some(report), None, None, false) => Inbound::Report(report),
                (None, Some(created), None, false) => Inbound::Created(created),
                (None, None, Some(fault), false) => Inbound::Fault(fault),
                (None, None, None, true) => Inbound::Done,
                _ => Inbound::Malformed(line.to_string()),
            };
            DecodedReply::Routed {
                id: reply.id,
                inbound,
            }
        }
        Err(err) => {
            let id = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|value| value.get("id").and_then(serde_json::Value::as_u64));
            match id {
                Some(id) => DecodedReply::Routed {
                    id,
                    inbound: Inbound::Malformed(line.to_string()),
                },
                None => DecodedReply::Unroutable {
                    reason: err.to_string(),
                },
            }
        }
    }
}
