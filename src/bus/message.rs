// src/bus/message.rs

use serde::{Deserialize, Serialize};

use super::BusStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageClass {
    Request,
    Notice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Session,
}

/// How the bus routes a message: to whoever handles the op, or to one
/// specific process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Address {
    Procedure,
    Handler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Created,
    Sent,
    Handled,
    Failed,
    Rejected,
}

/// Status code carried inside a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    #[default]
    Ok,
    /// The bus started this process to deliver the message.
    StartMessage,
    NotSupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Arg {
    Int(i32),
    Str(String),
    /// A bus process id, passed so the receiver can address us.
    MessageId(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub class: MessageClass,
    #[serde(default)]
    pub scope: Scope,
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    pub op: String,
    #[serde(default)]
    pub args: Vec<Arg>,
    pub state: MessageState,
    #[serde(default)]
    pub status: StatusCode,
}

impl Message {
    /// True when this process is the designated handler of a live request.
    pub fn am_handling(&self) -> bool {
        self.class == MessageClass::Request
            && self.state == MessageState::Sent
            && self.handler.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Typed builder replacing the property-by-property message setup.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    class: MessageClass,
    scope: Scope,
    handler: Option<String>,
    op: String,
    args: Vec<Arg>,
}

impl MessageBuilder {
    pub fn new(class: MessageClass, op: impl Into<String>) -> Self {
        Self {
            class,
            scope: Scope::Session,
            handler: None,
            op: op.into(),
            args: Vec::new(),
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Address the message to one process instead of any handler of `op`.
    pub fn handler(mut self, procid: impl Into<String>) -> Self {
        self.handler = Some(procid.into());
        self
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn build(self, id: MessageId) -> Result<Message, BusStatus> {
        if self.op.trim().is_empty() {
            return Err(BusStatus::InvalidMessage("empty op".to_string()));
        }
        if matches!(self.handler.as_deref(), Some(h) if h.trim().is_empty()) {
            return Err(BusStatus::InvalidMessage(format!(
                "empty handler for op '{}'",
                self.op
            )));
        }

        let address = if self.handler.is_some() {
            Address::Handler
        } else {
            Address::Procedure
        };

        Ok(Message {
            id,
            class: self.class,
            scope: self.scope,
            address,
            handler: self.handler,
            op: self.op,
            args: self.args,
            state: MessageState::Created,
            status: StatusCode::Ok,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_switches_address() {
        let procedural = MessageBuilder::new(MessageClass::Notice, "op")
            .build(MessageId(1))
            .unwrap();
        assert_eq!(procedural.address, Address::Procedure);

        let directed = MessageBuilder::new(MessageClass::Request, "op")
            .handler("caller.1")
            .arg(Arg::Int(3))
            .build(MessageId(2))
            .unwrap();
        assert_eq!(directed.address, Address::Handler);
        assert_eq!(directed.state, MessageState::Created);
        assert_eq!(directed.args, vec![Arg::Int(3)]);
    }

    #[test]
    fn build_rejects_missing_properties() {
        assert!(MessageBuilder::new(MessageClass::Request, "  ")
            .build(MessageId(1))
            .is_err());
        assert!(MessageBuilder::new(MessageClass::Request, "op")
            .handler("")
            .build(MessageId(1))
            .is_err());
    }

    #[test]
    fn json_shape_is_stable() {
        let msg = MessageBuilder::new(MessageClass::Request, "_DtActDtexecDone")
            .handler("p1")
            .arg(Arg::Int(16))
            .build(MessageId(9))
            .unwrap();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["class"], "request");
        assert_eq!(json["address"], "handler");
        assert_eq!(json["args"][0]["type"], "int");
        assert_eq!(json["args"][0]["value"], 16);
    }
}
