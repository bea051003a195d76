// src/bus/bridge.rs

//! Request/reply/notice wrapper used by the reactor to talk to the launcher.

use std::collections::HashMap;

use tracing::{debug, info, trace, warn};

use super::message::{
    Address, Arg, Message, MessageBuilder, MessageClass, MessageId, MessageState, Scope,
    StatusCode,
};
use super::transport::{BusConnection, Frame};
use super::BusStatus;
use crate::types::{CallerIdentity, ChildStatus};

pub const OP_IDENTIFY: &str = "_DtActDtexecID";
pub const OP_DONE: &str = "_DtActDtexecDone";
pub const OP_ICON_CACHE_UPDATE: &str = "DtActionIconCache_Update";

/// Outstanding requests whose replies we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Identify,
    Done,
}

/// What the reactor needs to know after a receive pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The launcher acknowledged the Done request.
    DoneReplied,
    /// The Done request failed; the session has been detached.
    DoneFailed,
    /// The session went away (lost connection or failed identification).
    Detached,
}

/// A messaging session with the launcher that started us.
///
/// Once detached the session stays detached; every operation on it becomes
/// a no-op.
#[derive(Debug)]
pub struct MessagingSession<C: BusConnection> {
    conn: Option<C>,
    caller: CallerIdentity,
    next_id: u64,
    pending: HashMap<MessageId, Pending>,
    done_sent: bool,
}

impl<C: BusConnection> MessagingSession<C> {
    pub fn new(conn: C, caller: CallerIdentity) -> Self {
        Self {
            conn: Some(conn),
            caller,
            next_id: 1,
            pending: HashMap::new(),
            done_sent: false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.conn.is_some()
    }

    pub fn connection(&self) -> Option<&C> {
        self.conn.as_ref()
    }

    pub fn done_sent(&self) -> bool {
        self.done_sent
    }

    /// Quit the session and drop the connection. Idempotent.
    pub fn detach(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            info!(procid = %conn.procid(), "detaching from messaging bus");
            conn.close();
            self.pending.clear();
        }
    }

    /// Join the default session so the bus delivers our messages.
    pub fn join(&mut self) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        let frame = Frame::Join {
            session: conn.session().to_string(),
        };
        if let Err(err) = conn.send_frame(&frame) {
            warn!(error = %err, "could not join session");
            self.detach();
        }
    }

    /// Create a message with a fresh id.
    pub fn create(
        &mut self,
        class: MessageClass,
        scope: Scope,
        handler: Option<&str>,
        op: &str,
        args: Vec<Arg>,
    ) -> Result<Message, BusStatus> {
        let id = MessageId(self.next_id);
        self.next_id += 1;

        let mut builder = MessageBuilder::new(class, op).scope(scope);
        if let Some(handler) = handler {
            builder = builder.handler(handler);
        }
        args.into_iter()
            .fold(builder, MessageBuilder::arg)
            .build(id)
    }

    /// Put `msg` on the bus. On error the caller still owns the message and
    /// must dispose of it.
    pub fn send(&mut self, msg: &mut Message) -> Result<(), BusStatus> {
        let conn = self.conn.as_mut().ok_or(BusStatus::Detached)?;
        msg.state = MessageState::Sent;
        conn.send_frame(&Frame::Message {
            message: msg.clone(),
        })
        .inspect_err(|_| msg.state = MessageState::Created)?;
        debug!(id = msg.id.0, op = %msg.op, "message sent");
        Ok(())
    }

    /// Drop a message. Inbound ids are numbered by their sender and may
    /// collide with ours, so outstanding requests are only settled by their
    /// replies.
    pub fn destroy(&mut self, msg: Message) {
        trace!(id = msg.id.0, op = %msg.op, "message destroyed");
    }

    /// Refuse `msg` so the bus can offer it to someone else.
    pub fn reject(&mut self, msg: Message) {
        self.dispose_with(msg, MessageState::Rejected);
    }

    /// Report `msg` as failed back to its sender.
    pub fn fail(&mut self, msg: Message) {
        self.dispose_with(msg, MessageState::Failed);
    }

    fn dispose_with(&mut self, msg: Message, state: MessageState) {
        if let Some(conn) = self.conn.as_mut() {
            let reply = Frame::Reply {
                id: msg.id,
                state,
                status: StatusCode::NotSupported,
            };
            if let Err(err) = conn.send_frame(&reply) {
                debug!(error = %err, id = msg.id.0, ?state, "could not dispose of message");
            }
        }
        self.destroy(msg);
    }

    /// Dispose of a message nobody consumed: fail or reject requests we are
    /// handling, destroy everything else.
    pub fn abandon(&mut self, msg: Message) {
        if !msg.am_handling() {
            self.destroy(msg);
            return;
        }

        let fail = msg.address == Address::Handler || msg.status == StatusCode::StartMessage;
        debug!(id = msg.id.0, op = %msg.op, fail, "abandoning unconsumed request");
        if fail {
            self.fail(msg);
        } else {
            self.reject(msg);
        }
    }

    /// Tell the launcher how to reach us. A send failure detaches.
    pub fn identify(&mut self) {
        let Some(own) = self.conn.as_ref().map(|c| c.procid().to_string()) else {
            return;
        };
        let args = vec![
            Arg::Int(self.caller.invocation_id),
            Arg::Int(self.caller.child_id),
            Arg::MessageId(own),
        ];
        self.send_request(OP_IDENTIFY, args, Pending::Identify);
    }

    /// Report completion. Only the first call in a run has any effect.
    pub fn done_request(&mut self, code: ChildStatus) {
        if self.done_sent {
            debug!(?code, "done request already sent; ignoring");
            return;
        }
        self.done_sent = true;

        let args = vec![
            Arg::Int(self.caller.invocation_id),
            Arg::Int(self.caller.child_id),
            Arg::Int(code.code()),
        ];
        info!(?code, "sending done request");
        self.send_request(OP_DONE, args, Pending::Done);
    }

    /// Fire-and-forget notice for the action-icon cache.
    pub fn notice_icon_cache(&mut self, action: &str, child_list: &str) -> Result<(), BusStatus> {
        let mut msg = self.create(
            MessageClass::Notice,
            Scope::Session,
            None,
            OP_ICON_CACHE_UPDATE,
            vec![Arg::Str(action.to_string()), Arg::Str(child_list.to_string())],
        )?;
        let sent = self.send(&mut msg);
        self.destroy(msg);
        sent
    }

    fn send_request(&mut self, op: &str, args: Vec<Arg>, pending: Pending) {
        if !self.is_attached() {
            return;
        }
        let handler = self.caller.procid.clone();
        let mut msg = match self.create(
            MessageClass::Request,
            Scope::Session,
            Some(&handler),
            op,
            args,
        ) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, op, "could not create request");
                self.detach();
                return;
            }
        };

        match self.send(&mut msg) {
            Ok(()) => {
                self.pending.insert(msg.id, pending);
            }
            Err(err) => {
                warn!(error = %err, op, "request send failed");
                self.destroy(msg);
                self.detach();
            }
        }
    }

    /// Drain every frame the bus has for us and dispatch it.
    pub fn receive(&mut self) -> Vec<BridgeEvent> {
        let mut events = Vec::new();

        loop {
            let Some(conn) = self.conn.as_mut() else {
                break;
            };
            match conn.try_recv_frame() {
                Ok(None) => break,
                Ok(Some(Frame::Reply { id, state, status })) => {
                    self.on_reply(id, state, status, &mut events);
                }
                Ok(Some(Frame::Message { message })) => self.abandon(message),
                Ok(Some(other)) => trace!(?other, "ignoring frame"),
                Err(BusStatus::Protocol(reason)) => {
                    warn!(%reason, "skipping malformed frame");
                }
                Err(err) => {
                    warn!(error = %err, "messaging bus lost");
                    self.detach();
                    events.push(BridgeEvent::Detached);
                    break;
                }
            }
        }

        events
    }

    fn on_reply(
        &mut self,
        id: MessageId,
        state: MessageState,
        status: StatusCode,
        events: &mut Vec<BridgeEvent>,
    ) {
        let Some(&kind) = self.pending.get(&id) else {
            trace!(id = id.0, ?state, "reply for unknown message");
            return;
        };

        match (kind, state) {
            (Pending::Identify, MessageState::Handled) => {
                self.pending.remove(&id);
            }
            (Pending::Identify, MessageState::Failed) => {
                warn!(?status, "launcher failed our identification");
                self.pending.remove(&id);
                self.detach();
                events.push(BridgeEvent::Detached);
            }
            (Pending::Done, MessageState::Handled) => {
                self.pending.remove(&id);
                events.push(BridgeEvent::DoneReplied);
            }
            (Pending::Done, MessageState::Failed) => {
                warn!(?status, "launcher failed our done request");
                self.pending.remove(&id);
                self.detach();
                events.push(BridgeEvent::DoneFailed);
            }
            (_, other) => trace!(id = id.0, ?other, "intermediate reply state"),
        }
    }
}
