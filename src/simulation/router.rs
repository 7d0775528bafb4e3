//! Payload dispatch by message type.
//!
//! Each endpoint owns a [`MessageRouter`]. Handlers see the packet and the
//! endpoint's current state and may answer with an [`OutgoingMessage`], which
//! the medium sends from the endpoint's address.

use embassy_time::Instant;
use std::collections::HashMap;

use super::geometry::Position;
use super::types::{Address, Packet};

/// Endpoint state visible to a handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub address: Address,
    pub position: Position,
    pub now: Instant,
}

/// Reply produced by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub recipient: Address,
    pub message_type: String,
    pub data: String,
    pub requires_ack: bool,
}

impl OutgoingMessage {
    pub fn new(recipient: impl Into<Address>, message_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            message_type: message_type.into(),
            data: data.into(),
            requires_ack: false,
        }
    }

    pub fn reliable(mut self) -> Self {
        self.requires_ack = true;
        self
    }
}

pub type Handler = Box<dyn FnMut(&Packet, &HandlerContext) -> Option<OutgoingMessage> + Send>;

#[derive(Default)]
pub struct MessageRouter {
    handlers: HashMap<String, Handler>,
    fallback: Option<Handler>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `message_type`, replacing any previous one.
    pub fn on<F>(&mut self, message_type: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&Packet, &HandlerContext) -> Option<OutgoingMessage> + Send + 'static,
    {
        self.handlers.insert(message_type.into(), Box::new(handler));
        self
    }

    /// Handler for types without a dedicated entry.
    pub fn fallback<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&Packet, &HandlerContext) -> Option<OutgoingMessage> + Send + 'static,
    {
        self.fallback = Some(Box::new(handler));
        self
    }

    pub fn handles(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    pub fn dispatch(&mut self, packet: &Packet, context: &HandlerContext) -> Option<OutgoingMessage> {
        if let Some(handler) = self.handlers.get_mut(&packet.message_type) {
            return handler(packet, context);
        }
        match self.fallback.as_mut() {
            Some(fallback) => fallback(packet, context),
            None => {
                log::warn!("[{}] Unknown packet type: {}", context.address, packet.message_type);
                None
            }
        }
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("MessageRouter").field("handlers", &types).field("fallback", &self.fallback.is_some()).finish()
    }
}
