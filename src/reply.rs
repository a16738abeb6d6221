//! Reply-engine collaborator interface.
//!
//! The original runtime probed optional functions on a process-global object
//! at call time. Here every capability is an explicit trait on an
//! [`AgentRuntime`] handed to the dispatcher; an absent optional capability
//! is a normal branch, not a lookup failure.

use async_trait::async_trait;
use std::sync::Arc;

use crate::routing::{DispatchContext, PeerKind, ResolvedRoute};

/// One unit of reply content to deliver. A streamed reply may produce
/// several payloads; `media_urls` supplements the single `media_url` form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyPayload {
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub media_urls: Vec<String>,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }

    /// Structured media fields, in declaration order.
    pub fn media_sources(&self) -> Vec<&str> {
        if !self.media_urls.is_empty() {
            self.media_urls.iter().map(String::as_str).collect()
        } else {
            self.media_url.as_deref().into_iter().collect()
        }
    }
}

/// Position of a payload within a streamed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Partial,
    Final,
}

#[derive(Debug, Clone)]
pub struct ReplyEvent {
    pub payload: ReplyPayload,
    pub kind: ReplyKind,
}

impl ReplyEvent {
    pub fn partial(payload: ReplyPayload) -> Self {
        Self { payload, kind: ReplyKind::Partial }
    }

    pub fn final_reply(payload: ReplyPayload) -> Self {
        Self { payload, kind: ReplyKind::Final }
    }
}

/// Peer addressed by a route lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub kind: PeerKind,
    pub id: String,
}

/// Resolves which agent/session an inbound message belongs to.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, channel: &str, account_id: &str, peer: &Peer) -> ResolvedRoute;
}

/// Runs the agent and yields the reply payload sequence for one context.
#[async_trait]
pub trait ReplyEngine: Send + Sync {
    async fn run(&self, ctx: &DispatchContext) -> anyhow::Result<Vec<ReplyEvent>>;
}

/// Where the last-route update should point after a direct message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastRouteUpdate {
    pub session_key: String,
    pub channel: String,
    pub to: String,
    pub account_id: String,
}

/// Externally-owned session store. Calls are at-least-once-safe; errors are
/// caught and logged by the dispatcher, never propagated.
pub trait SessionStore: Send + Sync {
    fn last_updated_at(&self, session_key: &str) -> Option<i64>;
    fn record_inbound(
        &self,
        session_key: &str,
        ctx: &DispatchContext,
        update_last_route: Option<&LastRouteUpdate>,
    ) -> anyhow::Result<()>;
}

/// Inputs to inbound-envelope formatting.
#[derive(Debug, Clone)]
pub struct EnvelopeParams<'a> {
    pub channel: &'a str,
    pub from: &'a str,
    pub body: &'a str,
    pub timestamp: i64,
    pub previous_timestamp: Option<i64>,
    pub chat_type: &'a str,
    pub sender_label: &'a str,
}

/// Formats the body shown to the agent ("[QQ] Ann: hi" style framing).
pub trait EnvelopeFormatter: Send + Sync {
    fn format_inbound(&self, params: &EnvelopeParams<'_>) -> String;
}

/// Hidden-prompt augmentation applied to the raw body after the base
/// context is finalized.
pub trait PromptAugmenter: Send + Sync {
    fn augment(&self, body: &str) -> String;
}

/// Capability object threaded through dispatch. Required collaborators are
/// plain fields; optional ones are `Option`.
#[derive(Clone)]
pub struct AgentRuntime {
    pub routing: Arc<dyn RouteResolver>,
    pub engine: Arc<dyn ReplyEngine>,
    pub session: Option<Arc<dyn SessionStore>>,
    pub envelope: Option<Arc<dyn EnvelopeFormatter>>,
    pub prompt: Option<Arc<dyn PromptAugmenter>>,
}

impl AgentRuntime {
    pub fn new(routing: Arc<dyn RouteResolver>, engine: Arc<dyn ReplyEngine>) -> Self {
        Self { routing, engine, session: None, envelope: None, prompt: None }
    }

    pub fn with_session(mut self, session: Arc<dyn SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_envelope(mut self, envelope: Arc<dyn EnvelopeFormatter>) -> Self {
        self.envelope = Some(envelope);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn PromptAugmenter>) -> Self {
        self.prompt = Some(prompt);
        self
    }
}
