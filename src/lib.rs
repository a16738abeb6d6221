//! Multi-channel chat-bot adapter.
//!
//! Inbound gateway events are normalized ([`inbound`]), gated by access
//! policy ([`policy`]), resolved to a session route ([`routing`]) and handed
//! to a reply engine; reply payloads are shaped ([`text`], [`media`]) and
//! delivered through a platform transport ([`outbound`], [`delivery`]). The
//! whole flow is driven by [`dispatch::handle_qqbot_dispatch`].

pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod inbound;
pub mod media;
pub mod outbound;
pub mod policy;
pub mod reply;
pub mod routing;
pub mod text;
