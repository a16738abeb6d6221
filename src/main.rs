use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use chatbridge::config::Config;
use chatbridge::dispatch::handle_qqbot_dispatch;
use chatbridge::outbound::feishu::FeishuTransport;
use chatbridge::outbound::qqbot::QqBotTransport;
use chatbridge::outbound::Transport;
use chatbridge::reply::{AgentRuntime, Peer, ReplyEngine, ReplyEvent, ReplyPayload, RouteResolver};
use chatbridge::routing::{DispatchContext, ResolvedRoute};

#[derive(Parser)]
#[command(name = "chatbridge", version, about = "Multi-channel chat-bot adapter")]
struct Cli {
    /// Configuration file path.
    #[arg(long, default_value = "chatbridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed one gateway event through the dispatch pipeline with the
    /// built-in echo engine.
    Dispatch {
        /// Gateway event type tag, e.g. C2C_MESSAGE_CREATE.
        #[arg(long)]
        event_type: String,
        /// Path to the event payload JSON, or `-` for stdin.
        #[arg(long, default_value = "-")]
        payload: String,
        /// Account the route is resolved under.
        #[arg(long, default_value = "default")]
        account: String,
    },
    /// Send a one-shot message through a channel transport.
    Send {
        /// Channel name: `qqbot` or `feishu`.
        #[arg(long)]
        channel: String,
        /// Target address (`user:<id>`, `group:<id>`, `channel:<id>`,
        /// `chat:<id>`).
        #[arg(long)]
        to: String,
        #[arg(long)]
        text: Option<String>,
        /// Media URL or local path.
        #[arg(long)]
        media: Option<String>,
    },
}

/// Keys sessions by channel, account and peer. Enough for the CLI harness;
/// embedders provide their own resolver.
struct KeyedResolver;

impl RouteResolver for KeyedResolver {
    fn resolve(&self, channel: &str, account_id: &str, peer: &Peer) -> ResolvedRoute {
        ResolvedRoute {
            session_key: format!("{channel}:{account_id}:{}", peer.id),
            agent_id: "main".to_string(),
            account_id: None,
            main_session_key: None,
        }
    }
}

/// Echoes the inbound body back as a single final reply.
struct EchoEngine;

#[async_trait::async_trait]
impl ReplyEngine for EchoEngine {
    async fn run(&self, ctx: &DispatchContext) -> anyhow::Result<Vec<ReplyEvent>> {
        let body = ctx.body_for_agent.as_deref().unwrap_or(&ctx.body);
        Ok(vec![ReplyEvent::final_reply(ReplyPayload::text(body))])
    }
}

fn read_payload(path: &str) -> anyhow::Result<serde_json::Value> {
    let raw = if path == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read event from stdin")?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read event file {path}"))?
    };
    serde_json::from_str(&raw).context("event payload is not valid JSON")
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Dispatch { event_type, payload, account } => {
            let qq = config
                .channels
                .qqbot
                .as_ref()
                .context("dispatch requires a [channels.qqbot] config table")?;
            let transport = QqBotTransport::new(qq)?;
            let runtime = AgentRuntime::new(Arc::new(KeyedResolver), Arc::new(EchoEngine));
            let event = read_payload(&payload)?;
            handle_qqbot_dispatch(&event_type, &event, &config, &account, &runtime, &transport)
                .await;
        }
        Command::Send { channel, to, text, media } => {
            let transport: Box<dyn Transport> = match channel.as_str() {
                "qqbot" => {
                    let qq = config
                        .channels
                        .qqbot
                        .as_ref()
                        .context("missing [channels.qqbot] config table")?;
                    Box::new(QqBotTransport::new(qq)?)
                }
                "feishu" => {
                    let fs = config
                        .channels
                        .feishu
                        .as_ref()
                        .context("missing [channels.feishu] config table")?;
                    Box::new(FeishuTransport::new(fs)?)
                }
                other => anyhow::bail!("unknown channel: {other}"),
            };

            if text.is_none() && media.is_none() {
                anyhow::bail!("nothing to send: pass --text and/or --media");
            }
            if let Some(text) = text {
                let receipt = transport.send_text(&to, &text, None).await?;
                tracing::info!(message_id = %receipt.message_id, "text sent");
            }
            if let Some(media) = media {
                let receipt = transport.send_media(&to, &media, None).await?;
                tracing::info!(message_id = %receipt.message_id, "media sent");
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run(Cli::parse()).await
}
