//! Slash commands: the registry, the context handed to handlers and the
//! responder they reply through.

pub mod ping;
mod registry;
mod responder;

pub use registry::CommandRegistry;
pub use responder::Responder;

use std::future::Future;

use async_trait::async_trait;

use crate::gateway::events::InboundEvent;
use crate::models::interaction::{CommandOptionValue, Interaction};

/// A decoded `interaction.create` event.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandContext {
    pub interaction_id: String,
    pub token: String,
    pub name: String,
    pub actor_id: Option<String>,
    pub channel_id: Option<String>,
    pub space_id: Option<String>,
    pub options: Vec<(String, serde_json::Value)>,
}

impl CommandContext {
    /// `None` when the event is not a command invocation or has no command data.
    pub fn from_event(event: &InboundEvent) -> Option<Self> {
        if !event.is_command() {
            return None;
        }
        let interaction: Interaction = match serde_json::from_value(event.payload.clone()) {
            Ok(interaction) => interaction,
            Err(e) => {
                tracing::warn!(seq = event.sequence, "undecodable interaction: {e}");
                return None;
            }
        };
        let data = interaction.data?;

        let mut options = Vec::new();
        flatten_options(&data.options, &mut options);

        Some(Self {
            interaction_id: interaction.id,
            token: interaction.token,
            name: data.name,
            actor_id: interaction.user_id.or_else(|| event.actor_id.clone()),
            channel_id: interaction.channel_id,
            space_id: interaction.space_id,
            options,
        })
    }

    /// The invoking user as a mention, e.g. `<@U1>`.
    pub fn mention(&self) -> String {
        match self.actor_id {
            Some(ref id) => format!("<@{id}>"),
            None => "someone".to_string(),
        }
    }

    pub fn option(&self, name: &str) -> Option<&serde_json::Value> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

// Subcommand groups nest their options; handlers see them flat.
fn flatten_options(options: &[CommandOptionValue], out: &mut Vec<(String, serde_json::Value)>) {
    for opt in options {
        if let Some(ref value) = opt.value {
            out.push((opt.name.clone(), value.clone()));
        }
        flatten_options(&opt.options, out);
    }
}

/// Handles one command invocation. Errors are logged by the dispatcher and
/// never reach the gateway loop.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: CommandContext, responder: Responder) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(CommandContext, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: CommandContext, responder: Responder) -> anyhow::Result<()> {
        (self)(ctx, responder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command_event(payload: serde_json::Value) -> InboundEvent {
        InboundEvent::new(crate::gateway::events::COMMAND_EVENT, 1, payload)
    }

    #[test]
    fn test_context_from_interaction() {
        let event = command_event(json!({
            "id": "i1",
            "token": "tok",
            "user_id": "U1",
            "channel_id": "C1",
            "data": {
                "name": "remind",
                "options": [
                    { "name": "in", "value": "5m" },
                    { "name": "group", "options": [{ "name": "text", "value": "tea" }] }
                ]
            }
        }));
        let ctx = CommandContext::from_event(&event).unwrap();
        assert_eq!(ctx.name, "remind");
        assert_eq!(ctx.interaction_id, "i1");
        assert_eq!(ctx.channel_id.as_deref(), Some("C1"));
        assert_eq!(ctx.mention(), "<@U1>");
        assert_eq!(ctx.option("in"), Some(&json!("5m")));
        assert_eq!(ctx.option("text"), Some(&json!("tea")));
        assert!(ctx.option("group").is_none());
    }

    #[test]
    fn test_non_command_events_have_no_context() {
        let event = InboundEvent::new("message.create", 1, json!({ "id": "m1" }));
        assert!(CommandContext::from_event(&event).is_none());
    }

    #[test]
    fn test_interaction_without_data_is_skipped() {
        let event = command_event(json!({ "id": "i1", "token": "tok" }));
        assert!(CommandContext::from_event(&event).is_none());
    }

    #[test]
    fn test_malformed_interaction_is_skipped() {
        let event = command_event(json!({ "token": 7 }));
        assert!(CommandContext::from_event(&event).is_none());
    }
}
