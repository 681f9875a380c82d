use super::{CommandContext, CommandRegistry, Responder};
use crate::error::RegistryError;

pub const NAME: &str = "ping";
pub const DESCRIPTION: &str = "replies with pong!";

pub async fn ping(_ctx: CommandContext, responder: Responder) -> anyhow::Result<()> {
    let ack = responder
        .reply(format!("pong! requested by {}", responder.mention()))
        .await?;
    tracing::debug!(status = ack.status, "ping answered");
    Ok(())
}

pub fn register(registry: &mut CommandRegistry) -> Result<(), RegistryError> {
    registry.register(NAME, DESCRIPTION, ping)
}
