use serde::{Deserialize, Serialize};

/// Slash-command interaction as delivered in an `interaction.create` event.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub application_id: Option<String>,
    #[serde(rename = "type")]
    pub interaction_type: Option<String>,
    pub data: Option<InteractionData>,
    pub space_id: Option<String>,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionData {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub options: Vec<CommandOptionValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandOptionValue {
    pub name: String,
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Vec<CommandOptionValue>,
}

/// Command definition published to `/applications/{app_id}/commands`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub command_type: String,
}

impl CommandDefinition {
    pub fn chat_input(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            command_type: "chat_input".to_string(),
        }
    }
}
