use std::collections::BTreeSet;

use crate::error::ConfigError;

/// All valid intent strings.
pub const ALL_INTENTS: &[&str] = &[
    "spaces",
    "moderation",
    "emojis",
    "voice_states",
    "messages",
    "message_reactions",
    "message_typing",
    "direct_messages",
    "dm_reactions",
    "dm_typing",
    "scheduled_events",
    // Privileged
    "members",
    "presences",
    "message_content",
];

pub const PRIVILEGED_INTENTS: &[&str] = &["members", "presences", "message_content"];

/// Map an event type to its required intent.
pub fn intent_for_event(event_type: &str) -> Option<&'static str> {
    match event_type {
        "message.create" | "message.update" | "message.delete" | "message.delete_bulk" => {
            Some("messages")
        }
        "member.join" | "member.leave" | "member.update" | "member.chunk" => Some("members"),
        "space.create" | "space.update" | "space.delete" => Some("spaces"),
        "channel.create" | "channel.update" | "channel.delete" | "channel.pins_update" => {
            Some("spaces")
        }
        "role.create" | "role.update" | "role.delete" => Some("spaces"),
        "reaction.add" | "reaction.remove" | "reaction.clear" | "reaction.clear_emoji" => {
            Some("message_reactions")
        }
        "typing.start" => Some("message_typing"),
        "presence.update" => Some("presences"),
        "voice.state_update" | "voice.server_update" | "voice.signal" => Some("voice_states"),
        "ban.create" | "ban.delete" => Some("moderation"),
        "invite.create" | "invite.delete" => Some("spaces"),
        "emoji.update" => Some("emojis"),
        "interaction.create" => None, // always delivered
        _ => None,
    }
}

/// The event categories requested at connect time. Events whose category is
/// not subscribed are dropped before they reach the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions {
    intents: BTreeSet<&'static str>,
}

impl Subscriptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            intents: ALL_INTENTS.iter().copied().collect(),
        }
    }

    /// Enable delivery of one category. Accepts an intent name or any event
    /// type belonging to it (`"message.create"` enables `messages`).
    pub fn subscribe(mut self, name: &str) -> Result<Self, ConfigError> {
        let intent = ALL_INTENTS
            .iter()
            .copied()
            .find(|i| *i == name)
            .or_else(|| intent_for_event(name))
            .ok_or_else(|| ConfigError::UnknownIntent(name.to_string()))?;
        self.intents.insert(intent);
        Ok(self)
    }

    /// Parse a comma separated list, e.g. `"messages, presences"`.
    pub fn parse(list: &str) -> Result<Self, ConfigError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .try_fold(Self::none(), |subs, name| subs.subscribe(name))
    }

    pub fn allows(&self, event_type: &str) -> bool {
        match intent_for_event(event_type) {
            Some(required) => self.intents.contains(required),
            None => true, // No intent required = always delivered
        }
    }

    pub fn privileged(&self) -> Vec<&'static str> {
        self.intents
            .iter()
            .copied()
            .filter(|i| PRIVILEGED_INTENTS.contains(i))
            .collect()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.intents.iter().map(|i| i.to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_by_intent_or_event_type() {
        let subs = Subscriptions::none()
            .subscribe("presences")
            .unwrap()
            .subscribe("message.create")
            .unwrap();
        assert_eq!(subs.to_vec(), vec!["messages", "presences"]);
        assert_eq!(subs.privileged(), vec!["presences"]);
    }

    #[test]
    fn test_unknown_intent_rejected() {
        let err = Subscriptions::parse("messages, everything").unwrap_err();
        assert_eq!(err, ConfigError::UnknownIntent("everything".into()));
    }

    #[test]
    fn test_allows_only_subscribed_categories() {
        let subs = Subscriptions::parse("messages").unwrap();
        assert!(subs.allows("message.create"));
        assert!(!subs.allows("presence.update"));
        assert!(!subs.allows("typing.start"));
    }

    #[test]
    fn test_commands_always_delivered() {
        let subs = Subscriptions::none();
        assert!(subs.is_empty());
        assert!(subs.allows("interaction.create"));
        assert!(subs.allows("ready"));
    }

    #[test]
    fn test_parse_ignores_blank_entries() {
        let subs = Subscriptions::parse(" messages,, emojis ,").unwrap();
        assert_eq!(subs.to_vec(), vec!["emojis", "messages"]);
        assert_eq!(Subscriptions::all().to_vec().len(), ALL_INTENTS.len());
    }
}
