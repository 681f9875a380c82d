use std::collections::BTreeMap;
use std::sync::Arc;

use super::CommandHandler;
use crate::error::{DuplicateCommandError, RegistryError};
use crate::models::interaction::CommandDefinition;

const MAX_NAME_LEN: usize = 32;

struct Entry {
    description: String,
    handler: Arc<dyn CommandHandler>,
}

/// Command name to handler. Filled before the client starts, read-only after.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Entry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. A second registration of the same name
    /// is rejected and the first one kept.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        handler: impl CommandHandler,
    ) -> Result<(), RegistryError> {
        if !is_valid_name(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if self.commands.contains_key(name) {
            return Err(DuplicateCommandError {
                name: name.to_string(),
            }
            .into());
        }
        self.commands.insert(
            name.to_string(),
            Entry {
                description: description.to_string(),
                handler: Arc::new(handler),
            },
        );
        tracing::debug!("registered command /{name}");
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.commands.get(name).map(|e| e.handler.clone())
    }

    /// What gets published to the application's command list.
    pub fn definitions(&self) -> Vec<CommandDefinition> {
        self.commands
            .iter()
            .map(|(name, e)| CommandDefinition::chat_input(name, &e.description))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}
