//! Command deployment
//!
//! Pushes the registry's command set to Discord as one bulk overwrite. The
//! remote side replaces its whole global command list, so deploying the same
//! set again leaves it unchanged.

use super::{CommandDefinition, Registry};
use crate::error::{DispatchError, HandlerError};
use crate::events::{EventKind, Listener, LocalEvent};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use twilight_http::Client;
use twilight_model::application::command::Command;
use twilight_model::id::marker::ApplicationMarker;
use twilight_model::id::Id;

/// Remote command list with bulk-overwrite semantics
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Replace the remote list with `commands`; returns the resulting names
    async fn overwrite(&self, commands: &[CommandDefinition]) -> Result<Vec<String>, DispatchError>;
}

/// Deploy every command in `registry`
pub async fn deploy(registry: &Registry, sink: &dyn CommandSink) -> Result<Vec<String>, DispatchError> {
    let definitions = registry.command_definitions();
    let deployed = sink.overwrite(&definitions).await?;
    info!(count = deployed.len(), commands = ?deployed, "Deployed commands");
    Ok(deployed)
}

/// Global application commands through the Discord HTTP API
pub struct TwilightCommandSink {
    http: Arc<Client>,
    application_id: Id<ApplicationMarker>,
}

impl TwilightCommandSink {
    pub fn new(http: Arc<Client>, application_id: Id<ApplicationMarker>) -> Self {
        Self {
            http,
            application_id,
        }
    }

    fn to_command(definition: &CommandDefinition) -> Result<Command, DispatchError> {
        serde_json::from_value(json!({
            "type": 1,
            "name": definition.name,
            "description": definition.description,
            "options": [],
            "version": "1",
        }))
        .map_err(|source| DispatchError::SerializationFailed {
            context: format!("command '{}'", definition.name),
            source,
        })
    }
}

#[async_trait]
impl CommandSink for TwilightCommandSink {
    async fn overwrite(&self, commands: &[CommandDefinition]) -> Result<Vec<String>, DispatchError> {
        let commands = commands
            .iter()
            .map(Self::to_command)
            .collect::<Result<Vec<_>, _>>()?;

        let deployed = self
            .http
            .interaction(self.application_id)
            .set_global_commands(&commands)
            .await
            .map_err(|e| DispatchError::Http {
                operation: "set_global_commands",
                source: Box::new(e),
            })?
            .models()
            .await
            .map_err(|e| DispatchError::Http {
                operation: "set_global_commands",
                source: Box::new(e),
            })?;

        Ok(deployed.into_iter().map(|command| command.name).collect())
    }
}

/// Redeploys commands whenever a deploy trigger arrives
pub struct DeployListener {
    registry: Arc<Registry>,
    sink: Arc<dyn CommandSink>,
}

impl DeployListener {
    pub fn new(registry: Arc<Registry>, sink: Arc<dyn CommandSink>) -> Self {
        Self { registry, sink }
    }

    pub const KIND: EventKind = EventKind::Deploy;
}

#[async_trait]
impl Listener for DeployListener {
    fn name(&self) -> &str {
        "deploy"
    }

    async fn on_event(&self, event: &LocalEvent) -> Result<(), HandlerError> {
        if !matches!(event, LocalEvent::Deploy) {
            return Ok(());
        }
        deploy(&self.registry, self.sink.as_ref()).await?;
        Ok(())
    }
}
