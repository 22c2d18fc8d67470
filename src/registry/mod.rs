//! Handler registry
//!
//! Handler definitions are enumerated once at startup through a [`Loader`]
//! and frozen into one lookup table per [`HandlerKind`]. Any inconsistency in
//! the definitions is a configuration error and stops the process before it
//! serves a single interaction.

pub mod deploy;

pub use deploy::{deploy, CommandSink, DeployListener, TwilightCommandSink};

use crate::error::{DispatchError, HandlerError, ValidationError};
use crate::events::{EventKind, Listener};
use crate::interaction::{InteractionRequest, Reply, Responder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Separator between the lookup key and the parameters of a custom id
pub const CUSTOM_ID_DELIMITER: char = ':';

/// Kinds of interaction handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Command,
    Button,
    SelectMenu,
    Modal,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [
        HandlerKind::Command,
        HandlerKind::Button,
        HandlerKind::SelectMenu,
        HandlerKind::Modal,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Button => "button",
            Self::SelectMenu => "select-menu",
            Self::Modal => "modal",
        }
    }

    /// Components are keyed by custom id and carry parameters in it
    pub fn is_component(&self) -> bool {
        !matches!(self, Self::Command)
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-entry invocation policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    /// Minimum seconds between invocations by the same actor; 0 disables
    pub cooldown_secs: u64,
    /// Whether one component instance may be used more than once
    pub toggleable: bool,
    /// Seconds after the component was posted during which it accepts input
    pub timeout_secs: Option<u64>,
}

/// Slash command as registered with Discord
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub name: String,
    pub description: String,
}

impl CommandDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// What a handler sees while it runs
pub struct InteractionContext<'a> {
    pub request: &'a InteractionRequest,
    responder: &'a dyn Responder,
}

impl<'a> InteractionContext<'a> {
    pub fn new(request: &'a InteractionRequest, responder: &'a dyn Responder) -> Self {
        Self { request, responder }
    }

    pub async fn reply(&self, reply: Reply) -> Result<(), HandlerError> {
        self.responder
            .reply(self.request, reply)
            .await
            .map_err(HandlerError::from)
    }
}

/// A command or component handler
///
/// `parse` turns the raw custom-id parameters into typed input and rejects
/// bad input with a [`ValidationError`], which the router reports to the
/// user. Commands receive an empty parameter list.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Params: Send + 'static;

    fn parse(&self, raw: &[String]) -> Result<Self::Params, ValidationError>;

    async fn execute(
        &self,
        ctx: &InteractionContext<'_>,
        params: Self::Params,
    ) -> Result<(), HandlerError>;
}

/// Object-safe form of [`Handler`] stored in the registry
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn invoke(&self, ctx: &InteractionContext<'_>, raw: &[String]) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: Handler> DynHandler for H {
    async fn invoke(&self, ctx: &InteractionContext<'_>, raw: &[String]) -> Result<(), HandlerError> {
        let params = self.parse(raw)?;
        self.execute(ctx, params).await
    }
}

/// One immutable handler definition
pub struct RegistryEntry {
    kind: HandlerKind,
    key: String,
    policy: Policy,
    command: Option<CommandDefinition>,
    handler: Arc<dyn DynHandler>,
}

impl RegistryEntry {
    pub fn command(definition: CommandDefinition, handler: impl Handler) -> Self {
        Self {
            kind: HandlerKind::Command,
            key: definition.name.clone(),
            policy: Policy::default(),
            command: Some(definition),
            handler: Arc::new(handler),
        }
    }

    pub fn button(custom_id: impl Into<String>, handler: impl Handler) -> Self {
        Self::component(HandlerKind::Button, custom_id.into(), handler)
    }

    pub fn select_menu(custom_id: impl Into<String>, handler: impl Handler) -> Self {
        Self::component(HandlerKind::SelectMenu, custom_id.into(), handler)
    }

    pub fn modal(custom_id: impl Into<String>, handler: impl Handler) -> Self {
        Self::component(HandlerKind::Modal, custom_id.into(), handler)
    }

    fn component(kind: HandlerKind, key: String, handler: impl Handler) -> Self {
        Self {
            kind,
            key,
            policy: Policy::default(),
            command: None,
            handler: Arc::new(handler),
        }
    }

    pub fn cooldown(mut self, secs: u64) -> Self {
        self.policy.cooldown_secs = secs;
        self
    }

    pub fn toggleable(mut self, toggleable: bool) -> Self {
        self.policy.toggleable = toggleable;
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.policy.timeout_secs = Some(secs);
        self
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn command_definition(&self) -> Option<&CommandDefinition> {
        self.command.as_ref()
    }

    /// Identifier unique across kinds, used for cooldown bookkeeping
    pub fn id(&self) -> String {
        format!("{}:{}", self.kind.label(), self.key)
    }

    pub(crate) fn handler(&self) -> &dyn DynHandler {
        self.handler.as_ref()
    }

    fn validate(&self, expected: HandlerKind) -> Result<(), DispatchError> {
        let invalid = |reason: &str| DispatchError::InvalidDefinition {
            kind: expected,
            key: self.key.clone(),
            reason: reason.to_string(),
        };

        if self.kind != expected {
            return Err(invalid(&format!("loaded as {expected} but defined as {}", self.kind)));
        }
        if self.key.trim().is_empty() {
            return Err(invalid("key must not be empty"));
        }
        if self.key.contains(CUSTOM_ID_DELIMITER) {
            return Err(invalid("key must not contain the custom id delimiter"));
        }
        if self.kind == HandlerKind::Command {
            let Some(command) = &self.command else {
                return Err(invalid("command is missing its definition"));
            };
            if command.description.trim().is_empty() {
                return Err(invalid("command description must not be empty"));
            }
            if self.policy.timeout_secs.is_some() {
                return Err(invalid("commands cannot have a component timeout"));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Source of handler definitions
pub trait Loader: Send + Sync {
    /// All definitions of one kind
    fn load(&self, kind: HandlerKind) -> Result<Vec<RegistryEntry>, DispatchError>;

    /// Event listeners to register on the local bus
    fn listeners(&self) -> Vec<(EventKind, Arc<dyn Listener>)> {
        Vec::new()
    }
}

type Table = HashMap<String, Arc<RegistryEntry>>;

/// Immutable lookup tables, one per handler kind
#[derive(Debug, Default)]
pub struct Registry {
    commands: Table,
    buttons: Table,
    select_menus: Table,
    modals: Table,
}

impl Registry {
    /// Build every table from `loader`.
    ///
    /// Duplicate keys within a kind, or invalid definitions, fail the whole
    /// load.
    pub fn load(loader: &dyn Loader) -> Result<Self, DispatchError> {
        let mut registry = Self::default();

        for kind in HandlerKind::ALL {
            let entries = loader.load(kind)?;
            let table = registry.table_mut(kind);

            for entry in entries {
                entry.validate(kind)?;
                if table.contains_key(entry.key()) {
                    return Err(DispatchError::DuplicateHandler {
                        kind,
                        key: entry.key().to_string(),
                    });
                }
                table.insert(entry.key().to_string(), Arc::new(entry));
            }

            info!(kind = %kind, count = table.len(), "Loaded handlers");
        }

        Ok(registry)
    }

    /// Exact-match lookup
    pub fn get(&self, kind: HandlerKind, key: &str) -> Option<Arc<RegistryEntry>> {
        self.table(kind).get(key).cloned()
    }

    pub fn len(&self, kind: HandlerKind) -> usize {
        self.table(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        HandlerKind::ALL.iter().all(|kind| self.table(*kind).is_empty())
    }

    /// Command definitions sorted by name
    pub fn command_definitions(&self) -> Vec<CommandDefinition> {
        let mut definitions: Vec<CommandDefinition> = self
            .commands
            .values()
            .filter_map(|entry| entry.command_definition().cloned())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    fn table(&self, kind: HandlerKind) -> &Table {
        match kind {
            HandlerKind::Command => &self.commands,
            HandlerKind::Button => &self.buttons,
            HandlerKind::SelectMenu => &self.select_menus,
            HandlerKind::Modal => &self.modals,
        }
    }

    fn table_mut(&mut self, kind: HandlerKind) -> &mut Table {
        match kind {
            HandlerKind::Command => &mut self.commands,
            HandlerKind::Button => &mut self.buttons,
            HandlerKind::SelectMenu => &mut self.select_menus,
            HandlerKind::Modal => &mut self.modals,
        }
    }
}
