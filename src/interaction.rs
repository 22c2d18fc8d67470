//! Interaction requests and replies
//!
//! The router works on [`InteractionRequest`], a flattened view of a
//! twilight [`Interaction`] holding only what routing and policy need.
//! Replies go back through the [`Responder`] capability.

use crate::clock::snowflake_millis;
use crate::error::DispatchError;
use crate::registry::HandlerKind;
use async_trait::async_trait;
use std::sync::Arc;
use twilight_http::Client;
use twilight_model::application::interaction::{Interaction, InteractionData};
use twilight_model::channel::message::component::ComponentType;
use twilight_model::channel::message::MessageFlags;
use twilight_model::http::interaction::{
    InteractionResponse, InteractionResponseData, InteractionResponseType,
};
use twilight_model::id::marker::ApplicationMarker;
use twilight_model::id::Id;

/// Message a component is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentMessage {
    pub id: u64,
    /// Unix milliseconds, taken from the message snowflake
    pub created_at: u64,
}

impl ComponentMessage {
    pub fn from_id(id: u64) -> Self {
        Self {
            id,
            created_at: snowflake_millis(id),
        }
    }
}

/// One interaction to route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRequest {
    pub interaction_id: u64,
    pub token: String,
    pub shard_id: u64,
    pub actor_id: u64,
    pub kind: HandlerKind,
    /// Command name, or the full custom id of a component or modal
    pub custom_id: String,
    /// Selected values of a select menu, or submitted modal inputs
    pub values: Vec<String>,
    pub message: Option<ComponentMessage>,
}

impl InteractionRequest {
    /// Flatten a twilight interaction.
    ///
    /// Returns `None` for interaction types no handler kind covers (pings,
    /// autocomplete) and for interactions without an author.
    pub fn from_interaction(shard_id: u64, interaction: &Interaction) -> Option<Self> {
        let actor_id = interaction.author_id()?.get();

        let (kind, custom_id, values) = match interaction.data.as_ref()? {
            InteractionData::ApplicationCommand(data) => {
                (HandlerKind::Command, data.name.clone(), Vec::new())
            }
            InteractionData::MessageComponent(data) => {
                let kind = if data.component_type == ComponentType::Button {
                    HandlerKind::Button
                } else {
                    HandlerKind::SelectMenu
                };
                (kind, data.custom_id.clone(), data.values.clone())
            }
            InteractionData::ModalSubmit(data) => {
                let values = serde_json::to_value(data)
                    .map(|value| submitted_values(&value))
                    .unwrap_or_default();
                (HandlerKind::Modal, data.custom_id.clone(), values)
            }
            _ => return None,
        };

        Some(Self {
            interaction_id: interaction.id.get(),
            token: interaction.token.clone(),
            shard_id,
            actor_id,
            kind,
            custom_id,
            values,
            message: interaction
                .message
                .as_ref()
                .map(|message| ComponentMessage::from_id(message.id.get())),
        })
    }
}

/// Collect every text input `value` from a serialized modal submission.
fn submitted_values(value: &serde_json::Value) -> Vec<String> {
    let mut values = Vec::new();
    let mut pending = vec![value];
    while let Some(node) = pending.pop() {
        match node {
            serde_json::Value::Object(map) => {
                if let Some(serde_json::Value::String(v)) = map.get("value") {
                    values.push(v.clone());
                }
                pending.extend(map.values().filter(|v| v.is_object() || v.is_array()));
            }
            serde_json::Value::Array(items) => pending.extend(items.iter().rev()),
            _ => {}
        }
    }
    values
}

/// Message sent back to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub ephemeral: bool,
}

impl Reply {
    /// Visible only to the interacting user
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }

    pub fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }
}

/// Capability for answering interactions
#[async_trait]
pub trait Responder: Send + Sync {
    async fn reply(&self, request: &InteractionRequest, reply: Reply) -> Result<(), DispatchError>;
}

/// Responds through Discord's interaction callback endpoint
pub struct TwilightResponder {
    http: Arc<Client>,
    application_id: Id<ApplicationMarker>,
}

impl TwilightResponder {
    pub fn new(http: Arc<Client>, application_id: Id<ApplicationMarker>) -> Self {
        Self {
            http,
            application_id,
        }
    }
}

#[async_trait]
impl Responder for TwilightResponder {
    async fn reply(&self, request: &InteractionRequest, reply: Reply) -> Result<(), DispatchError> {
        let interaction_id =
            Id::new_checked(request.interaction_id).ok_or_else(|| DispatchError::Http {
                operation: "create_response",
                source: "interaction id is zero".into(),
            })?;

        let response = InteractionResponse {
            kind: InteractionResponseType::ChannelMessageWithSource,
            data: Some(InteractionResponseData {
                content: Some(reply.content),
                flags: reply.ephemeral.then_some(MessageFlags::EPHEMERAL),
                ..Default::default()
            }),
        };

        self.http
            .interaction(self.application_id)
            .create_response(interaction_id, &request.token, &response)
            .await
            .map(|_| ())
            .map_err(|e| DispatchError::Http {
                operation: "create_response",
                source: Box::new(e),
            })
    }
}
