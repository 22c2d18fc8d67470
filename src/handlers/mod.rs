//! Built-in handler set

pub mod force_update;
pub mod media_selection;

pub use force_update::{AccountLinks, ForceUpdate, KvAccountLinks};
pub use media_selection::{MediaSelection, MediaType};

use crate::api::OriginApi;
use crate::error::{DispatchError, HandlerError};
use crate::events::{DispatchEvent, EventKind, Listener, LocalEvent};
use crate::registry::{HandlerKind, Loader, RegistryEntry};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Loader for the handlers compiled into this binary
pub struct BuiltinLoader {
    accounts: Arc<dyn AccountLinks>,
    api: Arc<dyn OriginApi>,
}

impl BuiltinLoader {
    pub fn new(accounts: Arc<dyn AccountLinks>, api: Arc<dyn OriginApi>) -> Self {
        Self { accounts, api }
    }
}

impl Loader for BuiltinLoader {
    fn load(&self, kind: HandlerKind) -> Result<Vec<RegistryEntry>, DispatchError> {
        Ok(match kind {
            HandlerKind::Command => {
                vec![ForceUpdate::new(Arc::clone(&self.accounts), Arc::clone(&self.api)).entry()]
            }
            HandlerKind::SelectMenu => vec![MediaSelection::entry()],
            HandlerKind::Button | HandlerKind::Modal => Vec::new(),
        })
    }

    fn listeners(&self) -> Vec<(EventKind, Arc<dyn Listener>)> {
        let lifecycle: Arc<dyn Listener> = Arc::new(GuildLifecycle);
        vec![(EventKind::Other, lifecycle)]
    }
}

/// Logs guilds joining and leaving
pub struct GuildLifecycle;

#[async_trait]
impl Listener for GuildLifecycle {
    fn name(&self) -> &str {
        "guild-lifecycle"
    }

    async fn on_event(&self, event: &LocalEvent) -> Result<(), HandlerError> {
        let LocalEvent::Dispatch {
            shard_id,
            event: DispatchEvent::Other { name, data },
        } = event
        else {
            return Ok(());
        };

        let guild_id = data.get("id").and_then(|id| id.as_str()).unwrap_or_default();
        match name.as_str() {
            "GUILD_CREATE" => {
                let guild_name = data.get("name").and_then(|n| n.as_str()).unwrap_or_default();
                info!(shard_id, guild_id, guild_name, "Guild available");
            }
            "GUILD_DELETE" => {
                let unavailable = data
                    .get("unavailable")
                    .and_then(|u| u.as_bool())
                    .unwrap_or(false);
                info!(shard_id, guild_id, unavailable, "Guild removed");
            }
            other => debug!(shard_id, event = other, "Unhandled dispatch event"),
        }
        Ok(())
    }
}
