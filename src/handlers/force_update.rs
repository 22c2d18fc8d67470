//! `/force-update`: drop the caller's cached scores on the origin API

use crate::api::{ApiStatus, OriginApi};
use crate::error::{DispatchError, HandlerError, ValidationError};
use crate::interaction::Reply;
use crate::registry::{CommandDefinition, Handler, InteractionContext, RegistryEntry};
use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

pub const NAME: &str = "force-update";
pub const COOLDOWN_SECS: u64 = 300;

pub const NOT_LINKED: &str =
    "You must link your Anilist account to use this command. You can do so by using the `/setup` command.";
pub const EXPIRED: &str = "Successfully removed your scores from the cache!";
pub const PROBLEM: &str = "Problem trying to remove cache";

/// Lookup of the Anilist account linked to a Discord user
#[async_trait]
pub trait AccountLinks: Send + Sync {
    async fn linked_account(&self, discord_id: u64) -> Result<Option<u64>, DispatchError>;
}

#[derive(Deserialize)]
struct AccountLink {
    id: u64,
}

/// Account links in a JetStream key/value bucket, keyed `user-{discord id}`
/// with a `{"id": <anilist id>}` value
pub struct KvAccountLinks {
    store: kv::Store,
}

impl KvAccountLinks {
    pub async fn open(js: &jetstream::Context, bucket: &str) -> Result<Self, DispatchError> {
        let store = js
            .get_key_value(bucket)
            .await
            .map_err(|e| DispatchError::SubscribeFailed {
                target: bucket.to_string(),
                source: Box::new(e),
            })?;
        Ok(Self { store })
    }
}

#[async_trait]
impl AccountLinks for KvAccountLinks {
    async fn linked_account(&self, discord_id: u64) -> Result<Option<u64>, DispatchError> {
        let lookup_error = |source: Box<dyn std::error::Error + Send + Sync>| {
            DispatchError::AccountLookup {
                user_id: discord_id,
                source,
            }
        };

        let Some(value) = self
            .store
            .get(format!("user-{discord_id}"))
            .await
            .map_err(|e| lookup_error(Box::new(e)))?
        else {
            return Ok(None);
        };

        let link: AccountLink =
            serde_json::from_slice(&value).map_err(|e| lookup_error(Box::new(e)))?;
        Ok(Some(link.id))
    }
}

pub struct ForceUpdate {
    accounts: Arc<dyn AccountLinks>,
    api: Arc<dyn OriginApi>,
}

impl ForceUpdate {
    pub fn new(accounts: Arc<dyn AccountLinks>, api: Arc<dyn OriginApi>) -> Self {
        Self { accounts, api }
    }

    pub fn entry(self) -> RegistryEntry {
        RegistryEntry::command(
            CommandDefinition::new(NAME, "Force update the cache and remove your scores"),
            self,
        )
        .cooldown(COOLDOWN_SECS)
    }
}

#[async_trait]
impl Handler for ForceUpdate {
    type Params = ();

    fn parse(&self, _raw: &[String]) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn execute(&self, ctx: &InteractionContext<'_>, _params: ()) -> Result<(), HandlerError> {
        let actor_id = ctx.request.actor_id;
        let Some(user_id) = self.accounts.linked_account(actor_id).await? else {
            return ctx.reply(Reply::ephemeral(NOT_LINKED)).await;
        };
        debug!(actor_id, user_id, "Expiring cached user");

        match self.api.expire_user(user_id).await {
            Ok(ApiStatus::Success) => ctx.reply(Reply::ephemeral(EXPIRED)).await,
            Ok(ApiStatus::Failure(body)) => {
                error!(user_id, %body, "Origin API refused to expire user");
                Err(HandlerError::reported(
                    PROBLEM,
                    format!("origin API refused to expire user {user_id}: {body}"),
                ))
            }
            Err(e) => {
                error!(user_id, error = %e, "Error when trying to remove cache");
                Err(HandlerError::reported(PROBLEM, e))
            }
        }
    }
}
