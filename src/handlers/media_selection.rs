//! `media_selection` select menu
//!
//! Posted under search results with custom id `media_selection:<anime|manga>`.
//! The selected option value is the Anilist media id.

use crate::error::{HandlerError, ValidationError};
use crate::interaction::Reply;
use crate::registry::{Handler, InteractionContext, RegistryEntry};
use async_trait::async_trait;

pub const CUSTOM_ID: &str = "media_selection";
pub const COOLDOWN_SECS: u64 = 1;
pub const TIMEOUT_SECS: u64 = 300;

const INVALID: &str = "Invalid Select Menu Data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Anime,
    Manga,
}

impl MediaType {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Anime => "anime",
            Self::Manga => "manga",
        }
    }
}

pub fn media_url(media_type: MediaType, id: u64) -> String {
    format!("https://anilist.co/{}/{id}", media_type.path())
}

pub struct MediaSelection;

impl MediaSelection {
    pub fn entry() -> RegistryEntry {
        RegistryEntry::select_menu(CUSTOM_ID, MediaSelection)
            .cooldown(COOLDOWN_SECS)
            .toggleable(true)
            .timeout(TIMEOUT_SECS)
    }
}

#[async_trait]
impl Handler for MediaSelection {
    type Params = MediaType;

    fn parse(&self, raw: &[String]) -> Result<MediaType, ValidationError> {
        match raw.first().map(String::as_str) {
            Some("anime") => Ok(MediaType::Anime),
            Some("manga") => Ok(MediaType::Manga),
            _ => Err(ValidationError::new(INVALID)),
        }
    }

    async fn execute(&self, ctx: &InteractionContext<'_>, media_type: MediaType) -> Result<(), HandlerError> {
        let id = ctx
            .request
            .values
            .first()
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| ValidationError::new(INVALID))?;

        ctx.reply(Reply::public(media_url(media_type, id))).await
    }
}
