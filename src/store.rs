//! In-memory channel, session and link storage.
//!
//! Stands in for the relational database: the handlers only need these few
//! operations, and the two-factor executor runs its actions against them.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::markdown::OutlineEntry;
use crate::twofactor::{ActionDescriptor, ActionExecutor};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: u64,
    pub channel: String,
    pub title: String,
    pub url: Option<String>,
    pub markdown: String,
    pub html: String,
    pub tags: Vec<String>,
    pub cover_image: Option<String>,
    pub outline: Option<Vec<OutlineEntry>>,
    pub created_at: DateTime<Utc>,
}

/// Fields of a link before it has an id.
#[derive(Clone, Debug)]
pub struct NewLink {
    pub channel: String,
    pub title: String,
    pub url: Option<String>,
    pub markdown: String,
    pub html: String,
    pub tags: Vec<String>,
    pub cover_image: Option<String>,
    pub outline: Option<Vec<OutlineEntry>>,
}

/// Listing filter for [`Store::list_links`].
#[derive(Clone, Debug, Default)]
pub struct LinkQuery {
    pub channel: Option<String>,
    pub tag: Option<String>,
    pub limit: usize,
}

#[derive(Default)]
pub struct Store {
    channels: DashMap<String, Channel>,
    sessions: DashMap<String, String>,
    links: DashMap<u64, Link>,
    next_id: AtomicU64,
}

pub fn is_plausible_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, channel: Channel) {
        self.channels.insert(channel.name.clone(), channel);
    }

    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.channels.get(name).map(|c| c.clone())
    }

    /// Register a session token; the channel is created if unknown.
    pub fn add_session(&self, token: &str, channel: &str) {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| Channel {
                name: channel.to_string(),
                email: None,
            });
        self.sessions.insert(token.to_string(), channel.to_string());
    }

    /// Channel owning the session `token`.
    pub fn session_channel(&self, token: &str) -> Option<Channel> {
        let name = self.sessions.get(token).map(|c| c.clone())?;
        self.channel(&name)
    }

    pub fn insert_link(&self, new: NewLink) -> Link {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let link = Link {
            id,
            channel: new.channel,
            title: new.title,
            url: new.url,
            markdown: new.markdown,
            html: new.html,
            tags: new.tags,
            cover_image: new.cover_image,
            outline: new.outline,
            created_at: Utc::now(),
        };
        self.links.insert(id, link.clone());
        link
    }

    pub fn link(&self, id: u64) -> Option<Link> {
        self.links.get(&id).map(|l| l.clone())
    }

    /// Newest first.
    pub fn list_links(&self, query: &LinkQuery) -> Vec<Link> {
        let mut links: Vec<Link> = self
            .links
            .iter()
            .filter(|l| query.channel.as_deref().map_or(true, |c| l.channel == c))
            .filter(|l| query.tag.as_deref().map_or(true, |t| l.tags.iter().any(|x| x == t)))
            .map(|l| l.clone())
            .collect();
        links.sort_by(|a, b| b.id.cmp(&a.id));
        links.truncate(query.limit);
        links
    }

    fn delete_link(&self, channel: &str, id: u64) -> Result<Value> {
        match self.links.remove_if(&id, |_, l| l.channel == channel) {
            Some(_) => Ok(json!({"deleted": id})),
            None => Err(AppError::NotFound(format!("link {}", id))),
        }
    }

    fn change_email(&self, channel: &str, email: &str) -> Result<Value> {
        if !is_plausible_email(email) {
            return Err(AppError::Validation(format!("invalid email address {}", email)));
        }
        let mut entry = self
            .channels
            .get_mut(channel)
            .ok_or_else(|| AppError::NotFound(format!("channel {}", channel)))?;
        entry.email = Some(email.to_string());
        Ok(json!({"channel": channel, "email": email}))
    }

    fn revoke_sessions(&self, channel: &str) -> Value {
        let before = self.sessions.len();
        self.sessions.retain(|_, owner| owner != channel);
        json!({"channel": channel, "revoked": before.saturating_sub(self.sessions.len())})
    }
}

#[async_trait::async_trait]
impl ActionExecutor for Store {
    async fn execute(&self, action: &ActionDescriptor) -> Result<Option<Value>> {
        let result = match action {
            ActionDescriptor::DeleteLink { channel, link_id } => self.delete_link(channel, *link_id)?,
            ActionDescriptor::ChangeEmail { channel, email } => self.change_email(channel, email)?,
            ActionDescriptor::RevokeSessions { channel } => self.revoke_sessions(channel),
        };
        Ok(Some(result))
    }
}
