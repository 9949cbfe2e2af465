//! Durable chat threads and their message logs.
//!
//! [`ChatStore`] is the seam between the real-time core and storage. The
//! thread record only carries a denormalized summary of its latest message;
//! messages live in their own log keyed by thread.

mod memory;
mod sqlite;

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

pub use memory::InMemoryChatStore;
pub use sqlite::SqliteChatStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const MAX_ATTACHMENTS: usize = 20;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<MessageKind> {
        match value {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "file" => Some(MessageKind::File),
            _ => None,
        }
    }
}

/// Set of at least two distinct user ids. Fixed once a thread exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ParticipantSet(BTreeSet<String>);

impl ParticipantSet {
    pub fn new<I, S>(ids: I) -> ChatResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<String> = ids
            .into_iter()
            .map(Into::into)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        if ids.len() < 2 {
            return Err(ChatError::MalformedPayload(
                "a chat needs at least two distinct participants".into(),
            ));
        }

        Ok(Self(ids))
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.0.contains(user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical encoding of the sorted ids; with the car reference it forms
    /// the uniqueness key of a thread.
    pub fn key(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn from_key(key: &str) -> ChatResult<Self> {
        let ids: Vec<String> = serde_json::from_str(key)
            .map_err(|err| ChatError::Storage(format!("corrupt participant key: {err}")))?;
        Self::new(ids)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub sender_id: String,
    pub timestamp: i64,
}

impl LastMessage {
    pub fn of(message: &Message) -> Self {
        let content = match message.kind {
            MessageKind::Text => message.content.clone(),
            kind => format!("Sent {}", kind.as_str()),
        };

        Self {
            content,
            sender_id: message.sender_id.clone(),
            timestamp: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    pub id: Uuid,
    pub participants: ParticipantSet,
    pub car_ref: Option<String>,
    pub last_message: Option<LastMessage>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChatThread {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.contains(user_id)
    }
}

/// A message as stored. Only `is_read` ever changes after the append.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub attachments: Vec<serde_json::Value>,
    pub is_read: bool,
    pub created_at: i64,
}

/// A validated message not yet appended to a thread.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub attachments: Vec<serde_json::Value>,
}

impl NewMessage {
    pub fn text(sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
            attachments: Vec::new(),
        }
    }

    pub(crate) fn into_message(self, thread_id: Uuid, created_at: i64) -> Message {
        Message {
            id: Uuid::now_v7(),
            thread_id,
            sender_id: self.sender_id,
            content: self.content,
            kind: self.kind,
            attachments: self.attachments,
            is_read: false,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Appended {
    pub thread: ChatThread,
    pub message: Message,
}

/// History cursor: the newest `limit` messages strictly older than `before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePage {
    pub before: Option<i64>,
    pub limit: usize,
}

impl MessagePage {
    pub fn new(before: Option<i64>, limit: Option<usize>) -> Self {
        Self {
            before,
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }
}

impl Default for MessagePage {
    fn default() -> Self {
        Self::new(None, None)
    }
}

pub trait ChatStore: Send + Sync {
    /// Returns the thread for this participant set and car, creating it when
    /// absent. The flag is `true` when the thread was created by this call.
    fn find_or_create_thread(
        &self,
        participants: ParticipantSet,
        car_ref: Option<String>,
    ) -> BoxFuture<'_, ChatResult<(ChatThread, bool)>>;

    fn get_thread(&self, thread_id: Uuid) -> BoxFuture<'_, ChatResult<Option<ChatThread>>>;

    fn append_message(
        &self,
        thread_id: Uuid,
        message: NewMessage,
    ) -> BoxFuture<'_, ChatResult<Appended>>;

    /// Flags every message not sent by `reader_id` as read. Returns how many
    /// messages changed state.
    fn mark_read(&self, thread_id: Uuid, reader_id: String) -> BoxFuture<'_, ChatResult<u64>>;

    /// Threads the user participates in, most recently updated first.
    fn list_for_user(&self, user_id: String) -> BoxFuture<'_, ChatResult<Vec<ChatThread>>>;

    /// One page of history, oldest first.
    fn list_messages(
        &self,
        thread_id: Uuid,
        page: MessagePage,
    ) -> BoxFuture<'_, ChatResult<Vec<Message>>>;

    fn set_active(&self, thread_id: Uuid, active: bool) -> BoxFuture<'_, ChatResult<ChatThread>>;
}
