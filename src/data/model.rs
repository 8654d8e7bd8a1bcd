use std::{cmp::Ordering, collections::BTreeMap, fmt};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Anything that is not `user` was written by the bot side.
    fn from_legacy(value: &str) -> Self {
        if value == "user" {
            Role::User
        } else {
            Role::Assistant
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// Older builds stored `{sender, text}`; newer ones `{role, content}`.
#[derive(Deserialize)]
struct StoredMessage {
    role: Option<String>,
    content: Option<String>,
    sender: Option<String>,
    text: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        let role = non_empty(stored.role)
            .or_else(|| non_empty(stored.sender))
            .map_or(Role::Assistant, |r| Role::from_legacy(&r));
        let content = non_empty(stored.content)
            .or(stored.text)
            .unwrap_or_default();
        Message { role, content }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        StoredMessage::deserialize(deserializer).map(Message::from)
    }
}

/// `chat-<unix millis>`; the timestamp drives ordering and sidebar grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatId {
    raw: String,
    millis: Option<i64>,
}

impl ChatId {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let millis = raw
            .strip_prefix("chat-")
            .and_then(|ts| ts.parse::<i64>().ok());
        Self { raw, millis }
    }

    pub fn from_millis(millis: i64) -> Self {
        Self {
            raw: format!("chat-{}", millis),
            millis: Some(millis),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn millis(&self) -> Option<i64> {
        self.millis
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.millis
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

impl Ord for ChatId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis
            .cmp(&other.millis)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for ChatId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for ChatId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ChatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ChatId::parse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRecord {
    pub name: String,
    pub pinned: bool,
    pub messages: Vec<Message>,
}

impl ChatRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pinned: false,
            messages: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredChat {
    // The very first builds pushed messages straight into the map entry.
    Messages(Vec<Message>),
    Record {
        name: Option<String>,
        #[serde(default)]
        pinned: bool,
        #[serde(default)]
        messages: Vec<Message>,
    },
}

impl StoredChat {
    fn into_record(self, position: usize) -> ChatRecord {
        let fallback = || format!("Chat {}", position);
        match self {
            StoredChat::Record {
                name,
                pinned,
                messages,
            } => ChatRecord {
                name: non_empty(name).unwrap_or_else(fallback),
                pinned,
                messages,
            },
            StoredChat::Messages(messages) => ChatRecord {
                name: fallback(),
                pinned: false,
                messages,
            },
        }
    }
}

/// Every saved conversation, keyed and ordered by chat id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChatHistories(BTreeMap<ChatId, ChatRecord>);

impl ChatHistories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: &ChatId) -> Option<&ChatRecord> {
        self.0.get(id)
    }

    pub fn get_mut(&mut self, id: &ChatId) -> Option<&mut ChatRecord> {
        self.0.get_mut(id)
    }

    pub fn contains(&self, id: &ChatId) -> bool {
        self.0.contains_key(id)
    }

    pub fn insert(&mut self, id: ChatId, record: ChatRecord) -> Option<ChatRecord> {
        self.0.insert(id, record)
    }

    pub fn remove(&mut self, id: &ChatId) -> Option<ChatRecord> {
        self.0.remove(id)
    }

    pub fn first_id(&self) -> Option<&ChatId> {
        self.0.keys().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChatId, &ChatRecord)> {
        self.0.iter()
    }

    /// Fresh id for a chat created at `now`, nudged forward on collision.
    pub fn next_id(&self, now: DateTime<Utc>) -> ChatId {
        let mut millis = now.timestamp_millis();
        loop {
            let id = ChatId::from_millis(millis);
            if !self.contains(&id) {
                return id;
            }
            millis += 1;
        }
    }
}

impl<'de> Deserialize<'de> for ChatHistories {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = BTreeMap::<ChatId, StoredChat>::deserialize(deserializer)?;
        Ok(ChatHistories(
            stored
                .into_iter()
                .enumerate()
                .map(|(index, (id, chat))| (id, chat.into_record(index + 1)))
                .collect(),
        ))
    }
}
