use chrono::{DateTime, Datelike, FixedOffset, Utc};
use serde::Serialize;

use crate::data::model::{ChatHistories, ChatId};

pub const PINNED_LABEL: &str = "Pinned";
pub const OLDER_LABEL: &str = "Older";

#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub id: String,
    pub name: String,
    pub pinned: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatGroup {
    pub label: String,
    pub entries: Vec<ChatEntry>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Pinned,
    // (year, month), newest first once reversed
    Month(std::cmp::Reverse<(i32, u32)>),
    Older,
}

fn local_created_at(id: &ChatId, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    id.created_at().map(|at: DateTime<Utc>| at.with_timezone(&offset))
}

fn group_key(id: &ChatId, pinned: bool, offset: FixedOffset) -> GroupKey {
    if pinned {
        return GroupKey::Pinned;
    }
    match local_created_at(id, offset) {
        Some(at) => GroupKey::Month(std::cmp::Reverse((at.year(), at.month()))),
        None => GroupKey::Older,
    }
}

fn group_label(key: &GroupKey, id: &ChatId, offset: FixedOffset) -> String {
    match key {
        GroupKey::Pinned => PINNED_LABEL.to_string(),
        GroupKey::Month(_) => local_created_at(id, offset)
            .map(|at| at.format("%B %Y").to_string())
            .unwrap_or_else(|| OLDER_LABEL.to_string()),
        GroupKey::Older => OLDER_LABEL.to_string(),
    }
}

/// Sidebar groups: pinned first, then by month of creation, newest first.
/// `query` keeps only chats whose name contains it, ignoring case. Months are
/// calendar months at `offset` from UTC.
pub fn group_chats(
    histories: &ChatHistories,
    active: Option<&ChatId>,
    query: Option<&str>,
    offset: FixedOffset,
) -> Vec<ChatGroup> {
    let needle = query
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());

    let mut chats: Vec<_> = histories
        .iter()
        .filter(|(_, chat)| {
            needle
                .as_ref()
                .map_or(true, |n| chat.name.to_lowercase().contains(n))
        })
        .map(|(id, chat)| (group_key(id, chat.pinned, offset), id, chat))
        .collect();

    // group order, then newest chat first inside a group
    chats.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)));

    let mut groups: Vec<(GroupKey, ChatGroup)> = Vec::new();
    for (key, id, chat) in chats {
        let entry = ChatEntry {
            id: id.to_string(),
            name: chat.name.clone(),
            pinned: chat.pinned,
            active: active == Some(id),
        };
        match groups.last_mut() {
            Some((last, group)) if *last == key => group.entries.push(entry),
            _ => {
                let label = group_label(&key, id, offset);
                groups.push((
                    key,
                    ChatGroup {
                        label,
                        entries: vec![entry],
                    },
                ));
            }
        }
    }

    groups.into_iter().map(|(_, group)| group).collect()
}
