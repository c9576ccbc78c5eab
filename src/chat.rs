//! Chat host interface types.
//!
//! The chat application feeds roster and message events into the service;
//! these are the typed forms of those events plus the roster normalization
//! rules for group chats.

use serde::{Deserialize, Serialize};

/// A chat message as delivered by the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Speaking character (or user) name
    pub name: String,
    /// Message text
    pub text: String,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default)]
    pub is_system: bool,
}

/// Events emitted by the chat host
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The active chat switched; carries the new participant roster
    ChatChanged { members: Vec<String> },
    /// Group membership changed
    GroupUpdated { members: Vec<String> },
    /// A new message arrived
    MessageReceived(ChatMessage),
    /// An existing message was edited
    MessageEdited(ChatMessage),
}

/// Normalize a group-member identifier: strip the file extension and a
/// literal `default_` prefix.
pub fn normalize_member(member: &str) -> String {
    let stem = match member.rfind('.') {
        Some(dot) if dot > 0 => &member[..dot],
        _ => member,
    };
    stem.strip_prefix("default_").unwrap_or(stem).to_string()
}

/// Current chat participants: normalized, sorted, deduplicated.
pub fn roster(members: &[String]) -> Vec<String> {
    let mut names: Vec<String> = members.iter().map(|m| normalize_member(m)).collect();
    names.sort();
    names.dedup();
    names
}
