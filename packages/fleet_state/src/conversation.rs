//! Conversation Tracker
//!
//! An ordered, de-duplicated merge of locally typed turns and turns pushed by
//! the assistant, plus a transient "assistant is producing" flag.
//!
//! The merge itself is the pure [`reduce`] function so it can be driven from a
//! push channel, a polling loop, or a test without any runtime.
//!
//! Local turns are inserted optimistically under a temporary `local-<uuid>` id.
//! The client sends that id with the request and the server echoes it back as
//! `client_turn_id` on the confirmed turn; the echo then replaces the
//! optimistic entry.

use chrono::{DateTime, Utc};
use push_channel::{MessageKind, PushMessage};
use serde::Serialize;
use tracing::trace;

use crate::error::DecodeError;
use crate::payload::Payload;
use crate::processor::StreamProcessor;

const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    Local,
    Remote,
}

impl Author {
    /// Map a backend sender/role to an author. Only the human side is local.
    pub fn from_role(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "human" | "user" => Author::Local,
            _ => Author::Remote,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub turn_id: String,
    pub author: Author,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Temporary id of the optimistic local turn this one confirms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_turn_id: Option<String>,
}

impl ConversationTurn {
    /// A new optimistic local turn with a fresh temporary id.
    pub fn local(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            turn_id: new_local_id(),
            author: Author::Local,
            text: text.into(),
            timestamp,
            client_turn_id: None,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.author == Author::Local && is_local_id(&self.turn_id)
    }
}

pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4())
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConversationEvent {
    /// The assistant started producing a reply; carries no content
    Producing,
    /// A content turn from the channel or from history
    Turn(ConversationTurn),
    /// An optimistic turn typed by the local user
    LocalSubmit(ConversationTurn),
}

impl ConversationEvent {
    /// Decode an `ai_message` push.
    pub fn from_message(message: &PushMessage) -> Result<Self, DecodeError> {
        let p = Payload::of(message)?;

        if let Some(event) = p.text(&["event"]) {
            if matches!(event.as_str(), "producing" | "typing") {
                return Ok(ConversationEvent::Producing);
            }
        }

        let turn_id = p
            .text(&["turn_id", "id", "message_id"])
            .or_else(|| message.id.clone())
            .ok_or(DecodeError::MissingField("turn_id"))?;
        let text = p.require_text("content", &["content", "text"])?;
        let author = p
            .text(&["role", "sender"])
            .map(|r| Author::from_role(&r))
            .unwrap_or(Author::Remote);

        Ok(ConversationEvent::Turn(ConversationTurn {
            turn_id,
            author,
            text,
            timestamp: p.timestamp("timestamp")?.unwrap_or(message.timestamp),
            client_turn_id: p.text(&["client_turn_id"]),
        }))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConversationState {
    turns: Vec<ConversationTurn>,
    is_producing: bool,
}

impl ConversationState {
    /// Turns ordered by timestamp; equal timestamps keep insertion order.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn is_producing(&self) -> bool {
        self.is_producing
    }

    pub fn contains(&self, turn_id: &str) -> bool {
        self.turns.iter().any(|t| t.turn_id == turn_id)
    }
}

/// Fold one event into the conversation.
///
/// - `Producing` raises the flag.
/// - A turn whose id is already stored is discarded.
/// - A turn echoing a stored optimistic id through `client_turn_id` replaces it.
/// - Otherwise the turn is inserted and the sequence re-sorted by timestamp.
/// - Any new remote turn clears the producing flag.
pub fn reduce(mut state: ConversationState, event: ConversationEvent) -> ConversationState {
    let turn = match event {
        ConversationEvent::Producing => {
            state.is_producing = true;
            return state;
        }
        ConversationEvent::Turn(turn) | ConversationEvent::LocalSubmit(turn) => turn,
    };

    if state.contains(&turn.turn_id) {
        trace!(turn = %turn.turn_id, "duplicate turn");
        return state;
    }

    if let Some(client_id) = turn.client_turn_id.as_deref() {
        state
            .turns
            .retain(|t| !(t.is_optimistic() && t.turn_id == client_id));
    }

    if turn.author == Author::Remote {
        state.is_producing = false;
    }
    state.turns.push(turn);
    state.turns.sort_by_key(|t| t.timestamp);
    state
}

pub struct ConversationTracker {
    conversation_id: String,
    state: ConversationState,
}

impl ConversationTracker {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            state: ConversationState::default(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn apply(&mut self, event: ConversationEvent) {
        self.state = reduce(std::mem::take(&mut self.state), event);
    }

    /// Insert an optimistic local turn and return its temporary id, to be sent
    /// with the request so the server can echo it.
    pub fn submit_local(&mut self, text: impl Into<String>, now: DateTime<Utc>) -> String {
        let turn = ConversationTurn::local(text, now);
        let id = turn.turn_id.clone();
        self.apply(ConversationEvent::LocalSubmit(turn));
        id
    }

    /// Merge turns fetched from history.
    pub fn seed(&mut self, turns: impl IntoIterator<Item = ConversationTurn>) {
        for turn in turns {
            self.apply(ConversationEvent::Turn(turn));
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        self.state.turns()
    }

    pub fn is_producing(&self) -> bool {
        self.state.is_producing()
    }
}

impl StreamProcessor for ConversationTracker {
    const KIND: MessageKind = MessageKind::AiMessage;

    fn process(&mut self, message: &PushMessage, _now: DateTime<Utc>) -> Result<(), DecodeError> {
        let event = ConversationEvent::from_message(message)?;
        self.apply(event);
        Ok(())
    }
}
