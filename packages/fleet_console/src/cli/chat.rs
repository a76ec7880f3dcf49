//! `fleet chat`: one assistant exchange, with the transcript kept live by the
//! conversation channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use fleet_state::{Author, ConversationEvent, ConversationTurn};
use tracing::{debug, info};

use crate::assistant::{AssistantClient, AssistantError};
use crate::config::FleetConfig;
use crate::credential::ConfigCredential;

/// How long to keep the channel open after the reply so a pushed echo of the
/// local turn can replace it.
const ECHO_GRACE: Duration = Duration::from_millis(500);

pub async fn chat_command(
    config: &FleetConfig,
    conversation: Option<String>,
    message: &str,
) -> Result<()> {
    let client = AssistantClient::new(
        &config.file.server.base_url,
        config.request_timeout(),
        Arc::new(ConfigCredential::from_config(&config.file.auth)),
    )?;

    let conversation_id = match conversation {
        Some(id) => id,
        None => {
            let created = client
                .create_conversation()
                .await
                .map_err(unavailable_hint)?;
            info!(
                conversation = %created.id,
                created_at = created.created_at.as_deref().unwrap_or("-"),
                "started new conversation"
            );
            created.id
        }
    };

    let live = super::live_channels(config);
    let tracker = live.open_conversation(&conversation_id);

    let history = client
        .history(&conversation_id)
        .await
        .map_err(unavailable_hint)
        .with_context(|| format!("Failed to load conversation {}", conversation_id))?;
    let fetched_at = Utc::now();
    tracker.update(|c| c.seed(history.into_iter().map(|e| e.into_turn(fetched_at))));
    debug!(
        conversation = %conversation_id,
        turns = tracker.read(|c| c.turns().len()),
        "history seeded"
    );

    let local_id = tracker.update(|c| c.submit_local(message, Utc::now()));
    let reply = client
        .send_message(&conversation_id, message, &local_id)
        .await
        .map_err(unavailable_hint)?;
    tracker.update(|c| c.apply(ConversationEvent::Turn(reply.into_turn(Utc::now()))));

    tokio::time::sleep(ECHO_GRACE).await;

    println!("conversation {}", conversation_id);
    tracker.read(|c| {
        for turn in c.turns() {
            println!("{}", render_turn(turn));
        }
    });

    live.close_all();
    Ok(())
}

fn unavailable_hint(err: AssistantError) -> anyhow::Error {
    match err {
        AssistantError::Unavailable => {
            anyhow::anyhow!("assistant API is unavailable; is the server running?")
        }
        other => other.into(),
    }
}

fn render_turn(turn: &ConversationTurn) -> String {
    let who = match turn.author {
        Author::Local if turn.is_optimistic() => "you*",
        Author::Local => "you",
        Author::Remote => "assistant",
    };
    format!("[{}] {}: {}", turn.timestamp.format("%H:%M:%S"), who, turn.text)
}
