pub mod chat;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};
use fleet_state::LiveChannels;
use push_channel::SseTransport;

use crate::config::FleetConfig;
use crate::credential::ConfigCredential;

/// Channels over SSE against the configured server.
pub fn live_channels(config: &FleetConfig) -> LiveChannels {
    let credential = ConfigCredential::from_config(&config.file.auth);
    let transport = Arc::new(SseTransport::new(
        config.file.server.base_url.clone(),
        credential,
    ));
    LiveChannels::new(transport, config.tracking_settings())
}

/// Print the effective configuration with secrets masked.
pub fn config_command(config: &FleetConfig) -> Result<()> {
    let mut file = config.file.clone();
    if file.auth.token.is_some() {
        file.auth.token = Some("********".to_string());
    }
    let rendered = toml::to_string_pretty(&file).context("Failed to render configuration")?;

    println!("# {}", config.config_path().display());
    print!("{}", rendered);
    Ok(())
}
