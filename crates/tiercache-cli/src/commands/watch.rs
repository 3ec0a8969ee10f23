use anyhow::{Context, Result};
use futures_util::StreamExt;
use tiercache::{CacheSettings, InvalidationMessage, RemoteStore};

use super::Session;
use crate::output::{print_invalidation, print_success, print_warning};

/// Stream invalidation traffic until Ctrl+C.
pub async fn run(settings: &CacheSettings) -> Result<()> {
    let session = Session::open(settings)?;
    let pattern = session.channels.pattern().to_string();
    let mut messages = session
        .store
        .psubscribe(&pattern)
        .await
        .context("failed to subscribe to invalidation channels")?;

    print_success(&format!("Watching {pattern} (Ctrl+C to stop)"));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = messages.next() => {
                let Some(message) = next else {
                    print_warning("subscription closed by server");
                    break;
                };
                let Some(command) = session.channels.command(&message.channel) else {
                    continue;
                };
                match InvalidationMessage::decode(&message.channel, command, &message.payload) {
                    Ok(decoded) => print_invalidation(&message.channel, &decoded),
                    Err(e) => print_warning(&format!("{}: {e}", message.channel)),
                }
            }
        }
    }

    session.close();
    Ok(())
}
