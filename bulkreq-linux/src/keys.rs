//! Operator keys from stdin, standing in for board buttons.
//! Button 1 (`1` or `r`) makes a request; button 3 (`3` or `a`) announces the device.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use bulkreq_core::Key;

use crate::event_loop::HostEvent;

pub fn parse_key(line: &str) -> Option<Key> {
    match line.trim() {
        "1" | "r" | "request" => Some(Key::Request),
        "3" | "a" | "announce" => Some(Key::Announce),
        _ => None,
    }
}

/// Queue a key event per recognised stdin line until stdin closes.
pub async fn read_keys(events: mpsc::UnboundedSender<HostEvent>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_key(&line) {
            Some(key) => {
                if events.send(HostEvent::Key(key)).is_err() {
                    break;
                }
            }
            None if line.trim().is_empty() => {}
            None => tracing::warn!(input = %line.trim(), "unknown key"),
        }
    }
    Ok(())
}
