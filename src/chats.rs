//! `tgscrape chats`: print accessible dialogs and their peer ids.
//!
//! The peer id printed here is the value `TELEGRAM_CHAT_ID` expects.

use anyhow::Result;
use std::io::Write;

use crate::config::Config;
use crate::models::DialogInfo;
use crate::telegram::TelegramSource;

pub async fn run_chats(config: &Config, json: bool) -> Result<()> {
    let source = TelegramSource::connect(config).await?;
    let result = async {
        source.ensure_authorized().await?;
        source.dialogs().await
    }
    .await;
    source.close()?;

    let dialogs = result?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_dialogs(&mut out, &dialogs, json)?;
    Ok(())
}

/// Render dialogs as human-readable blocks or as one JSON object per line.
pub fn write_dialogs<W: Write>(out: &mut W, dialogs: &[DialogInfo], json: bool) -> Result<()> {
    for dialog in dialogs {
        if json {
            writeln!(out, "{}", serde_json::to_string(dialog)?)?;
            continue;
        }

        writeln!(out, "{}", dialog.title)?;
        writeln!(out, "  ID: {}", dialog.id)?;
        writeln!(
            out,
            "  Username: {}",
            dialog.username.as_deref().unwrap_or("-")
        )?;
        writeln!(out, "  Type: {}", dialog.kind)?;
        writeln!(out, "  PeerID: {}", dialog.peer_id)?;
        if dialog.is_bot {
            writeln!(out, "  Bot account")?;
        }
        if dialog.megagroup {
            writeln!(out, "  Supergroup")?;
        }
        if dialog.broadcast {
            writeln!(out, "  Channel")?;
        }
        if let Some(hash) = dialog.access_hash {
            writeln!(out, "  AccessHash: {}", hash)?;
        }
        writeln!(out, "{}", "-".repeat(40))?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialogs() -> Vec<DialogInfo> {
        vec![
            DialogInfo {
                title: "Rustaceans".to_string(),
                id: 1234567890,
                username: Some("rustaceans".to_string()),
                kind: "Channel".to_string(),
                peer_id: -1001234567890,
                is_bot: false,
                megagroup: true,
                broadcast: false,
                access_hash: Some(99),
            },
            DialogInfo {
                title: "NoTitle".to_string(),
                id: 42,
                username: None,
                kind: "User".to_string(),
                peer_id: 42,
                is_bot: true,
                megagroup: false,
                broadcast: false,
                access_hash: None,
            },
        ]
    }

    #[test]
    fn human_output_shows_peer_ids() {
        let mut out = Vec::new();
        write_dialogs(&mut out, &dialogs(), false).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Rustaceans\n"));
        assert!(text.contains("  PeerID: -1001234567890\n"));
        assert!(text.contains("  Supergroup\n"));
        assert!(text.contains("  Username: -\n"));
        assert!(text.contains("  Bot account\n"));
        assert_eq!(text.matches(&"-".repeat(40)).count(), 2);
    }

    #[test]
    fn json_output_is_one_object_per_dialog() {
        let mut out = Vec::new();
        write_dialogs(&mut out, &dialogs(), true).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["peer_id"], -1001234567890i64);
        assert_eq!(first["type"], "Channel");
        assert_eq!(first["username"], "rustaceans");
    }
}
