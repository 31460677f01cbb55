//! Operator console: parses input lines and renders engine actions.

use std::path::PathBuf;

use lifilink_core::{Command, EngineAction, PayloadKind, Slot};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    /// Hand a command to the engine.
    Command(Command),
    /// Read a file and send it as a `FILE` frame.
    SendFile(PathBuf),
    /// Stop the host.
    Quit,
}

/// Parse a console line.
///
/// Lines starting with `/` are commands; anything else is sent as text
/// (which is also how `new key` and `verify key` requests travel).
///
/// # Errors
///
/// Returns a usage message for an unknown or incomplete command.
pub fn parse_line(line: &str) -> Result<Option<ConsoleInput>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(ConsoleInput::Command(Command::SendText(line.as_bytes().to_vec()))));
    };

    let mut words = rest.split_whitespace();
    let input = match (words.next(), words.next()) {
        (Some("verify"), None) => ConsoleInput::Command(Command::VerifyKey),
        (Some("id"), None) => ConsoleInput::Command(Command::SendKeyId),
        (Some("slots"), None) => ConsoleInput::Command(Command::SlotStatus),
        (Some("reset-stats"), None) => ConsoleInput::Command(Command::ResetStats),
        (Some("clear"), Some("all")) => ConsoleInput::Command(Command::ClearAllSlots),
        (Some("clear"), Some(slot)) => ConsoleInput::Command(Command::ClearSlot(parse_slot(slot)?)),
        (Some("use"), Some(slot)) => ConsoleInput::Command(Command::UseSlot(parse_slot(slot)?)),
        (Some("file"), Some(_)) => {
            let path = rest.trim_start()["file".len()..].trim();
            ConsoleInput::SendFile(PathBuf::from(path))
        },
        (Some("quit"), None) => ConsoleInput::Quit,
        _ => return Err(usage()),
    };
    Ok(Some(input))
}

fn parse_slot(word: &str) -> Result<Slot, String> {
    match word {
        "a" | "A" => Ok(Slot::A),
        "b" | "B" => Ok(Slot::B),
        other => Err(format!("unknown slot '{other}', expected a or b")),
    }
}

fn usage() -> String {
    "commands: /verify /id /slots /clear a|b|all /use a|b /file <path> /reset-stats /quit"
        .to_string()
}

/// Render an action for the operator, if it is worth showing.
pub fn render(action: &EngineAction) -> Option<String> {
    let line = match action {
        EngineAction::Send(_) => return None,
        EngineAction::Delivered { kind: PayloadKind::Text, plaintext } => {
            format!("< {}", String::from_utf8_lossy(plaintext))
        },
        EngineAction::Delivered { kind: PayloadKind::File, plaintext } => {
            format!("< file ({} bytes)", plaintext.len())
        },
        EngineAction::RotationConfirmArmed => "rotation requested, waiting for 'yes'".to_string(),
        EngineAction::RotationConfirmExpired => "rotation request expired".to_string(),
        EngineAction::RotationStaged { key_id } => format!("sent key {key_id}, waiting for ACK"),
        EngineAction::RotationCommitted { key_id } => format!("rotated to key {key_id}"),
        EngineAction::RotationDiscarded { key_id } => format!("no ACK for key {key_id}"),
        EngineAction::RateLimited { retry_after } => {
            format!("rotation rate limited, retry in {}s", retry_after.as_secs().max(1))
        },
        EngineAction::ChallengeSent => "challenge sent".to_string(),
        EngineAction::ChallengeAnswered => "challenge answered".to_string(),
        EngineAction::ChallengeVerified => "peer verified: holds the session key".to_string(),
        EngineAction::ChallengeFailed => "peer FAILED verification".to_string(),
        EngineAction::ChallengeTimedOut => "challenge timed out".to_string(),
        EngineAction::KeyActivated { key_id, source } => format!("active key {key_id} ({source:?})"),
        EngineAction::KeyCleared => "no active key".to_string(),
        EngineAction::SlotStatus(reports) => reports
            .iter()
            .map(|r| {
                let content = r.key_id.map_or_else(|| "empty".to_string(), |id| id.to_string());
                let marker = if r.active { " (active)" } else { "" };
                format!("slot {}: {content}{marker}", r.slot)
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };
    Some(line)
}

/// Write the rendering of `action` to `out`, one line per entry.
///
/// # Errors
///
/// Returns the underlying I/O error if the write fails.
pub async fn show<W: AsyncWrite + Unpin>(out: &mut W, action: &EngineAction) -> std::io::Result<()> {
    let Some(line) = render(action) else {
        return Ok(());
    };
    out.write_all(format!("{line}\n").as_bytes()).await?;
    out.flush().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lifilink_core::SlotReport;
    use lifilink_crypto::KeyId;

    use super::*;

    #[test]
    fn plain_lines_are_text() {
        assert_eq!(
            parse_line("new key\n").unwrap(),
            Some(ConsoleInput::Command(Command::SendText(b"new key".to_vec())))
        );
        assert_eq!(parse_line("   \n").unwrap(), None);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_line("/verify").unwrap(), Some(ConsoleInput::Command(Command::VerifyKey)));
        assert_eq!(
            parse_line("/clear b").unwrap(),
            Some(ConsoleInput::Command(Command::ClearSlot(Slot::B)))
        );
        assert_eq!(
            parse_line("/clear all").unwrap(),
            Some(ConsoleInput::Command(Command::ClearAllSlots))
        );
        assert_eq!(
            parse_line("/file /tmp/some file.bin").unwrap(),
            Some(ConsoleInput::SendFile(PathBuf::from("/tmp/some file.bin")))
        );
        assert!(parse_line("/use c").is_err());
        assert!(parse_line("/bogus").is_err());
    }

    #[test]
    fn slot_report_rendering() {
        let action = EngineAction::SlotStatus(vec![
            SlotReport { slot: Slot::A, key_id: None, active: false },
            SlotReport { slot: Slot::B, key_id: Some(KeyId([0xAB; 8])), active: true },
        ]);
        assert_eq!(
            render(&action).unwrap(),
            "slot A: empty\nslot B: ABABABABABABABAB (active)"
        );
    }

    #[tokio::test]
    async fn show_writes_line_and_reports_closed_output() {
        let (mut out, mut reader) = tokio::io::duplex(256);
        show(&mut out, &EngineAction::ChallengeSent).await.unwrap();
        show(&mut out, &EngineAction::Send(lifilink_proto::Frame::new(
            lifilink_proto::MsgType::KeyIdOnly,
            vec![0; 8],
        )))
        .await
        .unwrap();

        let mut buf = [0u8; 15];
        tokio::io::AsyncReadExt::read_exact(&mut reader, &mut buf).await.unwrap();
        assert_eq!(&buf, b"challenge sent\n");

        drop(reader);
        assert!(show(&mut out, &EngineAction::KeyCleared).await.is_err());
    }
}
