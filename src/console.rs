//! Line-oriented console front end for a session

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use kaiwa::session::{Rejection, SessionError, SessionEvent, SessionHandle};
use kaiwa::{Role, SpeechPreference};

const HELP: &str = "\
Type a message and press enter to send it.
  /mic          start or stop speaking
  /send         send what the microphone heard (an empty line does too)
  /diary        start a diary conversation (empty chat only)
  /end          end the diary conversation
  /speech on    read replies aloud
  /speech off   stay quiet
  /quit         leave";

/// One line of console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Mic,
    StartDiary,
    EndDiary,
    Speech(bool),
    Help,
    Quit,
    Unknown(String),
    /// Send the pending input as it stands, usually recognized speech
    SendPending,
}

/// Parse a console line
pub fn parse(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::SendPending;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Message(trimmed.to_string());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("mic"), None) => Input::Mic,
        (Some("send"), None) => Input::SendPending,
        (Some("diary"), None) => Input::StartDiary,
        (Some("end"), None) => Input::EndDiary,
        (Some("speech"), Some("on")) => Input::Speech(true),
        (Some("speech"), Some("off")) => Input::Speech(false),
        (Some("help"), None) => Input::Help,
        (Some("quit" | "exit"), None) => Input::Quit,
        _ => Input::Unknown(trimmed.to_string()),
    }
}

/// Run the console until `/quit` or end of input
pub async fn run(session: SessionHandle, speech: Arc<SpeechPreference>) -> anyhow::Result<()> {
    println!("kaiwa - type /help for commands");
    println!(
        "speech output is {}",
        if speech.enabled() { "on" } else { "off" }
    );

    let printer = tokio::spawn(print_events(session.clone()));
    let echo = tokio::spawn(echo_recognition(session.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let outcome = match parse(&line) {
            Input::SendPending => match session.submit().await {
                Err(SessionError::Rejected(Rejection::EmptyInput)) => Ok(()),
                outcome => outcome,
            },
            Input::Message(text) => session.send_text(text).await,
            Input::Mic => session.toggle_mic().await,
            Input::StartDiary => session.start_diary().await,
            Input::EndDiary => session.end_diary().await,
            Input::Speech(enabled) => {
                if let Err(e) = speech.set_enabled(enabled) {
                    eprintln!("! could not save setting: {e}");
                }
                Ok(())
            }
            Input::Help => {
                println!("{HELP}");
                Ok(())
            }
            Input::Quit => break,
            Input::Unknown(raw) => {
                println!("unknown command {raw}, try /help");
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {}
            Err(SessionError::Rejected(rejection)) => println!("({rejection})"),
            Err(SessionError::Closed) => break,
        }
    }

    printer.abort();
    echo.abort();
    Ok(())
}

async fn print_events(session: SessionHandle) {
    let mut events = session.subscribe();
    loop {
        match events.recv().await {
            Ok(SessionEvent::MessageAppended(message)) => match message.role {
                Role::Assistant => println!("ai> {}", message.content),
                Role::User => println!("you> {}", message.content),
            },
            Ok(SessionEvent::ReplyFailed { reason }) => {
                println!("! no reply: {reason}");
            }
            Ok(SessionEvent::CaptureFailed { reason }) => {
                println!("! microphone: {reason}");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "console fell behind session events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Show recognized speech while the microphone is open
async fn echo_recognition(session: SessionHandle) {
    let mut snapshots = session.watch();
    let mut last = String::new();
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.is_recording && snapshot.pending_input != last {
            println!("(heard) {}", snapshot.pending_input);
        }
        last = snapshot.pending_input;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(parse("  こんにちは "), Input::Message("こんにちは".to_string()));
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse("/mic"), Input::Mic);
        assert_eq!(parse("/diary"), Input::StartDiary);
        assert_eq!(parse("/end"), Input::EndDiary);
        assert_eq!(parse("/speech off"), Input::Speech(false));
        assert_eq!(parse("/speech  on"), Input::Speech(true));
        assert_eq!(parse("/exit"), Input::Quit);
    }

    #[test]
    fn malformed_commands_are_unknown() {
        assert_eq!(parse("/speech maybe"), Input::Unknown("/speech maybe".to_string()));
        assert_eq!(parse("/mic now"), Input::Unknown("/mic now".to_string()));
    }

    #[test]
    fn blank_line_sends_pending_input() {
        assert_eq!(parse(""), Input::SendPending);
        assert_eq!(parse("   "), Input::SendPending);
        assert_eq!(parse("/send"), Input::SendPending);
        assert_eq!(parse("/send now"), Input::Unknown("/send now".to_string()));
    }
}
