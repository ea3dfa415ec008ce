//! Async driver for a conversation
//!
//! One task owns the [`ConversationState`] and applies commands, recognition
//! results, completion outcomes and preference changes one at a time. The
//! completion request is polled inside the same loop, so at most one is ever
//! in flight.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::state::{ConversationState, Effect, FailureSource, Rejection, SessionSnapshot};
use crate::chat::{ChatClient, Message};
use crate::config::SpeechConfig;
use crate::voice::{Recognition, RecognitionSink, SpeechOptions, SpeechRecognizer, SpeechSynthesizer};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// User-facing actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetInput(String),
    Submit,
    /// Replace the pending input and send it as one step
    SendText(String),
    ToggleMic,
    StartDiary,
    EndDiary,
}

/// Notifications for the UI besides the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message was added to the transcript
    MessageAppended(Message),
    /// The completion request failed; the transcript is unchanged
    ReplyFailed { reason: String },
    /// Speech capture failed to start or stop
    CaptureFailed { reason: String },
}

/// Why a command did not apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("session has shut down")]
    Closed,
}

/// Collaborators the session calls out to
#[derive(Clone)]
pub struct SessionServices {
    pub chat: Arc<dyn ChatClient>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

/// Speech parameters fixed for the session's lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub locale: String,
    pub speech: SpeechOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            locale: "ja-JP".to_string(),
            speech: SpeechOptions::default(),
        }
    }
}

impl From<&SpeechConfig> for SessionSettings {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            locale: config.locale.clone(),
            speech: config.options(),
        }
    }
}

struct Request {
    command: Command,
    ack: oneshot::Sender<Result<(), Rejection>>,
}

type PendingReply = BoxFuture<'static, crate::Result<Message>>;

/// Owns and drives one conversation
pub struct SessionRuntime {
    state: ConversationState,
    services: SessionServices,
    settings: SessionSettings,
    commands: mpsc::Receiver<Request>,
    recognition_tx: RecognitionSink,
    recognition_rx: mpsc::UnboundedReceiver<Recognition>,
    speech_pref: watch::Receiver<bool>,
    snapshots: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    in_flight: Option<PendingReply>,
}

impl SessionRuntime {
    /// Create a runtime and the handle that controls it
    ///
    /// Nothing happens until [`run`](Self::run) is polled. The session ends
    /// when every handle has been dropped.
    #[must_use]
    pub fn new(
        services: SessionServices,
        settings: SessionSettings,
        mut speech_pref: watch::Receiver<bool>,
    ) -> (Self, SessionHandle) {
        let state = ConversationState::new(*speech_pref.borrow_and_update());
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (recognition_tx, recognition_rx) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(state.snapshot());
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let handle = SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            events: events.clone(),
        };

        let runtime = Self {
            state,
            services,
            settings,
            commands,
            recognition_tx,
            recognition_rx,
            speech_pref,
            snapshots,
            events,
            in_flight: None,
        };

        (runtime, handle)
    }

    /// Process events until every handle is dropped
    pub async fn run(mut self) {
        tracing::debug!(locale = %self.settings.locale, "session started");
        let mut pref_open = true;

        loop {
            tokio::select! {
                request = self.commands.recv() => {
                    let Some(Request { command, ack }) = request else {
                        break;
                    };
                    let outcome = self.handle_command(command).await;
                    let _ = ack.send(outcome);
                }
                Some(recognition) = self.recognition_rx.recv() => {
                    if self.state.recognized(&recognition.text) {
                        tracing::trace!(is_final = recognition.is_final, "recognized speech");
                        self.publish_snapshot();
                    }
                }
                result = poll_pending(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.finish_reply(result).await;
                }
                changed = self.speech_pref.changed(), if pref_open => {
                    if changed.is_ok() {
                        let enabled = *self.speech_pref.borrow_and_update();
                        self.state.set_speech_enabled(enabled);
                        tracing::debug!(enabled, "speech preference applied");
                        self.publish_snapshot();
                    } else {
                        pref_open = false;
                    }
                }
            }
        }

        if self.state.is_recording()
            && let Err(e) = self.services.recognizer.cancel().await
        {
            tracing::warn!(error = %e, "failed to stop speech capture on shutdown");
        }
        tracing::debug!(messages = self.state.transcript().len(), "session ended");
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), Rejection> {
        let before = self.state.transcript().len();
        let transition = match command {
            Command::SetInput(text) => {
                self.state.set_input(text);
                Ok(Vec::new())
            }
            Command::Submit => self.state.submit(),
            Command::SendText(text) => self.state.send_text(text),
            Command::ToggleMic => self.state.toggle_mic(),
            Command::StartDiary => self.state.start_diary(),
            Command::EndDiary => self.state.end_diary(),
        };

        match transition {
            Ok(effects) => {
                self.publish_appended(before);
                self.execute(effects).await;
                self.publish_snapshot();
                Ok(())
            }
            Err(rejection) => {
                tracing::debug!(%rejection, "command rejected");
                Err(rejection)
            }
        }
    }

    async fn finish_reply(&mut self, result: crate::Result<Message>) {
        let before = self.state.transcript().len();
        let transition = match result {
            Ok(reply) => self.state.reply_received(reply),
            Err(e) => {
                tracing::error!(kind = e.kind(), error = %e, "completion failed");
                self.state.reply_failed(e.to_string())
            }
        };

        match transition {
            Ok(effects) => {
                self.publish_appended(before);
                self.execute(effects).await;
                self.publish_snapshot();
            }
            Err(rejection) => tracing::warn!(%rejection, "dropping unexpected reply"),
        }
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::StartCapture => {
                    let started = self
                        .services
                        .recognizer
                        .start(&self.settings.locale, self.recognition_tx.clone())
                        .await;
                    if let Err(e) = started {
                        tracing::warn!(error = %e, "speech capture failed to start");
                        queue.extend(self.state.capture_failed(e.to_string()));
                    }
                }
                Effect::StopCapture { keep_final } => {
                    let stopped = if keep_final {
                        self.services.recognizer.stop().await
                    } else {
                        self.services.recognizer.cancel().await
                    };
                    if let Err(e) = stopped {
                        tracing::warn!(error = %e, "speech capture failed to stop");
                        queue.extend(self.state.capture_failed(e.to_string()));
                    }
                    let last = self.drain_recognitions();
                    if keep_final
                        && let Some(text) = last
                    {
                        self.state.final_recognition(&text);
                    }
                }
                Effect::RequestCompletion { transcript } => {
                    tracing::debug!(messages = transcript.len(), "requesting reply");
                    let chat = Arc::clone(&self.services.chat);
                    self.in_flight = Some(Box::pin(async move { chat.complete(&transcript).await }));
                }
                Effect::Speak { text } => {
                    if let Err(e) = self.services.synthesizer.speak(&text, &self.settings.speech) {
                        tracing::warn!(error = %e, "failed to schedule speech");
                    }
                }
                Effect::ReportFailure { source, reason } => {
                    let event = match source {
                        FailureSource::Reply => SessionEvent::ReplyFailed { reason },
                        FailureSource::Capture => SessionEvent::CaptureFailed { reason },
                    };
                    let _ = self.events.send(event);
                }
            }
        }
    }

    /// Empty the recognition channel, returning the newest text
    fn drain_recognitions(&mut self) -> Option<String> {
        let mut last = None;
        while let Ok(recognition) = self.recognition_rx.try_recv() {
            last = Some(recognition.text);
        }
        last
    }

    fn publish_appended(&self, before: usize) {
        for message in self.state.transcript().iter().skip(before) {
            let _ = self.events.send(SessionEvent::MessageAppended(message.clone()));
        }
    }

    fn publish_snapshot(&self) {
        self.snapshots.send_replace(self.state.snapshot());
    }
}

async fn poll_pending(pending: &mut Option<PendingReply>) -> crate::Result<Message> {
    match pending.as_mut() {
        Some(reply) => reply.await,
        None => std::future::pending().await,
    }
}

/// Cloneable control surface for a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Request>,
    snapshots: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Apply a command and wait until its transition has run
    ///
    /// # Errors
    ///
    /// `SessionError::Rejected` if the command was a no-op,
    /// `SessionError::Closed` if the runtime is gone
    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        let (ack, outcome) = oneshot::channel();
        self.commands
            .send(Request { command, ack })
            .await
            .map_err(|_| SessionError::Closed)?;
        outcome.await.map_err(|_| SessionError::Closed)??;
        Ok(())
    }

    /// Replace the pending input (typing)
    ///
    /// # Errors
    ///
    /// `SessionError::Closed` if the runtime is gone
    pub async fn set_input(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::SetInput(text.into())).await
    }

    /// Send the pending input
    ///
    /// Returns once the user message is in the transcript; the reply arrives
    /// later as a [`SessionEvent`].
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send)
    pub async fn submit(&self) -> Result<(), SessionError> {
        self.send(Command::Submit).await
    }

    /// Send typed text, replacing whatever is pending
    ///
    /// Recognition results cannot slip in between replacing the input and
    /// sending it.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send)
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::SendText(text.into())).await
    }

    /// Start or stop speech capture
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send)
    pub async fn toggle_mic(&self) -> Result<(), SessionError> {
        self.send(Command::ToggleMic).await
    }

    /// Enter diary mode
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send)
    pub async fn start_diary(&self) -> Result<(), SessionError> {
        self.send(Command::StartDiary).await
    }

    /// Leave diary mode
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send)
    pub async fn end_diary(&self) -> Result<(), SessionError> {
        self.send(Command::EndDiary).await
    }

    /// Latest published state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch state changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Receive events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
