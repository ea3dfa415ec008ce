//! Conversation state and its transitions
//!
//! Transitions are synchronous and never perform I/O. Each one either returns
//! the effects the runtime must carry out, in order, or a [`Rejection`]
//! explaining why nothing changed.

use crate::chat::Message;

/// First assistant message of a diary conversation
pub const DIARY_SEED: &str = "今日はどんな1日でしたか？";

/// Assistant message that closes a diary conversation
pub const DIARY_CLOSING: &str = "今日もいい一日でしたね。明日も頑張りましょう！";

/// What the session is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// Speech capture is running
    Recording,
    /// A completion request is in flight
    Sending,
}

/// Which collaborator a reported failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    Reply,
    Capture,
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start speech capture
    StartCapture,

    /// Stop speech capture; `keep_final` decides whether a last result
    /// delivered while stopping still lands in the pending input
    StopCapture { keep_final: bool },

    /// Ask the chat client for a reply to this transcript
    RequestCompletion { transcript: Vec<Message> },

    /// Speak an assistant message
    Speak { text: String },

    /// Tell the user something failed
    ReportFailure { source: FailureSource, reason: String },
}

/// Why a command left the state untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("nothing to send")]
    EmptyInput,

    #[error("a reply is still pending")]
    AwaitingReply,

    #[error("diary mode needs an empty conversation")]
    TranscriptNotEmpty,

    #[error("diary mode is not active")]
    DiaryInactive,

    #[error("no reply was requested")]
    NoPendingReply,
}

/// Result of a transition
pub type Transition = std::result::Result<Vec<Effect>, Rejection>;

/// Point-in-time copy of the state for rendering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub transcript: Vec<Message>,
    pub pending_input: String,
    pub is_awaiting_reply: bool,
    pub is_recording: bool,
    pub is_diary_mode: bool,
    pub speech_enabled: bool,
}

/// In-memory state of one conversation
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    transcript: Vec<Message>,
    pending_input: String,
    phase: Phase,
    diary_mode: bool,
    speech_enabled: bool,
}

impl ConversationState {
    #[must_use]
    pub fn new(speech_enabled: bool) -> Self {
        Self {
            speech_enabled,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    #[must_use]
    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn is_awaiting_reply(&self) -> bool {
        matches!(self.phase, Phase::Sending)
    }

    #[must_use]
    pub const fn is_recording(&self) -> bool {
        matches!(self.phase, Phase::Recording)
    }

    #[must_use]
    pub const fn is_diary_mode(&self) -> bool {
        self.diary_mode
    }

    #[must_use]
    pub const fn speech_enabled(&self) -> bool {
        self.speech_enabled
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            transcript: self.transcript.clone(),
            pending_input: self.pending_input.clone(),
            is_awaiting_reply: self.is_awaiting_reply(),
            is_recording: self.is_recording(),
            is_diary_mode: self.diary_mode,
            speech_enabled: self.speech_enabled,
        }
    }

    /// Replace the pending input with typed text
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.pending_input = text.into();
    }

    /// Applies to the next assistant message onwards
    pub const fn set_speech_enabled(&mut self, enabled: bool) {
        self.speech_enabled = enabled;
    }

    /// Send the pending input
    ///
    /// The user message is appended before the request goes out and stays
    /// in the transcript whatever the outcome.
    ///
    /// # Errors
    ///
    /// `AwaitingReply` while a request is in flight, `EmptyInput` when the
    /// pending input is blank
    pub fn submit(&mut self) -> Transition {
        if self.is_awaiting_reply() {
            return Err(Rejection::AwaitingReply);
        }
        let text = self.pending_input.trim();
        if text.is_empty() {
            return Err(Rejection::EmptyInput);
        }
        let message = Message::user(text);

        let mut effects = Vec::with_capacity(2);
        if self.is_recording() {
            effects.push(Effect::StopCapture { keep_final: false });
        }
        self.pending_input.clear();

        self.transcript.push(message);
        self.phase = Phase::Sending;
        effects.push(Effect::RequestCompletion {
            transcript: self.transcript.clone(),
        });
        Ok(effects)
    }

    /// Replace the pending input with typed text and send it in one step
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit); the pending input is untouched
    /// when rejected
    pub fn send_text(&mut self, text: impl Into<String>) -> Transition {
        if self.is_awaiting_reply() {
            return Err(Rejection::AwaitingReply);
        }
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Rejection::EmptyInput);
        }
        self.pending_input = text;
        self.submit()
    }

    /// The in-flight request produced a reply
    ///
    /// A blank reply is handled as a failure so the transcript never holds
    /// an entry the completion endpoint would refuse.
    ///
    /// # Errors
    ///
    /// `NoPendingReply` if no request was in flight
    pub fn reply_received(&mut self, reply: Message) -> Transition {
        if !self.is_awaiting_reply() {
            return Err(Rejection::NoPendingReply);
        }
        if reply.content.trim().is_empty() {
            return self.reply_failed("reply was empty");
        }
        self.phase = Phase::Idle;
        Ok(self.push_assistant(reply.content))
    }

    /// The in-flight request failed; the user message is kept
    ///
    /// # Errors
    ///
    /// `NoPendingReply` if no request was in flight
    pub fn reply_failed(&mut self, reason: impl Into<String>) -> Transition {
        if !self.is_awaiting_reply() {
            return Err(Rejection::NoPendingReply);
        }
        self.phase = Phase::Idle;
        Ok(vec![Effect::ReportFailure {
            source: FailureSource::Reply,
            reason: reason.into(),
        }])
    }

    /// Mic button: start capture when idle, stop it when recording
    ///
    /// # Errors
    ///
    /// `AwaitingReply` while a request is in flight
    pub fn toggle_mic(&mut self) -> Transition {
        match self.phase {
            Phase::Sending => Err(Rejection::AwaitingReply),
            Phase::Idle => {
                self.phase = Phase::Recording;
                Ok(vec![Effect::StartCapture])
            }
            Phase::Recording => {
                self.phase = Phase::Idle;
                Ok(vec![Effect::StopCapture { keep_final: true }])
            }
        }
    }

    /// Capture could not start or broke while running
    pub fn capture_failed(&mut self, reason: impl Into<String>) -> Vec<Effect> {
        if self.is_recording() {
            self.phase = Phase::Idle;
        }
        vec![Effect::ReportFailure {
            source: FailureSource::Capture,
            reason: reason.into(),
        }]
    }

    /// A recognition result arrived; ignored unless recording
    ///
    /// Returns whether the pending input changed.
    pub fn recognized(&mut self, text: &str) -> bool {
        if !self.is_recording() {
            return false;
        }
        text.clone_into(&mut self.pending_input);
        true
    }

    /// Last result delivered while a mic-initiated stop completed
    ///
    /// Returns whether the pending input changed.
    pub fn final_recognition(&mut self, text: &str) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        text.clone_into(&mut self.pending_input);
        true
    }

    /// Enter diary mode with the fixed opening question
    ///
    /// # Errors
    ///
    /// `AwaitingReply` while a request is in flight, `TranscriptNotEmpty`
    /// once anything has been said
    pub fn start_diary(&mut self) -> Transition {
        if self.is_awaiting_reply() {
            return Err(Rejection::AwaitingReply);
        }
        if !self.transcript.is_empty() {
            return Err(Rejection::TranscriptNotEmpty);
        }
        self.diary_mode = true;
        Ok(self.push_assistant(DIARY_SEED.to_string()))
    }

    /// Close diary mode with the fixed farewell
    ///
    /// # Errors
    ///
    /// `AwaitingReply` while a request is in flight, `DiaryInactive` outside
    /// diary mode
    pub fn end_diary(&mut self) -> Transition {
        if self.is_awaiting_reply() {
            return Err(Rejection::AwaitingReply);
        }
        if !self.diary_mode {
            return Err(Rejection::DiaryInactive);
        }
        self.diary_mode = false;
        Ok(self.push_assistant(DIARY_CLOSING.to_string()))
    }

    fn push_assistant(&mut self, content: String) -> Vec<Effect> {
        let effects = if self.speech_enabled {
            vec![Effect::Speak {
                text: content.clone(),
            }]
        } else {
            Vec::new()
        };
        self.transcript.push(Message::assistant(content));
        effects
    }
}
