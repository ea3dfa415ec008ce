//! Shared test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};

use kaiwa::session::{SessionEvent, SessionHandle, SessionRuntime, SessionServices, SessionSettings};
use kaiwa::voice::{Recognition, RecognitionSink, SpeechOptions};
use kaiwa::{ChatClient, DbPool, Error, Message, Result, SessionSnapshot, SpeechRecognizer, SpeechSynthesizer, db};

const WAIT: Duration = Duration::from_secs(5);

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Chat client whose replies are fed in by the test
///
/// Each `complete` call waits for the next scripted reply, so a test can
/// look at the session while the request is still in flight.
pub struct MockChatClient {
    replies: tokio::sync::Mutex<mpsc::UnboundedReceiver<std::result::Result<String, String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

/// Sender side of a [`MockChatClient`]
#[derive(Clone)]
pub struct ReplyScript(mpsc::UnboundedSender<std::result::Result<String, String>>);

impl ReplyScript {
    pub fn reply(&self, text: &str) {
        self.0.send(Ok(text.to_string())).expect("chat client dropped");
    }

    pub fn fail(&self, reason: &str) {
        self.0.send(Err(reason.to_string())).expect("chat client dropped");
    }
}

impl MockChatClient {
    pub fn new() -> (Arc<Self>, ReplyScript) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            replies: tokio::sync::Mutex::new(rx),
            requests: Mutex::new(Vec::new()),
        };
        (Arc::new(client), ReplyScript(tx))
    }

    /// Transcripts sent so far, in call order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(&self, transcript: &[Message]) -> Result<Message> {
        self.requests.lock().unwrap().push(transcript.to_vec());
        let next = self.replies.lock().await.recv().await;
        match next {
            Some(Ok(text)) => Ok(Message::assistant(text)),
            Some(Err(reason)) => Err(Error::Transport(reason)),
            None => Err(Error::Transport("script ended".to_string())),
        }
    }
}

/// Recognizer that hands its sink to the test
#[derive(Default)]
pub struct MockRecognizer {
    sink: Mutex<Option<RecognitionSink>>,
    /// Result delivered from inside `stop`, like a platform final callback
    final_on_stop: Mutex<Option<String>>,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    cancels: AtomicUsize,
    locales: Mutex<Vec<String>>,
}

impl MockRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let recognizer = Self::default();
        recognizer.fail_start.store(true, Ordering::SeqCst);
        Arc::new(recognizer)
    }

    /// Deliver a recognition result as the platform would
    pub fn emit(&self, text: &str, is_final: bool) {
        let sink = self.sink.lock().unwrap();
        if let Some(sink) = sink.as_ref() {
            let _ = sink.send(Recognition {
                text: text.to_string(),
                is_final,
            });
        }
    }

    pub fn final_on_stop(&self, text: &str) {
        *self.final_on_stop.lock().unwrap() = Some(text.to_string());
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn locales(&self) -> Vec<String> {
        self.locales.lock().unwrap().clone()
    }

    fn close(&self) {
        let last = self.final_on_stop.lock().unwrap().take();
        if let Some(text) = last {
            self.emit(&text, true);
        }
        self.sink.lock().unwrap().take();
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn start(&self, locale: &str, sink: RecognitionSink) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::SpeechService("microphone permission denied".to_string()));
        }
        self.locales.lock().unwrap().push(locale.to_string());
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.close();
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        // A late result can still arrive; the session must ignore it
        self.close();
        Ok(())
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Default)]
pub struct RecordingSynthesizer {
    spoken: Mutex<Vec<(String, SpeechOptions)>>,
}

impl RecordingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    pub fn options(&self) -> Vec<SpeechOptions> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(_, options)| options.clone())
            .collect()
    }
}

impl SpeechSynthesizer for RecordingSynthesizer {
    fn speak(&self, text: &str, options: &SpeechOptions) -> Result<()> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), options.clone()));
        Ok(())
    }
}

/// A running session wired to mocks
pub struct TestSession {
    pub handle: SessionHandle,
    pub replies: ReplyScript,
    pub chat: Arc<MockChatClient>,
    pub recognizer: Arc<MockRecognizer>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub speech_pref: watch::Sender<bool>,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl TestSession {
    pub fn start(speech_enabled: bool) -> Self {
        Self::start_with(speech_enabled, MockRecognizer::new())
    }

    pub fn start_with(speech_enabled: bool, recognizer: Arc<MockRecognizer>) -> Self {
        let (chat, replies) = MockChatClient::new();
        let synthesizer = RecordingSynthesizer::new();
        let (speech_pref, pref_rx) = watch::channel(speech_enabled);

        let services = SessionServices {
            chat: chat.clone(),
            recognizer: recognizer.clone(),
            synthesizer: synthesizer.clone(),
        };
        let (runtime, handle) = SessionRuntime::new(services, SessionSettings::default(), pref_rx);
        let events = handle.subscribe();
        tokio::spawn(runtime.run());

        Self {
            handle,
            replies,
            chat,
            recognizer,
            synthesizer,
            speech_pref,
            events,
        }
    }

    /// Wait until the published state satisfies `predicate`
    pub async fn wait_for(&self, predicate: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let mut rx = self.handle.watch();
        let snapshot = tokio::time::timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("timed out waiting for session state")
            .expect("session closed")
            .clone();
        snapshot
    }

    /// Next event, skipping nothing
    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }
}

/// Shorthand for a transcript's (role, content) pairs
pub fn lines(transcript: &[Message]) -> Vec<(String, String)> {
    transcript
        .iter()
        .map(|m| (m.role.as_str().to_string(), m.content.clone()))
        .collect()
}
