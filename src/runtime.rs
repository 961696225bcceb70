//! Voice session actor.
//!
//! Speech capture and playback are injected capabilities. The actor owns one
//! [`Conversation`], subscribes to capture events through a channel, and
//! enforces mute-while-speaking: capture is stopped and its queue drained
//! before every reply is played, then restarted in the session's language.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::{Conversation, TurnResult};
use crate::engine::{RETRY_PROMPT, REPROMPT, TranscriptEvent, TranscriptNormalizer};
use crate::error::{IntakeError, IntakeResult};
use crate::models::Stage;

/// Source of recognized speech
#[async_trait]
pub trait SpeechCapture: Send {
    /// Begin listening; events arrive on the returned channel in capture order
    async fn start(&mut self, locale: &str) -> IntakeResult<mpsc::Receiver<TranscriptEvent>>;

    /// Stop listening. Safe mid-utterance and when already stopped.
    async fn stop(&mut self);
}

/// Text-to-speech output
#[async_trait]
pub trait SpeechPlayback: Send {
    /// Resolves when playback of `text` has finished
    async fn speak(&mut self, text: &str, locale: &str) -> IntakeResult<()>;

    async fn stop(&mut self);
}

/// Requests from outside the actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceControl {
    Stop,
}

/// Why a voice session finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Confirm stage chose to terminate
    Completed,
    /// Explicit stop request
    Stopped,
    /// Capture stream closed
    CaptureClosed,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceSummary {
    pub session_id: String,
    pub stage: Stage,
    pub turns: usize,
    pub reason: EndReason,
}

pub struct VoiceSession<C, P> {
    conversation: Conversation,
    capture: C,
    playback: P,
    normalizer: TranscriptNormalizer,
    playback_timeout: Duration,
    control: mpsc::Receiver<VoiceControl>,
}

impl<C: SpeechCapture, P: SpeechPlayback> VoiceSession<C, P> {
    pub fn new(
        conversation: Conversation,
        capture: C,
        playback: P,
        debounce_window: Duration,
        playback_timeout: Duration,
        control: mpsc::Receiver<VoiceControl>,
    ) -> Self {
        Self {
            conversation,
            capture,
            playback,
            normalizer: TranscriptNormalizer::new(debounce_window),
            playback_timeout,
            control,
        }
    }

    /// Run the session until it ends, is stopped, or capture closes
    pub async fn run(mut self) -> IntakeResult<VoiceSummary> {
        let opening = self.conversation.start().await;
        self.speak_all(&opening.replies).await;

        let mut events = match self.capture.start(&self.locale()).await {
            Ok(events) => events,
            Err(e) => return Err(self.abort(e).await),
        };
        let mut turns = 0;
        let mut control_open = true;
        let mut capture_closed = false;

        let reason = loop {
            let deadline = self.normalizer.deadline();

            let utterance = tokio::select! {
                control = self.control.recv(), if control_open => match control {
                    Some(VoiceControl::Stop) => break EndReason::Stopped,
                    None => {
                        control_open = false;
                        None
                    }
                },
                event = events.recv() => match event {
                    Some(event) => self.normalizer.on_event(&event, Instant::now().into_std()),
                    None => {
                        // Last words before capture went away still count
                        capture_closed = true;
                        match self.normalizer.flush(Instant::now().into_std()) {
                            Some(text) => Some(text),
                            None => break EndReason::CaptureClosed,
                        }
                    }
                },
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    self.normalizer.poll_silence(Instant::now().into_std())
                }
            };

            let Some(text) = utterance else { continue };
            debug!("Utterance accepted: {:?}", text);

            // Mute before the turn so nothing said meanwhile is taken as input
            self.mute(&mut events).await;

            let cancel = CancellationToken::new();
            let mut stop_requested = false;
            let result = {
                let turn = self.conversation.submit(&text, &cancel);
                tokio::pin!(turn);
                loop {
                    tokio::select! {
                        result = &mut turn => break result,
                        control = self.control.recv(), if control_open && !stop_requested => match control {
                            Some(VoiceControl::Stop) => {
                                stop_requested = true;
                                cancel.cancel();
                            }
                            None => control_open = false,
                        },
                    }
                }
            };
            turns += 1;
            self.log_turn(&result);

            if stop_requested {
                break EndReason::Stopped;
            }

            let replies = match &result {
                Ok(turn) => turn.replies.clone(),
                Err(IntakeError::SchemaViolation { .. }) => vec![RETRY_PROMPT.to_string()],
                Err(IntakeError::Cancelled) => break EndReason::Stopped,
                Err(_) => vec![REPROMPT.to_string()],
            };
            self.speak_all(&replies).await;

            if matches!(&result, Ok(turn) if turn.ended) {
                break EndReason::Completed;
            }
            if capture_closed {
                break EndReason::CaptureClosed;
            }

            // The utterance has been answered; an identical one from now on is new input
            self.normalizer.reset();
            events = match self.capture.start(&self.locale()).await {
                Ok(events) => events,
                Err(e) => return Err(self.abort(e).await),
            };
        };

        self.teardown(reason).await;
        let session = self.conversation.session();
        info!(
            "Voice session {} finished after {} turns ({:?})",
            session.session_id, turns, reason
        );
        Ok(VoiceSummary {
            session_id: session.session_id.clone(),
            stage: session.stage,
            turns,
            reason,
        })
    }

    fn locale(&self) -> String {
        self.conversation.session().language.clone()
    }

    async fn mute(&mut self, events: &mut mpsc::Receiver<TranscriptEvent>) {
        self.capture.stop().await;
        self.normalizer.discard_pending();
        let mut dropped = 0;
        while events.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {} capture events queued while muted", dropped);
        }
    }

    /// Speak each line; a playback that never signals completion is cut off
    async fn speak_all(&mut self, replies: &[String]) {
        let locale = self.locale();
        for reply in replies {
            match tokio::time::timeout(self.playback_timeout, self.playback.speak(reply, &locale)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Playback failed: {}", e),
                Err(_) => {
                    warn!(
                        "Playback did not finish within {:?}, continuing",
                        self.playback_timeout
                    );
                    self.playback.stop().await;
                }
            }
        }
    }

    async fn teardown(&mut self, reason: EndReason) {
        if reason == EndReason::Stopped || reason == EndReason::CaptureClosed {
            self.conversation.stop().await;
        }
        self.capture.stop().await;
        self.playback.stop().await;
    }

    /// Release capture and playback after a failure, leaving the session idle
    async fn abort(&mut self, err: IntakeError) -> IntakeError {
        warn!(
            "Voice session {} aborted: {}",
            self.conversation.session().session_id,
            err
        );
        self.teardown(EndReason::CaptureClosed).await;
        err
    }

    fn log_turn(&self, result: &IntakeResult<TurnResult>) {
        match result {
            Ok(turn) => debug!("Turn done: stage={} replies={}", turn.stage, turn.replies.len()),
            Err(e) => warn!("Turn failed: {}", e),
        }
    }
}

async fn sleep_until_deadline(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// One capture event from a recording, `at_ms` after the recording started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub at_ms: u64,
}

/// One accepted utterance and what the conversation did with it
#[derive(Debug, Clone, Serialize)]
pub struct ReplayStep {
    pub at_ms: u64,
    pub utterance: String,
    pub outcome: Result<TurnResult, String>,
}

/// Feed a recorded capture stream through the normalizer and conversation.
///
/// The recording's own timestamps drive the debounce, so a replay is
/// deterministic regardless of wall-clock speed. Events must be ordered by
/// `at_ms`.
pub async fn replay(
    conversation: &mut Conversation,
    events: &[RecordedEvent],
    debounce_window: Duration,
) -> Vec<ReplayStep> {
    let mut normalizer = TranscriptNormalizer::new(debounce_window);
    let base = std::time::Instant::now();
    let cancel = CancellationToken::new();
    let mut steps = Vec::new();
    let window_ms = debounce_window.as_millis() as u64;

    let mut accepted = Vec::new();
    let mut last_at = 0;
    for event in events {
        let at = base + Duration::from_millis(event.at_ms);
        if let Some(text) = normalizer.poll_silence(at) {
            accepted.push((last_at + window_ms, text));
        }
        let transcript = TranscriptEvent {
            text: event.text.clone(),
            is_final: event.is_final,
        };
        if let Some(text) = normalizer.on_event(&transcript, at) {
            accepted.push((event.at_ms, text));
        }
        if !event.is_final {
            last_at = event.at_ms;
        }
    }
    let end = base + Duration::from_millis(last_at + window_ms);
    if let Some(text) = normalizer.poll_silence(end) {
        accepted.push((last_at + window_ms, text));
    }

    for (at_ms, utterance) in accepted {
        if conversation.session().stage.is_terminal() {
            break;
        }
        let outcome = conversation
            .submit(&utterance, &cancel)
            .await
            .map_err(|e| e.to_string());
        steps.push(ReplayStep {
            at_ms,
            utterance,
            outcome,
        });
    }
    steps
}

/// Capture from standard input: every line is a final transcript
pub struct ConsoleCapture {
    lines: Arc<Mutex<Lines<BufReader<Stdin>>>>,
    reader: Option<JoinHandle<()>>,
}

impl Default for ConsoleCapture {
    fn default() -> Self {
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines())),
            reader: None,
        }
    }
}

#[async_trait]
impl SpeechCapture for ConsoleCapture {
    async fn start(&mut self, _locale: &str) -> IntakeResult<mpsc::Receiver<TranscriptEvent>> {
        self.stop().await;
        let (tx, rx) = mpsc::channel(16);
        let lines = self.lines.clone();
        self.reader = Some(tokio::spawn(async move {
            let mut lines = lines.lock().await;
            // next_line is cancel safe, so aborting this task loses no input
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(TranscriptEvent::final_text(line)).await.is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    async fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
    }
}

/// Playback to standard output
#[derive(Debug, Default)]
pub struct ConsolePlayback;

#[async_trait]
impl SpeechPlayback for ConsolePlayback {
    async fn speak(&mut self, text: &str, locale: &str) -> IntakeResult<()> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("assistant [{locale}]> {text}\n").as_bytes())
            .await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn stop(&mut self) {}
}
