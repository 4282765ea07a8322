use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::state::{SessionState, SessionStatus};
use super::stats::{SessionEvent, SessionStats};
use super::transmit::FrameTransmitter;
use crate::audio::convert::pcm16_from_bytes;
use crate::audio::{AudioDevices, AudioSink, AudioSource, SampleBuffer};
use crate::commands::{self, CommandDispatcher, CommandExecutor, CommandResult, DispatchOutcome};
use crate::realtime::{
    ClientEvent, ConversationItem, Credentials, RealtimeTransport, ServerEvent, TransportConnector,
};
use crate::supervisor::{ConnectionError, ReconnectPolicy};

/// How long `stop()` waits for the message loop before aborting it
const MESSAGE_LOOP_GRACE: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T: Clone>(slot: &RwLock<Option<T>>) -> Option<T> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn replace<T>(slot: &RwLock<Option<T>>, value: Option<T>) -> Option<T> {
    let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *guard, value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopOrigin {
    Caller,
    MessageLoop,
}

enum LoopExit {
    Stopped,
    Closed,
    TransportLost,
}

/// Handles owned by a running session and released only by teardown
#[derive(Default)]
struct Resources {
    shutdown: Option<watch::Sender<bool>>,
    source: Option<Box<dyn AudioSource>>,
    capture_task: Option<JoinHandle<()>>,
    transmit_task: Option<JoinHandle<()>>,
    message_task: Option<JoinHandle<()>>,
}

/// Real-time voice session controller
///
/// Captures microphone audio, streams it to the realtime endpoint in fixed
/// frames, plays the assistant's audio, and routes finalized user transcripts
/// to the command executor.
///
/// Lifecycle:
/// 1. `new()` - wire up collaborators, get the event receiver
/// 2. `start()` - connect, configure, open audio devices
/// 3. Consume `SessionEvent`s
/// 4. `stop()` - release everything, get final stats
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    connector: Arc<dyn TransportConnector>,
    devices: Arc<dyn AudioDevices>,
    dispatcher: CommandDispatcher,
    state: Arc<SessionState>,
    transmitter: FrameTransmitter,
    events: mpsc::UnboundedSender<SessionEvent>,

    transport: RwLock<Option<Arc<dyn RealtimeTransport>>>,
    sink: RwLock<Option<Arc<dyn AudioSink>>>,
    resources: tokio::sync::Mutex<Option<Resources>>,

    response: Mutex<String>,
    user_transcript: Mutex<String>,
    dispatches: Mutex<Vec<JoinHandle<()>>>,

    started_at: Mutex<Option<DateTime<Utc>>>,
    stopped_at: Mutex<Option<DateTime<Utc>>>,
    reconnects: AtomicU64,
}

impl VoiceSession {
    /// Create a new session and the receiver for its events
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn TransportConnector>,
        devices: Arc<dyn AudioDevices>,
        executor: Arc<dyn CommandExecutor>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let state = Arc::new(SessionState::new());
        let transmitter = FrameTransmitter::new(config.chunk_config(), state.clone());

        info!("Creating voice session: {}", config.session_id);

        let inner = SessionInner {
            config,
            connector,
            devices,
            dispatcher: CommandDispatcher::new(executor),
            state,
            transmitter,
            events,
            transport: RwLock::new(None),
            sink: RwLock::new(None),
            resources: tokio::sync::Mutex::new(None),
            response: Mutex::new(String::new()),
            user_transcript: Mutex::new(String::new()),
            dispatches: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
            stopped_at: Mutex::new(None),
            reconnects: AtomicU64::new(0),
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Connect, send the session configuration and open the audio devices
    ///
    /// Any failure tears down whatever was acquired and is returned to the
    /// caller. Starting an already running session is a no-op.
    pub async fn start(&self, credentials: &Credentials) -> Result<()> {
        let inner = &self.inner;
        let mut resources = inner.resources.lock().await;

        if resources.is_some() {
            warn!("Voice session already active: {}", inner.config.session_id);
            return Ok(());
        }

        info!("Starting voice session: {}", inner.config.session_id);
        inner.prepare();
        inner.emit(SessionEvent::StateChanged(SessionStatus::Connecting));

        let slot = resources.insert(Resources::default());
        let result = inner.establish(credentials, slot).await;

        if let Err(e) = result {
            error!("Failed to start voice session: {:#}", e);
            inner.state.begin_stop();
            inner.state.set_recording(false);
            let acquired = resources.take();
            drop(resources);
            inner.release(acquired, StopOrigin::Caller).await;
            inner.emit(SessionEvent::Error(format!("{:#}", e)));
            return Err(e);
        }

        info!("Voice session started: {}", inner.config.session_id);
        Ok(())
    }

    /// Stop the session and release every resource
    ///
    /// Safe to call from any state and any number of times; resources are
    /// released exactly once.
    pub async fn stop(&self) -> Result<SessionStats> {
        if !self.inner.teardown(StopOrigin::Caller).await {
            debug!("Voice session not active: {}", self.inner.config.session_id);
        }
        Ok(self.stats())
    }

    pub fn session_id(&self) -> &str {
        &self.inner.config.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.status()
    }

    /// True while frames may be transmitted
    pub fn is_connection_open(&self) -> bool {
        self.inner.state.is_connection_open()
    }

    /// True while microphone audio is being captured
    pub fn is_recording(&self) -> bool {
        self.inner.state.is_recording()
    }

    /// Assistant response text accumulated since the current response began
    pub fn current_response(&self) -> String {
        lock(&self.inner.response).clone()
    }

    pub fn stats(&self) -> SessionStats {
        let inner = &self.inner;
        let started_at = *lock(&inner.started_at);
        let stopped_at = *lock(&inner.stopped_at);

        let duration_secs = started_at
            .map(|start| {
                let end = stopped_at.unwrap_or_else(Utc::now);
                (end - start).num_milliseconds() as f64 / 1000.0
            })
            .unwrap_or(0.0);

        SessionStats {
            session_id: inner.config.session_id.clone(),
            status: inner.state.status(),
            is_recording: inner.state.is_recording(),
            started_at,
            duration_secs,
            frames_sent: inner.transmitter.frames_sent(),
            frames_dropped: inner.transmitter.frames_dropped(),
            frames_requeued: inner.transmitter.frames_requeued(),
            pending_bytes: inner.transmitter.pending_len(),
            commands_dispatched: inner.dispatcher.dispatched(),
            reconnects: inner.reconnects.load(Ordering::SeqCst),
        }
    }
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        // Owner may have dropped the receiver; the session keeps running
        let _ = self.events.send(event);
    }

    fn current_transport(&self) -> Option<Arc<dyn RealtimeTransport>> {
        read(&self.transport)
    }

    fn current_sink(&self) -> Option<Arc<dyn AudioSink>> {
        read(&self.sink)
    }

    fn prepare(&self) {
        self.state.begin_start();
        lock(&self.response).clear();
        lock(&self.user_transcript).clear();
        self.transmitter.clear();
        *lock(&self.started_at) = Some(Utc::now());
        *lock(&self.stopped_at) = None;
    }

    async fn establish(self: &Arc<Self>, credentials: &Credentials, res: &mut Resources) -> Result<()> {
        let transport = self
            .connector
            .connect(credentials)
            .await
            .context("Failed to connect to realtime endpoint")?;
        replace(&self.transport, Some(transport.clone()));
        info!("Connected to realtime endpoint");

        self.send_session_config(transport.as_ref()).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        res.shutdown = Some(shutdown_tx);
        res.transmit_task = Some(tokio::spawn(
            self.clone().run_transmit(shutdown_rx.clone()),
        ));
        res.message_task = Some(tokio::spawn(
            self.clone()
                .run_message_loop(credentials.clone(), shutdown_rx),
        ));

        self.setup_audio(res)
            .await
            .context("Failed to set up audio. Check microphone permissions")?;

        Ok(())
    }

    /// Send `session.update`, retrying once after a short delay
    async fn send_session_config(&self, transport: &dyn RealtimeTransport) -> Result<()> {
        let event = ClientEvent::SessionUpdate {
            session: self.config.session_update(),
        };

        if let Err(first) = transport.send(&event).await {
            warn!(
                "Session config send failed ({}), retrying in {:?}",
                first, self.config.config_retry_delay
            );
            tokio::time::sleep(self.config.config_retry_delay).await;
            transport
                .send(&event)
                .await
                .map_err(|e| anyhow!("Failed to send session config: {}", e))?;
        }

        debug!("Session config sent");
        Ok(())
    }

    async fn setup_audio(self: &Arc<Self>, res: &mut Resources) -> Result<()> {
        let backend = self.config.backend_config();

        let mut source = self.devices.open_source(&backend)?;
        let rx = source.start().await?;
        info!("Audio capture started: {}", source.name());
        res.source = Some(source);

        self.state.set_recording(true);
        res.capture_task = Some(tokio::spawn(self.clone().run_capture(rx)));

        let sink: Arc<dyn AudioSink> = Arc::from(self.devices.open_sink(&backend)?);
        sink.start().await?;
        info!("Audio playback started: {}", sink.name());
        replace(&self.sink, Some(sink));

        Ok(())
    }

    /// Capture context: append samples to the pending buffer and nothing else
    ///
    /// Never awaits the network, so a stalled send cannot back up the
    /// microphone channel.
    async fn run_capture(self: Arc<Self>, mut rx: mpsc::Receiver<SampleBuffer>) {
        debug!("Capture task started");

        while let Some(buffer) = rx.recv().await {
            if self.state.is_stopping() {
                break;
            }
            if !self.state.is_recording() {
                continue;
            }

            self.transmitter.push_samples(&buffer.samples);
        }

        debug!("Capture task stopped");
    }

    /// Transmit context: send buffered frames whenever capture or a reopened
    /// connection wakes it
    async fn run_transmit(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!("Transmit task started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.transmitter.ready() => {}
            }
            if self.state.is_stopping() {
                break;
            }

            if let Some(transport) = self.current_transport() {
                let sent = self.transmitter.pump(transport.as_ref()).await;
                if sent > 0 {
                    debug!("Sent {} audio frame(s)", sent);
                }
            }
        }

        debug!("Transmit task stopped");
    }

    /// Message context: consume inbound messages, reconnect when the transport drops
    async fn run_message_loop(
        self: Arc<Self>,
        credentials: Credentials,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("Message loop started");
        let policy = self.config.reconnect_policy();

        while let Some(transport) = self.current_transport() {
            match self.consume(transport, &mut shutdown).await {
                LoopExit::Stopped | LoopExit::Closed => break,
                LoopExit::TransportLost => {}
            }

            if self.state.is_stopping() {
                break;
            }
            if self.state.degrade() {
                self.emit(SessionEvent::StateChanged(SessionStatus::Degraded));
            }

            match self.reconnect(&credentials, &policy, &mut shutdown).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!("Giving up on realtime connection: {:#}", e);
                    self.fail(format!("{:#}", e)).await;
                    break;
                }
            }
        }

        debug!("Message loop stopped");
    }

    async fn consume(
        self: &Arc<Self>,
        transport: Arc<dyn RealtimeTransport>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> LoopExit {
        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => return LoopExit::Stopped,
                next = transport.recv() => next,
            };

            if self.state.is_stopping() {
                return LoopExit::Stopped;
            }

            match next {
                None => {
                    warn!("Realtime connection closed");
                    return LoopExit::TransportLost;
                }
                Some(Err(e)) => {
                    let err = ConnectionError::classify(e.to_string());
                    if self.on_connection_error(err).await {
                        return LoopExit::Closed;
                    }
                    if transport.is_closed() {
                        return LoopExit::TransportLost;
                    }
                }
                Some(Ok(text)) => {
                    // A bad message never ends the loop
                    if let Err(e) = self.handle_message(&text).await {
                        warn!("Failed to process realtime message: {:#}", e);
                    }
                    if self.state.is_stopping() {
                        return LoopExit::Closed;
                    }
                }
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, text: &str) -> Result<()> {
        if self.state.is_stopping() {
            return Ok(());
        }

        let event: ServerEvent =
            serde_json::from_str(text).context("Malformed realtime message")?;
        self.handle_event(event).await
    }

    async fn handle_event(self: &Arc<Self>, event: ServerEvent) -> Result<()> {
        if !matches!(event, ServerEvent::Error { .. }) {
            self.restore_open();
        }

        match event {
            ServerEvent::SessionCreated => {
                info!("Realtime session created");
                lock(&self.response).clear();
            }

            ServerEvent::ResponseCreated => {
                lock(&self.response).clear();
            }

            ServerEvent::ResponseTranscriptDelta { delta } => {
                lock(&self.response).push_str(&delta);
                self.emit(SessionEvent::Response {
                    text: delta,
                    is_delta: true,
                });
            }

            ServerEvent::ResponseAudioDelta { delta } => {
                self.play_audio(&delta)?;
            }

            ServerEvent::SpeechStarted => {
                self.emit(SessionEvent::Listening);
                if let Some(sink) = self.current_sink() {
                    sink.flush();
                }
            }

            ServerEvent::InputTranscriptionDelta { delta } => {
                let text = {
                    let mut partial = lock(&self.user_transcript);
                    partial.push_str(&delta);
                    partial.clone()
                };
                self.emit(SessionEvent::Transcript {
                    text,
                    is_final: false,
                });
            }

            ServerEvent::InputTranscriptionCompleted { transcript } => {
                lock(&self.user_transcript).clear();
                self.on_transcript(transcript);
            }

            ServerEvent::ResponseDone => {
                let text = lock(&self.response).clone();
                debug!("Response done ({} chars)", text.len());
                self.emit(SessionEvent::ResponseDone(text));
            }

            ServerEvent::Error { error } => {
                let err = ConnectionError::classify(error.to_string());
                self.on_connection_error(err).await;
            }

            ServerEvent::ResponseTranscriptDone | ServerEvent::Other => {}
        }

        Ok(())
    }

    /// Connecting/Degraded → Open, then let the transmit task flush whatever
    /// capture buffered meanwhile
    fn restore_open(&self) {
        if !self.state.restore_open() {
            return;
        }

        info!("Realtime connection open");
        self.emit(SessionEvent::StateChanged(SessionStatus::Open));

        let pending = self.transmitter.pending_len();
        if pending > 0 {
            debug!("Flushing {} buffered audio bytes", pending);
        }
        self.transmitter.wake();
    }

    fn play_audio(&self, delta: &str) -> Result<()> {
        let Some(sink) = self.current_sink() else {
            return Ok(());
        };

        let bytes = BASE64.decode(delta).context("Invalid audio delta")?;
        let samples = pcm16_from_bytes(&bytes);

        for chunk in samples.chunks(self.config.playback_chunk_samples.max(1)) {
            sink.enqueue(chunk);
        }

        Ok(())
    }

    /// Returns true if the error was fatal and the session has been torn down
    async fn on_connection_error(self: &Arc<Self>, err: ConnectionError) -> bool {
        if err.is_fatal() {
            error!("Fatal realtime error: {}", err.message());
            self.fail(err.message().to_string()).await;
            return true;
        }

        warn!("Temporary connection issue: {}", err.message());
        if self.state.degrade() {
            self.emit(SessionEvent::StateChanged(SessionStatus::Degraded));
        }
        false
    }

    fn on_transcript(self: &Arc<Self>, transcript: String) {
        if let Err(rejection) = commands::admit(&transcript) {
            debug!("Ignoring transcript ({:?}): {}", rejection, transcript);
            return;
        }

        info!("User said: {}", transcript);
        self.emit(SessionEvent::Transcript {
            text: transcript.clone(),
            is_final: true,
        });

        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = session.dispatcher.dispatch(&transcript).await;
            session.apply_outcome(outcome).await;
        });

        let mut dispatches = lock(&self.dispatches);
        dispatches.retain(|task| !task.is_finished());
        dispatches.push(task);
    }

    async fn apply_outcome(&self, outcome: DispatchOutcome) {
        if self.state.is_stopping() {
            debug!("Session stopped, discarding command outcome: {:?}", outcome);
            return;
        }

        match &outcome {
            DispatchOutcome::Executed(result) => {
                self.emit(SessionEvent::CommandExecuted(result.clone()));
            }
            DispatchOutcome::Feedback(message) => {
                self.emit(SessionEvent::CommandExecuted(CommandResult::Message {
                    message: message.clone(),
                }));
                if self.state.is_connection_open() {
                    self.emit(SessionEvent::Response {
                        text: format!("\n[System: {}]\n", message),
                        is_delta: false,
                    });
                    self.inject_feedback(message).await;
                }
            }
            DispatchOutcome::NotFound(spoken) => {
                self.emit(SessionEvent::Response {
                    text: spoken.clone(),
                    is_delta: false,
                });
                if self.state.is_connection_open() {
                    self.inject_feedback(spoken).await;
                }
            }
            DispatchOutcome::Skipped(_)
            | DispatchOutcome::NotUnderstood(_)
            | DispatchOutcome::Failed(_) => {}
        }

        self.emit(SessionEvent::Dispatched(outcome));
    }

    /// Hand text to the assistant as a system item and ask it to respond
    async fn inject_feedback(&self, text: &str) {
        let Some(transport) = self.current_transport() else {
            return;
        };

        let item = ClientEvent::ConversationItemCreate {
            item: ConversationItem::system_text(text),
        };
        if let Err(e) = transport.send(&item).await {
            warn!("Failed to send command feedback: {}", e);
            return;
        }
        if let Err(e) = transport.send(&ClientEvent::ResponseCreate).await {
            warn!("Failed to request response: {}", e);
        }
    }

    /// Returns `Ok(false)` if the session stopped while reconnecting
    async fn reconnect(
        &self,
        credentials: &Credentials,
        policy: &ReconnectPolicy,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let Some(delay) = policy.delay(attempt) else {
                bail!(
                    "Connection lost after {} reconnect attempts",
                    policy.max_attempts
                );
            };

            warn!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay, attempt, policy.max_attempts
            );
            tokio::select! {
                _ = shutdown.changed() => return Ok(false),
                _ = tokio::time::sleep(delay) => {}
            }
            if self.state.is_stopping() {
                return Ok(false);
            }

            let transport = match self.connector.connect(credentials).await {
                Ok(transport) => transport,
                Err(e) => {
                    if ConnectionError::classify(format!("{:#}", e)).is_fatal() {
                        return Err(e.context("Reconnect rejected"));
                    }
                    warn!("Reconnect attempt {} failed: {:#}", attempt, e);
                    continue;
                }
            };

            if let Err(e) = self.send_session_config(transport.as_ref()).await {
                warn!("Reconnect attempt {} failed: {:#}", attempt, e);
                let _ = transport.close().await;
                continue;
            }

            if let Some(previous) = replace(&self.transport, Some(transport)) {
                let _ = previous.close().await;
            }

            // Teardown may have run while the new transport was being set up
            if self.state.is_stopping() {
                if let Some(orphan) = replace(&self.transport, None) {
                    let _ = orphan.close().await;
                }
                return Ok(false);
            }

            self.reconnects.fetch_add(1, Ordering::SeqCst);
            info!("Reconnected to realtime endpoint (attempt {})", attempt);
            self.restore_open();
            return Ok(true);
        }
    }

    /// Fatal path: stop capture, surface the error, tear down
    async fn fail(self: &Arc<Self>, message: String) {
        self.state.set_recording(false);
        self.emit(SessionEvent::Error(message));
        self.teardown(StopOrigin::MessageLoop).await;
    }

    /// Raise the stop flag and release resources; false if already stopping
    async fn teardown(&self, origin: StopOrigin) -> bool {
        if !self.state.begin_stop() {
            return false;
        }
        self.state.set_recording(false);

        // A failed start releases its own resources
        let Some(acquired) = self.resources.lock().await.take() else {
            return true;
        };
        self.release(Some(acquired), origin).await;
        true
    }

    /// Release in fixed order: input device, capture task, capture source,
    /// transmit task, output sink, dispatches, message loop, transport
    async fn release(&self, acquired: Option<Resources>, origin: StopOrigin) {
        let mut res = acquired.unwrap_or_default();

        if let Some(shutdown) = res.shutdown.take() {
            let _ = shutdown.send(true);
        }

        if let Some(source) = res.source.as_mut() {
            if let Err(e) = source.stop().await {
                warn!("Failed to stop audio source: {:#}", e);
            }
        }

        if let Some(task) = res.capture_task.take() {
            task.abort();
            let _ = task.await;
        }

        drop(res.source.take());

        // A send may be stuck on a dead socket; abort rather than let it finish
        if let Some(task) = res.transmit_task.take() {
            task.abort();
            let _ = task.await;
        }

        if let Some(sink) = replace(&self.sink, None) {
            sink.flush();
            if let Err(e) = sink.stop().await {
                warn!("Failed to stop audio sink: {:#}", e);
            }
        }

        let dispatches = std::mem::take(&mut *lock(&self.dispatches));
        for task in dispatches {
            task.abort();
            let _ = task.await;
        }

        if let Some(mut task) = res.message_task.take() {
            // The message loop cannot wait for itself
            if origin == StopOrigin::Caller
                && tokio::time::timeout(MESSAGE_LOOP_GRACE, &mut task)
                    .await
                    .is_err()
            {
                warn!("Message loop did not stop in time, aborting");
                task.abort();
            }
        }

        if let Some(transport) = replace(&self.transport, None) {
            if let Err(e) = transport.close().await {
                debug!("Transport close: {}", e);
            }
        }

        let discarded = self.transmitter.pending_len();
        if discarded > 0 {
            debug!("Discarding {} pending audio bytes", discarded);
        }
        self.transmitter.clear();

        *lock(&self.stopped_at) = Some(Utc::now());
        self.state.close();
        self.emit(SessionEvent::StateChanged(SessionStatus::Closed));

        info!("Voice session stopped: {}", self.config.session_id);
    }
}
