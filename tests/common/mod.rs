// Shared test doubles for session tests
//
// In-memory stand-ins for the realtime transport, its connector, the audio
// devices and the command executor, plus helpers to drive a session.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskvoice::audio::{AudioBackendConfig, AudioDevices, AudioSink, AudioSource, SampleBuffer};
use taskvoice::commands::{CommandExecutor, CommandReply, CommandResult, ExecutorError, Task};
use taskvoice::realtime::{
    ClientEvent, Credentials, Endpoint, RealtimeTransport, TransportConnector, TransportError,
};
use taskvoice::session::{SessionConfig, SessionEvent, SessionStatus, VoiceSession};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Transport

pub struct MockTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    sent: Mutex<Vec<ClientEvent>>,
    send_attempts: AtomicUsize,
    fail_next: AtomicUsize,
    fail_all: AtomicBool,
    stall_audio: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockTransport {
    /// Transport plus the handle used to push server messages into it
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            inbound: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            fail_all: AtomicBool::new(false),
            stall_audio: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        });
        (transport, tx)
    }

    /// Fail the next `n` sends with a timeout
    pub fn fail_next_sends(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn fail_all_sends(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Audio appends never complete, like writes into a full socket buffer
    pub fn stall_audio_sends(&self, stall: bool) {
        self.stall_audio.store(stall, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Decoded payloads of every `input_audio_buffer.append` sent
    pub fn audio_frames(&self) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::InputAudioBufferAppend { audio } => BASE64.decode(audio).ok(),
                _ => None,
            })
            .collect()
    }

    pub fn session_updates(&self) -> usize {
        self.sent()
            .iter()
            .filter(|e| matches!(e, ClientEvent::SessionUpdate { .. }))
            .count()
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for MockTransport {
    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);

        if self.stall_audio.load(Ordering::SeqCst)
            && matches!(event, ClientEvent::InputAudioBufferAppend { .. })
        {
            std::future::pending::<()>().await;
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(TransportError::Send("connection reset".to_string()));
        }
        let pending_failures = self.fail_next.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_next.store(pending_failures - 1, Ordering::SeqCst);
            return Err(TransportError::Send("network timeout".to_string()));
        }

        self.sent.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn recv(&self) -> Option<Result<String, TransportError>> {
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.map(Ok)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Hands out queued transports, then fails
pub struct MockConnector {
    transports: Mutex<VecDeque<Arc<MockTransport>>>,
    connects: AtomicUsize,
    failure: String,
}

impl MockConnector {
    pub fn new(transports: Vec<Arc<MockTransport>>) -> Arc<Self> {
        Self::failing_with(transports, "network unreachable")
    }

    pub fn failing_with(transports: Vec<Arc<MockTransport>>, failure: &str) -> Arc<Self> {
        Arc::new(Self {
            transports: Mutex::new(transports.into()),
            connects: AtomicUsize::new(0),
            failure: failure.to_string(),
        })
    }

    pub fn push(&self, transport: Arc<MockTransport>) {
        self.transports.lock().unwrap().push_back(transport);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TransportConnector for MockConnector {
    async fn connect(&self, _credentials: &Credentials) -> Result<Arc<dyn RealtimeTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.transports.lock().unwrap().pop_front();
        match next {
            Some(transport) => {
                let transport: Arc<dyn RealtimeTransport> = transport;
                Ok(transport)
            }
            None => Err(anyhow!("{}", self.failure)),
        }
    }
}

// ---------------------------------------------------------------------------
// Audio devices

#[derive(Default)]
pub struct DeviceLog {
    pub source_starts: AtomicUsize,
    pub source_stops: AtomicUsize,
    pub sink_starts: AtomicUsize,
    pub sink_stops: AtomicUsize,
    pub flushes: AtomicUsize,
    pub played: Mutex<Vec<Vec<i16>>>,
}

impl DeviceLog {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Every sub-chunk handed to the sink, in order
    pub fn played_chunks(&self) -> Vec<Vec<i16>> {
        self.played.lock().unwrap().clone()
    }
}

pub struct MockDevices {
    log: Arc<DeviceLog>,
    mic: Mutex<Option<mpsc::Receiver<SampleBuffer>>>,
    source_failure: Option<String>,
}

impl MockDevices {
    /// Devices plus the sender that plays the role of the microphone
    pub fn new() -> (Arc<Self>, mpsc::Sender<SampleBuffer>) {
        let (tx, rx) = mpsc::channel(64);
        let devices = Arc::new(Self {
            log: Arc::new(DeviceLog::default()),
            mic: Mutex::new(Some(rx)),
            source_failure: None,
        });
        (devices, tx)
    }

    /// Devices whose microphone cannot be opened
    pub fn denied(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(DeviceLog::default()),
            mic: Mutex::new(None),
            source_failure: Some(reason.to_string()),
        })
    }

    pub fn log(&self) -> Arc<DeviceLog> {
        self.log.clone()
    }
}

impl AudioDevices for MockDevices {
    fn open_source(&self, _config: &AudioBackendConfig) -> Result<Box<dyn AudioSource>> {
        if let Some(reason) = &self.source_failure {
            bail!("{}", reason);
        }
        let rx = self
            .mic
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("microphone already in use"))?;
        Ok(Box::new(MockSource {
            rx: Some(rx),
            log: self.log.clone(),
            capturing: false,
        }))
    }

    fn open_sink(&self, _config: &AudioBackendConfig) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(MockSink {
            log: self.log.clone(),
        }))
    }
}

struct MockSource {
    rx: Option<mpsc::Receiver<SampleBuffer>>,
    log: Arc<DeviceLog>,
    capturing: bool,
}

#[async_trait::async_trait]
impl AudioSource for MockSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBuffer>> {
        self.log.source_starts.fetch_add(1, Ordering::SeqCst);
        self.capturing = true;
        self.rx.take().ok_or_else(|| anyhow!("already started"))
    }

    async fn stop(&mut self) -> Result<()> {
        self.log.source_stops.fetch_add(1, Ordering::SeqCst);
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "mock microphone"
    }
}

struct MockSink {
    log: Arc<DeviceLog>,
}

#[async_trait::async_trait]
impl AudioSink for MockSink {
    async fn start(&self) -> Result<()> {
        self.log.sink_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn enqueue(&self, samples: &[i16]) {
        self.log.played.lock().unwrap().push(samples.to_vec());
    }

    fn flush(&self) {
        self.log.flushes.fetch_add(1, Ordering::SeqCst);
    }

    async fn stop(&self) -> Result<()> {
        self.log.sink_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock speaker"
    }
}

/// One buffer of constant samples, as a microphone callback would deliver it
pub fn mic_buffer(value: f32, samples: usize) -> SampleBuffer {
    SampleBuffer {
        samples: vec![value; samples],
        sample_rate: 24000,
        timestamp_ms: 0,
    }
}

// ---------------------------------------------------------------------------
// Command executor

pub struct MockExecutor {
    replies: Mutex<VecDeque<CommandReply>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
}

impl MockExecutor {
    pub fn new(replies: Vec<CommandReply>) -> Arc<Self> {
        Self::with_delay(replies, Duration::ZERO)
    }

    /// Executor that takes `delay` to answer each command
    pub fn with_delay(replies: Vec<CommandReply>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(&self, text: &str) -> Result<CommandReply, ExecutorError> {
        self.calls.lock().unwrap().push(text.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.replies.lock().unwrap().pop_front();
        reply.ok_or_else(|| ExecutorError::Unavailable("no reply scripted".to_string()))
    }
}

pub fn task_created(id: i64, title: &str) -> CommandReply {
    CommandReply::Success(CommandResult::Task {
        message: format!("Task '{}' created", title),
        task: Task {
            id: Some(id),
            title: Some(title.to_string()),
            status: Some("pending".to_string()),
            extra: Default::default(),
        },
    })
}

// ---------------------------------------------------------------------------
// Session harness

pub fn credentials() -> Credentials {
    Credentials {
        api_key: "test-key".to_string(),
        endpoint: Endpoint::OpenAi {
            model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
        },
    }
}

/// Session config with short delays so failure paths run quickly
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        session_id: "test-session".to_string(),
        config_retry_delay: Duration::from_millis(10),
        reconnect_max_attempts: 3,
        reconnect_base_delay: Duration::from_millis(10),
        reconnect_max_delay: Duration::from_millis(40),
        ..SessionConfig::default()
    }
}

pub struct Harness {
    pub session: VoiceSession,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub transport: Arc<MockTransport>,
    pub server: mpsc::UnboundedSender<String>,
    pub connector: Arc<MockConnector>,
    pub devices: Arc<DeviceLog>,
    pub mic: mpsc::Sender<SampleBuffer>,
    pub executor: Arc<MockExecutor>,
}

impl Harness {
    /// Build a session around fresh mocks without starting it
    pub fn new(replies: Vec<CommandReply>) -> Self {
        Self::with_config(fast_config(), replies)
    }

    pub fn with_config(config: SessionConfig, replies: Vec<CommandReply>) -> Self {
        Self::with_executor(config, MockExecutor::new(replies))
    }

    pub fn with_executor(config: SessionConfig, executor: Arc<MockExecutor>) -> Self {
        let (transport, server) = MockTransport::new();
        let connector = MockConnector::new(vec![transport.clone()]);
        let (devices, mic) = MockDevices::new();

        let (session, events) = VoiceSession::new(
            config,
            connector.clone(),
            devices.clone(),
            executor.clone(),
        );

        Self {
            session,
            events,
            transport,
            server,
            connector,
            devices: devices.log(),
            mic,
            executor,
        }
    }

    /// Start the session and wait until `session.created` opens it
    pub async fn open(replies: Vec<CommandReply>) -> Result<Self> {
        Self::new(replies).opened().await
    }

    /// Start an already built harness and wait until it is open
    pub async fn opened(mut self) -> Result<Self> {
        self.session.start(&credentials()).await?;
        self.push(r#"{"type":"session.created","session":{"id":"sess_1"}}"#);
        self.wait_for(|e| *e == SessionEvent::StateChanged(SessionStatus::Open))
            .await?;
        Ok(self)
    }

    /// Deliver a raw server message
    pub fn push(&self, message: &str) {
        self.server
            .send(message.to_string())
            .expect("message loop receiver dropped");
    }

    /// Wait for the first event matching `pred`, skipping the rest
    pub async fn wait_for(
        &mut self,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> Result<SessionEvent> {
        let events = &mut self.events;
        let found = tokio::time::timeout(WAIT, async {
            while let Some(event) = events.recv().await {
                if pred(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await
        .map_err(|_| anyhow!("timed out waiting for session event"))?;

        found.ok_or_else(|| anyhow!("session event stream ended"))
    }

    /// End the current transport's inbound stream; returns the dropped transport
    pub fn lose_connection(&mut self) -> Arc<MockTransport> {
        let (detached, server) = MockTransport::new();
        let previous = std::mem::replace(&mut self.transport, detached);
        // Replacing the sender closes the old inbound stream
        self.server = server;
        previous
    }

    /// Like `lose_connection`, with a fresh transport queued for the reconnect
    pub fn drop_connection(&mut self) -> Arc<MockTransport> {
        let (next, server) = MockTransport::new();
        self.connector.push(next.clone());
        let previous = std::mem::replace(&mut self.transport, next);
        self.server = server;
        previous
    }

    /// Feed samples as the microphone would
    pub async fn speak(&self, value: f32, samples: usize) -> Result<()> {
        self.mic.send(mic_buffer(value, samples)).await?;
        Ok(())
    }
}

/// Poll `cond` until it holds or the wait times out
pub async fn eventually(mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}
