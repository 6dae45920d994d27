//! The recording state machine.
//!
//! A `Recorder` owns exactly one compositor capture session and at most one
//! media pipeline, and drives both through a coordinated lifecycle: request
//! capture → receive stream → launch pipeline → flush → teardown. Either
//! resource can fail or disappear at any time; every abnormal path funnels
//! through one bail-out routine so that whichever side fails first, the
//! other is unwound and the pending request settles exactly once.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use castd_common::error::{CastError, CastResult};
use castd_compositor::CursorMode;

use crate::pipeline::{MediaPipeline, PipelineLauncher};
use crate::recent::RecentItems;
use crate::session::{CaptureArea, SessionControl};
use crate::state::{Pending, PipelineState, RecorderState, SessionState};

/// Asynchronous happenings the recorder reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// The backing stream node is ready for consumption.
    StreamReady(u32),
    /// The compositor tore the session down.
    SessionClosed,
    /// The pipeline flushed and finalized its output.
    PipelineEos,
    /// The pipeline reported a fatal error.
    PipelineError(String),
    /// The owning client's connection vanished.
    ClientVanished,
}

enum RecorderCommand {
    Start {
        reply: oneshot::Sender<CastResult<()>>,
    },
    Stop {
        reply: oneshot::Sender<CastResult<()>>,
    },
}

/// Notice sent to the registry once a recorder is finished. The generation
/// lets the registry ignore notices for slots it has already replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminated {
    pub client: String,
    pub generation: u64,
}

/// Aborts the client liveness watch task when dropped.
pub struct LivenessWatch(JoinHandle<()>);

impl LivenessWatch {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self(task)
    }
}

impl Drop for LivenessWatch {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Everything a recorder needs at spawn time.
pub struct RecorderConfig {
    /// Owning client identity (its unique bus name).
    pub client: String,
    /// Registry slot generation, echoed back in the termination notice.
    pub generation: u64,
    pub area: CaptureArea,
    pub output_path: PathBuf,
    pub draw_cursor: bool,
    pub session: Box<dyn SessionControl>,
    pub launcher: Box<dyn PipelineLauncher>,
    pub recent: Box<dyn RecentItems>,
    pub liveness: Option<LivenessWatch>,
}

/// Handle for driving a spawned recorder.
#[derive(Clone)]
pub struct RecorderHandle {
    commands: mpsc::Sender<RecorderCommand>,
}

impl RecorderHandle {
    /// Starts the recording. Resolves once the pipeline is playing; rejects
    /// if the capture request fails, the pipeline cannot be launched, or the
    /// client vanishes first. Meaningful once per recorder.
    pub async fn start_recording(&self) -> CastResult<()> {
        self.request(|reply| RecorderCommand::Start { reply })
            .await
    }

    /// Stops the recording. Resolves once the pipeline flushed and the
    /// session stopped; rejects on any fatal error encountered while
    /// flushing. Meaningful only after `start_recording` resolved.
    pub async fn stop_recording(&self) -> CastResult<()> {
        self.request(|reply| RecorderCommand::Stop { reply }).await
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<CastResult<()>>) -> RecorderCommand,
    ) -> CastResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| CastError::recorder("Recorder is no longer running"))?;
        reply_rx
            .await
            .map_err(|_| CastError::recorder("Recorder went away before settling the request"))?
    }
}

/// The recorder control loop state. All transitions run on one task; no
/// handler ever runs concurrently with another.
pub struct Recorder {
    client: String,
    generation: u64,
    area: CaptureArea,
    output_path: PathBuf,
    draw_cursor: bool,
    session: Box<dyn SessionControl>,
    launcher: Box<dyn PipelineLauncher>,
    pipeline: Option<Box<dyn MediaPipeline>>,
    recent: Box<dyn RecentItems>,
    liveness: Option<LivenessWatch>,
    state: RecorderState,
    pending_start: Pending,
    pending_stop: Pending,
    commands: mpsc::Receiver<RecorderCommand>,
    events: mpsc::UnboundedReceiver<RecorderEvent>,
    terminations: mpsc::UnboundedSender<Terminated>,
}

impl Recorder {
    /// Spawns the recorder control loop and returns its handle.
    pub fn spawn(
        config: RecorderConfig,
        events: mpsc::UnboundedReceiver<RecorderEvent>,
        terminations: mpsc::UnboundedSender<Terminated>,
    ) -> RecorderHandle {
        let (command_tx, command_rx) = mpsc::channel(4);
        let recorder = Recorder {
            client: config.client,
            generation: config.generation,
            area: config.area,
            output_path: config.output_path,
            draw_cursor: config.draw_cursor,
            session: config.session,
            launcher: config.launcher,
            pipeline: None,
            recent: config.recent,
            liveness: config.liveness,
            state: RecorderState::INITIAL,
            pending_start: Pending::empty("start"),
            pending_stop: Pending::empty("stop"),
            commands: command_rx,
            events,
            terminations,
        };
        tokio::spawn(recorder.run());
        RecorderHandle {
            commands: command_tx,
        }
    }

    async fn run(mut self) {
        while !self.state.is_terminal() {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(RecorderCommand::Start { reply }) => self.handle_start(reply).await,
                    Some(RecorderCommand::Stop { reply }) => self.handle_stop(reply).await,
                    None => {
                        self.bail_out(CastError::recorder("Recorder handle was released"))
                            .await;
                        break;
                    }
                },
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }

        let _ = self.terminations.send(Terminated {
            client: self.client.clone(),
            generation: self.generation,
        });
        tracing::debug!(client = %self.client, "Recorder finished");
    }

    async fn handle_start(&mut self, reply: oneshot::Sender<CastResult<()>>) {
        if self.state != RecorderState::INITIAL || self.pending_start.is_armed() {
            let _ = reply.send(Err(CastError::recorder("Recording was already started")));
            return;
        }
        self.pending_start.arm(reply);

        let cursor = if self.draw_cursor {
            CursorMode::Embedded
        } else {
            CursorMode::Hidden
        };
        tracing::info!(client = %self.client, area = ?self.area, "Requesting capture area");
        if let Err(e) = self.session.record_area(self.area, cursor).await {
            self.bail_out(e).await;
            return;
        }
        if let Err(e) = self.session.start().await {
            self.bail_out(e).await;
            return;
        }
        self.state.advance(SessionState::Active, PipelineState::Init);
        // The pending start settles once the backing stream node arrives.
    }

    async fn handle_stop(&mut self, reply: oneshot::Sender<CastResult<()>>) {
        if self.state.session != SessionState::Active
            || self.state.pipeline != PipelineState::Playing
            || self.pending_stop.is_armed()
        {
            let _ = reply.send(Err(CastError::recorder("No recording in progress to stop")));
            return;
        }
        self.pending_stop.arm(reply);

        let Some(pipeline) = self.pipeline.as_mut() else {
            self.bail_out(CastError::recorder("Pipeline missing while playing"))
                .await;
            return;
        };
        tracing::info!(client = %self.client, "Flushing recording");
        if let Err(e) = pipeline.begin_flush() {
            self.bail_out(e).await;
            return;
        }
        self.state
            .advance(SessionState::Active, PipelineState::Flushing);
    }

    async fn handle_event(&mut self, event: RecorderEvent) {
        match event {
            RecorderEvent::StreamReady(node_id) => self.handle_stream_ready(node_id).await,
            RecorderEvent::PipelineEos => self.handle_pipeline_eos().await,
            RecorderEvent::PipelineError(message) => {
                self.bail_out(CastError::pipeline(message)).await;
            }
            RecorderEvent::SessionClosed => self.handle_session_closed().await,
            RecorderEvent::ClientVanished => {
                tracing::warn!(client = %self.client, "Client vanished, aborting recording");
                self.bail_out(CastError::recorder("Owning client vanished"))
                    .await;
            }
        }
    }

    async fn handle_stream_ready(&mut self, node_id: u32) {
        if self.state.session != SessionState::Active
            || self.state.pipeline != PipelineState::Init
        {
            tracing::warn!(node_id, state = ?self.state, "Ignoring stream node in unexpected state");
            return;
        }
        tracing::info!(client = %self.client, node_id, "Backing stream node ready, launching pipeline");
        match self.launcher.launch(node_id) {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.state
                    .advance(SessionState::Active, PipelineState::Playing);
                self.pending_start.settle(Ok(()));
            }
            Err(e) => self.bail_out(e).await,
        }
    }

    async fn handle_pipeline_eos(&mut self) {
        if self.state.pipeline != PipelineState::Flushing {
            tracing::warn!(state = ?self.state, "Ignoring end-of-stream outside flush");
            return;
        }

        if let Some(mut pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.shutdown() {
                self.bail_out(e).await;
                return;
            }
        }
        self.state
            .advance(SessionState::Active, PipelineState::Stopped);

        self.recent.add(&self.output_path);
        if let Err(e) = self.session.stop().await {
            // The output file is already finalized; losing the session stop
            // costs nothing the caller can act on.
            tracing::warn!(error = %e, "Failed to stop capture session after flush");
        }
        self.state
            .advance(SessionState::Stopped, PipelineState::Stopped);
        self.liveness.take();

        tracing::info!(
            client = %self.client,
            path = %self.output_path.display(),
            "Recording finished"
        );
        self.pending_stop.settle(Ok(()));
    }

    async fn handle_session_closed(&mut self) {
        // The compositor already tore the session down; never call stop back.
        let pipeline_was_stopped = self.state.pipeline == PipelineState::Stopped;
        self.state.advance(SessionState::Stopped, self.state.pipeline);
        if pipeline_was_stopped {
            return;
        }
        self.bail_out(CastError::session("Capture session closed unexpectedly"))
            .await;
    }

    /// Single funnel for every abnormal path: releases the pipeline, stops
    /// the session if it is still active, and settles whatever requests are
    /// pending. Safe to reach more than once; settled requests and released
    /// resources are never touched again.
    async fn bail_out(&mut self, error: CastError) {
        tracing::error!(client = %self.client, error = %error, "Recording failed, tearing down");

        if let Some(mut pipeline) = self.pipeline.take() {
            // A teardown failure still releases the reference; nothing may
            // keep a half-torn-down pipeline.
            if let Err(e) = pipeline.shutdown() {
                tracing::warn!(error = %e, "Pipeline teardown failed");
            }
        }
        if self.state.session == SessionState::Active {
            if let Err(e) = self.session.stop().await {
                tracing::warn!(error = %e, "Failed to stop capture session");
            }
        }

        let pipeline_state = if self.state.pipeline == PipelineState::Stopped {
            PipelineState::Stopped
        } else {
            PipelineState::Error
        };
        self.state.advance(SessionState::Stopped, pipeline_state);
        self.liveness.take();

        let message = error.to_string();
        self.pending_start
            .settle(Err(CastError::recorder(message.clone())));
        self.pending_stop.settle(Err(CastError::recorder(message)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{MediaPipeline, PipelineLauncher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const STEP: Duration = Duration::from_millis(20);

    type CallLog = Arc<Mutex<Vec<&'static str>>>;

    #[derive(Default, Clone, Copy)]
    struct FailureModes {
        record_area: bool,
        launch: bool,
        flush: bool,
        shutdown: bool,
    }

    struct StubSession {
        log: CallLog,
        fail_record_area: bool,
    }

    #[async_trait]
    impl SessionControl for StubSession {
        async fn record_area(&mut self, _area: CaptureArea, _cursor: CursorMode) -> CastResult<()> {
            self.log.lock().unwrap().push("record_area");
            if self.fail_record_area {
                return Err(CastError::session("no capture for you"));
            }
            Ok(())
        }

        async fn start(&mut self) -> CastResult<()> {
            self.log.lock().unwrap().push("session_start");
            Ok(())
        }

        async fn stop(&mut self) -> CastResult<()> {
            self.log.lock().unwrap().push("session_stop");
            Ok(())
        }
    }

    struct StubPipeline {
        log: CallLog,
        fail_flush: bool,
        fail_shutdown: bool,
    }

    impl MediaPipeline for StubPipeline {
        fn begin_flush(&mut self) -> CastResult<()> {
            self.log.lock().unwrap().push("flush");
            if self.fail_flush {
                return Err(CastError::pipeline("flush refused"));
            }
            Ok(())
        }

        fn shutdown(&mut self) -> CastResult<()> {
            self.log.lock().unwrap().push("shutdown");
            if self.fail_shutdown {
                return Err(CastError::pipeline("stuck pipeline"));
            }
            Ok(())
        }
    }

    struct StubLauncher {
        log: CallLog,
        failures: FailureModes,
    }

    impl PipelineLauncher for StubLauncher {
        fn launch(&mut self, _node_id: u32) -> CastResult<Box<dyn MediaPipeline>> {
            self.log.lock().unwrap().push("launch");
            if self.failures.launch {
                return Err(CastError::pipeline("broken launch"));
            }
            Ok(Box::new(StubPipeline {
                log: self.log.clone(),
                fail_flush: self.failures.flush,
                fail_shutdown: self.failures.shutdown,
            }))
        }
    }

    struct CountingRecent(Arc<AtomicUsize>);

    impl RecentItems for CountingRecent {
        fn add(&mut self, _path: &std::path::Path) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        handle: RecorderHandle,
        events: mpsc::UnboundedSender<RecorderEvent>,
        terminations: mpsc::UnboundedReceiver<Terminated>,
        log: CallLog,
        recent_count: Arc<AtomicUsize>,
    }

    impl Harness {
        fn calls(&self) -> Vec<&'static str> {
            self.log.lock().unwrap().clone()
        }

        async fn start(&self) -> CastResult<()> {
            let handle = self.handle.clone();
            let start = tokio::spawn(async move { handle.start_recording().await });
            tokio::time::sleep(STEP).await;
            self.events.send(RecorderEvent::StreamReady(42)).unwrap();
            start.await.unwrap()
        }

        async fn expect_termination(&mut self) -> Terminated {
            tokio::time::timeout(Duration::from_secs(1), self.terminations.recv())
                .await
                .expect("recorder should terminate")
                .expect("termination channel closed")
        }
    }

    fn spawn_recorder(failures: FailureModes) -> Harness {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let recent_count = Arc::new(AtomicUsize::new(0));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (terminations_tx, terminations_rx) = mpsc::unbounded_channel();

        let config = RecorderConfig {
            client: ":1.23".to_string(),
            generation: 7,
            area: CaptureArea {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080,
            },
            output_path: PathBuf::from("/tmp/cast.webm"),
            draw_cursor: true,
            session: Box::new(StubSession {
                log: log.clone(),
                fail_record_area: failures.record_area,
            }),
            launcher: Box::new(StubLauncher {
                log: log.clone(),
                failures,
            }),
            recent: Box::new(CountingRecent(recent_count.clone())),
            liveness: None,
        };
        let handle = Recorder::spawn(config, events_rx, terminations_tx);

        Harness {
            handle,
            events: events_tx,
            terminations: terminations_rx,
            log,
            recent_count,
        }
    }

    #[tokio::test]
    async fn full_recording_lifecycle() {
        let mut harness = spawn_recorder(FailureModes::default());

        harness.start().await.unwrap();
        assert_eq!(harness.calls(), ["record_area", "session_start", "launch"]);

        let handle = harness.handle.clone();
        let stop = tokio::spawn(async move { handle.stop_recording().await });
        tokio::time::sleep(STEP).await;
        harness.events.send(RecorderEvent::PipelineEos).unwrap();
        stop.await.unwrap().unwrap();

        let notice = harness.expect_termination().await;
        assert_eq!(notice.client, ":1.23");
        assert_eq!(notice.generation, 7);
        assert_eq!(
            harness.calls(),
            [
                "record_area",
                "session_start",
                "launch",
                "flush",
                "shutdown",
                "session_stop",
            ]
        );
        assert_eq!(harness.recent_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn capture_request_failure_rejects_start() {
        let mut harness = spawn_recorder(FailureModes {
            record_area: true,
            ..Default::default()
        });

        let error = harness.handle.start_recording().await.unwrap_err();
        assert!(error.to_string().contains("no capture for you"));

        harness.expect_termination().await;
        // No pipeline was ever created, and the never-started session is not
        // stopped back.
        assert_eq!(harness.calls(), ["record_area"]);
        assert_eq!(harness.recent_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pipeline_launch_failure_rejects_start() {
        let mut harness = spawn_recorder(FailureModes {
            launch: true,
            ..Default::default()
        });

        let error = harness.start().await.unwrap_err();
        assert!(error.to_string().contains("broken launch"));

        harness.expect_termination().await;
        assert_eq!(
            harness.calls(),
            ["record_area", "session_start", "launch", "session_stop"]
        );
    }

    #[tokio::test]
    async fn session_closure_while_playing_is_fatal() {
        let mut harness = spawn_recorder(FailureModes::default());
        harness.start().await.unwrap();

        harness.events.send(RecorderEvent::SessionClosed).unwrap();
        harness.expect_termination().await;

        // The compositor closed the session; the pipeline is torn down but
        // the session is never stopped back.
        assert_eq!(
            harness.calls(),
            ["record_area", "session_start", "launch", "shutdown"]
        );
        assert_eq!(harness.recent_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pipeline_error_during_flush_rejects_stop() {
        let mut harness = spawn_recorder(FailureModes::default());
        harness.start().await.unwrap();

        let handle = harness.handle.clone();
        let stop = tokio::spawn(async move { handle.stop_recording().await });
        tokio::time::sleep(STEP).await;
        harness
            .events
            .send(RecorderEvent::PipelineError("encoder exploded".into()))
            .unwrap();

        let error = stop.await.unwrap().unwrap_err();
        assert!(error.to_string().contains("encoder exploded"));

        harness.expect_termination().await;
        assert_eq!(
            harness.calls(),
            [
                "record_area",
                "session_start",
                "launch",
                "flush",
                "shutdown",
                "session_stop",
            ]
        );
        assert_eq!(harness.recent_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn client_vanishing_tears_everything_down() {
        let mut harness = spawn_recorder(FailureModes::default());
        harness.start().await.unwrap();

        harness.events.send(RecorderEvent::ClientVanished).unwrap();
        harness.expect_termination().await;

        assert_eq!(
            harness.calls(),
            ["record_area", "session_start", "launch", "shutdown", "session_stop"]
        );
    }

    #[tokio::test]
    async fn teardown_failure_still_settles_the_stop_request() {
        let mut harness = spawn_recorder(FailureModes {
            shutdown: true,
            ..Default::default()
        });
        harness.start().await.unwrap();

        let handle = harness.handle.clone();
        let stop = tokio::spawn(async move { handle.stop_recording().await });
        tokio::time::sleep(STEP).await;
        harness.events.send(RecorderEvent::PipelineEos).unwrap();

        let error = stop.await.unwrap().unwrap_err();
        assert!(error.to_string().contains("stuck pipeline"));
        harness.expect_termination().await;
    }

    #[tokio::test]
    async fn eos_outside_flush_is_ignored() {
        let mut harness = spawn_recorder(FailureModes::default());
        harness.start().await.unwrap();

        harness.events.send(RecorderEvent::PipelineEos).unwrap();
        tokio::time::sleep(STEP).await;
        assert!(harness.terminations.try_recv().is_err());

        let handle = harness.handle.clone();
        let stop = tokio::spawn(async move { handle.stop_recording().await });
        tokio::time::sleep(STEP).await;
        harness.events.send(RecorderEvent::PipelineEos).unwrap();
        stop.await.unwrap().unwrap();
        harness.expect_termination().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let harness = spawn_recorder(FailureModes::default());
        let error = harness.handle.stop_recording().await.unwrap_err();
        assert!(error.to_string().contains("No recording in progress"));
    }

    #[tokio::test]
    async fn late_events_never_settle_a_request_twice() {
        let mut harness = spawn_recorder(FailureModes::default());
        harness.start().await.unwrap();

        // Two fatal events in a row: the first tears down and settles, the
        // second finds everything already released.
        harness
            .events
            .send(RecorderEvent::PipelineError("first".into()))
            .unwrap();
        harness.events.send(RecorderEvent::SessionClosed).unwrap();

        harness.expect_termination().await;
        let calls = harness.calls();
        assert_eq!(
            calls.iter().filter(|call| **call == "shutdown").count(),
            1,
            "pipeline must be torn down exactly once"
        );
        assert_eq!(
            calls.iter().filter(|call| **call == "session_stop").count(),
            1,
            "session must be stopped exactly once"
        );
    }
}
