//! Capture session wrapper over the compositor's screencast objects.
//!
//! One `CaptureSession` represents one negotiated recording grant. The
//! compositor announces the PipeWire node backing the stream asynchronously;
//! both that announcement and compositor-initiated closure are forwarded as
//! recorder events so the control loop sees a single ordered stream of
//! happenings.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use zbus::zvariant::Value;

use castd_common::error::{CastError, CastResult};
use castd_compositor::{CompositorClient, CursorMode, ScreenCastSessionProxy};

use crate::recorder::RecorderEvent;

/// Rectangular capture region in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureArea {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Control surface of one negotiated compositor capture session.
#[async_trait]
pub trait SessionControl: Send {
    /// Requests capture of `area`. The backing stream node is announced
    /// later as a `StreamReady` event, at most once per session.
    async fn record_area(&mut self, area: CaptureArea, cursor: CursorMode) -> CastResult<()>;

    /// Starts the negotiated streams.
    async fn start(&mut self) -> CastResult<()>;

    /// Stops the session. This is a synchronous round trip; once it returns
    /// the session is gone on the compositor side.
    async fn stop(&mut self) -> CastResult<()>;
}

/// Production `SessionControl` backed by the compositor D-Bus API.
pub struct CaptureSession {
    client: CompositorClient,
    proxy: ScreenCastSessionProxy<'static>,
    events: mpsc::UnboundedSender<RecorderEvent>,
    watches: Vec<tokio::task::JoinHandle<()>>,
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        for watch in &self.watches {
            watch.abort();
        }
    }
}

impl CaptureSession {
    /// Creates a compositor session and wires its `Closed` signal into
    /// `events`. Closure is authoritative: the compositor may tear the
    /// session down at any time, for reasons of its own.
    pub async fn create(
        client: CompositorClient,
        events: mpsc::UnboundedSender<RecorderEvent>,
    ) -> CastResult<Self> {
        let session_path = client
            .create_session()
            .await
            .map_err(|e| CastError::session(format!("Failed to create compositor session: {e}")))?;
        let proxy = client
            .session_proxy(&session_path)
            .await
            .map_err(|e| CastError::session(format!("Failed to bind session proxy: {e}")))?;

        let mut closed = proxy.receive_closed().await.map_err(|e| {
            CastError::session(format!("Failed to subscribe to session closure: {e}"))
        })?;
        let closed_events = events.clone();
        let closed_watch = tokio::spawn(async move {
            if closed.next().await.is_some() {
                let _ = closed_events.send(RecorderEvent::SessionClosed);
            }
        });

        Ok(Self {
            client,
            proxy,
            events,
            watches: vec![closed_watch],
        })
    }
}

#[async_trait]
impl SessionControl for CaptureSession {
    async fn record_area(&mut self, area: CaptureArea, cursor: CursorMode) -> CastResult<()> {
        let mut properties: HashMap<&str, Value<'_>> = HashMap::new();
        properties.insert("is-recording", Value::Bool(true));
        properties.insert("cursor-mode", Value::U32(cursor.to_compositor_value()));

        let stream_path = self
            .proxy
            .record_area(area.x, area.y, area.width, area.height, properties)
            .await
            .map_err(|e| CastError::session(format!("Failed to request capture area: {e}")))?;
        tracing::debug!(%stream_path, "Capture stream created");

        let stream = self
            .client
            .stream_proxy(&stream_path)
            .await
            .map_err(|e| CastError::session(format!("Failed to bind stream proxy: {e}")))?;
        let mut added = stream
            .receive_pipe_wire_stream_added()
            .await
            .map_err(|e| CastError::session(format!("Failed to subscribe to stream node: {e}")))?;

        let stream_events = self.events.clone();
        let stream_watch = tokio::spawn(async move {
            if let Some(signal) = added.next().await {
                match signal.args() {
                    Ok(args) => {
                        let _ = stream_events.send(RecorderEvent::StreamReady(*args.node_id()));
                    }
                    Err(e) => tracing::warn!(error = %e, "Malformed stream-added signal"),
                }
            }
        });
        self.watches.push(stream_watch);

        Ok(())
    }

    async fn start(&mut self) -> CastResult<()> {
        self.proxy
            .start()
            .await
            .map_err(|e| CastError::session(format!("Failed to start capture session: {e}")))
    }

    async fn stop(&mut self) -> CastResult<()> {
        self.proxy
            .stop()
            .await
            .map_err(|e| CastError::session(format!("Failed to stop capture session: {e}")))
    }
}
