//! ScreenCast D-Bus client for the compositor's capture API.
//!
//! This module speaks to `org.gnome.Mutter.ScreenCast`, the compositor-side
//! interface that grants capture sessions and exposes their streams. A session
//! is created once, records one area as a stream, and announces the PipeWire
//! node backing that stream via the `PipeWireStreamAdded` signal.

use std::collections::HashMap;

use tracing::debug;
use zbus::zvariant::{OwnedObjectPath, Value};
use zbus::{Connection, Result};

/// Cursor handling for a recorded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Cursor is not part of the captured frames.
    Hidden,
    /// Cursor is painted into the captured frames.
    Embedded,
}

impl CursorMode {
    /// Convert to the compositor's integer representation.
    pub fn to_compositor_value(self) -> u32 {
        match self {
            CursorMode::Hidden => 0,
            CursorMode::Embedded => 1,
        }
    }
}

/// D-Bus proxy for the `org.gnome.Mutter.ScreenCast` service.
#[zbus::proxy(
    interface = "org.gnome.Mutter.ScreenCast",
    default_service = "org.gnome.Mutter.ScreenCast",
    default_path = "/org/gnome/Mutter/ScreenCast"
)]
pub trait ScreenCast {
    /// Creates a new screencast session with the given properties.
    async fn create_session(&self, properties: HashMap<&str, Value<'_>>)
        -> Result<OwnedObjectPath>;
}

/// D-Bus proxy for `org.gnome.Mutter.ScreenCast.Session`.
#[zbus::proxy(
    interface = "org.gnome.Mutter.ScreenCast.Session",
    default_service = "org.gnome.Mutter.ScreenCast"
)]
pub trait ScreenCastSession {
    /// Records a rectangular area of the screen, returning a stream path.
    async fn record_area(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        properties: HashMap<&str, Value<'_>>,
    ) -> Result<OwnedObjectPath>;

    /// Starts all streams in the session.
    async fn start(&self) -> Result<()>;

    /// Stops the session and all its streams.
    async fn stop(&self) -> Result<()>;

    /// Emitted when the compositor tears down the session, for any reason.
    #[zbus(signal)]
    fn closed(&self) -> Result<()>;
}

/// D-Bus proxy for `org.gnome.Mutter.ScreenCast.Stream`.
#[zbus::proxy(
    interface = "org.gnome.Mutter.ScreenCast.Stream",
    default_service = "org.gnome.Mutter.ScreenCast"
)]
pub trait ScreenCastStream {
    /// Emitted once the PipeWire node backing this stream exists.
    #[zbus(signal)]
    fn pipe_wire_stream_added(&self, node_id: u32) -> Result<()>;
}

/// Client wrapper for the compositor's screencast API.
#[derive(Clone)]
pub struct CompositorClient {
    connection: Connection,
}

impl CompositorClient {
    /// Creates a new client using the given D-Bus connection.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// The underlying D-Bus connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Creates a new screencast session and returns its object path.
    pub async fn create_session(&self) -> Result<OwnedObjectPath> {
        let proxy = ScreenCastProxy::builder(&self.connection).build().await?;

        let session_path = proxy.create_session(HashMap::new()).await?;
        debug!(%session_path, "Compositor screencast session created");

        Ok(session_path)
    }

    /// Builds a proxy for a session object returned by `create_session`.
    pub async fn session_proxy(
        &self,
        session_path: &OwnedObjectPath,
    ) -> Result<ScreenCastSessionProxy<'static>> {
        ScreenCastSessionProxy::builder(&self.connection)
            .path(session_path.clone())?
            .build()
            .await
    }

    /// Builds a proxy for a stream object returned by `record_area`.
    pub async fn stream_proxy(
        &self,
        stream_path: &OwnedObjectPath,
    ) -> Result<ScreenCastStreamProxy<'static>> {
        ScreenCastStreamProxy::builder(&self.connection)
            .path(stream_path.clone())?
            .build()
            .await
    }
}
