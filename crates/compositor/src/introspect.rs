//! Shell introspection client, used for full-screen capture geometry.

use tracing::debug;
use zbus::{Connection, Result};

/// D-Bus proxy for the `org.gnome.Shell.Introspect` service.
#[zbus::proxy(
    interface = "org.gnome.Shell.Introspect",
    default_service = "org.gnome.Shell.Introspect",
    default_path = "/org/gnome/Shell/Introspect"
)]
pub trait Introspect {
    /// Current screen size in logical pixels.
    #[zbus(property)]
    fn screen_size(&self) -> Result<(i32, i32)>;
}

/// Queries the current screen size from the shell.
pub async fn screen_size(connection: &Connection) -> Result<(i32, i32)> {
    let proxy = IntrospectProxy::builder(connection).build().await?;
    let (width, height) = proxy.screen_size().await?;
    debug!(width, height, "Queried screen size");
    Ok((width, height))
}
