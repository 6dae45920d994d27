//! castd Compositor Bindings
//!
//! D-Bus client bindings for the compositor-side capture APIs:
//! - `org.gnome.Mutter.ScreenCast`: session negotiation, per-area stream
//!   recording, and stream lifecycle signals
//! - `org.gnome.Shell.Introspect`: screen geometry for full-screen capture
//!
//! These are control-plane interfaces only; video frames never cross D-Bus.
//! The media data path attaches to the PipeWire node the stream announces.

pub mod introspect;
pub mod screen_cast;

pub use introspect::*;
pub use screen_cast::*;
