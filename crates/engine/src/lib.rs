//! castd Recording Engine
//!
//! Drives one screencast recording from capture grant to finalized file.
//! The engine owns two independently-failing external resources and keeps
//! them coherent through a single event-driven control loop:
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                   Recorder                      │
//! │  ┌───────────────┐        ┌──────────────────┐ │
//! │  │ CaptureSession│        │  MediaPipeline   │ │
//! │  │ (compositor   │        │  (GStreamer,     │ │
//! │  │  D-Bus proxy) │        │   PipeWire src)  │ │
//! │  └───────┬───────┘        └────────┬─────────┘ │
//! │          │ Closed /                │ Eos /      │
//! │          │ PipeWireStreamAdded     │ Error      │
//! │          ▼                         ▼            │
//! │  ┌─────────────────────────────────────────┐   │
//! │  │        one event channel, one loop      │   │
//! │  └─────────────────────────────────────────┘   │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Whichever side fails first, the other is unwound deterministically and
//! the pending start or stop request settles exactly once.

pub mod path_template;
pub mod pipeline;
pub mod recent;
pub mod recorder;
pub mod session;
pub mod state;

pub use recorder::*;
pub use session::*;
