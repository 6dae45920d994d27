//! GStreamer pipeline construction and driving for screencast recording.
//!
//! The pipeline description is pure string assembly; anything malformed is
//! rejected by `gst::parse::launch` at launch time, not here. The launched
//! pipeline is observed only through its message bus (end-of-stream, error)
//! and controlled only through explicit state-change requests.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use futures::StreamExt;
use gst::prelude::*;
use gstreamer as gst;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use castd_common::error::{CastError, CastResult};

use crate::recorder::RecorderEvent;

/// Placeholder replaced by the detected encoder thread count.
const THREAD_PLACEHOLDER: &str = "%T";

/// Encoder threads are capped regardless of how many processors exist.
const MAX_THREADS: usize = 64;

/// Default encode chain: colorspace conversion with chroma resampling and
/// dithering disabled, a VP8 encoder tuned for realtime deadline over
/// compression ratio, and WebM muxing. `queue` elements decouple the stages
/// so an encoder stall does not back-pressure the capture source.
const DEFAULT_ENCODE_CHAIN: &str = "videoconvert chroma-mode=GST_VIDEO_CHROMA_MODE_NONE \
     dither=GST_VIDEO_DITHER_NONE matrix-mode=GST_VIDEO_MATRIX_MODE_OUTPUT_ONLY n-threads=%T ! \
     queue ! vp8enc cpu-used=16 max-quantizer=17 deadline=1 keyframe-mode=disabled threads=%T \
     static-threshold=1000 buffer-size=20000 ! queue ! webmmux";

/// Assembles the full launch description for one recording.
///
/// Capture geometry and cursor handling ride the compositor record request,
/// not the pipeline description.
pub fn build_launch(node_id: u32, framerate: u32, output_path: &Path) -> String {
    let encode_chain = substitute_threads(DEFAULT_ENCODE_CHAIN, detected_threads());
    let path = escape_path(output_path);
    // `resend-last=true` replays the most recent frame to late-joining
    // consumers, so the encoder sees a frame immediately instead of waiting
    // for the next damage event.
    format!(
        "pipewiresrc path={node_id} do-timestamp=true keepalive-time=1000 resend-last=true ! \
         video/x-raw,max-framerate={framerate}/1 ! {encode_chain} ! filesink location=\"{path}\""
    )
}

fn substitute_threads(chain: &str, threads: usize) -> String {
    chain.replace(THREAD_PLACEHOLDER, &threads.to_string())
}

fn detected_threads() -> usize {
    let detected = std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1);
    clamp_threads(detected)
}

fn clamp_threads(detected: usize) -> usize {
    detected.clamp(1, MAX_THREADS)
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

/// Control surface of a launched recording pipeline.
pub trait MediaPipeline: Send {
    /// Asks the pipeline to flush and finalize its output container. The
    /// pipeline reports completion as an end-of-stream bus message.
    fn begin_flush(&mut self) -> CastResult<()>;

    /// Tears the pipeline down. The underlying reference is released even
    /// when the state change fails; no caller may keep a half-torn-down
    /// pipeline.
    fn shutdown(&mut self) -> CastResult<()>;
}

/// Builds and starts a pipeline once the backing stream node is known.
pub trait PipelineLauncher: Send {
    fn launch(&mut self, node_id: u32) -> CastResult<Box<dyn MediaPipeline>>;
}

/// Production launcher: parses the launch description, sets the pipeline
/// playing, and forwards bus messages as recorder events.
pub struct GstPipelineLauncher {
    framerate: u32,
    output_path: PathBuf,
    events: mpsc::UnboundedSender<RecorderEvent>,
}

impl GstPipelineLauncher {
    pub fn new(
        framerate: u32,
        output_path: PathBuf,
        events: mpsc::UnboundedSender<RecorderEvent>,
    ) -> Self {
        Self {
            framerate,
            output_path,
            events,
        }
    }
}

impl PipelineLauncher for GstPipelineLauncher {
    fn launch(&mut self, node_id: u32) -> CastResult<Box<dyn MediaPipeline>> {
        init_gstreamer()?;

        let launch = build_launch(node_id, self.framerate, &self.output_path);
        tracing::debug!(%launch, "Launching recording pipeline");

        let element = gst::parse::launch(&launch)
            .map_err(|e| CastError::pipeline(format!("Failed to build pipeline: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| CastError::pipeline("Launch string did not produce a pipeline"))?;
        let bus = pipeline
            .bus()
            .ok_or_else(|| CastError::pipeline("Pipeline has no message bus"))?;

        let bus_watch = spawn_bus_watch(bus, self.events.clone());
        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            bus_watch.abort();
            let _ = pipeline.set_state(gst::State::Null);
            return Err(CastError::pipeline(format!(
                "Failed to start pipeline: {e:?}"
            )));
        }

        Ok(Box::new(GstRecordingPipeline { pipeline, bus_watch }))
    }
}

/// Forwards terminal bus messages into the recorder's event channel.
fn spawn_bus_watch(bus: gst::Bus, events: mpsc::UnboundedSender<RecorderEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut messages = bus.stream();
        while let Some(message) = messages.next().await {
            match message.view() {
                gst::MessageView::Eos(..) => {
                    let _ = events.send(RecorderEvent::PipelineEos);
                    break;
                }
                gst::MessageView::Error(err) => {
                    let _ = events.send(RecorderEvent::PipelineError(err.error().to_string()));
                    break;
                }
                _ => {}
            }
        }
    })
}

struct GstRecordingPipeline {
    pipeline: gst::Pipeline,
    bus_watch: JoinHandle<()>,
}

impl MediaPipeline for GstRecordingPipeline {
    fn begin_flush(&mut self) -> CastResult<()> {
        if self.pipeline.send_event(gst::event::Eos::new()) {
            Ok(())
        } else {
            Err(CastError::pipeline("Pipeline refused end-of-stream event"))
        }
    }

    fn shutdown(&mut self) -> CastResult<()> {
        self.bus_watch.abort();
        self.pipeline
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| CastError::pipeline(format!("Failed to reach null state: {e:?}")))
    }
}

fn init_gstreamer() -> CastResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(CastError::pipeline(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_count_is_clamped_to_the_supported_range() {
        assert_eq!(clamp_threads(0), 1);
        assert_eq!(clamp_threads(1), 1);
        assert_eq!(clamp_threads(8), 8);
        assert_eq!(clamp_threads(64), 64);
        assert_eq!(clamp_threads(512), 64);
    }

    #[test]
    fn thread_placeholder_is_substituted_everywhere() {
        let chain = substitute_threads(DEFAULT_ENCODE_CHAIN, 4);
        assert!(!chain.contains(THREAD_PLACEHOLDER));
        assert!(chain.contains("n-threads=4"));
        assert!(chain.contains("threads=4"));
    }

    #[test]
    fn launch_description_wires_source_cap_and_sink() {
        let launch = build_launch(71, 30, Path::new("/home/user/Videos/cast.webm"));
        assert!(launch.starts_with("pipewiresrc path=71 "));
        assert!(launch.contains("resend-last=true"));
        assert!(launch.contains("video/x-raw,max-framerate=30/1"));
        assert!(launch.contains("vp8enc"));
        assert!(launch.contains("webmmux"));
        assert!(launch.ends_with("filesink location=\"/home/user/Videos/cast.webm\""));
        assert!(!launch.contains(THREAD_PLACEHOLDER));
    }

    #[test]
    fn quotes_in_the_output_path_are_escaped() {
        assert_eq!(
            escape_path(Path::new("/tmp/we\"ird.webm")),
            "/tmp/we\\\"ird.webm"
        );
    }
}
