//! The `org.gnome.Shell.Screencast` D-Bus interface.
//!
//! Thin dispatch layer: requests are keyed by their sender, options are
//! parsed leniently (unknown keys ignored, malformed values fall back to the
//! configured defaults), and every policy decision lives in the registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};
use zbus::message::Header;
use zbus::zvariant::OwnedValue;
use zbus::{fdo, interface};

use castd_engine::CaptureArea;

use crate::registry::{RecordingOptions, Registry};

pub struct ScreencastService {
    registry: Arc<Registry>,
}

impl ScreencastService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[interface(name = "org.gnome.Shell.Screencast")]
impl ScreencastService {
    /// Records the full screen into a file derived from `file_template`.
    async fn screencast(
        &self,
        file_template: String,
        options: HashMap<String, OwnedValue>,
        #[zbus(header)] header: Header<'_>,
    ) -> fdo::Result<(bool, String)> {
        let client = sender(&header)?;
        info!(client = %client, template = %file_template, "Full-screen recording requested");
        Ok(self
            .registry
            .start_fullscreen_recording(&client, &file_template, &parse_options(&options))
            .await)
    }

    /// Records a rectangular area of the screen.
    async fn screencast_area(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        file_template: String,
        options: HashMap<String, OwnedValue>,
        #[zbus(header)] header: Header<'_>,
    ) -> fdo::Result<(bool, String)> {
        let client = sender(&header)?;
        info!(client = %client, x, y, width, height, "Area recording requested");
        let area = CaptureArea {
            x,
            y,
            width,
            height,
        };
        Ok(self
            .registry
            .start_area_recording(&client, area, &file_template, &parse_options(&options))
            .await)
    }

    /// Stops the calling client's recording.
    async fn stop_screencast(&self, #[zbus(header)] header: Header<'_>) -> fdo::Result<bool> {
        let client = sender(&header)?;
        info!(client = %client, "Stop requested");
        Ok(self.registry.stop_recording(&client).await)
    }

    #[zbus(property)]
    fn version(&self) -> u32 {
        1
    }
}

fn sender(header: &Header<'_>) -> fdo::Result<String> {
    header
        .sender()
        .map(|name| name.to_string())
        .ok_or_else(|| fdo::Error::Failed("Request has no sender".to_string()))
}

/// Parses the recognized option keys, ignoring everything else.
fn parse_options(options: &HashMap<String, OwnedValue>) -> RecordingOptions {
    let mut parsed = RecordingOptions::default();
    for (key, value) in options {
        match key.as_str() {
            "framerate" => match i32::try_from(value) {
                Ok(framerate) if framerate > 0 => parsed.framerate = Some(framerate as u32),
                _ => warn!(?value, "Ignoring invalid framerate option"),
            },
            "draw-cursor" => match bool::try_from(value) {
                Ok(draw_cursor) => parsed.draw_cursor = Some(draw_cursor),
                Err(_) => warn!(?value, "Ignoring invalid draw-cursor option"),
            },
            other => tracing::debug!(key = other, "Ignoring unknown option"),
        }
    }
    parsed
}
