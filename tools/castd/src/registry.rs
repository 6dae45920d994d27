//! Client → recorder bookkeeping.
//!
//! The registry enforces at most one recording per client, keeps the process
//! alive while any recording runs, and is the only component that ever
//! mutates the client map. Recorders signal termination outward; the
//! registry decides removal.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use castd_common::config::AppConfig;
use castd_common::error::{CastError, CastResult};
use castd_compositor::{introspect, CompositorClient};
use castd_engine::path_template;
use castd_engine::pipeline::GstPipelineLauncher;
use castd_engine::recent::RecentlyUsed;
use castd_engine::{
    CaptureArea, CaptureSession, LivenessWatch, Recorder, RecorderConfig, RecorderEvent,
    RecorderHandle, Terminated,
};

use crate::hold::{HoldGuard, ServiceHold};

/// Recognized per-request recording options.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordingOptions {
    pub framerate: Option<u32>,
    pub draw_cursor: Option<bool>,
}

/// One client's entry: reserved while its start request is in flight,
/// active once the recorder is running.
struct Slot<H> {
    generation: u64,
    handle: Option<H>,
    _hold: HoldGuard,
}

/// The client map plus the generation counter guarding reap races.
struct RecorderMap<H> {
    slots: HashMap<String, Slot<H>>,
    next_generation: u64,
}

impl<H: Clone> RecorderMap<H> {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Reserves a slot for `client`. Returns the slot generation, or `None`
    /// when the client already records.
    fn reserve(&mut self, client: &str, hold: HoldGuard) -> Option<u64> {
        match self.slots.entry(client.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                let generation = self.next_generation;
                self.next_generation += 1;
                entry.insert(Slot {
                    generation,
                    handle: None,
                    _hold: hold,
                });
                Some(generation)
            }
        }
    }

    /// Upgrades a reservation to an active recorder. Fails when the slot was
    /// already reaped or replaced.
    fn activate(&mut self, client: &str, generation: u64, handle: H) -> bool {
        match self.slots.get_mut(client) {
            Some(slot) if slot.generation == generation => {
                slot.handle = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// The active recorder handle for `client`, if its start has completed.
    fn active(&self, client: &str) -> Option<(H, u64)> {
        let slot = self.slots.get(client)?;
        let handle = slot.handle.as_ref()?;
        Some((handle.clone(), slot.generation))
    }

    /// Removes the slot only when the generation still matches; both the
    /// reaper and the request paths may race to remove the same entry.
    fn remove_generation(&mut self, client: &str, generation: u64) -> bool {
        match self.slots.get(client) {
            Some(slot) if slot.generation == generation => {
                self.slots.remove(client);
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Process-wide recording registry.
pub struct Registry {
    connection: zbus::Connection,
    compositor: CompositorClient,
    recorders: Mutex<RecorderMap<RecorderHandle>>,
    hold: ServiceHold,
    terminations: mpsc::UnboundedSender<Terminated>,
}

impl Registry {
    pub fn new(connection: zbus::Connection, hold: ServiceHold) -> Arc<Self> {
        let (terminations_tx, terminations_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            compositor: CompositorClient::new(connection.clone()),
            connection,
            recorders: Mutex::new(RecorderMap::new()),
            hold,
            terminations: terminations_tx,
        });
        registry.spawn_reaper(terminations_rx);
        registry
    }

    /// Consumes recorder termination notices and drops finished entries.
    fn spawn_reaper(self: &Arc<Self>, mut notices: mpsc::UnboundedReceiver<Terminated>) {
        let registry = self.clone();
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                let mut map = registry.recorders.lock().await;
                if map.remove_generation(&notice.client, notice.generation) {
                    debug!(
                        client = %notice.client,
                        remaining = map.len(),
                        "Removed finished recorder"
                    );
                }
            }
        });
    }

    /// Starts a full-screen recording; geometry comes from the shell's
    /// introspection service.
    pub async fn start_fullscreen_recording(
        &self,
        client: &str,
        file_template: &str,
        options: &RecordingOptions,
    ) -> (bool, String) {
        let (width, height) = match introspect::screen_size(&self.connection).await {
            Ok(size) => size,
            Err(e) => {
                warn!(client, error = %e, "Failed to query screen size");
                return (false, String::new());
            }
        };
        let area = CaptureArea {
            x: 0,
            y: 0,
            width,
            height,
        };
        self.start_area_recording(client, area, file_template, options)
            .await
    }

    /// Starts an area recording. On success returns the resolved output
    /// path; on any failure no registry entry remains.
    pub async fn start_area_recording(
        &self,
        client: &str,
        area: CaptureArea,
        file_template: &str,
        options: &RecordingOptions,
    ) -> (bool, String) {
        let config = AppConfig::load();
        if let Some(reason) = refusal(&config, area) {
            info!(client, reason, "Refusing recording");
            return (false, String::new());
        }

        // Reserve the client slot before anything asynchronous happens; a
        // second start for the same client must fail without disturbing the
        // recording that owns the slot.
        let generation = {
            let mut map = self.recorders.lock().await;
            match map.reserve(client, self.hold.acquire()) {
                Some(generation) => generation,
                None => {
                    info!(client, "Refusing recording: client already records");
                    return (false, String::new());
                }
            }
        };

        match self
            .begin_recording(client, generation, area, file_template, options, &config)
            .await
        {
            Ok(path) => (true, path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!(client, error = %e, "Failed to start recording");
                let mut map = self.recorders.lock().await;
                map.remove_generation(client, generation);
                (false, String::new())
            }
        }
    }

    async fn begin_recording(
        &self,
        client: &str,
        generation: u64,
        area: CaptureArea,
        file_template: &str,
        options: &RecordingOptions,
        config: &AppConfig,
    ) -> CastResult<PathBuf> {
        let output_path = path_template::generate(file_template);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CastError::platform(format!(
                    "Failed to create output directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let framerate = options.framerate.unwrap_or(config.recording.framerate);
        let draw_cursor = options.draw_cursor.unwrap_or(config.recording.draw_cursor);
        info!(
            client,
            path = %output_path.display(),
            framerate,
            draw_cursor,
            "Starting recording"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = CaptureSession::create(self.compositor.clone(), events_tx.clone()).await?;
        let launcher =
            GstPipelineLauncher::new(framerate, output_path.clone(), events_tx.clone());
        let liveness = watch_client(&self.connection, client, events_tx).await?;

        let handle = Recorder::spawn(
            RecorderConfig {
                client: client.to_string(),
                generation,
                area,
                output_path: output_path.clone(),
                draw_cursor,
                session: Box::new(session),
                launcher: Box::new(launcher),
                recent: Box::new(RecentlyUsed::new()),
                liveness: Some(liveness),
            },
            events_rx,
            self.terminations.clone(),
        );
        handle.start_recording().await?;

        let mut map = self.recorders.lock().await;
        if !map.activate(client, generation, handle) {
            // The recorder terminated right after starting and the reaper
            // already dropped the slot.
            warn!(client, "Recorder finished before registration completed");
        }
        Ok(output_path)
    }

    /// Stops the client's recording. Returns false when the client owns no
    /// running recorder; otherwise awaits the stop, removes the entry
    /// regardless of the outcome, and returns true.
    pub async fn stop_recording(&self, client: &str) -> bool {
        let Some((handle, generation)) = ({
            let map = self.recorders.lock().await;
            map.active(client)
        }) else {
            return false;
        };

        if let Err(e) = handle.stop_recording().await {
            warn!(client, error = %e, "Recording did not stop cleanly");
        }

        let mut map = self.recorders.lock().await;
        map.remove_generation(client, generation);
        true
    }
}

/// Synchronous policy checks performed before anything is created. A refusal
/// never leaves partial state behind.
fn refusal(config: &AppConfig, area: CaptureArea) -> Option<&'static str> {
    if config.lockdown.disable_save_to_disk {
        return Some("saving to disk is disabled");
    }
    if area.width <= 0 || area.height <= 0 {
        return Some("empty capture area");
    }
    None
}

/// Watches the owning client on the bus; if it disconnects, the recorder is
/// told to tear down. Dropping the returned watch aborts the listener.
async fn watch_client(
    connection: &zbus::Connection,
    client: &str,
    events: mpsc::UnboundedSender<RecorderEvent>,
) -> CastResult<LivenessWatch> {
    let proxy = zbus::fdo::DBusProxy::new(connection)
        .await
        .map_err(|e| CastError::platform(format!("Failed to bind bus proxy: {e}")))?;
    let mut owner_changes = proxy
        .receive_name_owner_changed_with_args(&[(0, client)])
        .await
        .map_err(|e| CastError::platform(format!("Failed to watch client liveness: {e}")))?;

    let client = client.to_string();
    let task = tokio::spawn(async move {
        while let Some(signal) = owner_changes.next().await {
            let Ok(args) = signal.args() else { continue };
            if args.new_owner().is_none() {
                debug!(client = %client, "Client left the bus");
                let _ = events.send(RecorderEvent::ClientVanished);
                break;
            }
        }
    });
    Ok(LivenessWatch::new(task))
}
