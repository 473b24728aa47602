//! Spatial audio engine
//!
//! One gain control per active remote source. Position changes recompute the
//! source's volume through the zone acoustic model and apply it with a short
//! linear ramp so rapid movement never clicks.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::backend::{AudioBackend, GainNode, StreamHandle};
use crate::constants::{DEFAULT_ZONE, GAIN_RAMP_MS};
use crate::error::{AudioError, Error};
use crate::zones::{volume_for_source, Position, VolumeOptions, ZoneRegistry};
use crate::PeerId;

const RAMP: Duration = Duration::from_millis(GAIN_RAMP_MS);

struct SourceEntry {
    gain: Box<dyn GainNode>,
    position: Position,
}

struct EngineState {
    initialized: bool,
    spatial_enabled: bool,
    master_volume: f32,
    master_gain: Option<Box<dyn GainNode>>,
    listener: Position,
    sources: HashMap<PeerId, SourceEntry>,
}

/// Snapshot of one tracked source, for UI polling
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub peer_id: PeerId,
    pub position: Position,
    pub distance: f32,
    pub volume: f32,
}

/// Engine owning every remote source's gain control and the shared listener
/// position. All methods take `&self`; internal state is mutex-guarded.
pub struct SpatialAudioEngine {
    backend: Box<dyn AudioBackend>,
    zones: ZoneRegistry,
    state: Mutex<EngineState>,
}

impl SpatialAudioEngine {
    pub fn new(backend: Box<dyn AudioBackend>, zones: ZoneRegistry) -> Self {
        Self {
            backend,
            zones,
            state: Mutex::new(EngineState {
                initialized: false,
                spatial_enabled: true,
                master_volume: 1.0,
                master_gain: None,
                listener: Position::default(),
                sources: HashMap::new(),
            }),
        }
    }

    /// Acquire the audio output and create the master gain.
    ///
    /// Failure leaves the engine unready; audio access may legitimately
    /// arrive only after a later user gesture, so callers can retry.
    pub fn initialize(&self) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        self.backend.acquire().map_err(|e| {
            tracing::error!("Audio engine initialization failed: {}", e);
            e
        })?;

        let master = self
            .backend
            .create_gain(&StreamHandle::new("master"), state.master_volume)?;
        state.master_gain = Some(master);
        state.initialized = true;
        tracing::info!("Spatial audio engine initialized");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().initialized
    }

    /// Add a remote source with a dedicated gain control.
    ///
    /// Replacing an existing source for the same peer is allowed; the old
    /// gain control is fully torn down first.
    pub fn add_source(
        &self,
        peer_id: &str,
        stream: &StreamHandle,
        initial_position: Position,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        if !state.initialized {
            tracing::error!("Cannot add source {}: engine not initialized", peer_id);
            return Err(AudioError::NotInitialized.into());
        }

        // Build and validate the replacement first so a bad position (for
        // instance an unknown zone id) cannot leave the peer with no source
        let gain = self.backend.create_gain(stream, 1.0)?;
        let entry = SourceEntry {
            gain,
            position: initial_position,
        };
        retarget(&self.zones, &state.listener, state.spatial_enabled, state.master_volume, &entry)?;

        if let Some(old) = state.sources.remove(peer_id) {
            tracing::warn!("Source {} already exists, replacing stream", peer_id);
            old.gain.disconnect();
        }
        state.sources.insert(peer_id.to_string(), entry);
        tracing::info!("Added audio source for {}", peer_id);
        Ok(())
    }

    /// Recompute a source's gain for a new position.
    ///
    /// Untracked peers are a warning no-op; an unready engine or an unknown
    /// zone id is reported to the caller with state unchanged.
    pub fn update_source_position(&self, peer_id: &str, position: Position) -> Result<(), Error> {
        let mut state = self.state.lock();
        if !state.initialized {
            tracing::error!("Cannot update {}: engine not initialized", peer_id);
            return Err(AudioError::NotInitialized.into());
        }

        let spatial_enabled = state.spatial_enabled;
        let master_volume = state.master_volume;
        let listener = state.listener.clone();
        let Some(entry) = state.sources.get_mut(peer_id) else {
            tracing::warn!("Cannot update position, source not tracked: {}", peer_id);
            return Ok(());
        };

        let previous = std::mem::replace(&mut entry.position, position);
        if let Err(e) = retarget(&self.zones, &listener, spatial_enabled, master_volume, entry) {
            entry.position = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Move the shared listener and recompute every tracked source's gain
    pub fn update_listener_position(&self, position: Position) {
        let mut state = self.state.lock();
        state.listener = position;
        self.retarget_all(&mut state);
    }

    /// Toggle geometry-driven attenuation. Disabled forces every gain to
    /// the master volume.
    pub fn set_spatial_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.spatial_enabled = enabled;
        self.retarget_all(&mut state);
        tracing::info!(
            "Spatial audio {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Remove a source and discard its gain control. Idempotent.
    pub fn remove_source(&self, peer_id: &str) {
        let mut state = self.state.lock();
        if let Some(entry) = state.sources.remove(peer_id) {
            entry.gain.disconnect();
            tracing::info!("Removed audio source for {}", peer_id);
        }
    }

    /// Ramp the aggregate output volume. Values outside `[0, 1]` are
    /// rejected without mutating state.
    pub fn set_master_volume(&self, volume: f32) -> Result<(), AudioError> {
        if !(0.0..=1.0).contains(&volume) {
            tracing::error!("Invalid master volume: {}", volume);
            return Err(AudioError::InvalidMasterVolume(volume));
        }

        let mut state = self.state.lock();
        state.master_volume = volume;
        if let Some(master) = &state.master_gain {
            master.ramp_to(volume, RAMP);
        }
        if !state.spatial_enabled {
            self.retarget_all(&mut state);
        }
        Ok(())
    }

    /// 2D distance from the listener to a tracked source; `None` if absent
    pub fn distance_to(&self, peer_id: &str) -> Option<f32> {
        let state = self.state.lock();
        let entry = state.sources.get(peer_id)?;
        Some(state.listener.distance_2d(&entry.position))
    }

    /// Current gain value of a tracked source (mid-ramp values included);
    /// `None` if absent
    pub fn volume_of(&self, peer_id: &str) -> Option<f32> {
        let state = self.state.lock();
        Some(state.sources.get(peer_id)?.gain.current())
    }

    /// Gain value a tracked source is ramping toward; `None` if absent
    pub fn target_volume_of(&self, peer_id: &str) -> Option<f32> {
        let state = self.state.lock();
        Some(state.sources.get(peer_id)?.gain.target())
    }

    pub fn source_count(&self) -> usize {
        self.state.lock().sources.len()
    }

    /// Snapshot of one tracked source; `None` if absent
    pub fn source_info(&self, peer_id: &str) -> Option<SourceInfo> {
        let state = self.state.lock();
        let entry = state.sources.get(peer_id)?;
        Some(SourceInfo {
            peer_id: peer_id.to_string(),
            position: entry.position.clone(),
            distance: state.listener.distance_2d(&entry.position),
            volume: entry.gain.current(),
        })
    }

    /// Snapshot of every tracked source
    pub fn all_sources_info(&self) -> Vec<SourceInfo> {
        let state = self.state.lock();
        state
            .sources
            .iter()
            .map(|(peer_id, entry)| SourceInfo {
                peer_id: peer_id.clone(),
                position: entry.position.clone(),
                distance: state.listener.distance_2d(&entry.position),
                volume: entry.gain.current(),
            })
            .collect()
    }

    /// Disconnect everything and return to the unready state
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        for (_, entry) in state.sources.drain() {
            entry.gain.disconnect();
        }
        if let Some(master) = state.master_gain.take() {
            master.disconnect();
        }
        state.initialized = false;
        tracing::info!("Spatial audio engine shut down");
    }

    fn retarget_all(&self, state: &mut EngineState) {
        let listener = state.listener.clone();
        let spatial_enabled = state.spatial_enabled;
        let master_volume = state.master_volume;
        for (peer_id, entry) in state.sources.iter() {
            if let Err(e) = retarget(&self.zones, &listener, spatial_enabled, master_volume, entry)
            {
                // One bad zone must not stall the other sources
                tracing::warn!("Failed to retarget {}: {}", peer_id, e);
            }
        }
    }
}

fn retarget(
    zones: &ZoneRegistry,
    listener: &Position,
    spatial_enabled: bool,
    master_volume: f32,
    entry: &SourceEntry,
) -> Result<(), Error> {
    if !spatial_enabled {
        entry.gain.ramp_to(master_volume, RAMP);
        return Ok(());
    }

    let zone_id = entry.position.zone_id.as_deref().unwrap_or(DEFAULT_ZONE);
    let zone = zones.get(zone_id)?;
    let volume = volume_for_source(
        zone,
        listener,
        &entry.position,
        VolumeOptions {
            use_3d: true,
            manual_volume: 1.0,
        },
    )?;
    entry.gain.ramp_to(volume, RAMP);
    Ok(())
}
