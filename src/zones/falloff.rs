//! Pure distance-to-volume computation
//!
//! Attenuation follows a wave-based inverse square law: half volume exactly
//! at the zone's falloff distance, asymptotic to zero beyond it. Sealed
//! zones use a hard cutoff, stages a broadcast curve with a proximity bonus.

use std::time::Duration;

use crate::constants::WALKING_SPEED;
use crate::error::ZoneError;
use crate::zones::{Falloff, Position, ZoneConfig};

/// Wave-based inverse square attenuation:
/// `v = 1 / (1 + (distance / falloff_distance)^2)`
///
/// Contract: `falloff_distance > 0` and `distance >= 0`; violations are
/// rejected, never clamped.
pub fn wave_falloff(distance: f32, falloff_distance: f32) -> Result<f32, ZoneError> {
    if falloff_distance <= 0.0 {
        return Err(ZoneError::InvalidFalloffDistance(falloff_distance));
    }
    if distance < 0.0 {
        return Err(ZoneError::NegativeDistance(distance));
    }

    let ratio = distance / falloff_distance;
    Ok(1.0 / (1.0 + ratio * ratio))
}

impl ZoneConfig {
    /// Volume for a source at `distance`, clamped to this zone's
    /// `[min_volume, max_volume]`
    pub fn volume_at(&self, distance: f32) -> Result<f32, ZoneError> {
        if distance < 0.0 {
            return Err(ZoneError::NegativeDistance(distance));
        }

        let raw = match &self.falloff {
            Falloff::WaveInverseSquare { falloff_distance } => {
                wave_falloff(distance, *falloff_distance)?
            }
            Falloff::HardCutoff => {
                if distance == 0.0 {
                    self.max_volume
                } else {
                    self.min_volume
                }
            }
            Falloff::BroadcastEnhanced {
                base,
                proximity_bonus,
                proximity_radius,
            } => {
                if distance <= *proximity_radius {
                    base + proximity_bonus * (1.0 - distance / proximity_radius)
                } else {
                    *base
                }
            }
        };

        Ok(raw.clamp(self.min_volume, self.max_volume))
    }
}

/// Options for [`volume_for_source`]
#[derive(Debug, Clone, Copy)]
pub struct VolumeOptions {
    /// Include elevation in the distance computation
    pub use_3d: bool,
    /// Manual per-source multiplier applied after zone clamping
    pub manual_volume: f32,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            use_3d: false,
            manual_volume: 1.0,
        }
    }
}

/// Volume for a source heard by a listener, under one zone's acoustics.
///
/// Clamp order: falloff family -> zone `[min, max]` -> manual multiplier ->
/// final `[0, 1]`.
pub fn volume_for_source(
    zone: &ZoneConfig,
    listener: &Position,
    source: &Position,
    options: VolumeOptions,
) -> Result<f32, ZoneError> {
    let distance = if options.use_3d {
        listener.distance_3d(source)
    } else {
        listener.distance_2d(source)
    };

    let spatial = zone.volume_at(distance)?;
    Ok((spatial * options.manual_volume).clamp(0.0, 1.0))
}

/// Crossfade duration matching the time it takes to walk `distance`
pub fn crossfade_duration(distance: f32) -> Duration {
    Duration::from_secs_f32(distance.max(0.0) / WALKING_SPEED)
}

/// One point on a zone's falloff curve
#[derive(Debug, Clone, PartialEq)]
pub struct CurveSample {
    pub distance: f32,
    pub volume: f32,
    pub percentage: u32,
}

/// Sample a zone's clamped falloff curve at the given distances (UI meters)
pub fn sample_falloff_curve(
    zone: &ZoneConfig,
    distances: &[f32],
) -> Result<Vec<CurveSample>, ZoneError> {
    distances
        .iter()
        .map(|&distance| {
            let volume = zone.volume_at(distance)?;
            Ok(CurveSample {
                distance,
                volume,
                percentage: (volume * 100.0).round() as u32,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::ZoneRegistry;
    use proptest::prelude::*;

    fn zone(id: &str) -> ZoneConfig {
        ZoneRegistry::builtin().get(id).unwrap().clone()
    }

    #[test]
    fn test_wave_falloff_is_one_at_zero_distance() {
        assert_eq!(wave_falloff(0.0, 8.0).unwrap(), 1.0);
    }

    #[test]
    fn test_wave_falloff_is_half_at_falloff_distance() {
        assert_eq!(wave_falloff(8.0, 8.0).unwrap(), 0.5);
        assert_eq!(wave_falloff(6.0, 6.0).unwrap(), 0.5);
    }

    #[test]
    fn test_wave_falloff_rejects_bad_parameters() {
        assert!(matches!(
            wave_falloff(1.0, 0.0),
            Err(ZoneError::InvalidFalloffDistance(_))
        ));
        assert!(matches!(
            wave_falloff(1.0, -2.0),
            Err(ZoneError::InvalidFalloffDistance(_))
        ));
        assert!(matches!(
            wave_falloff(-1.0, 8.0),
            Err(ZoneError::NegativeDistance(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_wave_falloff_in_unit_interval(
            distance in 0.0f32..1_000.0,
            falloff in 0.1f32..100.0,
        ) {
            let v = wave_falloff(distance, falloff).unwrap();
            prop_assert!(v > 0.0 && v <= 1.0);
        }

        #[test]
        fn prop_wave_falloff_strictly_decreasing(
            distance in 0.0f32..500.0,
            step in 0.5f32..50.0,
            falloff in 0.1f32..100.0,
        ) {
            let near = wave_falloff(distance, falloff).unwrap();
            let far = wave_falloff(distance + step, falloff).unwrap();
            prop_assert!(far < near);
        }
    }

    #[test]
    fn test_hard_cutoff_is_binary() {
        let booth = zone("booth");
        assert_eq!(booth.volume_at(0.0).unwrap(), 1.0);
        assert_eq!(booth.volume_at(0.1).unwrap(), 0.0);
        assert_eq!(booth.volume_at(50.0).unwrap(), 0.0);
    }

    #[test]
    fn test_broadcast_full_bonus_on_stage() {
        let stage = zone("stage");
        // base 0.4 + bonus 0.4, clamped by max 0.8
        assert_eq!(stage.volume_at(0.0).unwrap(), 0.8);
    }

    #[test]
    fn test_broadcast_base_beyond_proximity_radius() {
        let stage = zone("stage");
        assert_eq!(stage.volume_at(10.0).unwrap(), 0.4);
        assert_eq!(stage.volume_at(35.0).unwrap(), 0.4);
    }

    #[test]
    fn test_zone_clamps_to_min_volume() {
        let bar = zone("central_bar");
        // Far enough that the raw curve dips under min_volume 0.1
        let v = bar.volume_at(100.0).unwrap();
        assert_eq!(v, 0.1);
    }

    #[test]
    fn test_volume_for_source_2d_vs_3d() {
        let gaming = zone("gaming");
        let listener = Position::new(0.0, 0.0);
        let source = Position::new(0.0, 0.0).with_z(8.0).in_zone("gaming");

        let flat = volume_for_source(&gaming, &listener, &source, VolumeOptions::default()).unwrap();
        assert_eq!(flat, 1.0);

        let spatial = volume_for_source(
            &gaming,
            &listener,
            &source,
            VolumeOptions {
                use_3d: true,
                manual_volume: 1.0,
            },
        )
        .unwrap();
        assert_eq!(spatial, 0.5);
    }

    #[test]
    fn test_manual_volume_scales_after_clamping() {
        let gaming = zone("gaming");
        let listener = Position::new(0.0, 0.0);
        let source = Position::new(0.0, 0.0);
        let v = volume_for_source(
            &gaming,
            &listener,
            &source,
            VolumeOptions {
                use_3d: false,
                manual_volume: 0.25,
            },
        )
        .unwrap();
        assert_eq!(v, 0.25);
    }

    #[test]
    fn test_crossfade_matches_walking_speed() {
        assert_eq!(crossfade_duration(3.0), Duration::from_secs(1));
        assert_eq!(crossfade_duration(0.0), Duration::from_secs(0));
    }

    #[test]
    fn test_sample_falloff_curve_clamps() {
        let bar = zone("central_bar");
        let samples = sample_falloff_curve(&bar, &[0.0, 6.0, 100.0]).unwrap();
        assert_eq!(samples[0].volume, 1.0);
        assert_eq!(samples[0].percentage, 100);
        assert_eq!(samples[1].volume, 0.5);
        assert_eq!(samples[2].volume, 0.1);
    }
}
