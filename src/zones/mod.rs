//! Named acoustic zones and the spatial geometry types
//!
//! A zone describes how sound propagates inside a region of the space: a
//! falloff family, its parameters, and min/max volume clamps. The built-in
//! catalog mirrors the floor plan the system ships with; unknown zone ids are
//! an error, never a silent default.

mod falloff;

pub use falloff::{
    crossfade_duration, sample_falloff_curve, volume_for_source, wave_falloff, CurveSample,
    VolumeOptions,
};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ZoneError;

/// A point in the shared space. `z` is optional so 2D clients can omit
/// elevation; `zone_id` names the acoustic zone the point lies in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            z: None,
            zone_id: None,
        }
    }

    pub fn with_z(mut self, z: f32) -> Self {
        self.z = Some(z);
        self
    }

    pub fn in_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.zone_id = Some(zone_id.into());
        self
    }

    /// Euclidean distance ignoring elevation
    pub fn distance_2d(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Euclidean distance including elevation; a missing `z` counts as 0
    pub fn distance_3d(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z.unwrap_or(0.0) - self.z.unwrap_or(0.0);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Falloff family and its family-specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Falloff {
    /// `v = 1 / (1 + (d / falloff_distance)^2)`
    WaveInverseSquare { falloff_distance: f32 },

    /// Acoustically sealed: `max_volume` at distance 0, `min_volume` beyond
    HardCutoff,

    /// Stage/PA: `base` everywhere, plus a linear proximity bonus inside
    /// `proximity_radius`
    BroadcastEnhanced {
        base: f32,
        proximity_bonus: f32,
        proximity_radius: f32,
    },
}

/// Immutable acoustic configuration for one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub id: String,
    pub name: String,
    pub falloff: Falloff,
    pub min_volume: f32,
    pub max_volume: f32,
}

/// Lookup table of zone configurations
#[derive(Debug, Clone)]
pub struct ZoneRegistry {
    zones: HashMap<String, ZoneConfig>,
}

impl ZoneRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            zones: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in floor plan zones
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for zone in builtin_zones() {
            registry.insert(zone);
        }
        registry
    }

    pub fn insert(&mut self, zone: ZoneConfig) {
        self.zones.insert(zone.id.clone(), zone);
    }

    /// Look up a zone; unknown ids are an error, not a default
    pub fn get(&self, zone_id: &str) -> Result<&ZoneConfig, ZoneError> {
        self.zones
            .get(zone_id)
            .ok_or_else(|| ZoneError::UnknownZone(zone_id.to_string()))
    }

    pub fn contains(&self, zone_id: &str) -> bool {
        self.zones.contains_key(zone_id)
    }

    pub fn zone_ids(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_zones() -> Vec<ZoneConfig> {
    vec![
        ZoneConfig {
            id: "gaming".into(),
            name: "Gaming Zone".into(),
            falloff: Falloff::WaveInverseSquare {
                falloff_distance: 8.0,
            },
            min_volume: 0.05,
            max_volume: 1.0,
        },
        ZoneConfig {
            id: "central_bar".into(),
            name: "Central Bar".into(),
            falloff: Falloff::WaveInverseSquare {
                falloff_distance: 6.0,
            },
            min_volume: 0.1,
            max_volume: 1.0,
        },
        ZoneConfig {
            id: "card_tables".into(),
            name: "Card Tables".into(),
            falloff: Falloff::WaveInverseSquare {
                falloff_distance: 7.0,
            },
            min_volume: 0.05,
            max_volume: 1.0,
        },
        ZoneConfig {
            id: "firepit".into(),
            name: "Firepit Debate Area".into(),
            falloff: Falloff::WaveInverseSquare {
                falloff_distance: 9.0,
            },
            min_volume: 0.1,
            max_volume: 1.0,
        },
        // Private booths: no leakage at all
        ZoneConfig {
            id: "booth".into(),
            name: "Private Booth".into(),
            falloff: Falloff::HardCutoff,
            min_volume: 0.0,
            max_volume: 1.0,
        },
        // Stage reaches the whole space at reduced volume
        ZoneConfig {
            id: "stage".into(),
            name: "Small Stage".into(),
            falloff: Falloff::BroadcastEnhanced {
                base: 0.4,
                proximity_bonus: 0.4,
                proximity_radius: 10.0,
            },
            min_volume: 0.4,
            max_volume: 0.8,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_has_expected_zones() {
        let registry = ZoneRegistry::builtin();
        for id in ["gaming", "central_bar", "card_tables", "firepit", "booth", "stage"] {
            assert!(registry.contains(id), "missing builtin zone {id}");
        }
    }

    #[test]
    fn test_unknown_zone_is_an_error() {
        let registry = ZoneRegistry::builtin();
        assert!(matches!(
            registry.get("vip_lounge"),
            Err(ZoneError::UnknownZone(_))
        ));
    }

    #[test]
    fn test_distance_2d_ignores_elevation() {
        let a = Position::new(0.0, 0.0).with_z(5.0);
        let b = Position::new(3.0, 4.0).with_z(17.0);
        assert_eq!(a.distance_2d(&b), 5.0);
    }

    #[test]
    fn test_distance_3d_defaults_missing_z_to_zero() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(0.0, 0.0).with_z(12.0);
        assert_eq!(a.distance_3d(&b), 12.0);
    }

    #[test]
    fn test_position_serializes_camel_case() {
        let pos = Position::new(1.0, 2.0).in_zone("stage");
        let value = serde_json::to_value(&pos).unwrap();
        assert_eq!(value["zoneId"], "stage");
        assert!(value.get("z").is_none());
    }
}
