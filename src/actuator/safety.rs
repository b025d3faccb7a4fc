// src/actuator/safety.rs - Collision-avoidance rule between plate lift and lid
use serde::{Deserialize, Serialize};

/// Named collision-avoidance rule for one plate type.
///
/// While the lid is further closed than `lid_safe_angle`, the plate must
/// stay at or beyond `plate_safe_angle`, and vice versa. A profile with no
/// thresholds disables the rule.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SafetyProfile {
    #[serde(default)]
    pub plate_safe_angle: Option<f64>,
    #[serde(default)]
    pub lid_safe_angle: Option<f64>,
    #[serde(default)]
    pub description: String,
}

impl SafetyProfile {
    pub fn new(plate_safe_angle: f64, lid_safe_angle: f64, description: impl Into<String>) -> Self {
        Self {
            plate_safe_angle: Some(plate_safe_angle),
            lid_safe_angle: Some(lid_safe_angle),
            description: description.into(),
        }
    }

    /// A profile that never rejects a move.
    pub fn disabled(description: impl Into<String>) -> Self {
        Self {
            plate_safe_angle: None,
            lid_safe_angle: None,
            description: description.into(),
        }
    }

    /// `(plate_safe_angle, lid_safe_angle)` when the rule is active.
    pub fn thresholds(&self) -> Option<(f64, f64)> {
        match (self.plate_safe_angle, self.lid_safe_angle) {
            (Some(plate), Some(lid)) => Some((plate, lid)),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.thresholds().is_some()
    }

    pub fn validate(&self) -> Result<(), String> {
        match (self.plate_safe_angle, self.lid_safe_angle) {
            (None, None) => Ok(()),
            (Some(plate), Some(lid)) if plate.is_finite() && lid.is_finite() => Ok(()),
            (Some(_), Some(_)) => Err("safe angles must be finite".to_string()),
            _ => Err("plate_safe_angle and lid_safe_angle must be set together".to_string()),
        }
    }

    /// Whether the plate may go to `plate_target` with the lid at `lid_now`.
    pub fn permits_plate_move(&self, lid_now: f64, plate_target: f64) -> bool {
        !self.is_violated(plate_target, lid_now)
    }

    /// Whether the lid may go to `lid_target` with the plate at `plate_now`.
    pub fn permits_lid_move(&self, plate_now: f64, lid_target: f64) -> bool {
        !self.is_violated(plate_now, lid_target)
    }

    /// True when the plate is raised past its safe angle while the lid is
    /// closed past its own.
    pub fn is_violated(&self, plate: f64, lid: f64) -> bool {
        match self.thresholds() {
            Some((plate_safe, lid_safe)) => lid > lid_safe && plate < plate_safe,
            None => false,
        }
    }
}
