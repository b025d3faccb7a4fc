// src/actuator/controller.rs - Mirrored plate lift and lid under a collision-avoidance profile
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;

use crate::actuator::confirm::Confirmation;
use crate::actuator::safety::SafetyProfile;
use crate::actuator::{Actuator, ActuatorError, MoveStyle};
use crate::config::LoaderConfig;
use crate::hardware::{RelayDriver, ServoDriver};

const HOME_SETTLE: Duration = Duration::from_secs(1);
const LID_SETTLE: Duration = Duration::from_secs(1);
const PLATE_SETTLE: Duration = Duration::from_millis(500);
const CALIBRATION_PAUSE: Duration = Duration::from_secs(1);

/// Smallest step size, in degrees, accepted for smooth moves.
pub const MIN_MOVE_SPEED: f64 = 0.01;
/// Upper bound on the steps [`interpolate`] will produce for one move.
pub const MAX_INTERPOLATION_STEPS: usize = 20_000;

fn check_speed(speed: f64) -> Result<f64, ActuatorError> {
    if !speed.is_finite() || speed < MIN_MOVE_SPEED {
        return Err(ActuatorError::InvalidSpeed(speed));
    }
    Ok(speed)
}

/// Physical angles for the two lift servos given one logical plate angle.
///
/// The servos face each other, so the second one turns the opposite way.
pub fn mirrored_servo_angles(angle: f64) -> (f64, f64) {
    (angle + 90.0, 90.0 - angle)
}

/// Intermediate angles for a stepped move from `current` to `target`.
///
/// Steps are `speed` degrees apart and never overshoot; the last entry is
/// always `target` itself. No move, no steps.
pub fn interpolate(current: f64, target: f64, speed: f64) -> Vec<f64> {
    if current == target {
        return Vec::new();
    }
    if speed.is_nan() || speed <= 0.0 {
        return vec![target];
    }
    let direction = if target > current { 1.0 } else { -1.0 };
    // Widen the step rather than emit an unbounded number of them.
    let distance = (target - current).abs();
    let speed = speed.max(distance / MAX_INTERPOLATION_STEPS as f64);
    let steps = ((distance / speed).floor() as usize).min(MAX_INTERPOLATION_STEPS);
    let mut angles: Vec<f64> = (0..=steps)
        .map(|i| {
            let angle = current + direction * speed * i as f64;
            if direction > 0.0 { angle.min(target) } else { angle.max(target) }
        })
        .collect();
    angles.push(target);
    angles
}

/// Moves `degrees` toward `end` without passing it, or all the way when no
/// distance is given.
fn toward(current: f64, end: f64, degrees: Option<f64>) -> Result<f64, ActuatorError> {
    let Some(degrees) = degrees else {
        return Ok(end);
    };
    if !degrees.is_finite() || degrees < 0.0 {
        return Err(ActuatorError::InvalidAngle(degrees));
    }
    if current < end {
        Ok((current + degrees).min(end))
    } else {
        Ok((current - degrees).max(end))
    }
}

/// Snapshot of the active collision rule and where both actuators are.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollisionReport {
    pub plate_type: String,
    pub description: String,
    pub plate_safe_angle: Option<f64>,
    pub lid_safe_angle: Option<f64>,
    pub plate_angle: f64,
    pub lid_angle: f64,
    /// The committed positions already break the active rule.
    pub collision_risk: bool,
}

/// Plate lift (two mirrored servos) and lid, guarded by a [`SafetyProfile`].
///
/// Positions are whatever was last committed to the servos; there is no
/// feedback. Every move is checked against the *other* actuator's committed
/// angle before anything is sent, and a rejected move changes nothing.
pub struct PlateLoader {
    servos: Box<dyn ServoDriver>,
    relay: Option<Box<dyn RelayDriver>>,
    config: LoaderConfig,
    profiles: BTreeMap<String, SafetyProfile>,
    plate_type: String,
    profile: SafetyProfile,
    plate_angle: f64,
    lid_angle: f64,
    move_speed: f64,
    move_delay: Duration,
}

impl PlateLoader {
    /// Selects `plate_type`, powers the servos and homes them: plate down
    /// first, then lid closed.
    pub async fn new(
        config: LoaderConfig,
        profiles: BTreeMap<String, SafetyProfile>,
        plate_type: &str,
        servos: Box<dyn ServoDriver>,
        relay: Option<Box<dyn RelayDriver>>,
    ) -> Result<Self, ActuatorError> {
        let profile = lookup(&profiles, plate_type)?.clone();
        let speed = check_speed(config.movement.default_move_speed)?;
        if relay.is_some() && config.power_relay_pin.is_none() {
            tracing::warn!("Relay driver given but no power_relay_pin configured; relay unused");
        }

        let limits = config.limits;
        let mut loader = Self {
            servos,
            relay,
            move_delay: Duration::from_millis(config.movement.default_move_delay_ms),
            config,
            profiles,
            plate_type: plate_type.to_string(),
            profile,
            plate_angle: limits.plate_down_angle,
            lid_angle: limits.lid_closed_angle,
            move_speed: speed,
        };

        tracing::info!("Initializing plate loader for '{}' ({})", plate_type, loader.profile.description);
        loader.log_profile();
        loader.set_relay(true)?;
        loader.commit_plate(limits.plate_down_angle)?;
        sleep(HOME_SETTLE).await;
        loader.commit_lid(limits.lid_closed_angle)?;
        tracing::info!(
            "Plate loader homed: plate {} on channels {}/{}, lid {} on channel {}",
            loader.plate_angle,
            loader.config.channels.plate_lift_1,
            loader.config.channels.plate_lift_2,
            loader.lid_angle,
            loader.config.channels.lid
        );
        Ok(loader)
    }

    fn log_profile(&self) {
        match self.profile.thresholds() {
            Some((plate, lid)) => {
                tracing::info!("Safety limits: plate >= {} while lid > {}", plate, lid)
            }
            None => tracing::warn!("Collision avoidance disabled for '{}'", self.plate_type),
        }
    }

    /// `(plate_angle, lid_angle)` as last committed.
    pub fn positions(&self) -> (f64, f64) {
        (self.plate_angle, self.lid_angle)
    }

    pub fn plate_type(&self) -> &str {
        &self.plate_type
    }

    pub fn profile(&self) -> &SafetyProfile {
        &self.profile
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Step size (degrees) and pause used by [`MoveStyle::Smooth`].
    pub fn set_move_profile(&mut self, speed: f64, delay: Duration) -> Result<(), ActuatorError> {
        self.move_speed = check_speed(speed)?;
        self.move_delay = delay;
        Ok(())
    }

    fn commit_plate(&mut self, angle: f64) -> Result<(), ActuatorError> {
        let (a, b) = mirrored_servo_angles(angle);
        let channels = self.config.channels;
        self.servos.set_angle(channels.plate_lift_1, a)?;
        if let Err(err) = self.servos.set_angle(channels.plate_lift_2, b) {
            // Put the first servo back so the pair stays mirrored at the old angle.
            let (restore, _) = mirrored_servo_angles(self.plate_angle);
            if let Err(restore_err) = self.servos.set_angle(channels.plate_lift_1, restore) {
                tracing::warn!(
                    "Could not restore servo {} to {} after servo {} failed: {}",
                    channels.plate_lift_1,
                    restore,
                    channels.plate_lift_2,
                    restore_err
                );
            }
            return Err(err.into());
        }
        self.plate_angle = angle;
        tracing::debug!(
            "Plate {} -> servo {} at {}, servo {} at {}",
            angle,
            channels.plate_lift_1,
            a,
            channels.plate_lift_2,
            b
        );
        Ok(())
    }

    fn commit_lid(&mut self, angle: f64) -> Result<(), ActuatorError> {
        self.servos.set_angle(self.config.channels.lid, angle)?;
        self.lid_angle = angle;
        tracing::debug!("Lid -> {}", angle);
        Ok(())
    }

    fn commit(&mut self, actuator: Actuator, angle: f64) -> Result<(), ActuatorError> {
        match actuator {
            Actuator::Plate => self.commit_plate(angle),
            Actuator::Lid => self.commit_lid(angle),
        }
    }

    fn current(&self, actuator: Actuator) -> f64 {
        match actuator {
            Actuator::Plate => self.plate_angle,
            Actuator::Lid => self.lid_angle,
        }
    }

    fn range(&self, actuator: Actuator) -> (f64, f64) {
        match actuator {
            Actuator::Plate => self.config.limits.plate_range(),
            Actuator::Lid => self.config.limits.lid_range(),
        }
    }

    fn check(&self, actuator: Actuator, target: f64) -> Result<(), ActuatorError> {
        let permitted = match actuator {
            Actuator::Plate => self.profile.permits_plate_move(self.lid_angle, target),
            Actuator::Lid => self.profile.permits_lid_move(self.plate_angle, target),
        };
        if permitted {
            return Ok(());
        }
        let err = ActuatorError::CollisionRisk {
            actuator,
            target,
            plate_angle: self.plate_angle,
            lid_angle: self.lid_angle,
            profile: self.plate_type.clone(),
        };
        tracing::warn!("{}", err);
        Err(err)
    }

    async fn move_actuator(&mut self, actuator: Actuator, target: f64, style: MoveStyle) -> Result<(), ActuatorError> {
        if !target.is_finite() {
            return Err(ActuatorError::InvalidAngle(target));
        }
        let (low, high) = self.range(actuator);
        let target = target.clamp(low, high);
        self.check(actuator, target)?;

        let from = self.current(actuator);
        tracing::info!("Moving {} from {} to {}", actuator, from, target);
        match style {
            MoveStyle::Direct => self.commit(actuator, target)?,
            MoveStyle::Smooth => {
                let steps = interpolate(from, target, self.move_speed);
                let last = steps.len().saturating_sub(1);
                for (i, angle) in steps.into_iter().enumerate() {
                    self.commit(actuator, angle)?;
                    if i < last {
                        sleep(self.move_delay).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Raises the plate `degrees` toward the up position, or all the way.
    pub async fn raise_plate(&mut self, degrees: Option<f64>, style: MoveStyle) -> Result<(), ActuatorError> {
        let target = toward(self.plate_angle, self.config.limits.plate_up_angle, degrees)?;
        self.move_actuator(Actuator::Plate, target, style).await
    }

    /// Lowers the plate `degrees` toward the down position, or all the way.
    pub async fn lower_plate(&mut self, degrees: Option<f64>, style: MoveStyle) -> Result<(), ActuatorError> {
        let target = toward(self.plate_angle, self.config.limits.plate_down_angle, degrees)?;
        self.move_actuator(Actuator::Plate, target, style).await
    }

    /// Moves the plate to `angle`, clamped to its range.
    pub async fn move_plate_to(&mut self, angle: f64, style: MoveStyle) -> Result<(), ActuatorError> {
        self.move_actuator(Actuator::Plate, angle, style).await
    }

    /// Pushes the plate slightly past the up position for easier access.
    pub async fn pop_plate(&mut self, style: MoveStyle) -> Result<(), ActuatorError> {
        let target = self.config.limits.plate_pop_angle;
        self.move_actuator(Actuator::Plate, target, style).await
    }

    pub async fn open_lid(&mut self, style: MoveStyle) -> Result<(), ActuatorError> {
        let target = self.config.limits.lid_open_angle;
        self.move_actuator(Actuator::Lid, target, style).await
    }

    pub async fn close_lid(&mut self, style: MoveStyle) -> Result<(), ActuatorError> {
        let target = self.config.limits.lid_closed_angle;
        self.move_actuator(Actuator::Lid, target, style).await
    }

    /// Moves the lid to `angle`, clamped to its range.
    pub async fn rotate_lid(&mut self, angle: f64, style: MoveStyle) -> Result<(), ActuatorError> {
        self.move_actuator(Actuator::Lid, angle, style).await
    }

    /// Switches the active collision rule. Positions are left alone, even
    /// if they break the new rule.
    pub fn set_plate_type(&mut self, name: &str) -> Result<(), ActuatorError> {
        let profile = lookup(&self.profiles, name)?.clone();
        self.plate_type = name.to_string();
        self.profile = profile;
        tracing::info!("Plate type changed to '{}' ({})", name, self.profile.description);
        self.log_profile();
        if self.profile.is_violated(self.plate_angle, self.lid_angle) {
            tracing::warn!(
                "Current positions break the '{}' rule (plate {}, lid {})",
                name,
                self.plate_angle,
                self.lid_angle
            );
        }
        Ok(())
    }

    /// Replaces the plate-type table. Fails, changing nothing, if the
    /// active plate type is not in the new table.
    pub fn replace_profiles(&mut self, profiles: BTreeMap<String, SafetyProfile>) -> Result<(), ActuatorError> {
        let profile = lookup(&profiles, &self.plate_type)?.clone();
        self.profiles = profiles;
        self.profile = profile;
        tracing::info!("Plate types reloaded; '{}' is still active", self.plate_type);
        Ok(())
    }

    pub fn available_plate_types(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn collision_report(&self) -> CollisionReport {
        CollisionReport {
            plate_type: self.plate_type.clone(),
            description: self.profile.description.clone(),
            plate_safe_angle: self.profile.plate_safe_angle,
            lid_safe_angle: self.profile.lid_safe_angle,
            plate_angle: self.plate_angle,
            lid_angle: self.lid_angle,
            collision_risk: self.profile.is_violated(self.plate_angle, self.lid_angle),
        }
    }

    /// Open lid, raise plate, wait for the operator to insert a plate,
    /// lower plate, close lid.
    ///
    /// A failed step or an aborted confirmation stops the sequence where
    /// it is; nothing is undone.
    pub async fn load_sequence(&mut self, confirm: &mut dyn Confirmation) -> Result<(), ActuatorError> {
        tracing::info!("Starting plate loading sequence");
        self.exchange(confirm, "Plate ready for loading; insert plate and confirm").await?;
        tracing::info!("Plate loading sequence complete");
        Ok(())
    }

    /// Same choreography as [`load_sequence`](Self::load_sequence), waiting
    /// for the plate to be removed instead.
    pub async fn unload_sequence(&mut self, confirm: &mut dyn Confirmation) -> Result<(), ActuatorError> {
        tracing::info!("Starting plate unloading sequence");
        self.exchange(confirm, "Plate ready for removal; remove plate and confirm").await?;
        tracing::info!("Plate unloading sequence complete");
        Ok(())
    }

    async fn exchange(&mut self, confirm: &mut dyn Confirmation, prompt: &str) -> Result<(), ActuatorError> {
        self.open_lid(MoveStyle::Smooth).await?;
        sleep(LID_SETTLE).await;
        self.raise_plate(None, MoveStyle::Smooth).await?;
        confirm.wait(prompt).await?;
        self.lower_plate(None, MoveStyle::Smooth).await?;
        sleep(PLATE_SETTLE).await;
        self.close_lid(MoveStyle::Smooth).await
    }

    /// Runs both actuators through their full travel and back.
    pub async fn calibrate(&mut self) -> Result<(), ActuatorError> {
        tracing::info!("Starting calibration");
        self.lower_plate(None, MoveStyle::Smooth).await?;
        sleep(CALIBRATION_PAUSE).await;
        self.raise_plate(None, MoveStyle::Smooth).await?;
        sleep(CALIBRATION_PAUSE).await;
        self.lower_plate(None, MoveStyle::Smooth).await?;

        self.close_lid(MoveStyle::Smooth).await?;
        sleep(CALIBRATION_PAUSE).await;
        self.open_lid(MoveStyle::Smooth).await?;
        sleep(CALIBRATION_PAUSE).await;
        self.close_lid(MoveStyle::Smooth).await?;
        tracing::info!("Calibration complete");
        Ok(())
    }

    /// Plate down, then lid closed.
    pub async fn home(&mut self) -> Result<(), ActuatorError> {
        tracing::info!("Homing plate loader");
        self.lower_plate(None, MoveStyle::Smooth).await?;
        self.close_lid(MoveStyle::Smooth).await?;
        tracing::info!("Plate loader at home position");
        Ok(())
    }

    /// Stops driving both lift servos; they no longer hold position.
    pub fn release_plate_motors(&mut self) -> Result<(), ActuatorError> {
        let channels = self.config.channels;
        self.servos.release(channels.plate_lift_1)?;
        self.servos.release(channels.plate_lift_2)?;
        tracing::warn!("Plate motors released; position not maintained");
        Ok(())
    }

    pub fn release_lid_motor(&mut self) -> Result<(), ActuatorError> {
        self.servos.release(self.config.channels.lid)?;
        tracing::warn!("Lid motor released; position not maintained");
        Ok(())
    }

    /// Releases every servo and cuts servo power if a relay is fitted.
    /// Committed positions are kept for [`power_restore`](Self::power_restore).
    pub fn power_save(&mut self) -> Result<(), ActuatorError> {
        tracing::info!("Entering power save mode");
        self.release_plate_motors()?;
        self.release_lid_motor()?;
        self.set_relay(false)
    }

    /// Powers the servos back up at the last committed angles.
    pub fn power_restore(&mut self) -> Result<(), ActuatorError> {
        self.set_relay(true)?;
        self.commit_plate(self.plate_angle)?;
        self.commit_lid(self.lid_angle)?;
        tracing::info!("Servos restored: plate {}, lid {}", self.plate_angle, self.lid_angle);
        Ok(())
    }

    /// Homes, then powers down.
    pub async fn shutdown(&mut self) -> Result<(), ActuatorError> {
        tracing::info!("Shutting down plate loader");
        self.home().await?;
        self.power_save()?;
        tracing::info!("Plate loader shutdown complete");
        Ok(())
    }

    fn set_relay(&mut self, on: bool) -> Result<(), ActuatorError> {
        if let (Some(relay), Some(pin)) = (self.relay.as_mut(), self.config.power_relay_pin) {
            relay.set_state(pin, on)?;
            tracing::debug!("Servo power relay on pin {} {}", pin, if on { "on" } else { "off" });
        }
        Ok(())
    }
}

fn lookup<'a>(profiles: &'a BTreeMap<String, SafetyProfile>, name: &str) -> Result<&'a SafetyProfile, ActuatorError> {
    profiles.get(name).ok_or_else(|| ActuatorError::UnknownPlateType {
        name: name.to_string(),
        available: profiles.keys().cloned().collect(),
    })
}
