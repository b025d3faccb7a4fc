//! Parsing of GRBL status replies.
//!
//! A `?` query is answered with a frame such as
//! `<Idle|MPos:1.000,2.000,-3.000|FS:0,0>`. Replies may be partial, padded
//! with `ok` lines, or missing altogether; every parser here degrades to
//! `None`/[`MachineState::Unknown`] instead of failing.

use serde::Serialize;

/// Alarm codes that mean the machine needs a homing cycle before motion.
pub const HOMING_REQUIRED_ALARMS: &[u8] = &[2, 3];

/// Machine coordinates as reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MachinePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Run,
    Hold,
    Jog,
    Alarm,
    Door,
    Check,
    Home,
    Sleep,
    Unknown,
}

impl MachineState {
    fn from_token(token: &str) -> Self {
        match token {
            "Idle" => MachineState::Idle,
            "Run" => MachineState::Run,
            "Hold" => MachineState::Hold,
            "Jog" => MachineState::Jog,
            "Alarm" => MachineState::Alarm,
            "Door" => MachineState::Door,
            "Check" => MachineState::Check,
            "Home" => MachineState::Home,
            "Sleep" => MachineState::Sleep,
            _ => MachineState::Unknown,
        }
    }
}

/// Everything a single status reply tells us.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: MachineState,
    pub position: Option<MachinePosition>,
    pub alarm: Option<u8>,
}

impl StatusReport {
    pub fn parse(reply: &str) -> Self {
        Self {
            state: parse_state(reply),
            position: parse_mpos(reply),
            alarm: parse_alarm_code(reply),
        }
    }

    /// True when the reply shows a state that requires homing first.
    pub fn homing_required(&self) -> bool {
        self.state == MachineState::Alarm
            || self.alarm.is_some_and(|code| HOMING_REQUIRED_ALARMS.contains(&code))
    }
}

/// Extracts the `MPos:` field.
///
/// The value runs from the marker to the next field delimiter (`|`), the
/// end of the frame (`>`), a line break, or the end of the text. The first
/// three comma-separated values must all parse.
pub fn parse_mpos(reply: &str) -> Option<MachinePosition> {
    const MARKER: &str = "MPos:";
    let start = reply.find(MARKER)? + MARKER.len();
    let rest = &reply[start..];
    let end = rest.find(['|', '>', '\r', '\n']).unwrap_or(rest.len());
    let mut fields = rest[..end].split(',').map(|f| f.trim().parse::<f64>());
    let x = fields.next()?.ok()?;
    let y = fields.next()?.ok()?;
    let z = fields.next()?.ok()?;
    Some(MachinePosition { x, y, z })
}

/// Reads the state word at the start of the first status frame.
pub fn parse_state(reply: &str) -> MachineState {
    let Some(open) = reply.find('<') else {
        return MachineState::Unknown;
    };
    let frame = &reply[open + 1..];
    let end = frame.find(['|', ',', ':', '>']).unwrap_or(frame.len());
    MachineState::from_token(frame[..end].trim())
}

/// Finds an `ALARM:<n>` message anywhere in the reply.
pub fn parse_alarm_code(reply: &str) -> Option<u8> {
    let upper = reply.to_ascii_uppercase();
    let start = upper.find("ALARM:")? + "ALARM:".len();
    let digits: String = upper[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
