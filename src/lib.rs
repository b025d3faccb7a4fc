// src/lib.rs - Device control for a GRBL motion stage and a guarded plate loader
pub mod actuator;
pub mod config;
pub mod gcode;
pub mod hardware;
pub mod motion;
pub mod wells;

pub use actuator::{ActuatorError, MoveStyle, PlateLoader, SafetyProfile};
pub use config::{load_config, Config, ConfigError};
pub use gcode::{CommandQueue, MachinePosition, StatusReport};
pub use hardware::{Connector, SerialConnector, Transport, TransportError};
pub use motion::{CompletionOutcome, ExecutionReport, MotionController, MotionError, PollPolicy};
pub use wells::{PlateGeometry, WellGrid, WellGridError};
