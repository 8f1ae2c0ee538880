//! # fdmlink Communication
//!
//! Everything that talks to a printer: serial and emulated links, the
//! acknowledgement protocol, firmware reply parsing, the port scanner,
//! G-code preparation and the connection/streaming engine.

pub mod api;
pub mod communication;
pub mod emulator;
pub mod engine;
pub mod firmware;
pub mod gcode;
pub mod scanner;

pub use api::{OperationResult, PrinterService};
pub use communication::{
    emulated::EMULATOR_PORT, exchange, list_ports, EmulatorLink, Link, Reply, SerialLink,
    SerialPortInfo, SharedLink,
};
pub use emulator::DeviceEmulator;
pub use engine::{EngineState, EngineStatus, PrinterEngine};
pub use firmware::{FirmwareResponse, Identification};
pub use gcode::{prepare_file, prepare_str, LayerMarker, PreparedLine, PreparedProgram};
pub use scanner::{DetectedDevice, PortProber, Scanner, SerialProber};
