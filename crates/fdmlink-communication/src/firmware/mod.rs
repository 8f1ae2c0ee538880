//! Firmware reply handling
//!
//! Reply-line parsing shared by every supported dialect, and the
//! identification step that turns an `M115` reply into printer info.

pub mod identification;
pub mod response_parser;

pub use identification::{parse_capabilities, Identification};
pub use response_parser::{parse_line, parse_position, parse_temperatures, FirmwareResponse};
