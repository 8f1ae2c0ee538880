//! G-code preparation
//!
//! Turns a sliced file into the exact list of lines the streaming worker
//! walks: blank lines and plain comments are dropped, layer markers are kept
//! verbatim, and with checksums enabled every command becomes
//! `N<n> <command>*<xor>` with `n` counting emitted commands from 1.

use fdmlink_core::{Result, ValidationError};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Layer boundary recognised in a comment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerMarker {
    /// `;LAYER:3`, `; layer 3, Z = 0.6`
    Index(u32),
    /// `;LAYER_CHANGE` carries no number; the worker counts it
    Next,
}

/// One entry of a prepared program
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedLine {
    /// A command to transmit
    Command {
        /// Line number when checksums are on
        number: Option<u32>,
        /// Command text with comments stripped
        command: String,
        /// Exact text written to the link
        wire: String,
    },
    /// A layer marker, never transmitted
    Layer {
        marker: LayerMarker,
        /// Original comment text
        text: String,
    },
}

impl PreparedLine {
    /// Text recorded as the job's last command
    pub fn text(&self) -> &str {
        match self {
            PreparedLine::Command { wire, .. } => wire,
            PreparedLine::Layer { text, .. } => text,
        }
    }
}

/// A file ready to stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedProgram {
    pub lines: Vec<PreparedLine>,
    pub checksums: bool,
}

impl PreparedProgram {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of transmitted commands
    pub fn command_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, PreparedLine::Command { .. }))
            .count()
    }

    /// Number of layer markers, if the slicer wrote any
    pub fn total_layers(&self) -> Option<u32> {
        let count = self.len() - self.command_count();
        (count > 0).then_some(count as u32)
    }
}

/// XOR of every byte of `numbered`.
///
/// For ASCII G-code this is the XOR of the character codes. Non-ASCII text
/// (a UTF-8 `M117` message, say) is hashed byte-wise over its UTF-8
/// encoding, which is what firmware receiving the raw bytes computes.
pub fn checksum(numbered: &str) -> u8 {
    numbered.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// `N<n> <command>*<checksum>`
pub fn frame_line(number: u32, command: &str) -> String {
    let numbered = format!("N{} {}", number, command);
    let cs = checksum(&numbered);
    format!("{}*{}", numbered, cs)
}

/// Split a framed line into its number and command, verifying the checksum.
///
/// Returns `Err(expected)` with the checksum the text actually hashes to when
/// the appended value does not match, `Ok(None)` for unframed text.
pub fn unframe_line(line: &str) -> std::result::Result<Option<(u32, &str)>, u8> {
    let Some(rest) = line.strip_prefix('N') else {
        return Ok(None);
    };
    let Some((numbered, cs)) = line.rsplit_once('*') else {
        return Ok(None);
    };
    let Some((number, command)) = rest.split_once(' ') else {
        return Ok(None);
    };
    let Ok(number) = number.parse::<u32>() else {
        return Ok(None);
    };
    let command = command
        .strip_suffix(&format!("*{}", cs))
        .unwrap_or(command)
        .trim();
    let expected = checksum(numbered);
    match cs.trim().parse::<u8>() {
        Ok(value) if value == expected => Ok(Some((number, command))),
        _ => Err(expected),
    }
}

fn layer_index_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^;\s*layer(?:\s*:\s*|\s+)(\d+)\b").expect("invalid layer marker regex")
    })
}

fn layer_change_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^;\s*layer_change\b").expect("invalid layer marker regex"))
}

/// Recognise a layer-boundary comment
pub fn parse_layer_marker(line: &str) -> Option<LayerMarker> {
    let line = line.trim();
    if let Some(caps) = layer_index_regex().captures(line) {
        return caps[1].parse().ok().map(LayerMarker::Index);
    }
    layer_change_regex()
        .is_match(line)
        .then_some(LayerMarker::Next)
}

fn strip_comment(line: &str) -> &str {
    let end = line.find(';').unwrap_or(line.len());
    let line = &line[..end];
    match line.find('(') {
        Some(start) if line[start..].contains(')') => line[..start].trim(),
        _ => line.trim(),
    }
}

/// Prepare G-code text
pub fn prepare_str(source: &str, checksums: bool) -> PreparedProgram {
    let mut lines = Vec::new();
    let mut next_number = 1u32;

    for raw in source.lines() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(marker) = parse_layer_marker(trimmed) {
            lines.push(PreparedLine::Layer {
                marker,
                text: trimmed.to_string(),
            });
            continue;
        }
        let command = strip_comment(trimmed);
        if command.is_empty() {
            continue;
        }
        let (number, wire) = if checksums {
            let number = next_number;
            next_number += 1;
            (Some(number), frame_line(number, command))
        } else {
            (None, command.to_string())
        };
        lines.push(PreparedLine::Command {
            number,
            command: command.to_string(),
            wire,
        });
    }

    PreparedProgram { lines, checksums }
}

/// Load and prepare a file
pub fn prepare_file(path: &Path, checksums: bool) -> Result<PreparedProgram> {
    if !path.is_file() {
        return Err(ValidationError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let source = std::fs::read_to_string(path)?;
    let program = prepare_str(&source, checksums);
    tracing::debug!(
        "Prepared {} lines ({} commands) from {}",
        program.len(),
        program.command_count(),
        path.display()
    );
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_checksum_known_value() {
        assert_eq!(frame_line(1, "G28"), "N1 G28*18");
    }

    #[test]
    fn test_checksum_hashes_utf8_bytes() {
        // "é" is 0xC3 0xA9 on the wire
        assert_eq!(checksum("é"), 0xC3 ^ 0xA9);
        let ascii = "N3 M117 hello";
        let by_char = ascii.chars().fold(0u32, |acc, c| acc ^ c as u32);
        assert_eq!(checksum(ascii) as u32, by_char);
    }

    #[test]
    fn test_prepare_drops_comments_and_keeps_layers() {
        let src = "; generated\n\nG28\n;LAYER:0\nG1 X10 Y10 ; first move\n(old style)\n;LAYER_CHANGE\nM104 S0\n";
        let program = prepare_str(src, true);
        assert_eq!(program.len(), 5);
        assert_eq!(program.command_count(), 3);
        assert_eq!(program.total_layers(), Some(2));

        match &program.lines[2] {
            PreparedLine::Command { number, command, wire } => {
                assert_eq!(*number, Some(2));
                assert_eq!(command, "G1 X10 Y10");
                assert!(wire.starts_with("N2 G1 X10 Y10*"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            program.lines[1],
            PreparedLine::Layer {
                marker: LayerMarker::Index(0),
                text: ";LAYER:0".to_string()
            }
        );
    }

    #[test]
    fn test_prepare_without_checksums() {
        let program = prepare_str("G28\nG1 X1\n", false);
        assert_eq!(program.lines[1].text(), "G1 X1");
        assert_eq!(program.total_layers(), None);
    }

    #[test]
    fn test_layer_marker_flavours() {
        assert_eq!(parse_layer_marker(";LAYER:12"), Some(LayerMarker::Index(12)));
        assert_eq!(parse_layer_marker("; layer 3, Z = 0.6"), Some(LayerMarker::Index(3)));
        assert_eq!(parse_layer_marker(";LAYER_CHANGE"), Some(LayerMarker::Next));
        assert_eq!(parse_layer_marker(";LAYER_COUNT:120"), None);
        assert_eq!(parse_layer_marker("G1 X1"), None);
    }

    #[test]
    fn test_unframe_rejects_bad_checksum() {
        let framed = frame_line(7, "G1 X5");
        assert_eq!(unframe_line(&framed), Ok(Some((7, "G1 X5"))));
        let expected = checksum("N7 G1 X5");
        let corrupted = format!("N7 G1 X5*{}", expected.wrapping_add(1));
        assert_eq!(unframe_line(&corrupted), Err(expected));
        assert_eq!(unframe_line("G28"), Ok(None));
    }

    #[test]
    fn test_prepare_missing_file() {
        let err = prepare_file(Path::new("/nonexistent/cube.gcode"), true).unwrap_err();
        assert!(err.is_validation_error());
    }

    fn source_line() -> impl Strategy<Value = (String, bool)> {
        prop_oneof![
            Just((String::new(), false)),
            Just(("   ".to_string(), false)),
            Just(("; comment".to_string(), false)),
            (0u32..500).prop_map(|n| (format!(";LAYER:{}", n), true)),
            Just((";LAYER_CHANGE".to_string(), true)),
            "[GM][0-9]{1,3}( [XYZEFS]-?[0-9]{1,3}(\\.[0-9]{1,2})?){0,4}".prop_map(|c| (c, true)),
        ]
    }

    proptest! {
        #[test]
        fn prop_prepared_count_matches_meaningful_lines(
            lines in proptest::collection::vec(source_line(), 0..60),
            checksums in any::<bool>(),
        ) {
            let expected = lines.iter().filter(|(_, kept)| *kept).count();
            let source = lines.iter().map(|(l, _)| l.as_str()).collect::<Vec<_>>().join("\n");
            let program = prepare_str(&source, checksums);
            prop_assert_eq!(program.len(), expected);

            let numbers: Vec<u32> = program.lines.iter().filter_map(|l| match l {
                PreparedLine::Command { number, .. } => *number,
                _ => None,
            }).collect();
            if checksums {
                prop_assert_eq!(numbers, (1..=program.command_count() as u32).collect::<Vec<_>>());
            } else {
                prop_assert!(numbers.is_empty());
            }
        }

        #[test]
        fn prop_checksum_round_trip(number in 1u32..1_000_000, command in "[A-Z][0-9]{1,3}( [A-Z][-.0-9]{1,8}){0,5}") {
            let framed = frame_line(number, &command);
            let (numbered, appended) = framed.rsplit_once('*').unwrap();
            prop_assert_eq!(appended.parse::<u8>().unwrap(), checksum(numbered));
            prop_assert_eq!(unframe_line(&framed), Ok(Some((number, command.as_str()))));
        }
    }
}
