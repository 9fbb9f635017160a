//! Trace file codec for the record/replay controllers
//!
//! TEXT: one decimal millisecond offset per line.
//! BIN_BE / BIN_LE: a 4-byte entry count followed by that many 4-byte
//! unsigned offsets in the named byte order.

use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use tracing::warn;

use crate::error::RateControlError;

/// Serialization format of a submission-offset trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceFormat {
    #[default]
    Text,
    BinaryBigEndian,
    BinaryLittleEndian,
}

impl TraceFormat {
    /// Resolve a format name from the controller options. Unknown names fall
    /// back to TEXT with a warning, missing ones silently default.
    pub fn resolve(name: Option<&str>) -> TraceFormat {
        match name {
            None => TraceFormat::Text,
            Some(name) => match name.to_uppercase().as_str() {
                "TEXT" => TraceFormat::Text,
                "BIN_BE" => TraceFormat::BinaryBigEndian,
                "BIN_LE" => TraceFormat::BinaryLittleEndian,
                other => {
                    warn!(format = other, "unsupported trace format, defaulting to TEXT");
                    TraceFormat::Text
                }
            },
        }
    }
}

/// Substitute the round and worker placeholders (`<R>`, `<C>`) in a trace
/// path template.
pub fn resolve_path_template(template: &str, round_index: u64, worker_index: u64) -> String {
    template
        .replace("<R>", &round_index.to_string())
        .replace("<r>", &round_index.to_string())
        .replace("<C>", &worker_index.to_string())
        .replace("<c>", &worker_index.to_string())
}

/// Write the recorded offsets to `path` in the given format.
pub fn write_trace(
    path: &Path,
    format: TraceFormat,
    records: &[u32],
) -> Result<(), RateControlError> {
    let bytes = match format {
        TraceFormat::Text => {
            let mut text = String::new();
            for offset in records {
                text.push_str(&offset.to_string());
                text.push('\n');
            }
            text.into_bytes()
        }
        TraceFormat::BinaryBigEndian => {
            let mut buf = BytesMut::with_capacity((records.len() + 1) * 4);
            buf.put_u32(records.len() as u32);
            for offset in records {
                buf.put_u32(*offset);
            }
            buf.to_vec()
        }
        TraceFormat::BinaryLittleEndian => {
            let mut buf = BytesMut::with_capacity((records.len() + 1) * 4);
            buf.put_u32_le(records.len() as u32);
            for offset in records {
                buf.put_u32_le(*offset);
            }
            buf.to_vec()
        }
    };

    std::fs::write(path, bytes).map_err(|e| RateControlError::trace(path, e.to_string()))
}

/// Read a trace previously written by [`write_trace`].
pub fn read_trace(path: &Path, format: TraceFormat) -> Result<Vec<u32>, RateControlError> {
    let bytes = std::fs::read(path).map_err(|e| RateControlError::trace(path, e.to_string()))?;

    match format {
        TraceFormat::Text => String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.trim()
                    .parse::<u32>()
                    .map_err(|e| RateControlError::trace(path, format!("bad entry \"{line}\": {e}")))
            })
            .collect(),
        TraceFormat::BinaryBigEndian | TraceFormat::BinaryLittleEndian => {
            let little_endian = format == TraceFormat::BinaryLittleEndian;
            let mut buf = &bytes[..];
            if buf.remaining() < 4 {
                return Err(RateControlError::trace(path, "missing length header"));
            }
            let count = if little_endian { buf.get_u32_le() } else { buf.get_u32() } as usize;
            if buf.remaining() < count * 4 {
                return Err(RateControlError::trace(
                    path,
                    format!("expected {count} entries, file is truncated"),
                ));
            }
            let mut records = Vec::with_capacity(count);
            for _ in 0..count {
                records.push(if little_endian { buf.get_u32_le() } else { buf.get_u32() });
            }
            Ok(records)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_resolution() {
        assert_eq!(TraceFormat::resolve(None), TraceFormat::Text);
        assert_eq!(TraceFormat::resolve(Some("text")), TraceFormat::Text);
        assert_eq!(TraceFormat::resolve(Some("bin_be")), TraceFormat::BinaryBigEndian);
        assert_eq!(TraceFormat::resolve(Some("BIN_LE")), TraceFormat::BinaryLittleEndian);
        assert_eq!(TraceFormat::resolve(Some("yaml")), TraceFormat::Text);
    }

    #[test]
    fn test_path_template_substitution() {
        assert_eq!(
            resolve_path_template("/tmp/trace-<R>-<C>.txt", 2, 7),
            "/tmp/trace-2-7.txt"
        );
        assert_eq!(resolve_path_template("/tmp/trace-<r>.bin", 3, 0), "/tmp/trace-3.bin");
    }

    #[test]
    fn test_text_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        write_trace(&path, TraceFormat::Text, &[100, 200, 300]).unwrap();
        assert_eq!(read_trace(&path, TraceFormat::Text).unwrap(), vec![100, 200, 300]);
    }

    #[test]
    fn test_binary_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        for format in [TraceFormat::BinaryBigEndian, TraceFormat::BinaryLittleEndian] {
            let path = dir.path().join("trace.bin");
            write_trace(&path, format, &[0, 1, u32::MAX]).unwrap();
            assert_eq!(read_trace(&path, format).unwrap(), vec![0, 1, u32::MAX]);
        }
    }

    #[test]
    fn test_binary_layout_is_length_prefixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.bin");
        write_trace(&path, TraceFormat::BinaryBigEndian, &[258]).unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw, vec![0, 0, 0, 1, 0, 0, 1, 2]);
    }

    #[test]
    fn test_missing_file() {
        let result = read_trace(Path::new("/nope/trace.txt"), TraceFormat::Text);
        assert!(matches!(result, Err(RateControlError::Trace { .. })));
    }

    #[test]
    fn test_truncated_binary_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.bin");
        std::fs::write(&path, [0u8, 0, 0, 9, 1, 2, 3, 4]).unwrap();
        assert!(read_trace(&path, TraceFormat::BinaryBigEndian).is_err());
    }
}
