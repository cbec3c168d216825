//! Parser for the `qbd -l` attachment table.
//!
//! The tool prints a header row followed by one row per attached volume.
//! Columns are positional and whitespace separated:
//!
//! ```text
//! No  id         device  volume                      config               read_bps  write_bps  read_iops  write_iops
//! 0   0x1c00001  qbd0    tcp://kube/pvc-a1           /etc/neonsan/qbd.conf  0         0          0          0
//! ```
//!
//! Only the columns listed in [`Column`] are interpreted.  A row that fails to
//! parse is logged and dropped; the rest of the table is still returned.

use std::num::IntErrorKind;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::types::AttachmentRecord;

/// Interpreted column positions of a table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id = 1,
    Device = 2,
    VolumePath = 3,
    ReadBps = 5,
    WriteBps = 6,
    ReadIops = 7,
    WriteIops = 8,
}

impl Column {
    fn from_index(index: usize) -> Option<Self> {
        Some(match index {
            1 => Self::Id,
            2 => Self::Device,
            3 => Self::VolumePath,
            5 => Self::ReadBps,
            6 => Self::WriteBps,
            7 => Self::ReadIops,
            8 => Self::WriteIops,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Device => "device",
            Self::VolumePath => "volume",
            Self::ReadBps => "read_bps",
            Self::WriteBps => "write_bps",
            Self::ReadIops => "read_iops",
            Self::WriteIops => "write_iops",
        }
    }
}

// ---------------------------------------------------------------------------
// Volume path
// ---------------------------------------------------------------------------

/// Error produced by [`VolumePath::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected pool/volume as 4 `/`-separated segments, got {segments} in `{raw}`")]
pub struct VolumePathError {
    pub raw: String,
    pub segments: usize,
}

/// Pool and volume packed into the third column, e.g. `tcp://kube/pvc-a1`.
///
/// The field must split on `/` into exactly four segments; the third is the
/// pool and the fourth the volume name.  Anything else is rejected so the
/// identity of a record is never guessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePath<'a> {
    pub pool: &'a str,
    pub volume: &'a str,
}

impl<'a> VolumePath<'a> {
    pub fn parse(raw: &'a str) -> Result<Self, VolumePathError> {
        let segments: Vec<&str> = raw.split('/').collect();
        match *segments.as_slice() {
            [_, _, pool, volume] => Ok(Self { pool, volume }),
            _ => Err(VolumePathError {
                raw: raw.to_owned(),
                segments: segments.len(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Integers
// ---------------------------------------------------------------------------

/// Parse a signed 64-bit integer whose base is given by its prefix:
/// `0x`/`0X` hexadecimal, `0o`/`0O` or a bare leading `0` octal, `0b`/`0B`
/// binary, decimal otherwise.  An optional `+`/`-` sign precedes the prefix.
/// A single `_` may separate digits or follow the base prefix.
pub fn parse_prefixed_int(raw: &str) -> Result<i64, IntErrorKind> {
    let (negative, unsigned) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    if !underscores_ok(unsigned) {
        return Err(IntErrorKind::InvalidDigit);
    }

    let lower = unsigned.get(..2).map(str::to_ascii_lowercase);
    let (radix, digits) = match lower.as_deref() {
        Some("0x") => (16, &unsigned[2..]),
        Some("0o") => (8, &unsigned[2..]),
        Some("0b") => (2, &unsigned[2..]),
        _ if unsigned.len() > 1 && unsigned.starts_with('0') => (8, &unsigned[1..]),
        _ => (10, unsigned),
    };

    let digits: String = digits.chars().filter(|&c| c != '_').collect();
    if digits.is_empty() {
        return Err(IntErrorKind::Empty);
    }
    if !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(IntErrorKind::InvalidDigit);
    }

    let magnitude = u64::from_str_radix(&digits, radix).map_err(|e| e.kind().clone())?;
    let value = if negative {
        -i128::from(magnitude)
    } else {
        i128::from(magnitude)
    };
    i64::try_from(value).map_err(|_| {
        if negative {
            IntErrorKind::NegOverflow
        } else {
            IntErrorKind::PosOverflow
        }
    })
}

/// Underscores must sit between two digits, or between a base prefix and a
/// digit.  `unsigned` has its sign already removed.
fn underscores_ok(unsigned: &str) -> bool {
    #[derive(PartialEq)]
    enum Seen {
        Start,
        Digit,
        Underscore,
        Other,
    }

    let bytes = unsigned.as_bytes();
    let mut seen = Seen::Start;
    let mut rest = bytes;
    let mut hex = false;
    if let [b'0', prefix, tail @ ..] = bytes
        && matches!(prefix.to_ascii_lowercase(), b'b' | b'o' | b'x')
    {
        seen = Seen::Digit;
        hex = prefix.to_ascii_lowercase() == b'x';
        rest = tail;
    }

    for &b in rest {
        if b.is_ascii_digit() || (hex && b.is_ascii_hexdigit()) {
            seen = Seen::Digit;
        } else if b == b'_' {
            if seen != Seen::Digit {
                return false;
            }
            seen = Seen::Underscore;
        } else if seen == Seen::Underscore {
            return false;
        } else {
            seen = Seen::Other;
        }
    }
    seen != Seen::Underscore
}

/// Normalize an id printed in any supported base to decimal.  Ids that are
/// not integers normalize to an empty string.
pub fn normalize_id(raw: &str) -> String {
    parse_prefixed_int(raw)
        .map(|v| v.to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Reason a single table row was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error(transparent)]
    VolumePath(#[from] VolumePathError),

    #[error("column {column}: `{value}` is not an integer ({kind:?})")]
    Integer {
        column: &'static str,
        value: String,
        kind: IntErrorKind,
    },
}

/// Column separators: ASCII space, tab, newline, form feed and carriage
/// return.  Other whitespace (vertical tab, NBSP, ...) is part of a field.
fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0C' | '\r')
}

/// Split a row on runs of separators.
///
/// Leading or trailing separators produce an empty first or last field, so
/// column positions line up with the tool's own layout.
pub fn split_fields(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    if line.starts_with(is_separator) {
        fields.push("");
    }
    fields.extend(line.split(is_separator).filter(|f| !f.is_empty()));
    if line.ends_with(is_separator) && !is_blank(line) {
        fields.push("");
    }
    fields
}

fn is_blank(line: &str) -> bool {
    line.chars().all(is_separator)
}

/// `<device_dir>/<name>`, joined as text like the tool does.
fn device_path(device_dir: &Path, name: &str) -> String {
    let dir = device_dir.to_string_lossy();
    format!("{}/{name}", dir.trim_end_matches('/'))
}

fn integer_column(column: Column, value: &str) -> Result<i64, RowError> {
    parse_prefixed_int(value).map_err(|kind| RowError::Integer {
        column: column.name(),
        value: value.to_owned(),
        kind,
    })
}

/// Parse one data row into a record.
///
/// Rows shorter than the full layout keep the missing attributes empty or
/// zero.  A present volume column must be well formed, and every present
/// integer column must parse.
pub fn parse_row(line: &str, device_dir: &Path) -> Result<AttachmentRecord, RowError> {
    let mut record = AttachmentRecord::default();
    for (index, value) in split_fields(line).into_iter().enumerate() {
        let Some(column) = Column::from_index(index) else {
            continue;
        };
        match column {
            Column::Id => record.id = normalize_id(value),
            Column::Device => record.device = device_path(device_dir, value),
            Column::VolumePath => {
                let path = VolumePath::parse(value)?;
                record.pool = path.pool.to_owned();
                record.name = path.volume.to_owned();
            }
            Column::ReadBps => record.read_bps = integer_column(column, value)?,
            Column::WriteBps => record.write_bps = integer_column(column, value)?,
            Column::ReadIops => record.read_iops = integer_column(column, value)?,
            Column::WriteIops => record.write_iops = integer_column(column, value)?,
        }
    }
    Ok(record)
}

/// Parse the full `qbd -l` output.
///
/// Surrounding blank lines are ignored, the first remaining line is the
/// header, and blank data lines are skipped.  Malformed rows are logged and
/// dropped.
pub fn parse_table(output: &str, device_dir: &Path) -> Vec<AttachmentRecord> {
    output
        .trim_matches('\n')
        .split('\n')
        .skip(1)
        .filter(|line| !is_blank(line))
        .filter_map(|line| match parse_row(line, device_dir) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(row = line, error = %e, "dropping unparseable attachment row");
                None
            }
        })
        .collect()
}
