//! NPY array container parsing.
//!
//! Supports format versions 1.0, 2.0 and 3.0, boolean, integer and float
//! dtypes in either byte order, and both C and Fortran element order.
//! Values are widened to `f64` in logical (row-major) order.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::InspectionError;

const MAGIC: &[u8] = b"\x93NUMPY";

/// True if `bytes` start with the NPY magic string.
pub fn has_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

/// Decoded array with row-major values.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Bool,
    Int,
    Uint,
    Float,
}

#[derive(Debug, Clone, Copy)]
struct Dtype {
    scalar: Scalar,
    width: usize,
    big_endian: bool,
}

// Literal patterns, compile cannot fail
#[allow(clippy::unwrap_used)]
fn header_patterns() -> &'static (Regex, Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r#"['"]descr['"]\s*:\s*['"]([^'"]+)['"]"#).unwrap(),
            Regex::new(r#"['"]fortran_order['"]\s*:\s*(True|False)"#).unwrap(),
            Regex::new(r#"['"]shape['"]\s*:\s*\(([^)]*)\)"#).unwrap(),
        )
    })
}

fn unsupported(msg: impl Into<String>) -> InspectionError {
    InspectionError::UnsupportedFormat(msg.into())
}

fn parse_dtype(descr: &str) -> Result<Dtype, InspectionError> {
    let (order, code) = match descr.chars().next() {
        Some(c @ ('<' | '>' | '|' | '=')) => (c, &descr[1..]),
        _ => ('|', descr),
    };
    let big_endian = order == '>';
    let (scalar, width) = match code {
        "b1" | "?" => (Scalar::Bool, 1),
        "u1" => (Scalar::Uint, 1),
        "u2" => (Scalar::Uint, 2),
        "u4" => (Scalar::Uint, 4),
        "u8" => (Scalar::Uint, 8),
        "i1" => (Scalar::Int, 1),
        "i2" => (Scalar::Int, 2),
        "i4" => (Scalar::Int, 4),
        "i8" => (Scalar::Int, 8),
        "f4" => (Scalar::Float, 4),
        "f8" => (Scalar::Float, 8),
        other => return Err(unsupported(format!("unsupported NPY dtype '{other}'"))),
    };
    Ok(Dtype { scalar, width, big_endian })
}

fn read_scalar(dtype: Dtype, raw: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf[..dtype.width].copy_from_slice(raw);
    if dtype.big_endian {
        buf[..dtype.width].reverse();
    }
    match (dtype.scalar, dtype.width) {
        (Scalar::Bool, _) | (Scalar::Uint, 1) => f64::from(buf[0]),
        (Scalar::Int, 1) => f64::from(buf[0] as i8),
        (Scalar::Uint, 2) => f64::from(u16::from_le_bytes([buf[0], buf[1]])),
        (Scalar::Int, 2) => f64::from(i16::from_le_bytes([buf[0], buf[1]])),
        (Scalar::Uint, 4) => f64::from(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        (Scalar::Int, 4) => f64::from(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        (Scalar::Float, 4) => f64::from(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        (Scalar::Uint, _) => u64::from_le_bytes(buf) as f64,
        (Scalar::Int, _) => i64::from_le_bytes(buf) as f64,
        (Scalar::Float, _) => f64::from_le_bytes(buf),
    }
}

/// Parse an NPY payload.
pub fn parse(bytes: &[u8]) -> Result<NpyArray, InspectionError> {
    if !has_magic(bytes) || bytes.len() < 10 {
        return Err(unsupported("missing NPY magic header"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(unsupported("truncated NPY header"));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => return Err(unsupported(format!("unsupported NPY version {v}"))),
    };
    let data_start = header_start + header_len;
    let header_bytes = bytes
        .get(header_start..data_start)
        .ok_or_else(|| unsupported("truncated NPY header"))?;
    let header = std::str::from_utf8(header_bytes).map_err(|_| unsupported("NPY header is not text"))?;

    let (descr_re, fortran_re, shape_re) = header_patterns();
    let descr = descr_re
        .captures(header)
        .and_then(|c| c.get(1))
        .ok_or_else(|| unsupported("NPY header missing 'descr'"))?
        .as_str();
    let fortran_order = fortran_re
        .captures(header)
        .and_then(|c| c.get(1))
        .is_some_and(|m| m.as_str() == "True");
    let shape_text = shape_re
        .captures(header)
        .and_then(|c| c.get(1))
        .ok_or_else(|| unsupported("NPY header missing 'shape'"))?
        .as_str();
    let shape = shape_text
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| unsupported(format!("bad NPY shape '{shape_text}'"))))
        .collect::<Result<Vec<_>, _>>()?;

    let dtype = parse_dtype(descr)?;
    let needed = shape
        .iter()
        .try_fold(dtype.width, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| unsupported(format!("NPY shape {shape:?} overflows")))?;
    let payload = &bytes[data_start..];
    if payload.len() < needed {
        return Err(unsupported(format!(
            "NPY payload holds {} bytes, shape {:?} needs {}",
            payload.len(),
            shape,
            needed
        )));
    }

    let raw: Vec<f64> = payload[..needed]
        .chunks_exact(dtype.width)
        .map(|chunk| read_scalar(dtype, chunk))
        .collect();

    let values = if fortran_order && shape.len() > 1 {
        fortran_to_c(&raw, &shape)
    } else {
        raw
    };

    Ok(NpyArray { shape, values })
}

/// Reorder column-major storage into row-major.
fn fortran_to_c(raw: &[f64], shape: &[usize]) -> Vec<f64> {
    let mut out = vec![0.0; raw.len()];
    let mut index = vec![0usize; shape.len()];
    for value in raw {
        let c_offset = index.iter().zip(shape).fold(0, |acc, (i, dim)| acc * dim + i);
        out[c_offset] = *value;
        // Fortran order: first axis varies fastest
        for (axis, dim) in shape.iter().enumerate() {
            index[axis] += 1;
            if index[axis] < *dim {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

/// Serialize a square `u8` grid as an NPY 1.0 payload.
pub fn encode_u8_grid(size: usize, cells: &[u8]) -> Vec<u8> {
    let mut header = format!("{{'descr': '|u1', 'fortran_order': False, 'shape': ({size}, {size}), }}");
    // Pad so the data starts on a 64-byte boundary, header ends with newline
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + cells.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(cells);
    out
}
