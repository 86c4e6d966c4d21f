//! In-memory counterpart of the wire formats named in §6
//! (`NumericSegment`, `NumericSummarySegment`, `NumericArraySegment`).
//! Protobuf itself is out of scope (§1); this module targets the same byte
//! layout semantics so the round-trip property (§8) has something concrete
//! to exercise: `decode(encode(r)) == r` bit-for-bit for numeric and array
//! types, set-equal on summary ids for summaries.
//!
//! Numeric encoding: a header (resolution ordinal + i64 segment-base
//! timestamp) followed by one record per point. Each record starts with a
//! flag byte packing the timestamp-offset width (1-8 bytes) and the value's
//! width/int-vs-float flag, exactly as described in §4.1.

use crate::timestamp::{Resolution, Timestamp};
use crate::value::NumericValue;

fn bytes_needed_unsigned(v: u64) -> u8 {
    for width in 1..=8u8 {
        if width == 8 || v < (1u64 << (width * 8)) {
            return width;
        }
    }
    8
}

fn bytes_needed_signed(v: i64) -> u8 {
    for width in 1..=8u8 {
        if width == 8 {
            return 8;
        }
        let bits = width as u32 * 8;
        let lo = -(1i64 << (bits - 1));
        let hi = (1i64 << (bits - 1)) - 1;
        if v >= lo && v <= hi {
            return width;
        }
    }
    8
}

/// flag byte: bit7 = is_float, bits4-6 = value width code, bits0-3 = offset
/// width - 1.
fn value_width_code(is_float: bool, width: u8) -> u8 {
    if is_float {
        match width {
            4 => 0,
            _ => 1, // 8 bytes
        }
    } else {
        match width {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => 3, // 8 bytes
        }
    }
}

fn value_width_from_code(is_float: bool, code: u8) -> u8 {
    if is_float {
        if code == 0 { 4 } else { 8 }
    } else {
        match code {
            0 => 1,
            1 => 2,
            2 => 4,
            _ => 8,
        }
    }
}

fn write_be_truncated(out: &mut Vec<u8>, value: i64, width: u8) {
    let bytes = value.to_be_bytes(); // 8 bytes
    out.extend_from_slice(&bytes[8 - width as usize..]);
}

fn read_be_signed(bytes: &[u8]) -> i64 {
    let width = bytes.len();
    let negative = bytes[0] & 0x80 != 0;
    let mut buf = [if negative { 0xffu8 } else { 0 }; 8];
    buf[8 - width..].copy_from_slice(bytes);
    i64::from_be_bytes(buf)
}

/// Encode a sequence of `(Timestamp, NumericValue)` points, all sharing one
/// resolution, into the `NumericSegment` wire layout.
pub fn encode_numeric_segment(points: &[(Timestamp, NumericValue)]) -> Vec<u8> {
    let mut out = Vec::new();
    let resolution = points.first().map(|(t, _)| t.resolution()).unwrap_or(Resolution::Millis);
    out.push(resolution.ordinal());
    let base = points.first().map(|(t, _)| t.epoch()).unwrap_or(0);
    out.extend_from_slice(&base.to_be_bytes());
    out.extend_from_slice(&(points.len() as u32).to_be_bytes());

    for (ts, value) in points {
        let offset = ts.epoch() - base;
        debug_assert!(offset >= 0, "points must be in non-decreasing timestamp order");
        let offset_width = bytes_needed_unsigned(offset as u64);

        let (is_float, value_width, raw_bits): (bool, u8, i64) = match value {
            NumericValue::Int(v) => (false, bytes_needed_signed(*v), *v),
            NumericValue::Float(v) => (true, 8, v.to_bits() as i64),
        };

        let flag = (value_width_code(is_float, value_width) << 4)
            | (offset_width - 1)
            | if is_float { 0x80 } else { 0 };
        out.push(flag);
        write_be_truncated(&mut out, offset, offset_width);
        if is_float {
            out.extend_from_slice(&(raw_bits as u64).to_be_bytes()[8 - value_width as usize..]);
        } else {
            write_be_truncated(&mut out, raw_bits, value_width);
        }
    }
    out
}

pub fn decode_numeric_segment(bytes: &[u8]) -> Result<Vec<(Timestamp, NumericValue)>, crate::error::TsqError> {
    use crate::error::TsqError;
    if bytes.len() < 1 + 8 + 4 {
        return Err(TsqError::ParseError("numeric segment too short".into()));
    }
    let resolution = Resolution::from_ordinal(bytes[0])
        .ok_or_else(|| TsqError::ParseError("bad resolution ordinal".into()))?;
    let base = i64::from_be_bytes(bytes[1..9].try_into().unwrap());
    let count = u32::from_be_bytes(bytes[9..13].try_into().unwrap()) as usize;

    let mut pos = 13;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let flag = *bytes
            .get(pos)
            .ok_or_else(|| TsqError::ParseError("truncated numeric segment".into()))?;
        pos += 1;
        let is_float = flag & 0x80 != 0;
        let value_code = (flag >> 4) & 0x07;
        let offset_width = (flag & 0x0f) + 1;
        let value_width = value_width_from_code(is_float, value_code);

        let offset_bytes = bytes
            .get(pos..pos + offset_width as usize)
            .ok_or_else(|| TsqError::ParseError("truncated offset".into()))?;
        let offset = {
            let mut buf = [0u8; 8];
            buf[8 - offset_width as usize..].copy_from_slice(offset_bytes);
            i64::from_be_bytes(buf)
        };
        pos += offset_width as usize;

        let value_bytes = bytes
            .get(pos..pos + value_width as usize)
            .ok_or_else(|| TsqError::ParseError("truncated value".into()))?;
        let value = if is_float {
            let mut buf = [0u8; 8];
            buf[8 - value_width as usize..].copy_from_slice(value_bytes);
            NumericValue::Float(f64::from_bits(u64::from_be_bytes(buf)))
        } else {
            NumericValue::Int(read_be_signed(value_bytes))
        };
        pos += value_width as usize;

        out.push((Timestamp::new(base + offset, resolution), value));
    }
    Ok(out)
}

/// `NumericArraySegment`: repeated long or double, plus a presence mask
/// (the array's own missing-value mask, §4.6).
pub fn encode_numeric_array_segment(values: &[f64], present: &[bool]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(values.len() as u32).to_be_bytes());
    for v in values {
        out.extend_from_slice(&v.to_bits().to_be_bytes());
    }
    for chunk in present.chunks(8) {
        let mut byte = 0u8;
        for (i, p) in chunk.iter().enumerate() {
            if *p {
                byte |= 1 << i;
            }
        }
        out.push(byte);
    }
    out
}

pub fn decode_numeric_array_segment(bytes: &[u8]) -> Result<(Vec<f64>, Vec<bool>), crate::error::TsqError> {
    use crate::error::TsqError;
    if bytes.len() < 4 {
        return Err(TsqError::ParseError("array segment too short".into()));
    }
    let count = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let mut pos = 4;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let chunk = bytes
            .get(pos..pos + 8)
            .ok_or_else(|| TsqError::ParseError("truncated array value".into()))?;
        values.push(f64::from_bits(u64::from_be_bytes(chunk.try_into().unwrap())));
        pos += 8;
    }
    let mask_len = count.div_ceil(8);
    let mask_bytes = bytes
        .get(pos..pos + mask_len)
        .ok_or_else(|| TsqError::ParseError("truncated presence mask".into()))?;
    let mut present = Vec::with_capacity(count);
    for i in 0..count {
        let byte = mask_bytes[i / 8];
        present.push(byte & (1 << (i % 8)) != 0);
    }
    Ok((values, present))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_roundtrip_bit_for_bit() {
        let points = vec![
            (Timestamp::new(1000, Resolution::Millis), NumericValue::Int(42)),
            (Timestamp::new(2000, Resolution::Millis), NumericValue::Int(-8)),
            (Timestamp::new(3000, Resolution::Millis), NumericValue::Float(1.5)),
            (Timestamp::new(100_000, Resolution::Millis), NumericValue::Int(i64::MAX / 2)),
        ];
        let encoded = encode_numeric_segment(&points);
        let decoded = decode_numeric_segment(&encoded).unwrap();
        assert_eq!(points.len(), decoded.len());
        for ((ts_a, v_a), (ts_b, v_b)) in points.iter().zip(decoded.iter()) {
            assert_eq!(ts_a, ts_b);
            match (v_a, v_b) {
                (NumericValue::Int(a), NumericValue::Int(b)) => assert_eq!(a, b),
                (NumericValue::Float(a), NumericValue::Float(b)) => assert_eq!(a.to_bits(), b.to_bits()),
                _ => panic!("type mismatch after decode"),
            }
        }
    }

    #[test]
    fn array_roundtrip_with_presence_mask() {
        let values = vec![1.0, f64::NAN, 3.0, 0.0, 5.0];
        let present = vec![true, false, true, false, true];
        let encoded = encode_numeric_array_segment(&values, &present);
        let (values2, present2) = decode_numeric_array_segment(&encoded).unwrap();
        assert_eq!(present, present2);
        for (a, b) in values.iter().zip(values2.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}
