//! URL-safe variable-length encoding of unsigned integer lists.
//!
//! Each number is written most-significant digit first, five payload bits per
//! digit, with bit 5 set on every digit except the last. Numbers never start
//! with a zero-payload continuation digit, so that digit marks a run: the
//! number after it is the inclusive end of a consecutive ascending or
//! descending range that begins at the previous number.

use std::collections::BTreeSet;

use crate::{TaskprofError, TaskprofResult};

const DIGITS: &[u8; 64] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ._";
const CONTINUATION: u32 = 0b10_0000;
const PAYLOAD: u32 = 0b1_1111;
const RANGE_MARKER: u8 = DIGITS[CONTINUATION as usize];

/// Sorts and deduplicates before encoding so consecutive ids collapse.
pub fn encode_uint_set(numbers: impl IntoIterator<Item = u32>) -> String {
    let sorted: Vec<u32> = numbers.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    encode_uint_array(&sorted)
}

pub fn encode_uint_array(numbers: &[u32]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < numbers.len() {
        let skip = skippable_run_at(numbers, i);
        if skip > 0 {
            i += skip;
            out.push(char::from(RANGE_MARKER));
        }
        encode_uint(numbers[i], &mut out);
        i += 1;
    }
    out
}

/// How many entries after `start` continue the run that `start - 1` and
/// `start` begin. Zero unless at least three values are consecutive.
fn skippable_run_at(numbers: &[u32], start: usize) -> usize {
    if start < 1 || start + 1 >= numbers.len() {
        return 0;
    }
    let (prev, curr, next) = (
        i64::from(numbers[start - 1]),
        i64::from(numbers[start]),
        i64::from(numbers[start + 1]),
    );
    let step = curr - prev;
    if step.abs() != 1 || next - curr != step {
        return 0;
    }
    let mut skip = 1;
    while start + skip + 1 < numbers.len()
        && i64::from(numbers[start + skip + 1]) == curr + step * (skip as i64 + 1)
    {
        skip += 1;
    }
    skip
}

fn encode_uint(value: u32, out: &mut String) {
    let mut digits = vec![DIGITS[(value & PAYLOAD) as usize]];
    let mut rest = value >> 5;
    while rest != 0 {
        digits.push(DIGITS[(CONTINUATION | (rest & PAYLOAD)) as usize]);
        rest >>= 5;
    }
    out.extend(digits.iter().rev().map(|&d| char::from(d)));
}

pub fn decode_uint_array(token: &str) -> TaskprofResult<Vec<u32>> {
    let mut out: Vec<u32> = Vec::new();
    let mut bytes = token.bytes().peekable();
    while let Some(&first) = bytes.peek() {
        let is_range = first == RANGE_MARKER;
        if is_range {
            bytes.next();
        }
        let value = decode_uint(&mut bytes, token)?;
        if !is_range {
            out.push(value);
            continue;
        }
        let Some(&from) = out.last() else {
            return Err(TaskprofError::InvalidArgument(format!(
                "range without a start in {token:?}"
            )));
        };
        if value >= from {
            out.extend((from..=value).skip(1));
        } else {
            out.extend((value..from).rev());
        }
    }
    Ok(out)
}

fn decode_uint(bytes: &mut impl Iterator<Item = u8>, token: &str) -> TaskprofResult<u32> {
    let mut value: u32 = 0;
    for byte in bytes.by_ref() {
        let digit = DIGITS
            .iter()
            .position(|&d| d == byte)
            .ok_or_else(|| TaskprofError::InvalidArgument(format!("invalid digit {:?} in {token:?}", char::from(byte))))?
            as u32;
        value = value
            .checked_mul(32)
            .ok_or_else(|| TaskprofError::InvalidArgument(format!("number too large in {token:?}")))?
            | (digit & PAYLOAD);
        if digit & CONTINUATION == 0 {
            return Ok(value);
        }
    }
    Err(TaskprofError::InvalidArgument(format!("truncated number in {token:?}")))
}
