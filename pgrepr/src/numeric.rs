//! PostgreSQL's binary `numeric` wire format (spec.md §4.2, OID 1700).
//!
//! The on-wire value is a header (`ndigits`, `weight`, `sign`, `dscale`)
//! followed by `ndigits` base-10000 digit groups, most significant first.
//! This gateway does not do numeric arithmetic — IRIS does — so the
//! canonical in-memory representation of a numeric value is simply its
//! decimal text, and this module only has to get the text ↔ binary
//! conversion right.

use common::error::{GatewayError, Result};

const NAN_SIGN: u16 = 0xC000;
const NEGATIVE_SIGN: u16 = 0x4000;
const POSITIVE_SIGN: u16 = 0x0000;

pub fn encode_binary(text: &str) -> Result<Vec<u8>> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("nan") {
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&0i16.to_be_bytes());
        out.extend_from_slice(&0i16.to_be_bytes());
        out.extend_from_slice(&NAN_SIGN.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        return Ok(out);
    }

    let negative = trimmed.starts_with('-');
    let unsigned = trimmed.trim_start_matches(['+', '-']);
    let mut split = unsigned.splitn(2, '.');
    let int_part = split.next().unwrap_or("");
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let frac_part = split.next().unwrap_or("");

    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GatewayError::parameter_bind(format!("invalid numeric literal: {text}")));
    }

    let dscale = frac_part.len() as u16;
    let int_digits: Vec<u8> = int_part.bytes().map(|b| b - b'0').collect();
    let frac_digits: Vec<u8> = frac_part.bytes().map(|b| b - b'0').collect();

    let int_pad = (4 - int_digits.len() % 4) % 4;
    let mut padded_int = vec![0u8; int_pad];
    padded_int.extend_from_slice(&int_digits);

    let frac_pad = (4 - frac_digits.len() % 4) % 4;
    let mut padded_frac = frac_digits;
    padded_frac.extend(std::iter::repeat(0u8).take(frac_pad));

    let mut weight = (padded_int.len() / 4) as i32 - 1;

    let mut groups: Vec<i16> = Vec::new();
    for chunk in padded_int.chunks(4) {
        groups.push(quad_value(chunk));
    }
    for chunk in padded_frac.chunks(4) {
        groups.push(quad_value(chunk));
    }

    while groups.len() > 1 && groups[0] == 0 && weight >= 0 {
        groups.remove(0);
        weight -= 1;
    }
    while groups.len() > 1 && *groups.last().unwrap() == 0 {
        groups.pop();
    }
    if groups.iter().all(|g| *g == 0) {
        groups.clear();
    }

    let sign = if negative && !groups.is_empty() { NEGATIVE_SIGN } else { POSITIVE_SIGN };

    let mut out = Vec::with_capacity(8 + groups.len() * 2);
    out.extend_from_slice(&(groups.len() as i16).to_be_bytes());
    out.extend_from_slice(&(weight as i16).to_be_bytes());
    out.extend_from_slice(&sign.to_be_bytes());
    out.extend_from_slice(&dscale.to_be_bytes());
    for g in groups {
        out.extend_from_slice(&g.to_be_bytes());
    }
    Ok(out)
}

pub fn decode_binary(bytes: &[u8]) -> Result<String> {
    if bytes.len() < 8 {
        return Err(GatewayError::parameter_bind("truncated numeric value"));
    }
    let ndigits = i16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let weight = i16::from_be_bytes([bytes[2], bytes[3]]) as i32;
    let sign = u16::from_be_bytes([bytes[4], bytes[5]]);
    let dscale = u16::from_be_bytes([bytes[6], bytes[7]]) as usize;

    if sign == NAN_SIGN {
        return Ok("NaN".to_string());
    }
    if bytes.len() < 8 + ndigits * 2 {
        return Err(GatewayError::parameter_bind("truncated numeric digit groups"));
    }

    let mut groups = Vec::with_capacity(ndigits);
    for i in 0..ndigits {
        let off = 8 + i * 2;
        groups.push(u16::from_be_bytes([bytes[off], bytes[off + 1]]));
    }

    let mut int_str = String::new();
    let mut frac_str = String::new();
    for (idx, g) in groups.iter().enumerate() {
        let pos = weight - idx as i32;
        let quad = format!("{g:04}");
        if pos >= 0 {
            int_str.push_str(&quad);
        } else {
            frac_str.push_str(&quad);
        }
    }

    if ndigits == 0 {
        int_str = "0".to_string();
    } else {
        let lowest_pos = weight - ndigits as i32 + 1;
        if lowest_pos > 0 {
            int_str.push_str(&"0".repeat(4 * lowest_pos as usize));
        }
    }
    if int_str.is_empty() {
        int_str = "0".to_string();
    }
    let int_trimmed = int_str.trim_start_matches('0');
    let int_final = if int_trimmed.is_empty() { "0" } else { int_trimmed };

    if frac_str.len() < dscale {
        frac_str.push_str(&"0".repeat(dscale - frac_str.len()));
    } else {
        frac_str.truncate(dscale);
    }

    let sign_str = if sign == NEGATIVE_SIGN { "-" } else { "" };
    if dscale > 0 {
        Ok(format!("{sign_str}{int_final}.{frac_str}"))
    } else {
        Ok(format!("{sign_str}{int_final}"))
    }
}

fn quad_value(digits: &[u8]) -> i16 {
    digits.iter().fold(0i16, |acc, d| acc * 10 + *d as i16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(s: &str) -> String {
        decode_binary(&encode_binary(s).unwrap()).unwrap()
    }

    #[test]
    fn round_trips_integers() {
        assert_eq!(round_trip("0"), "0");
        assert_eq!(round_trip("42"), "42");
        assert_eq!(round_trip("-7"), "-7");
        assert_eq!(round_trip("123456789"), "123456789");
    }

    #[test]
    fn round_trips_decimals() {
        assert_eq!(round_trip("3.14"), "3.14");
        assert_eq!(round_trip("-0.5"), "-0.5");
        assert_eq!(round_trip("100.00"), "100.00");
        assert_eq!(round_trip("0.001"), "0.001");
    }

    #[test]
    fn round_trips_nan() {
        assert_eq!(round_trip("NaN"), "NaN");
    }
}
