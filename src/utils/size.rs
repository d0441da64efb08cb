//! Human-readable byte sizes: `10MB`, `1.5GiB`, `4096`. All multiples are binary.

use anyhow::{Result, anyhow, bail};
use byte_unit::{Byte, ByteUnit};

fn unit_for(letter: &str) -> Option<ByteUnit> {
    Some(match letter {
        "" => ByteUnit::B,
        "K" => ByteUnit::KiB,
        "M" => ByteUnit::MiB,
        "G" => ByteUnit::GiB,
        "T" => ByteUnit::TiB,
        "P" => ByteUnit::PiB,
        _ => return None,
    })
}

/// Parse a size string. A unit letter may be followed by `B` or `iB`; either way the multiple is
/// binary, so `10MB` and `10MiB` are the same size. Whole and fractional parts are scaled in
/// integer arithmetic, so large byte counts stay exact.
pub fn parse_size(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    if number.is_empty() {
        bail!("invalid size {:?}: missing number", s);
    }
    let unit = unit.trim().to_ascii_uppercase();
    let letter = unit
        .strip_suffix("IB")
        .or_else(|| unit.strip_suffix('B'))
        .unwrap_or(&unit);
    let Some(unit) = unit_for(letter) else {
        bail!("invalid size {:?}: unknown unit {:?}", s, unit);
    };
    let multiplier: u128 = Byte::from_unit(1.0, unit)
        .map_err(|e| anyhow!("invalid size {:?}: {e}", s))?
        .get_bytes()
        .into();

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let invalid = || anyhow!("invalid size {:?}", s);
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let mut bytes = whole.checked_mul(multiplier).ok_or_else(invalid)?;
    if !fraction.is_empty() {
        let digits: u128 = fraction.parse().map_err(|_| invalid())?;
        let scale = 10u128
            .checked_pow(fraction.len() as u32)
            .ok_or_else(invalid)?;
        let part = digits.checked_mul(multiplier).ok_or_else(invalid)?;
        let rounded = part.checked_add(scale / 2).ok_or_else(invalid)? / scale;
        bytes = bytes.checked_add(rounded).ok_or_else(invalid)?;
    }
    u64::try_from(bytes).map_err(|_| anyhow!("invalid size {:?}: out of range", s))
}

/// Format bytes in the largest binary unit the value exceeds (`1.50 KiB`, `1024 B`).
pub fn format_size(bytes: u64) -> String {
    Byte::from_bytes(u128::from(bytes))
        .get_appropriate_unit(true)
        .to_string()
}
