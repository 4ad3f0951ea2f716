//! WAD fixed-point helpers (18 decimals)

use alloy_primitives::U256;

pub const WAD_DECIMALS: u8 = 18;

/// 1.0 in WAD representation
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Whole units scaled to WAD
pub fn wad(units: u64) -> U256 {
    U256::from(units) * WAD
}

/// Lossy conversion for percentage math and display
pub fn u256_to_f64(value: U256) -> f64 {
    // A decimal string of digits always parses; very large values saturate to inf
    value.to_string().parse().unwrap_or(f64::INFINITY)
}

/// Human readable WAD, e.g. `102.5`
pub fn format_wad(value: U256) -> String {
    let units = value / WAD;
    let frac = value % WAD;
    if frac.is_zero() {
        return units.to_string();
    }
    let frac = format!("{:0>18}", frac.to_string());
    format!("{}.{}", units, frac.trim_end_matches('0'))
}
