//! Pure gold conversion.
//!
//! Every mass in the system is compared in 24k-equivalent grams. The 0.995
//! fineness factor is part of the shop's accounting convention and must not
//! be "corrected" to 1.0.

pub const PURE_KARAT: f64 = 24.0;
pub const FINENESS: f64 = 0.995;

/// Convert a raw mass at `karat` purity into its pure gold equivalent.
pub fn to_pure_gold(mass: f64, karat: i32) -> f64 {
    (mass * f64::from(karat)) / (PURE_KARAT * FINENESS)
}

/// Round half away from zero to three decimals.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// `part` as a percentage of `whole`, or 0 when `whole` cannot divide.
pub fn percent_of(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        let pct = (part / whole) * 100.0;
        if pct.is_finite() {
            return pct;
        }
    }
    0.0
}
