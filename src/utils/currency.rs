/// Currency helpers for negotiated prices.
///
/// Prices are whole tögrög (MNT) stored as i64. There is no minor unit, so
/// nothing here goes through floating point except display percentages.
use serde::{Deserialize, Serialize};

/// Format whole tögrög with thousands separators, e.g. `₮350,000`.
pub fn format_tugrik(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if amount < 0 {
        format!("-₮{}", grouped)
    } else {
        format!("₮{}", grouped)
    }
}

/// Price after a percentage discount, rounded half up to a whole unit.
/// Rounds exactly once so repeated suggestions never drift.
pub fn discounted_price(base: i64, percent: u32) -> i64 {
    let percent = i128::from(percent.min(100));
    // Widened so any i64 base survives the multiply; the result never
    // exceeds `base` in magnitude.
    ((i128::from(base) * (100 - percent) + 50) / 100) as i64
}

/// Counter-offer amounts a UI can suggest from `base`.
pub fn suggested_counter_offers(base: i64) -> Vec<i64> {
    let mut amounts: Vec<i64> = [5, 10, 15]
        .iter()
        .map(|p| discounted_price(base, *p))
        .filter(|amount| *amount > 0 && *amount < base)
        .collect();
    amounts.dedup();
    amounts
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PriceDelta {
    /// `amount - reference`; negative is below the listed price.
    pub amount: i64,
    /// Relative to the reference, one decimal place.
    pub percent: f64,
}

pub fn price_delta(reference: i64, amount: i64) -> Option<PriceDelta> {
    if reference <= 0 {
        return None;
    }
    let delta = amount - reference;
    let percent = (delta as f64 * 1000.0 / reference as f64).round() / 10.0;
    Some(PriceDelta { amount: delta, percent })
}
