use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Net holding for one ticker as reported by a broker.
/// Quantity is signed: positive long, negative short.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub qty: f64,
    pub avg_price: f64,
}

impl PositionSnapshot {
    pub fn new(qty: f64, avg_price: f64) -> Self {
        Self { qty, avg_price }
    }
}

/// ticker -> snapshot
pub type PositionBook = HashMap<String, PositionSnapshot>;

/// Outcome of applying one fill to an existing holding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEffect {
    /// `None` when the fill flattens the position.
    pub position: Option<PositionSnapshot>,
    /// PnL realized by the part of the fill that reduced the old holding.
    pub realized: f64,
}

/// Apply a fill of `signed_qty` at `price` to `old`.
///
/// Average price follows `(|old_qty| * old_avg + qty * price) / max(|new_qty|, 1)`
/// for every non-flattening fill. Realized PnL is booked only on the closed
/// portion, `min(qty, |old_qty|)`.
pub fn apply_fill(old: Option<PositionSnapshot>, signed_qty: f64, price: f64) -> FillEffect {
    let qty = signed_qty.abs();
    let Some(old) = old else {
        return FillEffect {
            position: Some(PositionSnapshot::new(signed_qty, price)),
            realized: 0.0,
        };
    };

    let new_qty = old.qty + signed_qty;
    let reducing = old.qty != 0.0 && old.qty.signum() != signed_qty.signum();
    let realized = if reducing {
        qty.min(old.qty.abs()) * (price - old.avg_price) * old.qty.signum()
    } else {
        0.0
    };

    if new_qty == 0.0 {
        return FillEffect {
            position: None,
            realized,
        };
    }

    let avg_price = (old.qty.abs() * old.avg_price + qty * price) / new_qty.abs().max(1.0);
    FillEffect {
        position: Some(PositionSnapshot::new(new_qty, avg_price)),
        realized,
    }
}
