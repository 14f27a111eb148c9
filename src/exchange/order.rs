//! Order-parameter construction.
//!
//! Pure functions so the exact wire payloads can be asserted in tests. Unset
//! values are stripped before transmission: the exchange rejects or silently
//! ignores null-valued keys inconsistently, so they must never be sent.

use super::types::{Position, PositionSide};

/// Build the parameter list for a spot order. `timeInForce` rides along only
/// for LIMIT orders.
pub fn build_spot_order_params(
    symbol: &str,
    side: &str,
    order_type: &str,
    quantity: Option<f64>,
    price: Option<f64>,
    quote_order_qty: Option<f64>,
    time_in_force: &str,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("symbol".to_string(), symbol.to_string()),
        ("side".to_string(), side.to_string()),
        ("type".to_string(), order_type.to_string()),
    ];
    if let Some(q) = quantity {
        params.push(("quantity".to_string(), format_decimal(q)));
    }
    if let Some(p) = price {
        params.push(("price".to_string(), format_decimal(p)));
    }
    if let Some(q) = quote_order_qty {
        params.push(("quoteOrderQty".to_string(), format_decimal(q)));
    }
    if order_type == "LIMIT" {
        params.push(("timeInForce".to_string(), time_in_force.to_string()));
    }
    params
}

/// Build the parameter list for a futures order.
///
/// The opening path is selected by `order_type == "BUY"`, which overloads the
/// order *type* field with a *side* value. That convention is inherited from
/// the system this one replaces and is very likely a latent defect (a MARKET
/// entry order takes the reducing branch); it is kept as observed because
/// callers depend on the emitted parameter sets. See DESIGN.md.
///
/// Opening orders never carry `reduceOnly`; every other type always does, as
/// the string literal `"true"`/`"false"`. The futures wire format expects
/// string booleans there, not native ones.
pub fn build_futures_order_params(
    symbol: &str,
    side: &str,
    order_type: &str,
    quantity: Option<f64>,
    price: Option<f64>,
    position_side: PositionSide,
    reduce_only: bool,
    time_in_force: &str,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("symbol".to_string(), symbol.to_string()),
        ("side".to_string(), side.to_string()),
        ("type".to_string(), order_type.to_string()),
        ("positionSide".to_string(), position_side.to_string()),
    ];
    if order_type != "BUY" {
        params.push(("reduceOnly".to_string(), reduce_only.to_string()));
    }
    if let Some(q) = quantity {
        params.push(("quantity".to_string(), format_decimal(q)));
    }
    if let Some(p) = price {
        params.push(("price".to_string(), format_decimal(p)));
    }
    if order_type == "LIMIT" {
        params.push(("timeInForce".to_string(), time_in_force.to_string()));
    }
    params
}

/// Closing side and quantity for an open position: a market order in the
/// opposite direction of exposure, sized to the absolute amount.
pub fn close_order_for(position: &Position) -> (&'static str, f64) {
    let amount = position.amount();
    let side = if amount > 0.0 { "SELL" } else { "BUY" };
    (side, amount.abs())
}

fn format_decimal(v: f64) -> String {
    // f64 Display never prints trailing zeros or exponent for typical
    // quantities, which is what the exchange expects.
    format!("{}", v)
}
