//! End-to-end checks of the decision-to-execution bridge: free-form model
//! text in, exchange order parameters out.

use binance_llm_agent::exchange::order::{build_futures_order_params, close_order_for};
use binance_llm_agent::exchange::{Position, PositionSide};
use binance_llm_agent::llm::{parse_directive, DirectiveAction};

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

#[test]
fn noisy_model_output_becomes_executable_order_params() {
    let response = "Let me think about this market.\n\
        The RSI suggests momentum is building.\n\
        {\"action\":\"OPEN_LONG\",\"confidence\":82,\"reasoning\":\"momentum\",\"leverage\":20,\"position_size\":40}\n\
        Hope that helps!";

    let directive = parse_directive(response);
    assert_eq!(directive.action, DirectiveAction::OpenLong);

    // Sizing policy is the caller's; here we just exercise the translation.
    let params = build_futures_order_params(
        "BTCUSDT",
        "BUY",
        "MARKET",
        Some(0.25),
        None,
        PositionSide::Both,
        false,
        "GTC",
    );
    assert_eq!(param(&params, "symbol"), Some("BTCUSDT"));
    assert_eq!(param(&params, "side"), Some("BUY"));
    assert_eq!(param(&params, "reduceOnly"), Some("false"));
    assert_eq!(param(&params, "quantity"), Some("0.25"));
    assert!(param(&params, "timeInForce").is_none());
    assert!(param(&params, "price").is_none());
}

#[test]
fn unparseable_output_never_produces_an_order_intent() {
    for garbage in [
        "",
        "HOLD",
        "I cannot help with that.",
        "{broken json",
        "}{",
        "null",
        "[1,2,3]",
    ] {
        let directive = parse_directive(garbage);
        assert_eq!(
            directive.action,
            DirectiveAction::Hold,
            "input {:?} must degrade to HOLD",
            garbage
        );
    }
}

#[test]
fn close_directive_maps_onto_opposing_market_order() {
    let directive = parse_directive(r#"{"action":"CLOSE","confidence":95,"reasoning":"take profit"}"#);
    assert_eq!(directive.action, DirectiveAction::Close);

    let short: Position = serde_json::from_str(
        r#"{"symbol":"ETHUSDT","positionAmt":"-4.0","positionSide":"SHORT"}"#,
    )
    .unwrap();
    let (side, qty) = close_order_for(&short);

    let params = build_futures_order_params(
        "ETHUSDT",
        side,
        "MARKET",
        Some(qty),
        None,
        short.position_side,
        false,
        "GTC",
    );
    assert_eq!(param(&params, "side"), Some("BUY"));
    assert_eq!(param(&params, "quantity"), Some("4"));
    assert_eq!(param(&params, "positionSide"), Some("SHORT"));
}

#[test]
fn directive_wire_shape_is_flat_and_complete() {
    let directive = parse_directive(r#"{"action":"OPEN_SHORT","confidence":60}"#);
    let wire = serde_json::to_value(&directive).unwrap();
    let obj = wire.as_object().unwrap();

    for key in [
        "action",
        "confidence",
        "reasoning",
        "leverage",
        "position_size",
        "stop_loss_pct",
        "take_profit_pct",
        "narrative",
    ] {
        assert!(obj.contains_key(key), "missing wire field {}", key);
    }
    assert!(obj.values().all(|v| !v.is_null()));
}
