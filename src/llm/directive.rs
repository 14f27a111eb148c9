use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

const DEFAULT_CONFIDENCE: u8 = 50;
const DEFAULT_LEVERAGE: u32 = 10;
const DEFAULT_POSITION_SIZE: f64 = 30.0;
const DEFAULT_STOP_LOSS_PCT: f64 = 3.0;
const DEFAULT_TAKE_PROFIT_PCT: f64 = 8.0;
const RAW_REASONING_LIMIT: usize = 200;

/// Action requested by the model. Anything unrecognized collapses to `Hold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveAction {
    #[serde(rename = "OPEN_LONG")]
    OpenLong,
    #[serde(rename = "OPEN_SHORT")]
    OpenShort,
    #[serde(rename = "CLOSE")]
    Close,
    #[serde(rename = "HOLD")]
    Hold,
}

impl DirectiveAction {
    fn from_str_lenient(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN_LONG" => Self::OpenLong,
            "OPEN_SHORT" => Self::OpenShort,
            "CLOSE" => Self::Close,
            "HOLD" => Self::Hold,
            _ => Self::Hold,
        }
    }
}

/// Structured trading instruction distilled from one model response.
///
/// Immutable once built; a fresh one is produced per inference call. The
/// serialized form is the flat record consumed by downstream logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingDirective {
    pub action: DirectiveAction,
    pub confidence: u8,
    pub reasoning: String,
    pub leverage: u32,
    pub position_size: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub narrative: String,
}

impl TradingDirective {
    /// Safe fallback when the response text yields nothing usable.
    pub fn hold_default(raw: &str) -> Self {
        Self {
            action: DirectiveAction::Hold,
            confidence: DEFAULT_CONFIDENCE,
            reasoning: truncate_chars(raw, RAW_REASONING_LIMIT),
            leverage: DEFAULT_LEVERAGE,
            position_size: DEFAULT_POSITION_SIZE,
            stop_loss_pct: DEFAULT_STOP_LOSS_PCT,
            take_profit_pct: DEFAULT_TAKE_PROFIT_PCT,
            narrative: String::new(),
        }
    }

    pub fn is_hold(&self) -> bool {
        self.action == DirectiveAction::Hold
    }
}

/// Parse a raw model response into a directive.
///
/// Three tiers, each falling through to the next:
/// 1. strict decode of the whole trimmed response as a JSON object;
/// 2. decode of the first balanced single-level `{...}` span found anywhere
///    in the text (models love to wrap the object in prose or code fences);
/// 3. the HOLD default carrying a truncated prefix of the raw text.
///
/// Never fails and never panics: a caller always gets an actionable directive.
pub fn parse_directive(content: &str) -> TradingDirective {
    let trimmed = content.trim();

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return directive_from_object(&map, content);
    }

    if let Some(span) = first_balanced_object(content) {
        match serde_json::from_str::<Value>(span) {
            Ok(Value::Object(map)) => return directive_from_object(&map, content),
            Ok(_) | Err(_) => {
                warn!("Embedded JSON span did not decode to an object: {}", span);
            }
        }
    }

    warn!(
        "Could not parse model response, defaulting to HOLD: {}",
        truncate_chars(content, RAW_REASONING_LIMIT)
    );
    TradingDirective::hold_default(content)
}

/// Locate the first balanced single-level brace span in `text`.
///
/// A span is `{` followed by anything but braces, then `}`. Whenever another
/// `{` shows up before the close, the scan restarts there, so nested openings
/// resolve to the innermost candidate.
fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start: Option<usize> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'{' => start = Some(i),
            b'}' => {
                if let Some(s) = start {
                    return Some(&text[s..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn directive_from_object(map: &serde_json::Map<String, Value>, raw: &str) -> TradingDirective {
    let action = map
        .get("action")
        .and_then(Value::as_str)
        .map(DirectiveAction::from_str_lenient)
        .unwrap_or(DirectiveAction::Hold);

    let confidence = map
        .get("confidence")
        .and_then(as_f64_lenient)
        .filter(|c| (0.0..=100.0).contains(c))
        .map(|c| c.round() as u8)
        .unwrap_or(DEFAULT_CONFIDENCE);

    let leverage = map
        .get("leverage")
        .and_then(as_f64_lenient)
        .filter(|l| *l >= 1.0)
        .map(|l| l.round() as u32)
        .unwrap_or(DEFAULT_LEVERAGE);

    let position_size = map
        .get("position_size")
        .and_then(as_f64_lenient)
        .unwrap_or(DEFAULT_POSITION_SIZE);

    let stop_loss_pct = map
        .get("stop_loss_pct")
        .and_then(as_f64_lenient)
        .filter(|p| *p >= 0.0)
        .unwrap_or(DEFAULT_STOP_LOSS_PCT);

    let take_profit_pct = map
        .get("take_profit_pct")
        .and_then(as_f64_lenient)
        .filter(|p| *p >= 0.0)
        .unwrap_or(DEFAULT_TAKE_PROFIT_PCT);

    let reasoning = map
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            map.get("narrative")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate_chars(raw, RAW_REASONING_LIMIT));

    let narrative = map
        .get("narrative")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            map.get("reasoning")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();

    TradingDirective {
        action,
        confidence,
        reasoning,
        leverage,
        position_size,
        stop_loss_pct,
        take_profit_pct,
        narrative,
    }
}

/// Models sometimes emit numbers as strings ("85"); accept those too.
fn as_f64_lenient(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_json_parses_strict() {
        let d = parse_directive(
            r#"{"action":"OPEN_LONG","confidence":85,"reasoning":"breakout","leverage":60,"position_size":50}"#,
        );
        assert_eq!(d.action, DirectiveAction::OpenLong);
        assert_eq!(d.confidence, 85);
        assert_eq!(d.leverage, 60);
        assert_eq!(d.position_size, 50.0);
        assert_eq!(d.reasoning, "breakout");
        // Unstated fields take the documented defaults
        assert_eq!(d.stop_loss_pct, 3.0);
        assert_eq!(d.take_profit_pct, 8.0);
    }

    #[test]
    fn json_embedded_in_prose_is_extracted() {
        let d = parse_directive(
            "Sure! Based on the indicators I would say:\n```json\n{\"action\":\"OPEN_SHORT\",\"confidence\":70}\n```\nGood luck!",
        );
        assert_eq!(d.action, DirectiveAction::OpenShort);
        assert_eq!(d.confidence, 70);
    }

    #[test]
    fn first_object_wins_over_later_ones() {
        let d = parse_directive(
            r#"noise {"action":"CLOSE","confidence":90} trailing {"action":"OPEN_LONG"}"#,
        );
        assert_eq!(d.action, DirectiveAction::Close);
        assert_eq!(d.confidence, 90);
    }

    #[test]
    fn nested_opening_brace_restarts_scan() {
        // Prose prefix defeats the strict tier; the scan then resolves the
        // nested opening to the innermost flat span.
        let d = parse_directive(r#"thinking... {"outer": {"action":"CLOSE","confidence":75}}"#);
        assert_eq!(d.action, DirectiveAction::Close);
        assert_eq!(d.confidence, 75);
    }

    #[test]
    fn garbage_defaults_to_hold() {
        let raw = "I refuse to answer in JSON today.";
        let d = parse_directive(raw);
        assert_eq!(d.action, DirectiveAction::Hold);
        assert_eq!(d.confidence, 50);
        assert_eq!(d.leverage, 10);
        assert_eq!(d.position_size, 30.0);
        assert_eq!(d.reasoning, raw);
    }

    #[test]
    fn empty_input_defaults_to_hold() {
        let d = parse_directive("");
        assert_eq!(d.action, DirectiveAction::Hold);
        assert!(d.reasoning.is_empty());
    }

    #[test]
    fn unknown_action_collapses_to_hold() {
        let d = parse_directive(r#"{"action":"YOLO","confidence":99}"#);
        assert_eq!(d.action, DirectiveAction::Hold);
        assert_eq!(d.confidence, 99);
    }

    #[test]
    fn out_of_range_numbers_fall_back() {
        let d = parse_directive(r#"{"action":"HOLD","confidence":250,"leverage":0,"stop_loss_pct":-1}"#);
        assert_eq!(d.confidence, 50);
        assert_eq!(d.leverage, 10);
        assert_eq!(d.stop_loss_pct, 3.0);
    }

    #[test]
    fn stringified_numbers_are_accepted() {
        let d = parse_directive(r#"{"action":"OPEN_LONG","confidence":"85","leverage":"20"}"#);
        assert_eq!(d.confidence, 85);
        assert_eq!(d.leverage, 20);
    }

    #[test]
    fn reasoning_falls_back_to_narrative() {
        let d = parse_directive(r#"{"action":"HOLD","narrative":"range-bound"}"#);
        assert_eq!(d.reasoning, "range-bound");
        assert_eq!(d.narrative, "range-bound");
    }

    #[test]
    fn raw_reasoning_is_truncated() {
        let long = "x".repeat(500);
        let d = parse_directive(&long);
        assert_eq!(d.reasoning.chars().count(), 200);
    }

    #[test]
    fn fully_populated_round_trips() {
        let src = r#"{"action":"OPEN_SHORT","confidence":72,"reasoning":"rsi overbought","leverage":25,"position_size":40.5,"stop_loss_pct":2.5,"take_profit_pct":6.0,"narrative":"fade the pump"}"#;
        let d = parse_directive(src);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["action"], "OPEN_SHORT");
        assert_eq!(json["confidence"], 72);
        assert_eq!(json["reasoning"], "rsi overbought");
        assert_eq!(json["leverage"], 25);
        assert_eq!(json["position_size"], 40.5);
        assert_eq!(json["stop_loss_pct"], 2.5);
        assert_eq!(json["take_profit_pct"], 6.0);
        assert_eq!(json["narrative"], "fade the pump");
    }
}
