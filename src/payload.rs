//! Wire payload decoding. Every decoder is a pure function that returns
//! `None` for anything it cannot interpret; callers log and drop the message.

use serde_json::Value as Json;

/// Extract a numeric value from a payload.
///
/// Structured decode is attempted first: if the payload parses as a JSON
/// object, the `value` field (and only that field) is used; a string-encoded
/// number in that field counts. Otherwise the trimmed payload text is parsed
/// directly as a float. A JSON object without a usable `value` field yields
/// `None` rather than falling back to text.
pub fn decode_numeric(payload: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    if let Ok(json) = serde_json::from_str::<Json>(text) {
        if let Some(obj) = json.as_object() {
            return obj.get("value").and_then(|v| {
                v.as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            });
        }
    }
    text.parse().ok()
}

/// Walk a dotted path (`"a.b.c"`) through nested JSON objects.
fn json_attribute<'a>(data: &'a Json, path: &str) -> Option<&'a Json> {
    let mut current = data;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Render a JSON scalar the way it is compared: booleans as `true`/`false`,
/// numbers as their decimal text, strings verbatim.
fn scalar_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Boolean-state decoder built from configured ON/OFF payload templates.
///
/// Two comparisons are supported at the same time: a structured one, active
/// when a template itself parses as a single-key JSON object (the named
/// field of the incoming payload is compared against the template's value),
/// and a raw case-insensitive string comparison. Structured wins; raw is the
/// fallback; neither matching means no state.
#[derive(Debug, Clone)]
pub struct BoolMatcher {
    on_raw: String,
    off_raw: String,
    on_json: Option<(String, String)>,
    off_json: Option<(String, String)>,
}

impl BoolMatcher {
    pub fn new(on_template: &str, off_template: &str) -> Self {
        Self {
            on_raw: on_template.to_string(),
            off_raw: off_template.to_string(),
            on_json: Self::template_key_value(on_template),
            off_json: Self::template_key_value(off_template),
        }
    }

    /// A template enables structured comparison only when it is a JSON
    /// object with exactly one key.
    fn template_key_value(template: &str) -> Option<(String, String)> {
        let json: Json = serde_json::from_str(template).ok()?;
        let obj = json.as_object()?;
        if obj.len() != 1 {
            return None;
        }
        let (key, value) = obj.iter().next()?;
        Some((key.clone(), scalar_text(value)))
    }

    pub fn decode(&self, payload: &[u8]) -> Option<bool> {
        let text = std::str::from_utf8(payload).ok()?.trim();

        // Raw-comparison candidate; replaced by the JSON `value` field when
        // the payload is an object carrying one.
        let mut candidate: Option<String> = None;

        if let Ok(json) = serde_json::from_str::<Json>(text) {
            if let Some((key, want)) = &self.on_json {
                if let Some(found) = json_attribute(&json, key) {
                    if scalar_text(found).eq_ignore_ascii_case(want) {
                        return Some(true);
                    }
                }
            }
            if let Some((key, want)) = &self.off_json {
                if let Some(found) = json_attribute(&json, key) {
                    if scalar_text(found).eq_ignore_ascii_case(want) {
                        return Some(false);
                    }
                }
            }
            if let Some(value) = json.as_object().and_then(|o| o.get("value")) {
                candidate = Some(scalar_text(value));
            }
        }

        let candidate = candidate.unwrap_or_else(|| text.to_string());
        if candidate.eq_ignore_ascii_case(&self.on_raw) {
            Some(true)
        } else if candidate.eq_ignore_ascii_case(&self.off_raw) {
            Some(false)
        } else {
            None
        }
    }
}

/// Round to two decimal places, the resolution every derived quantity and
/// published numeric value uses.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_plain_text() {
        assert_eq!(decode_numeric(b"23.5"), Some(23.5));
        assert_eq!(decode_numeric(b"  42 \n"), Some(42.0));
        assert_eq!(decode_numeric(b"-3"), Some(-3.0));
    }

    #[test]
    fn numeric_json_value_field() {
        assert_eq!(decode_numeric(br#"{"value": 12.75}"#), Some(12.75));
        assert_eq!(decode_numeric(br#"{"value": 0}"#), Some(0.0));
    }

    #[test]
    fn numeric_json_string_value_field() {
        // Sensors that quote their readings still decode.
        assert_eq!(decode_numeric(br#"{"value": "12.5"}"#), Some(12.5));
        assert_eq!(decode_numeric(br#"{"value": " 42 "}"#), Some(42.0));
        assert_eq!(decode_numeric(br#"{"value": "warm"}"#), None);
    }

    #[test]
    fn numeric_json_without_value_is_rejected() {
        // An object lacking `value` must not fall back to text parsing.
        assert_eq!(decode_numeric(br#"{"level": 50}"#), None);
        assert_eq!(decode_numeric(br#""23.5""#), None);
        assert_eq!(decode_numeric(b"not a number"), None);
        assert_eq!(decode_numeric(&[0xff, 0xfe]), None);
    }

    #[test]
    fn raw_comparison_case_insensitive() {
        let m = BoolMatcher::new("ON", "OFF");
        assert_eq!(m.decode(b"on"), Some(true));
        assert_eq!(m.decode(b"Off"), Some(false));
        assert_eq!(m.decode(b" ON \n"), Some(true));
        assert_eq!(m.decode(b"toggle"), None);
    }

    #[test]
    fn structured_comparison_beats_raw() {
        // Template is both a raw target and a single-key JSON object. A
        // payload that differs verbatim in whitespace fails the raw compare
        // but must still decode via the structured compare.
        let m = BoolMatcher::new(r#"{"output": true}"#, r#"{"output": false}"#);
        assert_eq!(m.decode(br#"{ "output" : true }"#), Some(true));
        assert_eq!(m.decode(br#"{"output":false}"#), Some(false));
    }

    #[test]
    fn structured_comparison_ignores_value_case() {
        let m = BoolMatcher::new(r#"{"state": "ON"}"#, r#"{"state": "OFF"}"#);
        assert_eq!(m.decode(br#"{"state": "on"}"#), Some(true));
        assert_eq!(m.decode(br#"{"state": "off"}"#), Some(false));
        assert_eq!(m.decode(br#"{"state": "unknown"}"#), None);
    }

    #[test]
    fn json_value_field_feeds_raw_comparison() {
        // When structured compare is inconclusive, the object's `value`
        // field becomes the raw candidate.
        let m = BoolMatcher::new("ON", "OFF");
        assert_eq!(m.decode(br#"{"value": "ON"}"#), Some(true));
        assert_eq!(m.decode(br#"{"value": "off"}"#), Some(false));
    }

    #[test]
    fn nested_attribute_paths() {
        let m = BoolMatcher::new(r#"{"relay.state": "on"}"#, r#"{"relay.state": "off"}"#);
        assert_eq!(m.decode(br#"{"relay": {"state": "on"}}"#), Some(true));
        assert_eq!(m.decode(br#"{"relay": {"state": "off"}}"#), Some(false));
    }

    #[test]
    fn rounding() {
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(0.005), 0.01);
        assert_eq!(round2(100.0), 100.0);
    }
}
