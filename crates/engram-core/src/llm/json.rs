//! Tolerant JSON extraction from model output
//!
//! Models frame JSON three ways: raw, inside a generic code fence, or inside
//! a ```json fence. All are accepted; anything else is a parse failure the
//! caller logs and skips.

/// Locate the JSON object inside model output. Returns the slice from the
/// first `{` to the last `}` after stripping any code fences.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest)
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest)
    } else {
        trimmed
    };
    let start = inner.find('{')?;
    let end = inner.rfind('}')?;
    (end >= start).then(|| &inner[start..=end])
}

/// Deserialize a JSON object out of tolerant framing.
pub fn parse_json_block<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, String> {
    let block = extract_json_block(text).ok_or_else(|| "no JSON object in output".to_string())?;
    serde_json::from_str(block).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize, PartialEq, Debug)]
    struct Payload {
        value: i32,
    }

    #[test]
    fn raw_json_parses() {
        let parsed: Payload = parse_json_block(r#"{"value": 7}"#).unwrap();
        assert_eq!(parsed, Payload { value: 7 });
    }

    #[test]
    fn fenced_json_parses() {
        let parsed: Payload = parse_json_block("```json\n{\"value\": 7}\n```").unwrap();
        assert_eq!(parsed.value, 7);

        let parsed: Payload = parse_json_block("```\n{\"value\": 3}\n```").unwrap();
        assert_eq!(parsed.value, 3);
    }

    #[test]
    fn json_with_prose_around_it_parses() {
        let parsed: Payload =
            parse_json_block("Here is the result:\n{\"value\": 5}\nHope that helps!").unwrap();
        assert_eq!(parsed.value, 5);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_json_block::<Payload>("no json here").is_err());
        assert!(parse_json_block::<Payload>("{\"value\": }").is_err());
    }
}
