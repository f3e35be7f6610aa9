//! Placeholder Profile Detection
//!
//! Some brokers answer a profile request before the user has finished the
//! browser login, returning canned text or a demo account instead of an
//! error. Each broker declares how to recognise that response.

use agent_core::ToolResult;
use serde_json::Value;

/// Heuristic deciding whether a profile response is a placeholder
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaceholderRule {
    /// Trust any successful response
    Never,
    /// Any marker appears in the text (case-insensitive)
    TextContains(Vec<String>),
    /// The field at a JSON pointer equals one of the values (case-insensitive)
    FieldEquals { pointer: String, values: Vec<String> },
    /// The structured payload lacks the field at a JSON pointer, or has no
    /// structured payload at all
    MissingField(String),
    AnyOf(Vec<PlaceholderRule>),
}

impl PlaceholderRule {
    pub fn text_contains<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::TextContains(markers.into_iter().map(Into::into).collect())
    }

    /// Whether `profile` is a placeholder rather than real account data
    pub fn is_placeholder_response(&self, profile: &ToolResult) -> bool {
        let structured = profile.structured().ok().or_else(|| {
            // REST responses carry their payload directly
            (!profile.raw_payload.is_null() && !profile.raw_payload.is_string())
                .then(|| profile.raw_payload.clone())
        });
        self.matches(profile, structured.as_ref())
    }

    fn matches(&self, profile: &ToolResult, structured: Option<&Value>) -> bool {
        match self {
            Self::Never => false,
            Self::TextContains(markers) => {
                let text = profile.text.to_lowercase();
                markers.iter().any(|m| text.contains(&m.to_lowercase()))
            }
            Self::FieldEquals { pointer, values } => structured
                .and_then(|v| v.pointer(pointer))
                .and_then(Value::as_str)
                .is_some_and(|found| values.iter().any(|v| v.eq_ignore_ascii_case(found.trim()))),
            Self::MissingField(pointer) => structured
                .and_then(|v| v.pointer(pointer))
                .is_none_or(|v| v.is_null() || v.as_str().is_some_and(str::is_empty)),
            Self::AnyOf(rules) => rules.iter().any(|r| r.matches(profile, structured)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(text: &str) -> ToolResult {
        ToolResult::success(Value::Null, text)
    }

    #[test]
    fn test_text_markers() {
        let rule = PlaceholderRule::text_contains(["please log in"]);
        assert!(rule.is_placeholder_response(&profile("Please log in using the login tool first.")));
        assert!(!rule.is_placeholder_response(&profile(r#"{"user_id": "AB1234"}"#)));
    }

    #[test]
    fn test_field_equals_demo_account() {
        let rule = PlaceholderRule::FieldEquals {
            pointer: "/user_name".into(),
            values: vec!["Demo User".into()],
        };
        assert!(rule.is_placeholder_response(&profile(r#"Profile: {"user_name": "demo user"}"#)));
        assert!(!rule.is_placeholder_response(&profile(r#"{"user_name": "Asha Rao"}"#)));
    }

    #[test]
    fn test_missing_field_uses_raw_payload() {
        let rule = PlaceholderRule::MissingField("/data/user_id".into());
        let real = ToolResult::success(json!({"data": {"user_id": "7X99"}}), "");
        let empty = ToolResult::success(json!({"data": {"user_id": ""}}), "");

        assert!(!rule.is_placeholder_response(&real));
        assert!(rule.is_placeholder_response(&empty));
        assert!(rule.is_placeholder_response(&profile("welcome!")));
    }

    #[test]
    fn test_any_of() {
        let rule = PlaceholderRule::AnyOf(vec![
            PlaceholderRule::Never,
            PlaceholderRule::text_contains(["not logged in"]),
        ]);
        assert!(rule.is_placeholder_response(&profile("You are NOT LOGGED IN")));
        assert!(!PlaceholderRule::Never.is_placeholder_response(&profile("anything")));
    }
}
