//! Token-expiry detection on failed tool calls

use agent_core::ToolResult;

/// Where broker error codes sit in a failure payload
const CODE_POINTERS: [&str; 4] = ["/errors/0/errorCode", "/errors/0/error_code", "/error_type", "/code"];

/// One way a broker reports that its access token is no longer valid
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpirySignal {
    /// REST failure carrying this HTTP status
    HttpStatus(u16),
    /// Broker error code, read from the payload or as a whole word of the
    /// message (case-sensitive)
    ErrorCode(String),
    /// Multi-word phrase in the message (case-insensitive)
    Phrase(String),
}

impl ExpirySignal {
    pub fn code(code: impl Into<String>) -> Self {
        Self::ErrorCode(code.into())
    }

    pub fn phrase(phrase: impl Into<String>) -> Self {
        Self::Phrase(phrase.into().to_lowercase())
    }

    pub fn matches(&self, result: &ToolResult) -> bool {
        let Some(error) = result.error.as_deref() else {
            return false;
        };
        match self {
            Self::HttpStatus(code) => http_status(error) == Some(*code),
            Self::ErrorCode(code) => {
                CODE_POINTERS
                    .iter()
                    .filter_map(|p| result.raw_payload.pointer(p))
                    .any(|v| v.as_str() == Some(code.as_str()) || v.as_i64().is_some_and(|n| n.to_string() == *code))
                    || words(error).any(|w| w == code.as_str())
            }
            Self::Phrase(phrase) => error.to_lowercase().contains(phrase.as_str()),
        }
    }
}

/// Status of a REST failure, from the `HTTP <code> <reason>: ...` prefix
fn http_status(error: &str) -> Option<u16> {
    error
        .strip_prefix("HTTP ")?
        .split([' ', ':'])
        .next()?
        .parse()
        .ok()
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

/// Whether any signal reports an expired token
pub fn is_token_expiry(signals: &[ExpirySignal], result: &ToolResult) -> bool {
    result.error.is_some() && signals.iter().any(|s| s.matches(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failed(message: &str) -> ToolResult {
        ToolResult::failure(message)
    }

    #[test]
    fn test_http_status_reads_the_prefix_only() {
        let unauthorized = ExpirySignal::HttpStatus(401);
        assert!(unauthorized.matches(&failed("HTTP 401 Unauthorized: Invalid token used to access API")));
        assert!(!unauthorized.matches(&failed("HTTP 400 Bad Request: Invalid instrument key NSE_EQ|INE401A01015")));
        assert!(!unauthorized.matches(&failed("quota 401 of 500 used")));
    }

    #[test]
    fn test_error_code_from_payload_or_whole_word() {
        let code = ExpirySignal::code("UDAPI100050");
        let from_payload = failed("HTTP 401 Unauthorized: Invalid token")
            .with_raw(json!({"status": "error", "errors": [{"errorCode": "UDAPI100050"}]}));
        assert!(code.matches(&from_payload));
        assert!(code.matches(&failed("UDAPI100050: token invalid")));
        assert!(!code.matches(&failed("see XUDAPI1000501 for details")));
    }

    #[test]
    fn test_success_never_expires() {
        let ok = ToolResult::success(json!({"code": "UDAPI100050"}), "fine");
        assert!(!is_token_expiry(&[ExpirySignal::code("UDAPI100050")], &ok));
    }
}
