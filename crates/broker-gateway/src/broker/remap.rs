//! Argument Remapping
//!
//! The model is told to pass plain trading symbols under generic field
//! names. Each broker expects its own field names and exchange-qualified
//! instrument identifiers, so arguments are rewritten from a per-broker rule
//! table right before dispatch.

use serde_json::{Map, Value};

/// Which tools a rule applies to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolScope {
    All,
    Only(Vec<String>),
}

impl ToolScope {
    pub fn only<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(tools.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, tool: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(tools) => tools.iter().any(|t| t == tool),
        }
    }
}

/// One rewrite applied to a tool's argument object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgumentRule {
    /// Move the value of `from` to `to` unless `to` is already set
    RenameField { scope: ToolScope, from: String, to: String },

    /// Turn bare symbols in `field` into `{prefix}{SYMBOL}{suffix}`.
    ///
    /// Values that already carry an exchange separator (`:` or `|`) are left
    /// untouched so a rule can be applied twice safely.
    QualifySymbols {
        scope: ToolScope,
        field: String,
        prefix: String,
        suffix: String,
    },
}

impl ArgumentRule {
    pub fn rename(scope: ToolScope, from: &str, to: &str) -> Self {
        Self::RenameField {
            scope,
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn qualify(scope: ToolScope, field: &str, prefix: &str, suffix: &str) -> Self {
        Self::QualifySymbols {
            scope,
            field: field.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    const fn scope(&self) -> &ToolScope {
        match self {
            Self::RenameField { scope, .. } | Self::QualifySymbols { scope, .. } => scope,
        }
    }

    fn apply(&self, args: &mut Map<String, Value>) {
        match self {
            Self::RenameField { from, to, .. } => {
                if args.contains_key(to) {
                    return;
                }
                if let Some(value) = args.remove(from) {
                    args.insert(to.clone(), value);
                }
            }
            Self::QualifySymbols { field, prefix, suffix, .. } => {
                let Some(value) = args.get_mut(field) else {
                    return;
                };
                match value {
                    Value::String(symbol) => *symbol = qualify(symbol, prefix, suffix),
                    Value::Array(items) => {
                        for item in items.iter_mut() {
                            if let Value::String(symbol) = item {
                                *symbol = qualify(symbol, prefix, suffix);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

fn qualify(symbol: &str, prefix: &str, suffix: &str) -> String {
    let symbol = symbol.trim();
    if symbol.is_empty() || symbol.contains([':', '|']) {
        return symbol.to_string();
    }
    format!("{prefix}{}{suffix}", symbol.to_uppercase())
}

/// Apply every rule in order to `args` for a call to `tool`.
///
/// Non-object arguments pass through unchanged.
pub fn remap_arguments(rules: &[ArgumentRule], tool: &str, args: Value) -> Value {
    let Value::Object(mut map) = args else {
        return args;
    };
    for rule in rules.iter().filter(|r| r.scope().matches(tool)) {
        rule.apply(&mut map);
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote_rules() -> Vec<ArgumentRule> {
        let scope = ToolScope::only(["get_quotes", "get_ltp"]);
        vec![
            ArgumentRule::rename(scope.clone(), "instruments", "symbols"),
            ArgumentRule::qualify(scope, "symbols", "NSE:", "-EQ"),
        ]
    }

    #[test]
    fn test_bare_symbols_are_qualified() {
        let rules = vec![ArgumentRule::qualify(ToolScope::All, "instruments", "NSE:", "")];
        let out = remap_arguments(&rules, "get_quotes", json!({"instruments": ["SBIN", "infy"]}));
        assert_eq!(out, json!({"instruments": ["NSE:SBIN", "NSE:INFY"]}));
    }

    #[test]
    fn test_rename_then_qualify() {
        let out = remap_arguments(&quote_rules(), "get_quotes", json!({"instruments": ["SBIN"], "mode": "full"}));
        assert_eq!(out, json!({"symbols": ["NSE:SBIN-EQ"], "mode": "full"}));
    }

    #[test]
    fn test_qualified_symbols_are_left_alone() {
        let out = remap_arguments(&quote_rules(), "get_quotes", json!({"symbols": ["BSE:TCS-A", "NSE_EQ|INE062A01020"]}));
        assert_eq!(out, json!({"symbols": ["BSE:TCS-A", "NSE_EQ|INE062A01020"]}));
    }

    #[test]
    fn test_scope_limits_rules() {
        let args = json!({"instruments": ["SBIN"]});
        assert_eq!(remap_arguments(&quote_rules(), "get_holdings", args.clone()), args);
    }

    #[test]
    fn test_single_string_and_non_object_args() {
        let rules = vec![ArgumentRule::qualify(ToolScope::All, "instrument", "NSE:", "")];
        assert_eq!(remap_arguments(&rules, "t", json!({"instrument": " sbin "})), json!({"instrument": "NSE:SBIN"}));
        assert_eq!(remap_arguments(&rules, "t", json!("raw")), json!("raw"));
    }
}
