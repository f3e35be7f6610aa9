//! Broker Descriptors
//!
//! Everything that differs between brokers is data: transport, login and
//! profile tools, argument rewrites, and how to spot a placeholder profile.
//! The protocol clients are generic over these descriptors.

mod expiry;
mod placeholder;
mod remap;

pub use expiry::{is_token_expiry, ExpirySignal};
pub use placeholder::PlaceholderRule;
pub use remap::{remap_arguments, ArgumentRule, ToolScope};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{BrokerError, Result};

/// How a broker is reached
#[derive(Clone, Debug)]
pub enum Transport {
    /// JSON-RPC tool server with a session handshake
    Mcp { endpoint: String },
    /// Bearer-token REST API described by a route table
    Rest {
        base_url: String,
        authorize: AuthorizeConfig,
        routes: Vec<RestRoute>,
    },
}

/// OAuth authorize dialog parameters for REST brokers
#[derive(Clone, Debug, Default)]
pub struct AuthorizeConfig {
    pub url: String,
    pub client_id: String,
    pub redirect_uri: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A REST endpoint exposed to the model as a tool
#[derive(Clone, Debug)]
pub struct RestRoute {
    pub tool: String,
    pub description: String,
    pub method: HttpMethod,
    pub path: String,
    /// Arguments sent as query parameters; the rest go in the JSON body
    pub query: Vec<String>,
    /// Native input schema, normalized like any other broker schema
    pub input_schema: Value,
}

impl RestRoute {
    fn get(tool: &str, description: &str, path: &str) -> Self {
        Self {
            tool: tool.into(),
            description: description.into(),
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    fn with_query(mut self, params: &[&str], input_schema: Value) -> Self {
        self.query = params.iter().map(ToString::to_string).collect();
        self.input_schema = input_schema;
        self
    }
}

/// Per-broker conventions
#[derive(Clone, Debug)]
pub struct BrokerSpec {
    /// Registry key, lowercase
    pub name: String,
    pub display_name: String,
    pub transport: Transport,
    /// Tool that returns the user-facing login URL (tool-server brokers)
    pub login_tool: Option<String>,
    /// Protected tool used to verify a completed login
    pub profile_tool: String,
    pub holdings_tool: Option<String>,
    pub positions_tool: Option<String>,
    pub argument_rules: Vec<ArgumentRule>,
    pub placeholder: PlaceholderRule,
    /// Error fragments meaning the broker token has expired
    pub expiry_signals: Vec<ExpirySignal>,
}

impl BrokerSpec {
    /// Zerodha Kite hosted tool server
    pub fn kite(endpoint: impl Into<String>) -> Self {
        let quote_tools = ToolScope::only(["get_quotes", "get_ltp", "get_ohlc"]);
        Self {
            name: "kite".into(),
            display_name: "Zerodha Kite".into(),
            transport: Transport::Mcp { endpoint: endpoint.into() },
            login_tool: Some("login".into()),
            profile_tool: "get_profile".into(),
            holdings_tool: Some("get_holdings".into()),
            positions_tool: Some("get_positions".into()),
            argument_rules: vec![ArgumentRule::qualify(quote_tools, "instruments", "NSE:", "")],
            placeholder: PlaceholderRule::AnyOf(vec![
                PlaceholderRule::text_contains(["please log in", "not logged in", "login required"]),
                PlaceholderRule::FieldEquals {
                    pointer: "/user_name".into(),
                    values: vec!["Demo User".into(), "Guest".into()],
                },
            ]),
            expiry_signals: vec![ExpirySignal::code("TokenException")],
        }
    }

    /// Fyers tool server
    pub fn fyers(endpoint: impl Into<String>) -> Self {
        let quote_tools = ToolScope::only(["get_quotes", "get_market_depth"]);
        Self {
            name: "fyers".into(),
            display_name: "Fyers".into(),
            transport: Transport::Mcp { endpoint: endpoint.into() },
            login_tool: Some("login".into()),
            profile_tool: "get_profile".into(),
            holdings_tool: Some("get_holdings".into()),
            positions_tool: Some("get_positions".into()),
            argument_rules: vec![
                ArgumentRule::rename(quote_tools.clone(), "instruments", "symbols"),
                ArgumentRule::qualify(quote_tools, "symbols", "NSE:", "-EQ"),
            ],
            placeholder: PlaceholderRule::AnyOf(vec![
                PlaceholderRule::text_contains(["please log in", "not authenticated"]),
                PlaceholderRule::MissingField("/fy_id".into()),
            ]),
            expiry_signals: vec![ExpirySignal::phrase("token expired"), ExpirySignal::phrase("invalid token")],
        }
    }

    /// Upstox REST API
    pub fn upstox(base_url: impl Into<String>, authorize: AuthorizeConfig) -> Self {
        let instrument_list = json!({
            "type": "object",
            "properties": {"instruments": {"type": "array", "description": "Trading symbols, e.g. SBIN"}},
            "required": ["instruments"]
        });
        let routes = vec![
            RestRoute::get("get_profile", "Account profile of the logged-in user", "/v2/user/profile"),
            RestRoute::get("get_holdings", "Long-term holdings with average price and P&L", "/v2/portfolio/long-term-holdings"),
            RestRoute::get("get_positions", "Open intraday and carry-forward positions", "/v2/portfolio/short-term-positions"),
            RestRoute::get("get_funds", "Available margin and funds", "/v2/user/get-funds-and-margin"),
            RestRoute::get("get_quotes", "Full market quotes for instruments", "/v2/market-quote/quotes")
                .with_query(&["instrument_key"], instrument_list.clone()),
            RestRoute::get("get_ltp", "Last traded price for instruments", "/v2/market-quote/ltp")
                .with_query(&["instrument_key"], instrument_list),
            RestRoute::get("search_instruments", "Find instrument keys by company name or symbol", "/v2/instruments/search")
                .with_query(
                    &["query"],
                    json!({
                        "type": "object",
                        "properties": {"query": {"type": "string", "description": "Company name or trading symbol"}},
                        "required": ["query"]
                    }),
                ),
        ];
        let quote_tools = ToolScope::only(["get_quotes", "get_ltp"]);

        Self {
            name: "upstox".into(),
            display_name: "Upstox".into(),
            transport: Transport::Rest {
                base_url: base_url.into(),
                authorize,
                routes,
            },
            login_tool: None,
            profile_tool: "get_profile".into(),
            holdings_tool: Some("get_holdings".into()),
            positions_tool: Some("get_positions".into()),
            argument_rules: vec![
                ArgumentRule::rename(quote_tools.clone(), "instruments", "instrument_key"),
                ArgumentRule::qualify(quote_tools, "instrument_key", "NSE_EQ|", ""),
            ],
            placeholder: PlaceholderRule::MissingField("/data/user_id".into()),
            expiry_signals: vec![ExpirySignal::code("UDAPI100050"), ExpirySignal::HttpStatus(401)],
        }
    }

    pub const fn is_rest(&self) -> bool {
        matches!(self.transport, Transport::Rest { .. })
    }

    /// Whether a failed tool call means the broker token has expired
    pub fn is_token_expiry(&self, result: &agent_core::ToolResult) -> bool {
        is_token_expiry(&self.expiry_signals, result)
    }
}

/// Brokers available to sessions, keyed by lowercase name
#[derive(Clone, Debug, Default)]
pub struct BrokerCatalog {
    brokers: BTreeMap<String, Arc<BrokerSpec>>,
}

impl BrokerCatalog {
    pub fn new(specs: impl IntoIterator<Item = BrokerSpec>) -> Self {
        Self {
            brokers: specs
                .into_iter()
                .map(|spec| (spec.name.to_lowercase(), Arc::new(spec)))
                .collect(),
        }
    }

    /// Built-in brokers with endpoints taken from the environment
    pub fn from_env() -> Self {
        let var = |name: &str, default: &str| std::env::var(name).unwrap_or_else(|_| default.to_string());

        Self::new([
            BrokerSpec::kite(var("KITE_MCP_URL", "https://mcp.kite.trade/mcp")),
            BrokerSpec::fyers(var("FYERS_MCP_URL", "https://mcp.fyers.in/mcp")),
            BrokerSpec::upstox(
                var("UPSTOX_API_URL", "https://api.upstox.com"),
                AuthorizeConfig {
                    url: var("UPSTOX_AUTHORIZE_URL", "https://api.upstox.com/v2/login/authorization/dialog"),
                    client_id: var("UPSTOX_CLIENT_ID", ""),
                    redirect_uri: var("UPSTOX_REDIRECT_URI", "http://localhost:3000/api/brokers/upstox/callback"),
                },
            ),
        ])
    }

    pub fn get(&self, name: &str) -> Result<Arc<BrokerSpec>> {
        self.brokers
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| BrokerError::UnknownBroker(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.brokers.keys().map(String::as_str)
    }

    pub fn specs(&self) -> impl Iterator<Item = &Arc<BrokerSpec>> {
        self.brokers.values()
    }

    pub fn len(&self) -> usize {
        self.brokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }
}
