//! Portfolio Snapshots
//!
//! After a broker is authenticated the gateway records the user's holdings
//! and positions, normalized across brokers, in a keyed JSON store. Broker
//! payloads differ in shape and field names; rows that cannot be read are
//! skipped rather than guessed at.

use std::collections::HashMap;
use std::str::FromStr;

use agent_core::{SessionId, ToolResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::{BrokerError, Result};
use crate::handle::BrokerHandle;

/// Keyed JSON persistence
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, key: &str, value: Value) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Value>>;
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }
}

pub fn snapshot_key(session: &SessionId, broker: &str) -> String {
    format!("snapshot:{session}:{broker}")
}

/// One holding or position, in broker-neutral form
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingRecord {
    pub symbol: String,
    pub exchange: Option<String>,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub last_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
}

impl HoldingRecord {
    /// `None` when the valuation does not fit in a `Decimal`
    pub fn new(symbol: impl Into<String>, quantity: Decimal, average_price: Decimal, last_price: Decimal) -> Option<Self> {
        let market_value = quantity.checked_mul(last_price)?;
        let cost = quantity.checked_mul(average_price)?;
        Some(Self {
            symbol: symbol.into().to_uppercase(),
            exchange: None,
            quantity,
            average_price,
            last_price,
            market_value,
            unrealized_pnl: market_value.checked_sub(cost)?,
        })
    }

    /// Read a broker row, trying each broker's field names
    pub fn from_row(row: &Value) -> Option<Self> {
        let symbol = first_str(row, &["tradingsymbol", "trading_symbol", "symbol"])?;
        let quantity = first_decimal(row, &["quantity", "qty", "netQty", "net_quantity"])?;
        let average_price = first_decimal(row, &["average_price", "avg_price", "costPrice", "buy_avg"]).unwrap_or_default();
        let last_price = first_decimal(row, &["last_price", "ltp", "last_traded_price"]).unwrap_or(average_price);

        let Some(mut record) = Self::new(symbol, quantity, average_price, last_price) else {
            tracing::warn!(symbol, "Skipping row whose valuation overflows");
            return None;
        };
        record.exchange = first_str(row, &["exchange", "segment"]).map(ToString::to_string);
        Some(record)
    }
}

fn first_str<'a>(row: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|f| row.get(*f).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn first_decimal(row: &Value, fields: &[&str]) -> Option<Decimal> {
    fields.iter().filter_map(|f| row.get(*f)).find_map(to_decimal)
}

fn to_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).ok()
}

/// Locate the row array inside a holdings or positions payload
fn rows(payload: &Value) -> &[Value] {
    const POINTERS: [&str; 6] = ["", "/data", "/holdings", "/data/holdings", "/net", "/data/net"];
    POINTERS
        .iter()
        .filter_map(|p| payload.pointer(p))
        .find_map(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

pub fn normalize_rows(payload: &Value) -> Vec<HoldingRecord> {
    rows(payload).iter().filter_map(HoldingRecord::from_row).collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub session: SessionId,
    pub broker: String,
    pub captured_at: DateTime<Utc>,
    pub holdings: Vec<HoldingRecord>,
    pub positions: Vec<HoldingRecord>,
    pub total_value: Decimal,
    pub total_pnl: Decimal,
}

impl PortfolioSnapshot {
    /// Fails when a total does not fit in a `Decimal`
    pub fn new(
        session: SessionId,
        broker: impl Into<String>,
        holdings: Vec<HoldingRecord>,
        positions: Vec<HoldingRecord>,
    ) -> Result<Self> {
        let total_value = checked_total(holdings.iter().map(|h| h.market_value))?;
        let total_pnl = checked_total(holdings.iter().chain(&positions).map(|h| h.unrealized_pnl))?;
        Ok(Self {
            session,
            broker: broker.into(),
            captured_at: Utc::now(),
            holdings,
            positions,
            total_value,
            total_pnl,
        })
    }
}

fn checked_total(mut values: impl Iterator<Item = Decimal>) -> Result<Decimal> {
    values
        .try_fold(Decimal::ZERO, Decimal::checked_add)
        .ok_or_else(|| BrokerError::MalformedToolOutput("portfolio total overflows".into()))
}

fn payload_of(result: &ToolResult) -> Value {
    result
        .structured()
        .ok()
        .or_else(|| (!result.raw_payload.is_null()).then(|| result.raw_payload.clone()))
        .unwrap_or(Value::Null)
}

async fn fetch_rows(handle: &BrokerHandle, tool: &str) -> Result<Vec<HoldingRecord>> {
    let result = handle.call_tool(tool, json!({})).await?;
    if let Some(message) = result.error {
        return Err(BrokerError::ToolExecution {
            tool: tool.into(),
            message,
        });
    }
    Ok(normalize_rows(&payload_of(&result)))
}

/// Read holdings and positions from an authenticated handle.
///
/// A holdings failure fails the capture; missing positions only leave that
/// list empty.
pub async fn capture(handle: &BrokerHandle) -> Result<PortfolioSnapshot> {
    let spec = handle.spec();
    let holdings = match &spec.holdings_tool {
        Some(tool) => fetch_rows(handle, tool).await?,
        None => Vec::new(),
    };
    let positions = match &spec.positions_tool {
        Some(tool) => fetch_rows(handle, tool).await.unwrap_or_else(|e| {
            tracing::warn!(key = %handle.key(), error = %e, "Positions unavailable for snapshot");
            Vec::new()
        }),
        None => Vec::new(),
    };

    PortfolioSnapshot::new(handle.key().session.clone(), &handle.key().broker, holdings, positions)
}
