//! # broker-gateway
//!
//! Per-session broker connections behind one chat surface.
//!
//! ```text
//!             BrokerGateway (connect / login / verify / chat / logout / status)
//!                  │
//!     ┌────────────┼───────────────────────────┐
//!     ▼            ▼                           ▼
//! SessionRegistry  ActiveBrokerSelector    SnapshotStore
//!     │ (session, broker)
//!     ▼
//! BrokerHandle ── AuthState ── Agent
//!     │
//!     ▼
//! BrokerClient: McpBrokerClient | RestBrokerClient
//! ```
//!
//! Broker differences (transport, login tool, argument rewrites, placeholder
//! detection) live in [`broker::BrokerSpec`] descriptors.

pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handle;
pub mod registry;
pub mod selector;
pub mod snapshot;

#[cfg(test)]
mod test_support;

pub use auth::{AuthEvent, AuthState};
pub use broker::{ArgumentRule, BrokerCatalog, BrokerSpec, ExpirySignal, PlaceholderRule, ToolScope, Transport};
pub use client::{BrokerClient, McpBrokerClient, NativeTool, RestBrokerClient};
pub use config::{ClientOptions, GatewayConfig, Timeouts};
pub use error::{BrokerError, Result};
pub use gateway::{BrokerGateway, ChatOutcome, ClientFactory, GatewayBuilder, GatewayStatus};
pub use handle::{AgentTemplate, BrokerHandle, HandleKey, HandleStatus, Verification};
pub use registry::SessionRegistry;
pub use selector::ActiveBrokerSelector;
pub use snapshot::{HoldingRecord, MemorySnapshotStore, PortfolioSnapshot, SnapshotStore};
