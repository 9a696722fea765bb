//! Multi-chain wallet gateway
//!
//! Given a chain id, the gateway discovers which configured upstreams
//! (explorer APIs, JSON-RPC nodes, UTXO indexers, wallet backends) can serve
//! each capability, tries them in order, and normalizes their payloads into
//! one transaction and asset model. Network calls go through a shared
//! request cache with TTLs, tag invalidation and in-flight deduplication.
//!
//! Entry point is [`ProviderRegistry`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use multichain_gateway::{GatewayConfig, ProviderRegistry, ReqwestTransport, RequestCache};
//!
//! # async fn run() -> multichain_gateway::Result<()> {
//! let config = GatewayConfig::from_json_str(r#"{"chains": []}"#)?;
//! let transport = Arc::new(ReqwestTransport::new(config.transport.clone())?);
//! let registry = ProviderRegistry::new(config.chains, Arc::new(RequestCache::new(transport)));
//! let ethereum = registry.get("ethereum")?;
//! let balance = ethereum.native_balance("0x52908400098527886E0F7030069857D2E4169EE7").await?;
//! println!("{}", balance.amount);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod amount;
pub mod cache;
pub mod chain;
pub mod classify;
pub mod config;
pub mod error;
pub mod keys;
pub mod model;
pub mod network;
pub mod providers;
pub mod registry;
pub mod schema;
pub mod testing;
pub mod transport;
pub mod utxo;

pub use aggregator::ChainProvider;
pub use amount::Amount;
pub use cache::{FetchOptions, RequestCache};
pub use chain::{toolkit_for, ChainIdentity, ChainToolkit, MessageSigner};
pub use config::{ChainDescriptor, ChainFamily, EndpointDescriptor, GatewayConfig, ProviderKind, TransportConfig};
pub use error::{GatewayError, Result};
pub use model::*;
pub use providers::{ApiProvider, Capability};
pub use registry::ProviderRegistry;
pub use transport::{HttpTransport, ReqwestTransport};
