//! Capability aggregator
//!
//! A [`ChainProvider`] owns the adapters bound to one chain, in endpoint
//! order, plus the chain's identity toolkit.
//!
//! Read capabilities walk the adapters until one succeeds and fall back to
//! an empty default when all of them fail, unless one of the failures was a
//! rate limit, which is returned to the caller. Write capabilities use the
//! first adapter that declares them and never retry elsewhere.
//!
//! Everything an adapter returns passes through the schema guard first.

use log::{debug, error, warn};
use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::RequestCache;
use crate::chain::ChainToolkit;
use crate::config::ChainDescriptor;
use crate::error::{GatewayError, Result};
use crate::model::{
    Balance, DerivedAddress, FeeEstimate, HistoryQuery, SignedTransaction, TokenBalance, Transaction,
    TransactionQuery, TransactionStatusInfo, TransferIntent, UnsignedTransaction,
};
use crate::providers::{balance_tag, history_tag, ApiProvider, Capability};
use crate::schema::Validate;

/// Failures accumulated while walking the adapters for one read
struct FallbackRun<'a> {
    chain_id: &'a str,
    capability: Capability,
    failures: usize,
    rate_limit: Option<GatewayError>,
}

impl<'a> FallbackRun<'a> {
    fn new(chain_id: &'a str, capability: Capability) -> Self {
        Self { chain_id, capability, failures: 0, rate_limit: None }
    }

    fn record(&mut self, provider: &str, err: GatewayError) {
        warn!(
            "{} failed on {} for {}, trying next provider: {}",
            self.capability, provider, self.chain_id, err
        );
        self.failures += 1;
        if self.rate_limit.is_none() && err.is_rate_limit() {
            self.rate_limit = Some(err);
        }
    }

    fn finish<T>(self, default: T) -> Result<T> {
        if let Some(err) = self.rate_limit {
            return Err(err);
        }
        if self.failures > 0 {
            warn!(
                "All {} providers failed for {}, returning default",
                self.capability, self.chain_id
            );
        }
        Ok(default)
    }
}

fn guard_scalar<T: Validate>(value: T, provider: &str, capability: Capability) -> Result<T> {
    value
        .validate()
        .map_err(|detail| GatewayError::invalid_data(format!("{}.{}", provider, capability), detail))?;
    Ok(value)
}

fn guard_list<T: Validate>(items: Vec<T>, provider: &str, capability: Capability) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| match item.validate() {
            Ok(()) => true,
            Err(detail) => {
                warn!("Dropping invalid record from {}.{}: {}", provider, capability, detail);
                false
            }
        })
        .collect()
}

/// First occurrence of each hash, newest first, at most `limit`
pub fn dedupe_history(history: Vec<Transaction>, limit: usize) -> Vec<Transaction> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Transaction> = history
        .into_iter()
        .filter(|tx| seen.insert(tx.hash.clone()))
        .collect();
    unique.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    unique.truncate(limit);
    unique
}

/// Aggregated view of one chain
pub struct ChainProvider {
    chain: Arc<ChainDescriptor>,
    providers: Vec<ApiProvider>,
    toolkit: ChainToolkit,
    cache: Arc<RequestCache>,
}

impl ChainProvider {
    pub fn new(
        chain: Arc<ChainDescriptor>,
        providers: Vec<ApiProvider>,
        toolkit: ChainToolkit,
        cache: Arc<RequestCache>,
    ) -> Self {
        Self { chain, providers, toolkit, cache }
    }

    pub fn chain(&self) -> &ChainDescriptor {
        &self.chain
    }

    pub fn providers(&self) -> &[ApiProvider] {
        &self.providers
    }

    /// True when at least one adapter declares `capability`; identity
    /// capabilities are always served by the toolkit
    pub fn supports(&self, capability: Capability) -> bool {
        capability.is_identity() || self.providers.iter().any(|p| p.supports(capability))
    }

    /// Capabilities served by at least one adapter
    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ADAPTER
            .iter()
            .copied()
            .filter(|c| self.supports(*c))
            .collect()
    }

    fn unsupported(&self, capability: Capability) -> GatewayError {
        GatewayError::UnsupportedCapability(format!("{} on {}", capability, self.chain.id))
    }

    fn observe_balance(&self, address: &str, balance: &Balance) {
        let changed = self.cache.observe_value_and_invalidate(
            &balance_tag(&self.chain.id, address),
            &balance.amount.raw_string(),
            &[history_tag(&self.chain.id, address)],
        );
        if changed {
            debug!("Balance of {} changed, history cache invalidated", address);
        }
    }

    // Read path

    pub async fn native_balance(&self, address: &str) -> Result<Balance> {
        let capability = Capability::NativeBalance;
        let mut run = FallbackRun::new(&self.chain.id, capability);
        for provider in &self.providers {
            let Some(source) = &provider.native_balance else { continue };
            let result = source
                .native_balance(address)
                .await
                .and_then(|balance| guard_scalar(balance, &provider.name, capability));
            match result {
                Ok(balance) => {
                    self.observe_balance(address, &balance);
                    return Ok(balance);
                }
                Err(err) => run.record(&provider.name, err),
            }
        }
        run.finish(Balance::zero(&self.chain.symbol, self.chain.decimals))
    }

    pub async fn token_balances(&self, address: &str) -> Result<Vec<TokenBalance>> {
        let capability = Capability::TokenBalances;
        let mut run = FallbackRun::new(&self.chain.id, capability);
        for provider in &self.providers {
            let Some(source) = &provider.token_balances else { continue };
            match source.token_balances(address).await {
                Ok(balances) => return Ok(guard_list(balances, &provider.name, capability)),
                Err(err) => run.record(&provider.name, err),
            }
        }
        run.finish(Vec::new())
    }

    /// Deduplicated by hash, newest first
    pub async fn transaction_history(&self, query: &HistoryQuery) -> Result<Vec<Transaction>> {
        let capability = Capability::TransactionHistory;
        let mut run = FallbackRun::new(&self.chain.id, capability);
        for provider in &self.providers {
            let Some(source) = &provider.transaction_history else { continue };
            match source.transaction_history(query).await {
                Ok(history) => {
                    let history = guard_list(history, &provider.name, capability);
                    return Ok(dedupe_history(history, query.limit));
                }
                Err(err) => run.record(&provider.name, err),
            }
        }
        run.finish(Vec::new())
    }

    /// An adapter answering "not found" hands over to the next one
    pub async fn transaction(&self, query: &TransactionQuery) -> Result<Option<Transaction>> {
        let capability = Capability::Transaction;
        let mut run = FallbackRun::new(&self.chain.id, capability);
        for provider in &self.providers {
            let Some(source) = &provider.transaction else { continue };
            let result = match source.transaction(query).await {
                Ok(Some(tx)) => guard_scalar(tx, &provider.name, capability).map(Some),
                other => other,
            };
            match result {
                Ok(Some(tx)) => return Ok(Some(tx)),
                Ok(None) => debug!("{} does not know transaction {}", provider.name, query.hash),
                Err(err) => run.record(&provider.name, err),
            }
        }
        run.finish(None)
    }

    pub async fn transaction_status(&self, hash: &str) -> Result<Option<TransactionStatusInfo>> {
        let capability = Capability::TransactionStatus;
        let mut run = FallbackRun::new(&self.chain.id, capability);
        for provider in &self.providers {
            let Some(source) = &provider.transaction_status else { continue };
            let result = match source.transaction_status(hash).await {
                Ok(Some(status)) => guard_scalar(status, &provider.name, capability).map(Some),
                other => other,
            };
            match result {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => debug!("{} has no status for {}", provider.name, hash),
                Err(err) => run.record(&provider.name, err),
            }
        }
        run.finish(None)
    }

    pub async fn block_height(&self) -> Result<u64> {
        let capability = Capability::BlockHeight;
        let mut run = FallbackRun::new(&self.chain.id, capability);
        for provider in &self.providers {
            let Some(source) = &provider.block_height else { continue };
            let result = source
                .block_height()
                .await
                .and_then(|height| guard_scalar(height, &provider.name, capability));
            match result {
                Ok(height) => return Ok(height),
                Err(err) => run.record(&provider.name, err),
            }
        }
        run.finish(0)
    }

    // Write path

    pub async fn estimate_fee(&self, intent: &TransferIntent) -> Result<FeeEstimate> {
        let capability = Capability::EstimateFee;
        let (name, handler) = self
            .providers
            .iter()
            .find_map(|p| p.estimate_fee.as_ref().map(|h| (&p.name, h)))
            .ok_or_else(|| self.unsupported(capability))?;
        let result = handler
            .estimate_fee(intent)
            .await
            .and_then(|fee| guard_scalar(fee, name, capability));
        self.settle_write(name, capability, result)
    }

    pub async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction> {
        let capability = Capability::BuildTransaction;
        if intent.amount.is_zero() {
            return Err(GatewayError::invalid_data("intent", "transfer amount must be positive"));
        }
        let (name, handler) = self
            .providers
            .iter()
            .find_map(|p| p.build_transaction.as_ref().map(|h| (&p.name, h)))
            .ok_or_else(|| self.unsupported(capability))?;
        let result = handler
            .build_transaction(intent)
            .await
            .and_then(|unsigned| guard_scalar(unsigned, name, capability));
        self.settle_write(name, capability, result)
    }

    pub async fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        private_key: &[u8],
    ) -> Result<SignedTransaction> {
        let capability = Capability::SignTransaction;
        let (name, handler) = self
            .providers
            .iter()
            .find_map(|p| p.sign_transaction.as_ref().map(|h| (&p.name, h)))
            .ok_or_else(|| self.unsupported(capability))?;
        let result = handler
            .sign_transaction(unsigned, private_key)
            .await
            .and_then(|signed| guard_scalar(signed, name, capability));
        self.settle_write(name, capability, result)
    }

    /// Broadcast, then drop the sender's cached balance and history
    pub async fn broadcast_transaction(&self, signed: &SignedTransaction, sender: Option<&str>) -> Result<String> {
        let capability = Capability::BroadcastTransaction;
        let (name, handler) = self
            .providers
            .iter()
            .find_map(|p| p.broadcast_transaction.as_ref().map(|h| (&p.name, h)))
            .ok_or_else(|| self.unsupported(capability))?;
        let result = handler
            .broadcast_transaction(signed)
            .await
            .and_then(|hash| guard_scalar(hash, name, capability));
        let hash = self.settle_write(name, capability, result)?;
        if let Some(sender) = sender {
            self.cache.invalidate_tags(&[
                balance_tag(&self.chain.id, sender),
                history_tag(&self.chain.id, sender),
            ]);
        }
        Ok(hash)
    }

    fn settle_write<T>(&self, provider: &str, capability: Capability, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            error!("{} failed on {} for {}: {}", capability, provider, self.chain.id, err);
        }
        result
    }

    // Identity, served by the chain toolkit

    pub fn derive_address(&self, seed: &[u8], index: u32) -> Result<DerivedAddress> {
        let derived = self.toolkit.identity.derive_address(seed, index)?;
        guard_scalar(derived, &self.chain.id, Capability::DeriveAddress)
    }

    pub fn derive_addresses(&self, seed: &[u8], start: u32, count: u32) -> Result<Vec<DerivedAddress>> {
        self.toolkit
            .identity
            .derive_addresses(seed, start, count)?
            .into_iter()
            .map(|derived| guard_scalar(derived, &self.chain.id, Capability::DeriveAddress))
            .collect()
    }

    pub fn is_valid_address(&self, address: &str) -> bool {
        self.toolkit.identity.is_valid_address(address)
    }

    pub fn normalize_address(&self, address: &str) -> Result<String> {
        self.toolkit.identity.normalize_address(address)
    }

    pub fn sign_message(&self, message: &[u8], private_key: &[u8]) -> Result<String> {
        self.toolkit.signer.sign_message(message, private_key)
    }

    pub fn verify_message(&self, message: &[u8], signature: &str, public_key: &str) -> Result<bool> {
        self.toolkit.signer.verify_message(message, signature, public_key)
    }
}
