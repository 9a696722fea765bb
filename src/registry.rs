//! Chain provider registry
//!
//! Builds one [`ChainProvider`] per chain id on first use and keeps it until
//! the descriptor set is reloaded. All providers share one request cache.

use log::info;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::aggregator::ChainProvider;
use crate::cache::RequestCache;
use crate::chain::toolkit_for;
use crate::config::ChainDescriptor;
use crate::error::{GatewayError, Result};
use crate::providers::create_provider;

#[derive(Default)]
struct RegistryState {
    chains: HashMap<String, Arc<ChainDescriptor>>,
    built: HashMap<String, Arc<ChainProvider>>,
}

/// Lazily built chain providers keyed by chain id
pub struct ProviderRegistry {
    state: Mutex<RegistryState>,
    cache: Arc<RequestCache>,
}

fn index(chains: Vec<ChainDescriptor>) -> HashMap<String, Arc<ChainDescriptor>> {
    chains
        .into_iter()
        .map(|chain| (chain.id.clone(), Arc::new(chain)))
        .collect()
}

impl ProviderRegistry {
    pub fn new(chains: Vec<ChainDescriptor>, cache: Arc<RequestCache>) -> Self {
        Self {
            state: Mutex::new(RegistryState { chains: index(chains), built: HashMap::new() }),
            cache,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cache(&self) -> &Arc<RequestCache> {
        &self.cache
    }

    /// Known chain ids, sorted
    pub fn chain_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().chains.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn descriptor(&self, chain_id: &str) -> Option<Arc<ChainDescriptor>> {
        self.lock().chains.get(chain_id).cloned()
    }

    /// Provider for `chain_id`, building it on first request
    pub fn get(&self, chain_id: &str) -> Result<Arc<ChainProvider>> {
        let mut state = self.lock();
        if let Some(provider) = state.built.get(chain_id) {
            return Ok(provider.clone());
        }
        let chain = state
            .chains
            .get(chain_id)
            .cloned()
            .ok_or_else(|| GatewayError::Configuration(format!("Unknown chain: {}", chain_id)))?;

        let provider = Arc::new(self.build(chain)?);
        state.built.insert(chain_id.to_string(), provider.clone());
        Ok(provider)
    }

    fn build(&self, chain: Arc<ChainDescriptor>) -> Result<ChainProvider> {
        chain.validate()?;
        let toolkit = toolkit_for(&chain)?;
        let providers: Vec<_> = chain
            .endpoints
            .iter()
            .filter_map(|endpoint| create_provider(chain.clone(), endpoint, self.cache.clone()))
            .collect();
        info!(
            "Built provider for {} with {} endpoint(s): {}",
            chain.id,
            providers.len(),
            providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(ChainProvider::new(chain, providers, toolkit, self.cache.clone()))
    }

    /// Swap the descriptor set and drop every built provider
    pub fn reload(&self, chains: Vec<ChainDescriptor>) {
        let mut state = self.lock();
        state.chains = index(chains);
        state.built.clear();
        info!("Reloaded registry with {} chain(s)", state.chains.len());
    }
}
