//! Account nonce tracking for the facilitator's operating key.

use std::sync::Arc;

use alloy_network::Network;
use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use alloy_transport::TransportResult;
use dashmap::DashMap;
use tokio::sync::Mutex;

const NONCE_UNSET: u64 = u64::MAX;

/// Nonce manager that seeds from the `pending` transaction count.
///
/// Alloy's cached manager seeds from `latest`, which hands out a nonce that
/// is already taken whenever the process restarts with transactions still in
/// the mempool.
///
/// - First call per address: `eth_getTransactionCount(address, "pending")`
/// - Later calls: the cached nonce plus one
/// - [`reset_nonce`](Self::reset_nonce) forces a re-query after a failed send
///
/// Allocation is serialized per address only; different signers never
/// contend.
#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

#[async_trait::async_trait]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: Network,
    {
        let slot = {
            let entry = self
                .nonces
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(NONCE_UNSET)));
            Arc::clone(entry.value())
        };

        let mut nonce = slot.lock().await;
        let next = if *nonce == NONCE_UNSET {
            provider.get_transaction_count(address).pending().await?
        } else {
            *nonce + 1
        };
        *nonce = next;
        Ok(next)
    }
}

impl PendingNonceManager {
    /// Forgets the cached nonce for `address`; the next allocation re-queries.
    ///
    /// Call after a failed send: the transaction may or may not have reached
    /// the mempool.
    pub async fn reset_nonce(&self, address: Address) {
        let slot = self.nonces.get(&address).map(|entry| Arc::clone(entry.value()));
        if let Some(slot) = slot {
            *slot.lock().await = NONCE_UNSET;
        }
    }

    /// The last nonce handed out for `address`, if any.
    pub async fn current_nonce(&self, address: Address) -> Option<u64> {
        let slot = self.nonces.get(&address).map(|entry| Arc::clone(entry.value()))?;
        let nonce = *slot.lock().await;
        (nonce != NONCE_UNSET).then_some(nonce)
    }
}
