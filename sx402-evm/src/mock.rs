//! In-memory USDC contract implementing [`ChainClient`], plus signing helpers.
//!
//! [`MockChain`] keeps the `authorizationState` table of one token contract
//! and executes `transferWithAuthorization` calldata against it the way
//! `FiatTokenV2` does: a used nonce reverts, a fresh one is consumed. Failures
//! can be injected for reads and sends.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, TxHash, keccak256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolValue};
use sx402::networks;
use sx402::proto::{PaymentAuthorization, PaymentEnvelope, TokenAmount};
use sx402::timestamp::UnixTimestamp;

use crate::client::{ChainClient, ClientError, ReceiptSummary};
use crate::contract::IEIP3009;
use crate::types::authorization_digest;

/// Anvil's first development key. Signs every envelope built here.
pub const PAYER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Payee of envelopes built here.
pub const PAYEE: Address = Address::new([0x70; 20]);

/// Fixed "now" for window checks; envelopes are valid for ten minutes around it.
pub const NOW: UnixTimestamp = UnixTimestamp::from_secs(1_700_000_000);

/// Revert string of `FiatTokenV2` for a consumed nonce.
pub const AUTHORIZATION_USED: &str = "FiatTokenV2: authorization is used or canceled";

/// The payer's signer.
#[must_use]
pub fn payer() -> PrivateKeySigner {
    PAYER_KEY.parse().expect("valid development key")
}

/// An envelope for `network`, paying 1 USDC to [`PAYEE`], signed by [`payer`].
#[must_use]
pub fn envelope(network: &str) -> PaymentEnvelope {
    signed_envelope(network, |_| {})
}

/// Like [`envelope`], with `mutate` applied to the authorization before signing.
///
/// # Panics
///
/// Panics if `network` is not a built-in network key.
#[must_use]
pub fn signed_envelope(network: &str, mutate: impl FnOnce(&mut PaymentAuthorization)) -> PaymentEnvelope {
    let config = networks::resolve(network).expect("built-in network");
    let signer = payer();
    let mut authorization = PaymentAuthorization {
        from: signer.address(),
        to: PAYEE,
        value: TokenAmount::from(1_000_000),
        valid_after: NOW.saturating_sub(600),
        valid_before: NOW.saturating_add(600),
        nonce: keccak256(network.as_bytes()),
    };
    mutate(&mut authorization);
    let digest = authorization_digest(&config, &authorization);
    let signature = signer.sign_hash_sync(&digest).expect("signing succeeds");
    PaymentEnvelope {
        network: network.to_owned(),
        authorization,
        signature: Bytes::from(signature.as_bytes().to_vec()),
    }
}

#[derive(Debug)]
struct Injected {
    skip: usize,
    remaining: usize,
    error: ClientError,
}

impl Injected {
    fn take(slot: &mut Option<Self>) -> Option<ClientError> {
        let injected = slot.as_mut()?;
        if injected.skip > 0 {
            injected.skip -= 1;
            return None;
        }
        if injected.remaining == 0 {
            *slot = None;
            return None;
        }
        injected.remaining -= 1;
        Some(injected.error.clone())
    }
}

#[derive(Debug)]
struct State {
    used: HashSet<(Address, B256)>,
    receipts: HashMap<TxHash, ReceiptSummary>,
    read_failures: Option<Injected>,
    send_failures: Option<Injected>,
    lost_sends: usize,
    revert_with: Option<String>,
    mined_revert: bool,
    confirm: bool,
    read_delay: Duration,
    block_timestamp: UnixTimestamp,
    block_number: u64,
}

/// An in-memory token contract reachable through [`ChainClient`].
#[derive(Debug)]
pub struct MockChain {
    operator: Address,
    state: Mutex<State>,
    reads: AtomicUsize,
    sends: AtomicUsize,
}

impl MockChain {
    /// A chain that confirms every successful send immediately.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            operator: Address::new([0xfa; 20]),
            state: Mutex::new(State {
                used: HashSet::new(),
                receipts: HashMap::new(),
                read_failures: None,
                send_failures: None,
                lost_sends: 0,
                revert_with: None,
                mined_revert: false,
                confirm: true,
                read_delay: Duration::ZERO,
                block_timestamp: NOW,
                block_number: 100,
            }),
            reads: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `(from, nonce)` as consumed.
    pub fn consume(&self, from: Address, nonce: B256) {
        self.state().used.insert((from, nonce));
    }

    /// Whether `(from, nonce)` is consumed.
    #[must_use]
    pub fn is_consumed(&self, from: Address, nonce: B256) -> bool {
        self.state().used.contains(&(from, nonce))
    }

    /// Fails the next `count` contract reads with `error`.
    pub fn fail_reads(&self, count: usize, error: ClientError) {
        self.fail_reads_after(0, count, error);
    }

    /// Lets `skip` contract reads through, then fails the following `count`
    /// with `error`.
    pub fn fail_reads_after(&self, skip: usize, count: usize, error: ClientError) {
        self.state().read_failures = Some(Injected {
            skip,
            remaining: count,
            error,
        });
    }

    /// Fails the next `count` sends with `error`, without executing them.
    pub fn fail_sends(&self, count: usize, error: ClientError) {
        self.state().send_failures = Some(Injected {
            skip: 0,
            remaining: count,
            error,
        });
    }

    /// Executes the next `count` sends but reports a transient failure, as
    /// when the node accepts a transaction and the response is lost.
    pub fn lose_sends(&self, count: usize) {
        self.state().lost_sends = count;
    }

    /// Makes every send revert during gas estimation with `reason`.
    pub fn revert_with(&self, reason: impl Into<String>) {
        self.state().revert_with = Some(reason.into());
    }

    /// Makes every send get mined with a failed receipt.
    pub fn revert_on_chain(&self) {
        self.state().mined_revert = true;
    }

    /// When `false`, receipts never arrive and waits run to their timeout.
    pub fn set_confirm(&self, confirm: bool) {
        self.state().confirm = confirm;
    }

    /// Delays every contract read by `delay`.
    pub fn set_read_delay(&self, delay: Duration) {
        self.state().read_delay = delay;
    }

    /// Sets the latest block timestamp.
    pub fn set_block_timestamp(&self, timestamp: UnixTimestamp) {
        self.state().block_timestamp = timestamp;
    }

    /// Number of contract reads attempted.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of sends attempted.
    #[must_use]
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    fn execute(state: &State, calldata: &[u8]) -> Result<(Address, B256), ClientError> {
        let call = IEIP3009::transferWithAuthorizationCall::abi_decode(calldata)
            .map_err(|e| ClientError::Terminal(format!("unexpected calldata: {e}")))?;
        if let Some(reason) = &state.revert_with {
            return Err(ClientError::Reverted {
                reason: reason.clone(),
            });
        }
        if state.used.contains(&(call.from, call.nonce)) {
            return Err(ClientError::Reverted {
                reason: AUTHORIZATION_USED.to_owned(),
            });
        }
        Ok((call.from, call.nonce))
    }
}

#[async_trait::async_trait]
impl ChainClient for MockChain {
    fn signer_address(&self) -> Address {
        self.operator
    }

    async fn read_contract(&self, _to: Address, calldata: Bytes) -> Result<Bytes, ClientError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        // answer from the state at call time, then deliver after the delay
        let (answer, delay) = {
            let mut state = self.state();
            let answer = match Injected::take(&mut state.read_failures) {
                Some(error) => Err(error),
                None => IEIP3009::authorizationStateCall::abi_decode(&calldata)
                    .map_err(|e| ClientError::Terminal(format!("unexpected calldata: {e}")))
                    .map(|call| {
                        let used = state.used.contains(&(call.authorizer, call.nonce));
                        Bytes::from(used.abi_encode())
                    }),
            };
            (answer, state.read_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        answer
    }

    async fn send_transaction(&self, _to: Address, calldata: Bytes) -> Result<TxHash, ClientError> {
        let attempt = self.sends.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(error) = Injected::take(&mut state.send_failures) {
            return Err(error);
        }
        let (from, nonce) = Self::execute(&state, &calldata)?;
        state.block_number += 1;
        let mut preimage = calldata.to_vec();
        preimage.extend_from_slice(&attempt.to_be_bytes());
        let hash = keccak256(preimage);
        let success = !state.mined_revert;
        if success {
            state.used.insert((from, nonce));
        }
        let block_number = Some(state.block_number);
        state.receipts.insert(
            hash,
            ReceiptSummary {
                transaction_hash: hash,
                block_number,
                success,
            },
        );
        if state.lost_sends > 0 {
            state.lost_sends -= 1;
            return Err(ClientError::Transient("connection reset by peer".to_owned()));
        }
        Ok(hash)
    }

    async fn wait_for_receipt(
        &self,
        hash: TxHash,
        timeout: Duration,
    ) -> Result<Option<ReceiptSummary>, ClientError> {
        let receipt = {
            let state = self.state();
            state.confirm.then(|| state.receipts.get(&hash).copied()).flatten()
        };
        if receipt.is_none() {
            tokio::time::sleep(timeout).await;
        }
        Ok(receipt)
    }

    async fn latest_block_timestamp(&self) -> Result<UnixTimestamp, ClientError> {
        Ok(self.state().block_timestamp)
    }
}
