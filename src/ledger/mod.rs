//! The two boundaries the escrow core consumes: a ledger client for accounts
//! and value transfer, and the hash-lock program reached through deploy,
//! attach and the two role entry points.

use crate::{
    error::{
        EscrowError,
        Result,
    },
    wallets::KeyMaterial,
};
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    fmt,
    time::Duration,
};
use tokio::time;
use tracing::warn;

#[cfg(feature = "fuel")]
pub mod fuel;
pub mod sim;

/// Opaque token naming one escrow instance. It is produced by a deploy and
/// carried verbatim to the other party; nothing parses meaning out of it
/// except the backend that issued it.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Alice's side of the deal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EscrowTerms {
    pub amount: u64,
    pub secret: u64,
}

impl EscrowTerms {
    pub fn new(amount: u64, secret: u64) -> Self {
        Self { amount, secret }
    }

    pub fn validate(&self) -> Result<()> {
        if self.amount == 0 {
            return Err(EscrowError::InvalidAmount(
                "escrow amount must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// What a settled instance paid out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settlement {
    pub instance: InstanceId,
    pub amount: u64,
}

/// Reads program state every `interval` until `done` accepts it. A run of
/// `max_failures` consecutive failed reads ends the wait with a transport
/// error; any successful read resets the count.
pub async fn poll_until<T, E, R, Fut>(
    mut read: R,
    done: impl Fn(&T) -> bool,
    interval: Duration,
    max_failures: u32,
) -> Result<T>
where
    R: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
{
    let mut failures = 0;
    loop {
        match read().await {
            Ok(value) if done(&value) => return Ok(value),
            Ok(_) => failures = 0,
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "failed to read escrow state");
                if failures >= max_failures {
                    return Err(EscrowError::Transport(format!(
                        "gave up after {failures} failed reads: {e}"
                    )));
                }
            }
        }
        time::sleep(interval).await;
    }
}

/// Commitment the program stores for a secret: SHA-256 over its eight
/// big-endian bytes, matching `sha256(u64)` on the contract side.
pub fn secret_digest(secret: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.to_be_bytes());
    hasher.finalize().into()
}

pub trait LedgerClient: Clone + Send + Sync + 'static {
    type Account: Clone + Send + Sync + 'static;

    /// Fractional digits of the ledger's currency.
    fn decimals(&self) -> u32;

    fn default_account(
        &self,
        key: &KeyMaterial,
    ) -> impl Future<Output = Result<Self::Account>> + Send;

    fn balance_of(
        &self,
        account: &Self::Account,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn format_address(&self, account: &Self::Account) -> String;

    fn faucet(&self) -> impl Future<Output = Result<Self::Account>> + Send;

    fn transfer(
        &self,
        from: &Self::Account,
        to: &Self::Account,
        amount: u64,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// The hash-lock program. Both role entry points resolve only once the
/// program reaches settlement or rejects the call; any deadline semantics
/// belong to the program, not to callers.
pub trait EscrowProgram: LedgerClient {
    type Contract: Send + Sync + 'static;

    /// Validates the shape of a user-supplied identifier without touching
    /// the ledger.
    fn parse_instance_id(&self, raw: &str) -> Result<InstanceId>;

    fn instance_id(&self, contract: &Self::Contract) -> InstanceId;

    fn deploy(
        &self,
        deployer: &Self::Account,
    ) -> impl Future<Output = Result<Self::Contract>> + Send;

    fn attach(
        &self,
        account: &Self::Account,
        id: &InstanceId,
    ) -> impl Future<Output = Result<Self::Contract>> + Send;

    /// Locks `terms.amount` behind the digest of `terms.secret`. The
    /// instance id is only worth sharing once this has returned `Ok`.
    fn lock(
        &self,
        contract: &Self::Contract,
        terms: EscrowTerms,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Resolves once a locked instance has been claimed.
    fn await_settlement(
        &self,
        contract: &Self::Contract,
    ) -> impl Future<Output = Result<Settlement>> + Send;

    /// Alice's entry point: lock, then wait for the program to complete.
    fn alice(
        &self,
        contract: &Self::Contract,
        terms: EscrowTerms,
    ) -> impl Future<Output = Result<Settlement>> + Send {
        async move {
            self.lock(contract, terms).await?;
            self.await_settlement(contract).await
        }
    }

    /// Waits until the program asks for the secret, calls `reveal` exactly
    /// then, and resolves once the claim is accepted or rejected.
    fn bob<F>(
        &self,
        contract: &Self::Contract,
        reveal: F,
    ) -> impl Future<Output = Result<Settlement>> + Send
    where
        F: FnOnce() -> u64 + Send + 'static;
}
