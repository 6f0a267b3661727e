//! In-process ledger with a built-in hash-lock program.
//!
//! Every clone of a [`SimLedger`] shares one state, so two sessions inside the
//! same process (or two tasks in a test) see each other's instances. Nothing
//! is persisted.

use crate::{
    currency::DEFAULT_DECIMALS,
    error::{
        EscrowError,
        Result,
    },
    ledger::{
        EscrowProgram,
        EscrowTerms,
        InstanceId,
        LedgerClient,
        Settlement,
        secret_digest,
    },
    wallets::KeyMaterial,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};
use tokio::sync::Notify;
use tracing::{
    debug,
    info,
    warn,
};

type Address = [u8; 32];

const FAUCET_SEED: &[u8] = b"hashlock-sim-faucet";
// one billion whole units
const FAUCET_FLOAT: u64 = 1_000_000_000 * 10u64.pow(DEFAULT_DECIMALS);

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SimAccount {
    address: Address,
}

impl SimAccount {
    fn from_seed(seed: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        Self {
            address: hasher.finalize().into(),
        }
    }

    pub fn address(&self) -> &[u8; 32] {
        &self.address
    }
}

#[derive(Clone, Debug)]
pub struct SimContract {
    index: usize,
    id: InstanceId,
    holder: Address,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Deployed,
    Locked { digest: [u8; 32], amount: u64 },
    Settled { amount: u64 },
    /// The owner could not fund the lock; nothing will ever be claimable.
    Abandoned,
}

#[derive(Debug)]
struct Instance {
    owner: Address,
    phase: Phase,
}

#[derive(Debug, Default)]
struct SimState {
    balances: HashMap<Address, u64>,
    instances: Vec<Instance>,
}

impl SimState {
    fn balance(&self, address: &Address) -> u64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    fn debit(&mut self, address: &Address, amount: u64) -> bool {
        let balance = self.balances.entry(*address).or_insert(0);
        match balance.checked_sub(amount) {
            Some(rest) => {
                *balance = rest;
                true
            }
            None => false,
        }
    }

    fn credit(&mut self, address: &Address, amount: u64) {
        let balance = self.balances.entry(*address).or_insert(0);
        *balance = balance.saturating_add(amount);
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SimState>,
    changed: Notify,
    tx_fee: u64,
    starting_balance: u64,
}

#[derive(Clone, Debug)]
pub struct SimLedger {
    shared: Arc<Shared>,
}

impl SimLedger {
    pub fn new() -> Self {
        Self::with_settings(0, 0)
    }

    /// `tx_fee` is burned from the sender of every accepted deploy, lock,
    /// claim and transfer. `starting_balance` is granted to every account the first
    /// time it is issued.
    pub fn with_settings(tx_fee: u64, starting_balance: u64) -> Self {
        let mut state = SimState::default();
        state
            .balances
            .insert(SimAccount::from_seed(FAUCET_SEED).address, FAUCET_FLOAT);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                changed: Notify::new(),
                tx_fee,
                starting_balance,
            }),
        }
    }

    pub fn tx_fee(&self) -> u64 {
        self.shared.tx_fee
    }

    /// Amount currently held by a locked instance, `None` when the instance
    /// is unknown or holds nothing.
    pub fn locked_amount(&self, id: &InstanceId) -> Option<u64> {
        let index = self.index_of(id).ok()?;
        match self.state().instances.get(index)?.phase {
            Phase::Locked { amount, .. } => Some(amount),
            Phase::Deployed | Phase::Settled { .. } | Phase::Abandoned => None,
        }
    }

    pub fn is_settled(&self, id: &InstanceId) -> bool {
        self.index_of(id)
            .ok()
            .and_then(|index| {
                self.state()
                    .instances
                    .get(index)
                    .map(|i| matches!(i.phase, Phase::Settled { .. }))
            })
            .unwrap_or(false)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self) {
        self.shared.changed.notify_waiters();
    }

    fn index_of(&self, id: &InstanceId) -> Result<usize> {
        let number: usize = id.as_str().parse().map_err(|_| {
            EscrowError::Resolution(format!("'{id}' is not a numeric instance id"))
        })?;
        number
            .checked_sub(1)
            .ok_or_else(|| EscrowError::Resolution(format!("no escrow instance {id}")))
    }

    fn register(&self, account: &SimAccount) {
        let mut state = self.state();
        if !state.balances.contains_key(&account.address) {
            state
                .balances
                .insert(account.address, self.shared.starting_balance);
        }
    }

    /// Re-checks `probe` every time the ledger changes until it yields.
    async fn wait_until<T>(&self, mut probe: impl FnMut(&SimState) -> Option<T>) -> T {
        loop {
            let changed = self.shared.changed.notified();
            let ready = probe(&self.state());
            if let Some(value) = ready {
                return value;
            }
            changed.await;
        }
    }
}

fn abandoned(id: &InstanceId) -> EscrowError {
    EscrowError::Resolution(format!("escrow instance {id} was never funded"))
}

impl Default for SimLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerClient for SimLedger {
    type Account = SimAccount;

    fn decimals(&self) -> u32 {
        DEFAULT_DECIMALS
    }

    async fn default_account(&self, key: &KeyMaterial) -> Result<SimAccount> {
        let account = match key {
            KeyMaterial::Ambient => {
                SimAccount::from_seed(&rand::random::<[u8; 32]>())
            }
            KeyMaterial::SecretKey(secret) => SimAccount::from_seed(secret),
            KeyMaterial::Mnemonic(phrase) => SimAccount::from_seed(phrase.as_bytes()),
        };
        self.register(&account);
        Ok(account)
    }

    async fn balance_of(&self, account: &SimAccount) -> Result<u64> {
        Ok(self.state().balance(&account.address))
    }

    fn format_address(&self, account: &SimAccount) -> String {
        format!("0x{}", hex::encode(account.address))
    }

    async fn faucet(&self) -> Result<SimAccount> {
        Ok(SimAccount::from_seed(FAUCET_SEED))
    }

    async fn transfer(&self, from: &SimAccount, to: &SimAccount, amount: u64) -> Result<()> {
        {
            let mut state = self.state();
            let total = amount.saturating_add(self.shared.tx_fee);
            if !state.debit(&from.address, total) {
                return Err(EscrowError::Transport(format!(
                    "insufficient funds to transfer {amount}"
                )));
            }
            state.credit(&to.address, amount);
        }
        self.publish();
        Ok(())
    }
}

impl EscrowProgram for SimLedger {
    type Contract = SimContract;

    fn parse_instance_id(&self, raw: &str) -> Result<InstanceId> {
        let trimmed = raw.trim();
        match trimmed.parse::<u64>() {
            Ok(number) if number > 0 => Ok(InstanceId::new(number.to_string())),
            _ => Err(EscrowError::Resolution(format!(
                "'{trimmed}' is not a valid instance id"
            ))),
        }
    }

    fn instance_id(&self, contract: &SimContract) -> InstanceId {
        contract.id.clone()
    }

    async fn deploy(&self, deployer: &SimAccount) -> Result<SimContract> {
        let contract = {
            let mut state = self.state();
            if !state.debit(&deployer.address, self.shared.tx_fee) {
                return Err(EscrowError::Deploy(
                    "insufficient funds for the deploy fee".into(),
                ));
            }
            state.instances.push(Instance {
                owner: deployer.address,
                phase: Phase::Deployed,
            });
            let index = state.instances.len() - 1;
            SimContract {
                index,
                id: InstanceId::new((index + 1).to_string()),
                holder: deployer.address,
            }
        };
        debug!(instance = %contract.id, "simulated deploy accepted");
        self.publish();
        Ok(contract)
    }

    async fn attach(&self, account: &SimAccount, id: &InstanceId) -> Result<SimContract> {
        let index = self.index_of(id)?;
        let state = self.state();
        let instance = state
            .instances
            .get(index)
            .ok_or_else(|| EscrowError::Resolution(format!("no escrow instance {id}")))?;
        match instance.phase {
            Phase::Settled { .. } => return Err(EscrowError::AlreadySettled(id.to_string())),
            Phase::Abandoned => return Err(abandoned(id)),
            Phase::Deployed | Phase::Locked { .. } => {}
        }
        Ok(SimContract {
            index,
            id: id.clone(),
            holder: account.address,
        })
    }

    async fn lock(&self, contract: &SimContract, terms: EscrowTerms) -> Result<()> {
        terms.validate()?;
        let locked = {
            let mut state = self.state();
            let fee = self.shared.tx_fee;
            let Some(instance) = state.instances.get(contract.index) else {
                return Err(EscrowError::Resolution(format!(
                    "no escrow instance {}",
                    contract.id
                )));
            };
            if instance.phase != Phase::Deployed {
                return Err(EscrowError::Deploy(format!(
                    "instance {} already holds escrow terms",
                    contract.id
                )));
            }
            let owner = instance.owner;
            if state.debit(&owner, terms.amount.saturating_add(fee)) {
                state.instances[contract.index].phase = Phase::Locked {
                    digest: secret_digest(terms.secret),
                    amount: terms.amount,
                };
                Ok(())
            } else {
                state.instances[contract.index].phase = Phase::Abandoned;
                Err(EscrowError::Deploy(format!(
                    "insufficient funds to lock {}",
                    terms.amount
                )))
            }
        };
        match &locked {
            Ok(()) => info!(instance = %contract.id, amount = terms.amount, "escrow locked"),
            Err(e) => warn!(instance = %contract.id, error = %e, "escrow abandoned"),
        }
        self.publish();
        locked
    }

    async fn await_settlement(&self, contract: &SimContract) -> Result<Settlement> {
        let index = contract.index;
        let amount = self
            .wait_until(|state| match state.instances[index].phase {
                Phase::Settled { amount } => Some(Ok(amount)),
                Phase::Abandoned => Some(Err(abandoned(&contract.id))),
                Phase::Deployed | Phase::Locked { .. } => None,
            })
            .await?;
        Ok(Settlement {
            instance: contract.id.clone(),
            amount,
        })
    }

    async fn bob<F>(&self, contract: &SimContract, reveal: F) -> Result<Settlement>
    where
        F: FnOnce() -> u64 + Send + 'static,
    {
        let index = contract.index;
        let settled = self
            .wait_until(|state| match state.instances[index].phase {
                Phase::Deployed => None,
                Phase::Locked { .. } => Some(Ok(false)),
                Phase::Settled { .. } => Some(Ok(true)),
                Phase::Abandoned => Some(Err(abandoned(&contract.id))),
            })
            .await?;
        if settled {
            return Err(EscrowError::AlreadySettled(contract.id.to_string()));
        }

        debug!(instance = %contract.id, "program requested the secret");
        let digest = secret_digest(reveal());
        let amount = {
            let mut state = self.state();
            let amount = match state.instances[index].phase {
                Phase::Settled { .. } => {
                    return Err(EscrowError::AlreadySettled(contract.id.to_string()));
                }
                Phase::Locked { digest: expected, .. } if expected != digest => {
                    return Err(EscrowError::RevealRejected);
                }
                Phase::Locked { amount, .. } => amount,
                Phase::Abandoned => return Err(abandoned(&contract.id)),
                Phase::Deployed => {
                    return Err(EscrowError::Transport(format!(
                        "instance {} lost its escrow terms",
                        contract.id
                    )));
                }
            };
            state.instances[index].phase = Phase::Settled { amount };
            state.credit(&contract.holder, amount);
            let fee = self.shared.tx_fee.min(state.balance(&contract.holder));
            state.debit(&contract.holder, fee);
            amount
        };
        info!(instance = %contract.id, amount, "escrow claimed");
        self.publish();
        Ok(Settlement {
            instance: contract.id.clone(),
            amount,
        })
    }
}
