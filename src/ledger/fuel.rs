//! Fuel node backend: wallets from `fuels`, one `HashLock` contract deployed
//! per escrow.

use crate::{
    config::NetworkConfig,
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
        poll_until,
        secret_digest,
    },
    wallets::KeyMaterial,
};
use fuels::{
    accounts::{
        Account,
        ViewOnlyAccount,
    },
    crypto::SecretKey,
    prelude::{
        AssetId,
        Bech32ContractId,
        CallParameters,
        Contract,
        ContractId,
        Execution,
        LoadConfiguration,
        Provider,
        TxPolicies,
        VariableOutputPolicy,
        WalletUnlocked,
    },
    types::{
        Bits256,
        errors::Error as FuelsError,
    },
};
use rand::Rng;
use std::{
    str::FromStr,
    time::Duration,
};
use tracing::debug;

pub mod hashlock_types {
    use fuels::macros::abigen;

    abigen!(Contract(
        name = "HashLock",
        abi = "sway-projects/hashlock/out/release/hashlock-abi.json"
    ));
}

use hashlock_types::HashLock;

const HASHLOCK_BIN: &str = "./sway-projects/hashlock/out/release/hashlock.bin";
// Pre-funded key of a `fuel-core run --debug` node.
const LOCAL_DEV_KEY: &str =
    "de97d8624a438121b86a1956544bd72ed68cd69f2c99555b08b1e8c51ffd511c";
const DERIVATION_PATH: &str = "m/44'/1179993420'/0'/0/0";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const CALL_GAS: u64 = 1_000_000;
// about a minute of an unreachable node at the poll interval
const MAX_READ_FAILURES: u32 = 30;

const PHASE_OPEN: u64 = 0;
const PHASE_LOCKED: u64 = 1;
const PHASE_SETTLED: u64 = 2;

#[derive(Clone, Debug)]
pub struct FuelLedger {
    provider: Provider,
    base_asset: AssetId,
    has_faucet: bool,
}

fn transport(e: FuelsError) -> EscrowError {
    EscrowError::Transport(e.to_string())
}

impl FuelLedger {
    pub async fn connect(config: &NetworkConfig) -> Result<Self> {
        let provider = Provider::connect(&config.rpc_url).await.map_err(transport)?;
        let base_asset = *provider
            .consensus_parameters()
            .await
            .map_err(transport)?
            .base_asset_id();
        Ok(Self {
            provider,
            base_asset,
            has_faucet: config.has_faucet(),
        })
    }

    fn wallet_from_secret(&self, secret: SecretKey) -> WalletUnlocked {
        WalletUnlocked::new_from_private_key(secret, Some(self.provider.clone()))
    }

    async fn read_phase(
        contract: &HashLock<WalletUnlocked>,
    ) -> std::result::Result<u64, FuelsError> {
        Ok(contract
            .methods()
            .phase()
            .simulate(Execution::StateReadOnly)
            .await?
            .value)
    }

    async fn wait_for_phase(
        contract: &HashLock<WalletUnlocked>,
        done: impl Fn(u64) -> bool,
    ) -> Result<u64> {
        poll_until(
            || Self::read_phase(contract),
            |phase| done(*phase),
            POLL_INTERVAL,
            MAX_READ_FAILURES,
        )
        .await
    }

    async fn escrowed(contract: &HashLock<WalletUnlocked>) -> Result<u64> {
        Ok(contract
            .methods()
            .escrowed()
            .simulate(Execution::StateReadOnly)
            .await
            .map_err(transport)?
            .value)
    }
}

impl LedgerClient for FuelLedger {
    type Account = WalletUnlocked;

    fn decimals(&self) -> u32 {
        DEFAULT_DECIMALS
    }

    async fn default_account(&self, key: &KeyMaterial) -> Result<WalletUnlocked> {
        match key {
            KeyMaterial::SecretKey(bytes) => {
                let secret = SecretKey::try_from(bytes.as_slice()).map_err(|e| {
                    EscrowError::Connection(format!("invalid secret key: {e}"))
                })?;
                Ok(self.wallet_from_secret(secret))
            }
            KeyMaterial::Mnemonic(phrase) => WalletUnlocked::new_from_mnemonic_phrase_with_path(
                phrase,
                Some(self.provider.clone()),
                DERIVATION_PATH,
            )
            .map_err(|e| EscrowError::Connection(format!("invalid mnemonic: {e}"))),
            // A throwaway wallet is only useful where the faucet can fund it.
            KeyMaterial::Ambient if self.has_faucet => {
                Ok(WalletUnlocked::new_random(Some(self.provider.clone())))
            }
            KeyMaterial::Ambient => Err(EscrowError::Connection(
                "no wallet configured; pass --wallet <name>".into(),
            )),
        }
    }

    async fn balance_of(&self, account: &WalletUnlocked) -> Result<u64> {
        account
            .get_asset_balance(&self.base_asset)
            .await
            .map_err(transport)
    }

    fn format_address(&self, account: &WalletUnlocked) -> String {
        format!("0x{}", hex::encode(account.address().hash()))
    }

    async fn faucet(&self) -> Result<WalletUnlocked> {
        if !self.has_faucet {
            return Err(EscrowError::FaucetUnavailable(
                "this provider has no development faucet".into(),
            ));
        }
        let secret = SecretKey::from_str(LOCAL_DEV_KEY)
            .map_err(|e| EscrowError::FaucetUnavailable(e.to_string()))?;
        Ok(self.wallet_from_secret(secret))
    }

    async fn transfer(
        &self,
        from: &WalletUnlocked,
        to: &WalletUnlocked,
        amount: u64,
    ) -> Result<()> {
        from.transfer(to.address(), amount, self.base_asset, TxPolicies::default())
            .await
            .map_err(transport)?;
        Ok(())
    }
}

impl EscrowProgram for FuelLedger {
    type Contract = HashLock<WalletUnlocked>;

    fn parse_instance_id(&self, raw: &str) -> Result<InstanceId> {
        let trimmed = raw.trim();
        let id = ContractId::from_str(trimmed).map_err(|_| {
            EscrowError::Resolution(format!("'{trimmed}' is not a contract id"))
        })?;
        Ok(InstanceId::new(format!("0x{}", hex::encode(*id))))
    }

    fn instance_id(&self, contract: &Self::Contract) -> InstanceId {
        let id = ContractId::from(contract.contract_id());
        InstanceId::new(format!("0x{}", hex::encode(*id)))
    }

    async fn deploy(&self, deployer: &WalletUnlocked) -> Result<Self::Contract> {
        let salt = rand::rng().random::<[u8; 32]>();
        let id = Contract::load_from(HASHLOCK_BIN, LoadConfiguration::default().with_salt(salt))
            .map_err(|e| EscrowError::Deploy(e.to_string()))?
            .deploy(deployer, TxPolicies::default())
            .await
            .map_err(|e| EscrowError::Deploy(e.to_string()))?;
        debug!(contract = %id, "hashlock contract deployed");
        Ok(HashLock::new(id, deployer.clone()))
    }

    async fn attach(&self, account: &WalletUnlocked, id: &InstanceId) -> Result<Self::Contract> {
        let contract_id = ContractId::from_str(id.as_str())
            .map_err(|_| EscrowError::Resolution(format!("'{id}' is not a contract id")))?;
        let contract = HashLock::new(Bech32ContractId::from(contract_id), account.clone());
        let phase = Self::read_phase(&contract)
            .await
            .map_err(|e| EscrowError::Resolution(format!("no escrow at {id}: {e}")))?;
        match phase {
            PHASE_OPEN => Err(EscrowError::Resolution(format!(
                "escrow {id} holds no funds"
            ))),
            PHASE_SETTLED => Err(EscrowError::AlreadySettled(id.to_string())),
            _ => Ok(contract),
        }
    }

    async fn lock(&self, contract: &Self::Contract, terms: EscrowTerms) -> Result<()> {
        terms.validate()?;
        let call = CallParameters::new(terms.amount, self.base_asset, CALL_GAS);
        contract
            .methods()
            .lock(Bits256(secret_digest(terms.secret)))
            .call_params(call)
            .map_err(|e| EscrowError::Deploy(e.to_string()))?
            .call()
            .await
            .map_err(|e| EscrowError::Deploy(e.to_string()))?;
        debug!(instance = %self.instance_id(contract), "escrow locked");
        Ok(())
    }

    async fn await_settlement(&self, contract: &Self::Contract) -> Result<Settlement> {
        Self::wait_for_phase(contract, |phase| phase == PHASE_SETTLED).await?;
        Ok(Settlement {
            instance: self.instance_id(contract),
            amount: Self::escrowed(contract).await?,
        })
    }

    async fn bob<F>(&self, contract: &Self::Contract, reveal: F) -> Result<Settlement>
    where
        F: FnOnce() -> u64 + Send + 'static,
    {
        let instance = self.instance_id(contract);
        let phase = Self::wait_for_phase(contract, |phase| phase >= PHASE_LOCKED).await?;
        if phase == PHASE_SETTLED {
            return Err(EscrowError::AlreadySettled(instance.to_string()));
        }
        let amount = Self::escrowed(contract).await?;

        let secret = reveal();
        let claimed = contract
            .methods()
            .claim(secret)
            .with_variable_output_policy(VariableOutputPolicy::EstimateMinimum)
            .call()
            .await;
        match claimed {
            Ok(_) => Ok(Settlement { instance, amount }),
            Err(e) => match Self::read_phase(contract).await {
                Ok(PHASE_SETTLED) => Err(EscrowError::AlreadySettled(instance.to_string())),
                _ if matches!(e, FuelsError::Transaction(_)) => Err(EscrowError::RevealRejected),
                _ => Err(transport(e)),
            },
        }
    }
}
