use crate::{
    config::NetworkConfig,
    currency::CurrencyCodec,
    error::{
        EscrowError,
        Result,
    },
    ledger::LedgerClient,
    wallets::KeyMaterial,
};
use tracing::info;

/// Display units granted per faucet request.
pub const FAUCET_GRANT: &str = "100";

/// Fractional digits shown for balances.
pub const BALANCE_PRECISION: u32 = 4;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Balance {
    pub atomic: u64,
    pub display: String,
}

impl Balance {
    pub fn new(codec: &CurrencyCodec, atomic: u64) -> Self {
        Self {
            atomic,
            display: codec.format_amount(atomic, BALANCE_PRECISION),
        }
    }
}

/// The connected identity plus a balance snapshot. The snapshot only moves
/// on [`AccountSession::refresh_balance`] or a fresh [`connect`].
pub struct AccountSession<L: LedgerClient> {
    account: L::Account,
    address: String,
    balance: Balance,
}

impl<L: LedgerClient> Clone for AccountSession<L> {
    fn clone(&self) -> Self {
        Self {
            account: self.account.clone(),
            address: self.address.clone(),
            balance: self.balance.clone(),
        }
    }
}

impl<L: LedgerClient> AccountSession<L> {
    pub fn account(&self) -> &L::Account {
        &self.account
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    pub async fn refresh_balance(&mut self, ledger: &L, codec: &CurrencyCodec) -> Result<()> {
        let atomic = ledger.balance_of(&self.account).await?;
        self.balance = Balance::new(codec, atomic);
        Ok(())
    }
}

pub async fn connect<L: LedgerClient>(
    ledger: &L,
    codec: &CurrencyCodec,
    key: &KeyMaterial,
) -> Result<AccountSession<L>> {
    let account = ledger.default_account(key).await?;
    let address = ledger.format_address(&account);
    let atomic = ledger.balance_of(&account).await?;
    info!(%address, "account connected");
    Ok(AccountSession {
        account,
        address,
        balance: Balance::new(codec, atomic),
    })
}

/// Sends [`FAUCET_GRANT`] from the ledger's faucet identity. Leaves the
/// session's balance snapshot untouched; callers refresh explicitly.
pub async fn fund<L: LedgerClient>(
    ledger: &L,
    config: &NetworkConfig,
    codec: &CurrencyCodec,
    session: &AccountSession<L>,
) -> Result<u64> {
    if !config.has_faucet() {
        return Err(EscrowError::FaucetUnavailable(format!(
            "no faucet on {}",
            config.label()
        )));
    }
    let amount = codec.parse_amount(FAUCET_GRANT)?;
    let faucet = ledger.faucet().await?;
    ledger.transfer(&faucet, session.account(), amount).await?;
    info!(address = %session.address(), amount, "faucet funded account");
    Ok(amount)
}
