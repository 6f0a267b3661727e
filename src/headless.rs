use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use hashlock_escrow::{
    account::{
        self,
        AccountSession,
    },
    config::{
        NetworkConfig,
        NetworkKind,
    },
    currency::CurrencyCodec,
    deployment::{
        EscrowRecord,
        EscrowStore,
    },
    ledger::{
        EscrowProgram,
        EscrowTerms,
    },
    registry,
    roles::{
        AliceRole,
        BobRole,
    },
    wallets::{
        self,
        KeyMaterial,
    },
};
use tracing::{
    info,
    warn,
};

/// Unlocks the configured keystore on the terminal, or falls back to the
/// ledger's ambient identity.
async fn load_key(config: &NetworkConfig) -> Result<KeyMaterial> {
    let Some(name) = config.wallet.clone() else {
        return Ok(KeyMaterial::Ambient);
    };
    let dir = wallets::resolve_wallet_dir(config.wallet_dir.as_deref())?;
    let descriptor = wallets::find_wallet(&dir, &name)?;
    let key = tokio::task::spawn_blocking(move || wallets::prompt_and_unlock(&descriptor))
        .await
        .wrap_err("keystore prompt aborted")??;
    Ok(key)
}

async fn open_session<P: EscrowProgram>(
    program: &P,
    config: &NetworkConfig,
) -> Result<(CurrencyCodec, AccountSession<P>)> {
    let codec = CurrencyCodec::new(program.decimals());
    let key = load_key(config).await?;
    let session = account::connect(program, &codec, &key).await?;
    Ok((codec, session))
}

fn refuse_simulated(config: &NetworkConfig, command: &str) -> Result<()> {
    if config.network == NetworkKind::Sim {
        return Err(eyre!(
            "`{command}` needs a shared ledger; the simulated ledger only lives inside \
             one process. Use the TUI to play both roles, or select --network fuel"
        ));
    }
    Ok(())
}

pub async fn balance<P: EscrowProgram>(program: P, config: NetworkConfig) -> Result<()> {
    let (_, session) = open_session(&program, &config).await?;
    println!("address: {}", session.address());
    println!("balance: {}", session.balance().display);
    Ok(())
}

pub async fn faucet<P: EscrowProgram>(program: P, config: NetworkConfig) -> Result<()> {
    let (codec, mut session) = open_session(&program, &config).await?;
    let granted = account::fund(&program, &config, &codec, &session).await?;
    session.refresh_balance(&program, &codec).await?;
    println!(
        "funded {} with {}",
        session.address(),
        codec.format_amount(granted, account::BALANCE_PRECISION)
    );
    println!("balance: {}", session.balance().display);
    Ok(())
}

pub async fn send<P: EscrowProgram>(
    program: P,
    config: NetworkConfig,
    amount: &str,
    secret: u64,
) -> Result<()> {
    refuse_simulated(&config, "send")?;
    let (codec, session) = open_session(&program, &config).await?;
    let terms = EscrowTerms::new(codec.parse_amount(amount)?, secret);
    let store = EscrowStore::new(config.deployment_env())?;

    let (handle, pending) = registry::deploy_new(&program, &session);
    let (role, _progress) = AliceRole::new(handle);
    let alice = tokio::spawn(role.run(terms));

    let id = pending.resolved().await?;
    println!("escrow id: {id}");
    println!("share the id and the secret with the receiver");
    record_opened(
        &store,
        EscrowRecord::now(
            id.clone(),
            config.endpoint(),
            terms.amount,
            Some(session.address().to_string()),
        ),
    );

    let settlement = alice.await.wrap_err("send task aborted")??;
    println!(
        "escrow {} settled: {} released to the receiver",
        settlement.instance,
        codec.format_amount(settlement.amount, account::BALANCE_PRECISION)
    );
    Ok(())
}

/// Store failures are only logged: by now the funds are locked and the
/// command still has to wait for settlement.
fn record_opened(store: &EscrowStore, record: EscrowRecord) -> bool {
    let instance = record.instance_id.clone();
    match store.append(record) {
        Ok(()) => {
            info!(%instance, path = %store.path().display(), "escrow recorded");
            true
        }
        Err(e) => {
            warn!(%instance, error = %e, "failed to record escrow id");
            false
        }
    }
}

pub async fn receive<P: EscrowProgram>(
    program: P,
    config: NetworkConfig,
    instance: &str,
    secret: u64,
) -> Result<()> {
    refuse_simulated(&config, "receive")?;
    let (codec, session) = open_session(&program, &config).await?;
    let handle = registry::attach_existing(&program, &session, instance).await?;
    println!("attached to escrow {}", handle.id());
    let (role, _progress) = BobRole::new(handle);
    let settlement = role.run(move || secret).await?;
    println!(
        "received {} from escrow {}",
        codec.format_amount(settlement.amount, account::BALANCE_PRECISION),
        settlement.instance
    );
    Ok(())
}

pub fn escrows(config: &NetworkConfig) -> Result<()> {
    let store = EscrowStore::new(config.deployment_env())?;
    let records = store.load()?;
    if records.is_empty() {
        println!("no escrows recorded in {}", store.path().display());
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {}  amount={}  {}",
            record.deployed_at, record.instance_id, record.amount, record.network_url
        );
    }
    Ok(())
}
