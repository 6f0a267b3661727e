use crate::ui;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use hashlock_escrow::{
    account::{
        self,
        AccountSession,
    },
    config::NetworkConfig,
    currency::CurrencyCodec,
    deployment::{
        EscrowRecord,
        EscrowStore,
    },
    error::EscrowError,
    ledger::{
        EscrowProgram,
        EscrowTerms,
        InstanceId,
    },
    registry,
    roles::{
        AliceRole,
        BobRole,
        Role,
        RolePhase,
    },
    view::{
        RoleRefusal,
        SessionViewModel,
        ViewSnapshot,
    },
    wallets::{
        self,
        KeyMaterial,
        WalletDescriptor,
    },
};
use tokio::sync::{
    mpsc,
    watch,
};
use tracing::{
    error,
    info,
    warn,
};

/// Results reported back to the controller by spawned tasks.
pub enum TaskEvent<P: EscrowProgram> {
    Connected(hashlock_escrow::error::Result<AccountSession<P>>),
    Funded(hashlock_escrow::error::Result<u64>),
    BalanceRefreshed(hashlock_escrow::error::Result<AccountSession<P>>),
    RoleProgress(Role, RolePhase),
}

pub struct AppController<P: EscrowProgram> {
    program: P,
    config: NetworkConfig,
    codec: CurrencyCodec,
    wallet: Option<WalletDescriptor>,
    store: Option<EscrowStore>,
    view: SessionViewModel<P>,
    pending_amount: Option<u64>,
    events: mpsc::UnboundedSender<TaskEvent<P>>,
}

impl<P: EscrowProgram> AppController<P> {
    pub fn new(
        program: P,
        config: NetworkConfig,
        wallet: Option<WalletDescriptor>,
        store: Option<EscrowStore>,
        events: mpsc::UnboundedSender<TaskEvent<P>>,
    ) -> Self {
        let codec = CurrencyCodec::new(program.decimals());
        let view = SessionViewModel::new(&config);
        Self {
            program,
            config,
            codec,
            wallet,
            store,
            view,
            pending_amount: None,
            events,
        }
    }

    pub fn needs_password(&self) -> bool {
        self.wallet.is_some()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.view.snapshot()
    }

    fn fail(&mut self, context: &str, e: &EscrowError) {
        error!(error = %e, "{context}");
        self.view.set_error(format!("{context}: {e}"));
    }

    /// Unlocks the configured keystore, if any, and connects. Never retried.
    pub fn connect(&mut self, password: Option<String>) {
        self.view.set_status("Connecting...");
        let program = self.program.clone();
        let codec = self.codec;
        let wallet = self.wallet.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match resolve_key(wallet, password).await {
                Ok(key) => account::connect(&program, &codec, &key).await,
                Err(e) => Err(e),
            };
            let _ = events.send(TaskEvent::Connected(result));
        });
    }

    pub fn decline_password(&mut self) {
        let e = EscrowError::Connection("password entry declined".into());
        self.fail("Connect failed", &e);
    }

    pub fn fund_from_faucet(&mut self) {
        let Some(session) = self.view.account().cloned() else {
            self.view.set_error("Connect an account first");
            return;
        };
        if !self.config.has_faucet() {
            let e = EscrowError::FaucetUnavailable(self.config.label());
            self.fail("Faucet failed", &e);
            return;
        }
        self.view.set_status("Requesting faucet funds...");
        let program = self.program.clone();
        let config = self.config.clone();
        let codec = self.codec;
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = account::fund(&program, &config, &codec, &session).await;
            let _ = events.send(TaskEvent::Funded(result));
        });
    }

    pub fn refresh_balance(&mut self) {
        let Some(mut session) = self.view.account().cloned() else {
            self.view.set_error("Connect an account first");
            return;
        };
        let program = self.program.clone();
        let codec = self.codec;
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = session
                .refresh_balance(&program, &codec)
                .await
                .map(|_| session);
            let _ = events.send(TaskEvent::BalanceRefreshed(result));
        });
    }

    pub fn field_changed(&mut self, name: &str, value: &str) {
        self.view.form.on_change(name, value);
    }

    fn begin(&mut self, role: Role) -> bool {
        match self.view.begin_role(role) {
            Ok(()) => true,
            Err(RoleRefusal::NotConnected) => {
                self.view.set_error("Connect an account first");
                false
            }
            Err(RoleRefusal::InFlight) => {
                warn!(%role, "role already in flight");
                false
            }
        }
    }

    pub fn run_alice_role(&mut self) {
        if !self.begin(Role::Alice) {
            return;
        }
        let terms = match self.view.form.alice_terms(&self.codec) {
            Ok(terms) => terms,
            Err(e) => {
                self.view
                    .record_progress(Role::Alice, RolePhase::Failed(e.clone()));
                self.fail("Send failed", &e);
                return;
            }
        };
        let Some(session) = self.view.account().cloned() else {
            return;
        };
        self.pending_amount = Some(terms.amount);
        self.view.set_status(format!(
            "Sending {}...",
            self.codec.format_amount(terms.amount, account::BALANCE_PRECISION)
        ));
        let (handle, _pending) = registry::deploy_new(&self.program, &session);
        let (role, progress) = AliceRole::new(handle);
        forward_progress(Role::Alice, progress, self.events.clone());
        tokio::spawn(run_alice(role, terms));
    }

    pub fn run_bob_role(&mut self) {
        if !self.begin(Role::Bob) {
            return;
        }
        let (raw_id, secret) = match self.view.form.bob_inputs() {
            Ok(inputs) => inputs,
            Err(e) => {
                self.view
                    .record_progress(Role::Bob, RolePhase::Failed(e.clone()));
                self.fail("Receive failed", &e);
                return;
            }
        };
        let Some(session) = self.view.account().cloned() else {
            return;
        };
        self.view.set_status(format!("Attaching to escrow {raw_id}..."));
        let program = self.program.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let handle =
                match registry::attach_existing(&program, &session, &raw_id).await {
                    Ok(handle) => handle,
                    Err(e) => {
                        let _ = events
                            .send(TaskEvent::RoleProgress(Role::Bob, RolePhase::Failed(e)));
                        return;
                    }
                };
            let (role, progress) = BobRole::new(handle);
            forward_progress(Role::Bob, progress, events);
            let _ = role.run(move || secret).await;
        });
    }

    pub fn apply(&mut self, event: TaskEvent<P>) {
        match event {
            TaskEvent::Connected(Ok(session)) => {
                self.view.set_status(format!("Connected as {}", session.address()));
                self.view.set_account(session);
            }
            TaskEvent::Connected(Err(e)) => self.fail("Connect failed", &e),
            TaskEvent::Funded(Ok(amount)) => {
                self.view.set_status(format!(
                    "Faucet sent {}; press F5 to refresh the balance",
                    self.codec.format_amount(amount, account::BALANCE_PRECISION)
                ));
            }
            TaskEvent::Funded(Err(e)) => self.fail("Faucet failed", &e),
            TaskEvent::BalanceRefreshed(Ok(session)) => {
                self.view
                    .set_status(format!("Balance {}", session.balance().display));
                self.view.set_account(session);
            }
            TaskEvent::BalanceRefreshed(Err(e)) => self.fail("Refresh failed", &e),
            TaskEvent::RoleProgress(role, phase) => self.role_progress(role, phase),
        }
    }

    fn role_progress(&mut self, role: Role, phase: RolePhase) {
        match &phase {
            RolePhase::AwaitingAccept(id) => {
                self.record_escrow(id);
                self.view
                    .set_status(format!("Escrow {id} is open; share the id and secret"));
            }
            RolePhase::AwaitingReveal(id) => {
                self.view.set_status(format!("Attached to escrow {id}"));
            }
            RolePhase::Settled(s) => {
                self.view.set_status(format!(
                    "{role}: escrow {} settled for {}",
                    s.instance,
                    self.codec.format_amount(s.amount, account::BALANCE_PRECISION)
                ));
            }
            RolePhase::Failed(e) => {
                self.view.set_error(format!("{role} failed: {e}"));
            }
            RolePhase::Start => {}
        }
        self.view.record_progress(role, phase);
    }

    fn record_escrow(&mut self, id: &InstanceId) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let amount = self.pending_amount.take().unwrap_or_default();
        let depositor = self.view.account().map(|a| a.address().to_string());
        let record = EscrowRecord::now(id.clone(), self.config.endpoint(), amount, depositor);
        if let Err(e) = store.append(record) {
            warn!(error = %e, "failed to record escrow id");
        }
    }
}

async fn resolve_key(
    wallet: Option<WalletDescriptor>,
    password: Option<String>,
) -> hashlock_escrow::error::Result<KeyMaterial> {
    let Some(wallet) = wallet else {
        return Ok(KeyMaterial::Ambient);
    };
    let Some(password) = password else {
        return Err(EscrowError::Connection(format!(
            "no password given for wallet '{}'",
            wallet.name
        )));
    };
    tokio::task::spawn_blocking(move || wallets::unlock_wallet(&wallet, &password))
        .await
        .map_err(|e| EscrowError::Connection(format!("keystore unlock aborted: {e}")))?
}

async fn run_alice<P: EscrowProgram>(role: AliceRole<P>, terms: EscrowTerms) {
    let _ = role.run(terms).await;
}

/// Relays every phase a driver publishes until it reaches a terminal one.
fn forward_progress<P: EscrowProgram>(
    role: Role,
    mut progress: watch::Receiver<RolePhase>,
    events: mpsc::UnboundedSender<TaskEvent<P>>,
) {
    tokio::spawn(async move {
        loop {
            let phase = progress.borrow_and_update().clone();
            let terminal = phase.is_terminal();
            if phase != RolePhase::Start {
                let _ = events.send(TaskEvent::RoleProgress(role, phase));
            }
            if terminal || progress.changed().await.is_err() {
                break;
            }
        }
    });
}

pub async fn run_app<P: EscrowProgram>(program: P, config: NetworkConfig) -> Result<()> {
    let wallet = match config.wallet.as_deref() {
        Some(name) => {
            let dir = wallets::resolve_wallet_dir(config.wallet_dir.as_deref())?;
            Some(wallets::find_wallet(&dir, name)?)
        }
        None => None,
    };
    let store = match EscrowStore::new(config.deployment_env()) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, "escrow records disabled");
            None
        }
    };
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut controller = AppController::new(program, config, wallet, store, events_tx);
    let mut ui_state = ui::UiState::new(controller.needs_password());
    let mut input_events = ui::input_event_stream();

    info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(&mut controller, &mut ui_state, &mut input_events, &mut events_rx).await;
    ui::terminal_exit()?;
    res
}

async fn run_loop<P: EscrowProgram>(
    controller: &mut AppController<P>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
    events_rx: &mut mpsc::UnboundedReceiver<TaskEvent<P>>,
) -> Result<()> {
    ui::draw(ui_state, &controller.snapshot()).wrap_err("initial draw failed")?;
    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                controller.apply(event);
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Connect(password) => controller.connect(password),
                    ui::UserEvent::DeclinePassword => controller.decline_password(),
                    ui::UserEvent::Fund => controller.fund_from_faucet(),
                    ui::UserEvent::Refresh => controller.refresh_balance(),
                    ui::UserEvent::FieldChanged { name, value } => {
                        controller.field_changed(name, &value)
                    }
                    ui::UserEvent::RunAlice => controller.run_alice_role(),
                    ui::UserEvent::RunBob => controller.run_bob_role(),
                    ui::UserEvent::Redraw => {}
                }
            }
        }
        ui::draw(ui_state, &controller.snapshot()).wrap_err("draw failed")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use hashlock_escrow::{
        config::{
            NetworkKind,
            ProviderName,
        },
        ledger::{
            LedgerClient,
            sim::SimLedger,
        },
        view::{
            FIELD_AMT,
            FIELD_INFO,
            FIELD_PASS,
        },
    };
    use tempfile::tempdir;

    type Events = mpsc::UnboundedReceiver<TaskEvent<SimLedger>>;

    fn controller(
        ledger: &SimLedger,
        config: NetworkConfig,
        store: Option<EscrowStore>,
    ) -> (AppController<SimLedger>, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AppController::new(ledger.clone(), config, None, store, tx), rx)
    }

    async fn pump_until(
        controller: &mut AppController<SimLedger>,
        events: &mut Events,
        done: impl Fn(&ViewSnapshot) -> bool,
    ) {
        while !done(&controller.snapshot()) {
            let event = events.recv().await.expect("controller channel closed");
            controller.apply(event);
        }
    }

    async fn connected(
        ledger: &SimLedger,
        store: Option<EscrowStore>,
    ) -> (AppController<SimLedger>, Events) {
        let (mut app, mut events) = controller(ledger, NetworkConfig::default(), store);
        app.connect(None);
        pump_until(&mut app, &mut events, |s| s.address.is_some()).await;
        (app, events)
    }

    #[tokio::test]
    async fn connect__shows_address_and_balance() {
        // given
        let ledger = SimLedger::new();
        let (mut app, mut events) = controller(&ledger, NetworkConfig::default(), None);

        // when
        app.connect(None);
        pump_until(&mut app, &mut events, |s| s.address.is_some()).await;

        // then
        let snap = app.snapshot();
        assert_eq!(snap.balance.as_deref(), Some("0.0000"));
        assert!(snap.alice.enabled);
        assert!(snap.bob.enabled);
    }

    #[tokio::test]
    async fn fund_from_faucet__then_refresh_shows_the_grant() {
        // given
        let ledger = SimLedger::new();
        let (mut app, mut events) = connected(&ledger, None).await;

        // when
        app.fund_from_faucet();
        pump_until(&mut app, &mut events, |s| {
            s.status.as_deref().is_some_and(|m| m.starts_with("Faucet sent"))
        })
        .await;
        app.refresh_balance();
        pump_until(&mut app, &mut events, |s| {
            s.balance.as_deref() == Some("100.0000")
        })
        .await;

        // then
        assert_eq!(app.snapshot().error, None);
    }

    #[tokio::test]
    async fn fund_from_faucet__refused_without_faucet() {
        // given
        let ledger = SimLedger::new();
        let config = NetworkConfig::new(NetworkKind::Sim, ProviderName::TestNet);
        let (mut app, mut events) = controller(&ledger, config, None);
        app.connect(None);
        pump_until(&mut app, &mut events, |s| s.address.is_some()).await;

        // when
        app.fund_from_faucet();

        // then
        let error = app.snapshot().error.unwrap_or_default();
        assert!(error.contains("faucet"), "unexpected error {error:?}");
    }

    #[tokio::test]
    async fn run_alice_role__invalid_form_fails_without_deploying() {
        // given
        let ledger = SimLedger::new();
        let (mut app, _events) = connected(&ledger, None).await;
        app.field_changed(FIELD_AMT, "ten");
        app.field_changed(FIELD_PASS, "42");

        // when
        app.run_alice_role();

        // then
        let snap = app.snapshot();
        assert!(snap.alice.enabled);
        assert!(snap.last_result.is_some());
        assert!(snap.alice.phase.unwrap_or_default().starts_with("failed"));
    }

    #[tokio::test]
    async fn full_round__one_session_plays_both_roles() {
        // given
        let ledger = SimLedger::new();
        let records = tempdir().unwrap();
        let store = EscrowStore::open(
            records.path(),
            NetworkConfig::default().deployment_env(),
        )
        .unwrap();
        let (mut app, mut events) = connected(&ledger, Some(store)).await;
        app.fund_from_faucet();
        pump_until(&mut app, &mut events, |s| {
            s.status.as_deref().is_some_and(|m| m.starts_with("Faucet sent"))
        })
        .await;
        app.field_changed(FIELD_AMT, "10");
        app.field_changed(FIELD_PASS, "42");

        // when
        app.run_alice_role();
        assert!(!app.snapshot().alice.enabled);
        pump_until(&mut app, &mut events, |s| s.deployed.is_some()).await;
        let id = app.snapshot().deployed.unwrap();
        app.field_changed(FIELD_INFO, &id);
        app.run_bob_role();
        pump_until(&mut app, &mut events, |s| s.alice.enabled && s.bob.enabled).await;

        // then
        let snap = app.snapshot();
        assert!(snap.alice.phase.unwrap_or_default().contains("settled"));
        assert!(snap.bob.phase.unwrap_or_default().contains("settled"));
        let store = EscrowStore::open(
            records.path(),
            NetworkConfig::default().deployment_env(),
        )
        .unwrap();
        let saved = store.load().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].instance_id.as_str(), id);
        assert_eq!(saved[0].amount, 10 * 10u64.pow(ledger.decimals()));
    }

    #[tokio::test]
    async fn run_alice_role__unfunded_lock_records_nothing() {
        // given
        let ledger = SimLedger::new();
        let records = tempdir().unwrap();
        let env = NetworkConfig::default().deployment_env();
        let store = EscrowStore::open(records.path(), env).unwrap();
        let (mut app, mut events) = connected(&ledger, Some(store)).await;
        app.field_changed(FIELD_AMT, "10");
        app.field_changed(FIELD_PASS, "42");

        // when
        app.run_alice_role();
        pump_until(&mut app, &mut events, |s| s.alice.enabled).await;

        // then
        let snap = app.snapshot();
        assert_eq!(snap.deployed, None);
        assert!(snap.alice.phase.unwrap_or_default().starts_with("failed"));
        let error = snap.error.unwrap_or_default();
        assert!(error.contains("insufficient funds"), "unexpected error {error:?}");
        let store = EscrowStore::open(records.path(), env).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_bob_role__unknown_instance_fails_to_resolve() {
        // given
        let ledger = SimLedger::new();
        let (mut app, mut events) = connected(&ledger, None).await;
        app.field_changed(FIELD_INFO, "99");
        app.field_changed(FIELD_PASS, "1");

        // when
        app.run_bob_role();
        pump_until(&mut app, &mut events, |s| s.bob.enabled).await;

        // then
        let error = app.snapshot().error.unwrap_or_default();
        assert!(error.contains("cannot resolve"), "unexpected error {error:?}");
    }
}
