#![allow(non_snake_case)]

use hashlock_escrow::{
    account::{
        self,
        AccountSession,
    },
    currency::CurrencyCodec,
    error::EscrowError,
    ledger::{
        EscrowProgram,
        EscrowTerms,
        InstanceId,
        LedgerClient,
        sim::SimLedger,
    },
    registry,
    roles::{
        AliceRole,
        BobRole,
        RolePhase,
    },
    wallets::KeyMaterial,
};
use proptest::prelude::*;
use std::sync::{
    Arc,
    atomic::{
        AtomicBool,
        AtomicUsize,
        Ordering,
    },
};
use tokio::task::JoinHandle;

const STARTING: u64 = 1_000;

async fn session(ledger: &SimLedger, seed: u8) -> AccountSession<SimLedger> {
    let codec = CurrencyCodec::new(ledger.decimals());
    account::connect(ledger, &codec, &KeyMaterial::SecretKey([seed; 32]))
        .await
        .unwrap()
}

/// Starts Alice in the background and returns her task plus the instance id
/// once the terms are locked.
async fn open_escrow(
    ledger: &SimLedger,
    alice: &AccountSession<SimLedger>,
    terms: EscrowTerms,
) -> (
    JoinHandle<hashlock_escrow::error::Result<hashlock_escrow::ledger::Settlement>>,
    tokio::sync::watch::Receiver<RolePhase>,
    InstanceId,
) {
    let (handle, pending) = registry::deploy_new(ledger, alice);
    let (role, progress) = AliceRole::new(handle);
    let task = tokio::spawn(role.run(terms));
    let id = pending.resolved().await.unwrap();
    (task, progress, id)
}

async fn claim(
    ledger: &SimLedger,
    bob: &AccountSession<SimLedger>,
    id: &InstanceId,
    secret: u64,
) -> hashlock_escrow::error::Result<hashlock_escrow::ledger::Settlement> {
    let handle = registry::attach_existing(ledger, bob, id.as_str()).await?;
    let (role, _progress) = BobRole::new(handle);
    role.run(move || secret).await
}

#[tokio::test]
async fn escrow_round__correct_secret_moves_the_amount_to_bob() {
    // given
    let ledger = SimLedger::with_settings(0, STARTING);
    let alice = session(&ledger, 1).await;
    let bob = session(&ledger, 2).await;
    let (alice_task, mut alice_progress, id) =
        open_escrow(&ledger, &alice, EscrowTerms::new(100, 42)).await;

    // when
    let received = claim(&ledger, &bob, &id, 42).await.unwrap();
    let sent = alice_task.await.unwrap().unwrap();

    // then
    assert_eq!(received.amount, 100);
    assert_eq!(sent, received);
    assert_eq!(ledger.balance_of(alice.account()).await.unwrap(), STARTING - 100);
    assert_eq!(ledger.balance_of(bob.account()).await.unwrap(), STARTING + 100);
    assert!(matches!(
        &*alice_progress.borrow_and_update(),
        RolePhase::Settled(s) if s.instance == id
    ));
}

#[tokio::test]
async fn escrow_round__fees_are_paid_by_each_submitter() {
    // given
    let fee = 3;
    let ledger = SimLedger::with_settings(fee, STARTING);
    let alice = session(&ledger, 1).await;
    let bob = session(&ledger, 2).await;
    let (alice_task, _, id) = open_escrow(&ledger, &alice, EscrowTerms::new(100, 7)).await;

    // when
    claim(&ledger, &bob, &id, 7).await.unwrap();
    alice_task.await.unwrap().unwrap();

    // then
    // deploy and lock for Alice, claim for Bob
    assert_eq!(
        ledger.balance_of(alice.account()).await.unwrap(),
        STARTING - 100 - 2 * fee
    );
    assert_eq!(
        ledger.balance_of(bob.account()).await.unwrap(),
        STARTING + 100 - fee
    );
}

#[tokio::test]
async fn escrow_round__wrong_secret_leaves_the_escrow_locked() {
    // given
    let ledger = SimLedger::with_settings(0, STARTING);
    let alice = session(&ledger, 1).await;
    let bob = session(&ledger, 2).await;
    let (alice_task, _, id) = open_escrow(&ledger, &alice, EscrowTerms::new(100, 42)).await;

    // when
    let rejected = claim(&ledger, &bob, &id, 43).await;

    // then
    assert_eq!(rejected, Err(EscrowError::RevealRejected));
    assert_eq!(ledger.locked_amount(&id), Some(100));
    assert!(!alice_task.is_finished());
    assert_eq!(ledger.balance_of(bob.account()).await.unwrap(), STARTING);

    // a later correct reveal still settles
    claim(&ledger, &bob, &id, 42).await.unwrap();
    assert_eq!(alice_task.await.unwrap().unwrap().amount, 100);
}

#[tokio::test]
async fn escrow_round__unfunded_lock_never_reaches_bob() {
    // given
    let ledger = SimLedger::with_settings(0, 50);
    let alice = session(&ledger, 1).await;
    let bob = session(&ledger, 2).await;
    let (handle, pending) = registry::deploy_new(&ledger, &alice);
    let (role, _progress) = AliceRole::new(handle);

    // when
    let sent = role.run(EscrowTerms::new(100, 42)).await;

    // then
    assert!(matches!(sent, Err(EscrowError::Deploy(_))));
    assert!(matches!(pending.resolved().await, Err(EscrowError::Deploy(_))));
    // the instance was deployed as "1" but never funded
    assert!(matches!(
        claim(&ledger, &bob, &InstanceId::new("1"), 42).await,
        Err(EscrowError::Resolution(_))
    ));
    assert_eq!(ledger.balance_of(alice.account()).await.unwrap(), 50);
    assert_eq!(ledger.balance_of(bob.account()).await.unwrap(), 50);
}

#[tokio::test]
async fn attach_existing__malformed_and_unknown_ids_do_not_resolve() {
    let ledger = SimLedger::with_settings(0, STARTING);
    let bob = session(&ledger, 2).await;

    for raw in ["abc", "", "-1", "99"] {
        let result = registry::attach_existing(&ledger, &bob, raw).await;
        assert!(
            matches!(result, Err(EscrowError::Resolution(_))),
            "{raw:?} should not resolve"
        );
    }
}

#[tokio::test]
async fn attach_existing__settled_instance_is_refused() {
    // given
    let ledger = SimLedger::with_settings(0, STARTING);
    let alice = session(&ledger, 1).await;
    let bob = session(&ledger, 2).await;
    let (alice_task, _, id) = open_escrow(&ledger, &alice, EscrowTerms::new(10, 1)).await;
    claim(&ledger, &bob, &id, 1).await.unwrap();
    alice_task.await.unwrap().unwrap();

    // when
    let result = claim(&ledger, &bob, &id, 1).await;

    // then
    assert!(matches!(result, Err(EscrowError::AlreadySettled(_))));
    assert!(ledger.is_settled(&id));
}

#[tokio::test]
async fn escrow_round__racing_claimants_settle_at_most_once() {
    // given
    let ledger = SimLedger::with_settings(0, STARTING);
    let alice = session(&ledger, 1).await;
    let (alice_task, _, id) = open_escrow(&ledger, &alice, EscrowTerms::new(100, 42)).await;
    let mut claimants = Vec::new();
    for seed in 2..6 {
        let bob = session(&ledger, seed).await;
        let handle = registry::attach_existing(&ledger, &bob, id.as_str())
            .await
            .unwrap();
        claimants.push(BobRole::new(handle).0);
    }

    // when
    let tasks: Vec<_> = claimants
        .into_iter()
        .map(|role| tokio::spawn(role.run(|| 42)))
        .collect();
    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }

    // then
    let winners = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(
        outcomes
            .iter()
            .filter(|o| o.is_err())
            .all(|o| matches!(o, Err(EscrowError::AlreadySettled(_))))
    );
    assert_eq!(alice_task.await.unwrap().unwrap().amount, 100);
}

#[tokio::test]
async fn bob__attached_before_the_lock_reveals_only_once_asked() {
    // given
    let ledger = SimLedger::with_settings(0, STARTING);
    let alice = session(&ledger, 1).await;
    let bob = session(&ledger, 2).await;
    let contract = ledger.deploy(alice.account()).await.unwrap();
    let id = ledger.instance_id(&contract);
    let handle = registry::attach_existing(&ledger, &bob, id.as_str())
        .await
        .unwrap();
    let asked = Arc::new(AtomicBool::new(false));
    let flag = asked.clone();
    let (role, mut progress) = BobRole::new(handle);
    let bob_task = tokio::spawn(role.run(move || {
        flag.store(true, Ordering::SeqCst);
        5
    }));

    // when
    progress
        .wait_for(|p| matches!(p, RolePhase::AwaitingReveal(_)))
        .await
        .unwrap();
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    let asked_before_lock = asked.load(Ordering::SeqCst);
    let sent = ledger.alice(&contract, EscrowTerms::new(20, 5)).await.unwrap();

    // then
    assert!(!asked_before_lock);
    assert_eq!(bob_task.await.unwrap().unwrap(), sent);
    assert!(asked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn bob__reveal_is_called_at_most_once_per_attempt() {
    // given
    let ledger = SimLedger::with_settings(0, STARTING);
    let alice = session(&ledger, 1).await;
    let bob = session(&ledger, 2).await;
    let (alice_task, _, id) = open_escrow(&ledger, &alice, EscrowTerms::new(30, 9)).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handle = registry::attach_existing(&ledger, &bob, id.as_str())
        .await
        .unwrap();

    // when
    BobRole::new(handle)
        .0
        .run(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            9
        })
        .await
        .unwrap();

    // then
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    alice_task.await.unwrap().unwrap();
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn escrow_round__only_the_locked_secret_settles(
        amount in 1..=STARTING,
        secret in any::<u64>(),
        offset in 1..u64::MAX,
    ) {
        let wrong = secret.wrapping_add(offset);
        let (rejected, settled, bob_balance) = runtime().block_on(async {
            let ledger = SimLedger::with_settings(0, STARTING);
            let alice = session(&ledger, 1).await;
            let bob = session(&ledger, 2).await;
            let (alice_task, _, id) =
                open_escrow(&ledger, &alice, EscrowTerms::new(amount, secret)).await;
            let rejected = claim(&ledger, &bob, &id, wrong).await;
            let settled = claim(&ledger, &bob, &id, secret).await;
            alice_task.await.unwrap().unwrap();
            let balance = ledger.balance_of(bob.account()).await.unwrap();
            (rejected, settled, balance)
        });

        prop_assert_eq!(rejected, Err(EscrowError::RevealRejected));
        prop_assert_eq!(settled.map(|s| s.amount), Ok(amount));
        prop_assert_eq!(bob_balance, STARTING + amount);
    }
}
