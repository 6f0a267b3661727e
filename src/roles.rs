//! Single-shot Alice and Bob drivers.
//!
//! Each driver publishes its phase on a `watch` channel and ends in exactly
//! one terminal phase: `Settled` or `Failed`.

use crate::{
    error::{
        EscrowError,
        Result,
    },
    ledger::{
        EscrowProgram,
        EscrowTerms,
        InstanceId,
        Settlement,
    },
    registry::{
        AttacherHandle,
        DeployerHandle,
    },
};
use std::fmt;
use tokio::sync::watch;
use tracing::{
    error,
    info,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    Alice,
    Bob,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Alice => write!(f, "Alice"),
            Role::Bob => write!(f, "Bob"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RolePhase {
    Start,
    /// Alice's terms are locked and the program waits for Bob.
    AwaitingAccept(InstanceId),
    /// Bob is attached and waits for the program to ask for the secret.
    AwaitingReveal(InstanceId),
    Settled(Settlement),
    Failed(EscrowError),
}

impl RolePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RolePhase::Settled(_) | RolePhase::Failed(_))
    }

    fn from_outcome(outcome: &Result<Settlement>) -> Self {
        match outcome {
            Ok(settlement) => RolePhase::Settled(settlement.clone()),
            Err(e) => RolePhase::Failed(e.clone()),
        }
    }
}

impl fmt::Display for RolePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolePhase::Start => write!(f, "starting"),
            RolePhase::AwaitingAccept(id) => {
                write!(f, "escrow {id} locked, waiting for the receiver")
            }
            RolePhase::AwaitingReveal(id) => {
                write!(f, "attached to escrow {id}, waiting to reveal")
            }
            RolePhase::Settled(s) => write!(f, "escrow {} settled", s.instance),
            RolePhase::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

pub struct AliceRole<P: EscrowProgram> {
    handle: DeployerHandle<P>,
    progress: watch::Sender<RolePhase>,
}

impl<P: EscrowProgram> AliceRole<P> {
    pub fn new(handle: DeployerHandle<P>) -> (Self, watch::Receiver<RolePhase>) {
        let (progress, rx) = watch::channel(RolePhase::Start);
        (Self { handle, progress }, rx)
    }

    pub async fn run(self, terms: EscrowTerms) -> Result<Settlement> {
        let progress = self.progress.clone();
        let outcome = self.drive(terms).await;
        if let Err(e) = &outcome {
            error!(role = %Role::Alice, error = %e, "role failed");
        }
        progress.send_replace(RolePhase::from_outcome(&outcome));
        outcome
    }

    async fn drive(self, terms: EscrowTerms) -> Result<Settlement> {
        let opened = self.handle.open(terms).await?;
        self.progress
            .send_replace(RolePhase::AwaitingAccept(opened.id.clone()));
        let settlement = opened.program.await_settlement(&opened.contract).await?;
        info!(instance = %settlement.instance, amount = settlement.amount, "Alice settled");
        Ok(settlement)
    }
}

pub struct BobRole<P: EscrowProgram> {
    handle: AttacherHandle<P>,
    progress: watch::Sender<RolePhase>,
}

impl<P: EscrowProgram> BobRole<P> {
    pub fn new(handle: AttacherHandle<P>) -> (Self, watch::Receiver<RolePhase>) {
        let (progress, rx) = watch::channel(RolePhase::Start);
        (Self { handle, progress }, rx)
    }

    /// `reveal` is handed to the program untouched; it runs only when the
    /// program asks for the secret, and at most once.
    pub async fn run<F>(self, reveal: F) -> Result<Settlement>
    where
        F: FnOnce() -> u64 + Send + 'static,
    {
        let (program, contract, id) = self.handle.into_parts();
        self.progress
            .send_replace(RolePhase::AwaitingReveal(id.clone()));
        let instance = id.clone();
        let reveal = move || {
            info!(%instance, "program requested the secret");
            reveal()
        };
        let outcome = program.bob(&contract, reveal).await;
        match &outcome {
            Ok(s) => info!(instance = %s.instance, amount = s.amount, "Bob settled"),
            Err(e) => error!(role = %Role::Bob, instance = %id, error = %e, "role failed"),
        }
        self.progress.send_replace(RolePhase::from_outcome(&outcome));
        outcome
    }
}
