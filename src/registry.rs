//! Deployer and attacher handles for escrow instances.
//!
//! A deployer handle is created before anything reaches the ledger, so the
//! caller gets a [`PendingInstanceId`] up front. It resolves only once the
//! instance holds Alice's terms; an id that is never funded is never shown.
//! An attacher handle only exists once its identifier resolved.

use crate::{
    account::AccountSession,
    error::{
        EscrowError,
        Result,
    },
    ledger::{
        EscrowProgram,
        EscrowTerms,
        InstanceId,
    },
};
use tokio::sync::watch;
use tracing::{
    debug,
    info,
};

type Resolution = Option<Result<InstanceId>>;

/// Instance id of a deploy that may still be in flight.
#[derive(Clone, Debug)]
pub struct PendingInstanceId {
    rx: watch::Receiver<Resolution>,
}

impl PendingInstanceId {
    /// `None` while the deploy has not been decided.
    pub fn peek(&self) -> Option<Result<InstanceId>> {
        self.rx.borrow().clone()
    }

    pub async fn resolved(mut self) -> Result<InstanceId> {
        let resolution = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map(|value| value.clone());
        match resolution {
            Ok(Some(result)) => result,
            Ok(None) | Err(_) => Err(EscrowError::Deploy(
                "deploy abandoned before an instance was created".into(),
            )),
        }
    }
}

pub struct DeployerHandle<P: EscrowProgram> {
    program: P,
    session: AccountSession<P>,
    publish: watch::Sender<Resolution>,
}

/// A deployed instance that already holds Alice's terms.
pub struct DeployedInstance<P: EscrowProgram> {
    pub program: P,
    pub contract: P::Contract,
    pub id: InstanceId,
}

impl<P: EscrowProgram> DeployerHandle<P> {
    pub fn session(&self) -> &AccountSession<P> {
        &self.session
    }

    /// Deploys a fresh instance and locks `terms` in it. The pending id
    /// resolves to the instance only after the lock; any earlier failure
    /// resolves it to that error instead.
    pub async fn open(self, terms: EscrowTerms) -> Result<DeployedInstance<P>> {
        let opened = self.deploy_and_lock(terms).await;
        let resolution = opened.as_ref().map(|instance| instance.id.clone());
        self.publish.send_replace(Some(resolution.map_err(Clone::clone)));
        opened
    }

    async fn deploy_and_lock(&self, terms: EscrowTerms) -> Result<DeployedInstance<P>> {
        terms.validate()?;
        debug!(deployer = %self.session.address(), "deploying escrow instance");
        let contract = self.program.deploy(self.session.account()).await?;
        let id = self.program.instance_id(&contract);
        info!(instance = %id, "escrow instance deployed");
        self.program.lock(&contract, terms).await?;
        Ok(DeployedInstance {
            program: self.program.clone(),
            contract,
            id,
        })
    }
}

pub struct AttacherHandle<P: EscrowProgram> {
    program: P,
    contract: P::Contract,
    id: InstanceId,
}

impl<P: EscrowProgram> AttacherHandle<P> {
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub(crate) fn into_parts(self) -> (P, P::Contract, InstanceId) {
        (self.program, self.contract, self.id)
    }
}

pub fn deploy_new<P: EscrowProgram>(
    program: &P,
    session: &AccountSession<P>,
) -> (DeployerHandle<P>, PendingInstanceId) {
    let (publish, rx) = watch::channel(None);
    let handle = DeployerHandle {
        program: program.clone(),
        session: session.clone(),
        publish,
    };
    (handle, PendingInstanceId { rx })
}

pub async fn attach_existing<P: EscrowProgram>(
    program: &P,
    session: &AccountSession<P>,
    raw_id: &str,
) -> Result<AttacherHandle<P>> {
    let id = program.parse_instance_id(raw_id)?;
    let contract = program.attach(session.account(), &id).await?;
    info!(instance = %id, "attached to escrow instance");
    Ok(AttacherHandle {
        program: program.clone(),
        contract,
        id,
    })
}
