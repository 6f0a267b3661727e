//! Presentation state: the form mapping, the per-role in-flight guard and a
//! plain snapshot for drawing. Nothing in here touches the ledger.

use crate::{
    account::AccountSession,
    config::{
        NetworkConfig,
        NetworkKind,
    },
    currency::CurrencyCodec,
    error::{
        EscrowError,
        Result,
    },
    ledger::{
        EscrowTerms,
        InstanceId,
        LedgerClient,
    },
    roles::{
        Role,
        RolePhase,
    },
};
use std::collections::BTreeMap;

pub const FIELD_INFO: &str = "INFO";
pub const FIELD_PASS: &str = "PASS";
pub const FIELD_AMT: &str = "AMT";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Integer,
    Text,
}

/// Field name to kind. Names not listed are text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldSchema {
    integer_fields: Vec<&'static str>,
}

impl FieldSchema {
    /// Instance ids are plain integers on the simulated ledger and hex
    /// contract ids on Fuel, so `INFO` only coerces on the former.
    pub fn for_config(config: &NetworkConfig) -> Self {
        let integer_fields = match config.network {
            NetworkKind::Sim => vec![FIELD_INFO, FIELD_PASS, FIELD_AMT],
            NetworkKind::Fuel => vec![FIELD_PASS, FIELD_AMT],
        };
        Self { integer_fields }
    }

    pub fn kind_of(&self, name: &str) -> FieldKind {
        if self.integer_fields.contains(&name) {
            FieldKind::Integer
        } else {
            FieldKind::Text
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldValue {
    Integer(u64),
    Text(String),
    /// Input that does not coerce to the field's kind, kept for display.
    Malformed(String),
}

impl FieldValue {
    fn coerce(kind: FieldKind, raw: &str) -> Self {
        match kind {
            FieldKind::Integer => match raw.trim().parse::<u64>() {
                Ok(n) => FieldValue::Integer(n),
                Err(_) => FieldValue::Malformed(raw.to_string()),
            },
            FieldKind::Text => FieldValue::Text(raw.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FormState {
    schema: FieldSchema,
    raw: BTreeMap<String, String>,
    values: BTreeMap<String, FieldValue>,
}

impl FormState {
    pub fn new(schema: FieldSchema) -> Self {
        Self {
            schema,
            raw: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    /// Records a keystroke-level change. An empty value clears the field.
    pub fn on_change(&mut self, name: &str, raw: &str) {
        if raw.is_empty() {
            self.raw.remove(name);
            self.values.remove(name);
            return;
        }
        let kind = self.schema.kind_of(name);
        self.raw.insert(name.to_string(), raw.to_string());
        self.values
            .insert(name.to_string(), FieldValue::coerce(kind, raw));
    }

    pub fn raw(&self, name: &str) -> &str {
        self.raw.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    fn secret(&self) -> Result<u64> {
        match self.value(FIELD_PASS) {
            Some(FieldValue::Integer(n)) => Ok(*n),
            Some(FieldValue::Malformed(raw)) => Err(EscrowError::InvalidSecret(format!(
                "'{raw}' is not a non-negative integer"
            ))),
            Some(FieldValue::Text(_)) | None => {
                Err(EscrowError::InvalidSecret("secret is missing".into()))
            }
        }
    }

    /// `AMT` is read in whole display units.
    pub fn alice_terms(&self, codec: &CurrencyCodec) -> Result<EscrowTerms> {
        let amount = match self.value(FIELD_AMT) {
            Some(FieldValue::Integer(n)) => codec.parse_amount(&n.to_string())?,
            Some(FieldValue::Malformed(raw)) => {
                return Err(EscrowError::InvalidAmount(format!(
                    "'{raw}' is not a whole number"
                )));
            }
            Some(FieldValue::Text(_)) | None => {
                return Err(EscrowError::InvalidAmount("amount is missing".into()));
            }
        };
        Ok(EscrowTerms::new(amount, self.secret()?))
    }

    /// Raw instance id and secret for the Bob role.
    pub fn bob_inputs(&self) -> Result<(String, u64)> {
        let raw_id = match self.value(FIELD_INFO) {
            Some(FieldValue::Integer(n)) => n.to_string(),
            Some(FieldValue::Text(s)) => s.trim().to_string(),
            Some(FieldValue::Malformed(raw)) => {
                return Err(EscrowError::Resolution(format!(
                    "'{raw}' is not a valid instance id"
                )));
            }
            None => {
                return Err(EscrowError::Resolution("instance id is missing".into()));
            }
        };
        Ok((raw_id, self.secret()?))
    }
}

#[derive(Clone, Debug, Default)]
struct RoleSlot {
    phase: Option<RolePhase>,
    in_flight: bool,
}

/// Why a role action could not start.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoleRefusal {
    NotConnected,
    InFlight,
}

pub struct SessionViewModel<L: LedgerClient> {
    network_label: String,
    has_faucet: bool,
    account: Option<AccountSession<L>>,
    deployed: Option<InstanceId>,
    attached: Option<InstanceId>,
    alice: RoleSlot,
    bob: RoleSlot,
    last_role_result: Option<(Role, RolePhase)>,
    status: Option<String>,
    error: Option<String>,
    pub form: FormState,
}

impl<L: LedgerClient> SessionViewModel<L> {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            network_label: config.label(),
            has_faucet: config.has_faucet(),
            account: None,
            deployed: None,
            attached: None,
            alice: RoleSlot::default(),
            bob: RoleSlot::default(),
            last_role_result: None,
            status: None,
            error: None,
            form: FormState::new(FieldSchema::for_config(config)),
        }
    }

    pub fn account(&self) -> Option<&AccountSession<L>> {
        self.account.as_ref()
    }

    pub fn set_account(&mut self, account: AccountSession<L>) {
        self.account = Some(account);
    }

    pub fn has_faucet(&self) -> bool {
        self.has_faucet
    }

    fn slot(&self, role: Role) -> &RoleSlot {
        match role {
            Role::Alice => &self.alice,
            Role::Bob => &self.bob,
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut RoleSlot {
        match role {
            Role::Alice => &mut self.alice,
            Role::Bob => &mut self.bob,
        }
    }

    pub fn is_enabled(&self, role: Role) -> bool {
        self.account.is_some() && !self.slot(role).in_flight
    }

    /// Marks `role` busy until a terminal phase is recorded for it.
    pub fn begin_role(&mut self, role: Role) -> std::result::Result<(), RoleRefusal> {
        if self.account.is_none() {
            return Err(RoleRefusal::NotConnected);
        }
        let slot = self.slot_mut(role);
        if slot.in_flight {
            return Err(RoleRefusal::InFlight);
        }
        slot.in_flight = true;
        slot.phase = Some(RolePhase::Start);
        match role {
            Role::Alice => self.deployed = None,
            Role::Bob => self.attached = None,
        }
        Ok(())
    }

    /// Progress for a role that is not in flight is stale and dropped.
    pub fn record_progress(&mut self, role: Role, phase: RolePhase) {
        if !self.slot(role).in_flight {
            return;
        }
        match &phase {
            RolePhase::AwaitingAccept(id) => self.deployed = Some(id.clone()),
            RolePhase::AwaitingReveal(id) => self.attached = Some(id.clone()),
            _ => {}
        }
        let terminal = phase.is_terminal();
        let slot = self.slot_mut(role);
        slot.phase = Some(phase.clone());
        if terminal {
            slot.in_flight = false;
            self.last_role_result = Some((role, phase));
        }
    }

    pub fn phase(&self, role: Role) -> Option<&RolePhase> {
        self.slot(role).phase.as_ref()
    }

    pub fn last_role_result(&self) -> Option<&(Role, RolePhase)> {
        self.last_role_result.as_ref()
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
        self.error = None;
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let role_view = |role: Role| RoleView {
            enabled: self.is_enabled(role),
            phase: self.phase(role).map(ToString::to_string),
        };
        ViewSnapshot {
            network_label: self.network_label.clone(),
            has_faucet: self.has_faucet,
            address: self.account.as_ref().map(|a| a.address().to_string()),
            balance: self
                .account
                .as_ref()
                .map(|a| a.balance().display.clone()),
            deployed: self.deployed.as_ref().map(ToString::to_string),
            attached: self.attached.as_ref().map(ToString::to_string),
            alice: role_view(Role::Alice),
            bob: role_view(Role::Bob),
            last_result: self
                .last_role_result
                .as_ref()
                .map(|(role, phase)| format!("{role}: {phase}")),
            status: self.status.clone(),
            error: self.error.clone(),
            amt: self.form.raw(FIELD_AMT).to_string(),
            pass: self.form.raw(FIELD_PASS).to_string(),
            info: self.form.raw(FIELD_INFO).to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RoleView {
    pub enabled: bool,
    pub phase: Option<String>,
}

/// Everything the terminal UI draws, detached from the live session.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ViewSnapshot {
    pub network_label: String,
    pub has_faucet: bool,
    pub address: Option<String>,
    pub balance: Option<String>,
    pub deployed: Option<String>,
    pub attached: Option<String>,
    pub alice: RoleView,
    pub bob: RoleView,
    pub last_result: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub amt: String,
    pub pass: String,
    pub info: String,
}
