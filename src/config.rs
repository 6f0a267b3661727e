use crate::deployment::DeploymentEnv;
use color_eyre::eyre::{
    Result,
    eyre,
};
use std::{
    fmt,
    path::PathBuf,
    str::FromStr,
};

pub const NETWORK_VAR: &str = "HASHLOCK_NETWORK";
pub const PROVIDER_VAR: &str = "HASHLOCK_NETWORK_PROVIDER";
pub const RPC_URL_VAR: &str = "HASHLOCK_RPC_URL";
pub const WALLET_VAR: &str = "HASHLOCK_WALLET";
pub const WALLET_DIR_VAR: &str = "HASHLOCK_WALLET_DIR";

pub const DEFAULT_TESTNET_RPC_URL: &str = "https://testnet.fuel.network";
pub const DEFAULT_DEVNET_RPC_URL: &str = "https://devnet.fuel.network";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:4000/";

/// Which ledger backend the session talks to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NetworkKind {
    /// In-process ledger, shared only by sessions in the same process.
    #[default]
    Sim,
    /// A Fuel node reached over RPC.
    Fuel,
}

impl FromStr for NetworkKind {
    type Err = color_eyre::Report;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sim" => Ok(NetworkKind::Sim),
            "fuel" => Ok(NetworkKind::Fuel),
            other => Err(eyre!("Unknown network '{other}'; expected sim or fuel")),
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkKind::Sim => "sim",
            NetworkKind::Fuel => "fuel",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProviderName {
    #[default]
    LocalHost,
    DevNet,
    TestNet,
}

impl ProviderName {
    pub fn default_rpc_url(self) -> &'static str {
        match self {
            ProviderName::LocalHost => DEFAULT_LOCAL_RPC_URL,
            ProviderName::DevNet => DEFAULT_DEVNET_RPC_URL,
            ProviderName::TestNet => DEFAULT_TESTNET_RPC_URL,
        }
    }
}

impl FromStr for ProviderName {
    type Err = color_eyre::Report;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "localhost" | "local" => Ok(ProviderName::LocalHost),
            "devnet" | "dev" => Ok(ProviderName::DevNet),
            "testnet" | "test" => Ok(ProviderName::TestNet),
            other => Err(eyre!(
                "Unknown network provider '{other}'; expected LocalHost, DevNet or TestNet"
            )),
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderName::LocalHost => "LocalHost",
            ProviderName::DevNet => "DevNet",
            ProviderName::TestNet => "TestNet",
        };
        write!(f, "{name}")
    }
}

/// Network selection, read once at start and handed to every component.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkConfig {
    pub network: NetworkKind,
    pub provider: ProviderName,
    pub rpc_url: String,
    pub wallet: Option<String>,
    pub wallet_dir: Option<PathBuf>,
}

impl NetworkConfig {
    pub fn new(network: NetworkKind, provider: ProviderName) -> Self {
        Self {
            network,
            provider,
            rpc_url: provider.default_rpc_url().to_string(),
            wallet: None,
            wallet_dir: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let network = match non_empty(NETWORK_VAR) {
            Some(raw) => raw.parse()?,
            None => NetworkKind::default(),
        };
        let provider = match non_empty(PROVIDER_VAR) {
            Some(raw) => raw.parse()?,
            None => ProviderName::default(),
        };
        let mut config = Self::new(network, provider);
        if let Some(url) = non_empty(RPC_URL_VAR) {
            config.rpc_url = url;
        }
        config.wallet = non_empty(WALLET_VAR);
        config.wallet_dir = non_empty(WALLET_DIR_VAR).map(PathBuf::from);
        Ok(config)
    }

    /// Faucet funding is only offered against a local development network.
    pub fn has_faucet(&self) -> bool {
        self.provider == ProviderName::LocalHost
    }

    pub fn deployment_env(&self) -> DeploymentEnv {
        match (self.network, self.provider) {
            (NetworkKind::Sim, _) => DeploymentEnv::Sim,
            (NetworkKind::Fuel, ProviderName::LocalHost) => DeploymentEnv::Local,
            (NetworkKind::Fuel, ProviderName::DevNet) => DeploymentEnv::Dev,
            (NetworkKind::Fuel, ProviderName::TestNet) => DeploymentEnv::Test,
        }
    }

    /// Where escrows live, as recorded next to their ids.
    pub fn endpoint(&self) -> String {
        match self.network {
            NetworkKind::Sim => self.label(),
            NetworkKind::Fuel => self.rpc_url.clone(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.network, self.provider)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::new(NetworkKind::default(), ProviderName::default())
    }
}
