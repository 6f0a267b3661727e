use chrono::Utc;
use color_eyre::eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::ledger::InstanceId;

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const ESCROWS_FILE: &str = "escrows.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Sim,
    Dev,
    Test,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Sim => "sim",
            DeploymentEnv::Dev => "dev",
            DeploymentEnv::Test => "test",
            DeploymentEnv::Local => "local",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Sim => "Simulated",
            DeploymentEnv::Dev => "Devnet",
            DeploymentEnv::Test => "Testnet",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// One escrow Alice opened, kept so its id can be shared again later.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub deployed_at: String,
    pub instance_id: InstanceId,
    pub network_url: String,
    /// Atomic units.
    pub amount: u64,
    #[serde(default)]
    pub depositor: Option<String>,
}

impl EscrowRecord {
    pub fn now(
        instance_id: InstanceId,
        network_url: impl AsRef<str>,
        amount: u64,
        depositor: Option<String>,
    ) -> Self {
        Self {
            deployed_at: Utc::now().to_rfc3339(),
            instance_id,
            network_url: network_url.as_ref().to_string(),
            amount,
            depositor,
        }
    }
}

#[derive(Debug)]
pub struct EscrowStore {
    path: PathBuf,
}

impl EscrowStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::open(Path::new(DEPLOYMENTS_ROOT), env)
    }

    pub fn open(root: &Path, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root, env)?;
        Ok(Self { path })
    }

    pub fn load(&self) -> Result<Vec<EscrowRecord>> {
        read_records(&self.path)
    }

    pub fn append(&self, record: EscrowRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        write_records(&self.path, &records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).wrap_err_with(|| {
            format!("Failed to create {} directory", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(ESCROWS_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).wrap_err_with(|| {
            format!(
                "Failed to create escrow record file for {} at {:?}",
                env, file_path
            )
        })?;
        file.write_all(b"[]").wrap_err_with(|| {
            format!("Failed to initialize escrow record file for {}", env)
        })?;
    }

    Ok(file_path)
}

fn read_records(path: impl AsRef<Path>) -> Result<Vec<EscrowRecord>> {
    let data = fs::read(path.as_ref()).wrap_err("Failed to read escrow records")?;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let records = serde_json::from_slice::<Vec<EscrowRecord>>(&data)
        .wrap_err("Failed to parse escrow records JSON")?;
    Ok(records)
}

fn write_records(path: impl AsRef<Path>, records: &[EscrowRecord]) -> Result<()> {
    let json =
        serde_json::to_vec_pretty(records).wrap_err("Failed to serialize escrow records")?;
    fs::write(path.as_ref(), json).wrap_err("Failed to write escrow records")?;
    Ok(())
}
