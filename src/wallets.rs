use crate::error::{
    EscrowError,
    Result,
};
use eth_keystore::decrypt_key;
use rpassword::prompt_password;
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
};

const WALLET_EXTENSION: &str = "wallet";
const MIN_MNEMONIC_WORDS: usize = 12;

#[derive(Clone, Debug)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

/// Signing material handed to a ledger client when it issues the default
/// account.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum KeyMaterial {
    /// No keystore configured; the ledger decides what the default identity
    /// is, or refuses.
    #[default]
    Ambient,
    SecretKey([u8; 32]),
    Mnemonic(String),
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Ambient => write!(f, "Ambient"),
            KeyMaterial::SecretKey(_) => write!(f, "SecretKey(..)"),
            KeyMaterial::Mnemonic(_) => write!(f, "Mnemonic(..)"),
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| {
        EscrowError::Connection("HOME environment variable not set".into())
    })?;
    Ok(PathBuf::from(home).join(".fuel").join("wallets"))
}

pub fn resolve_wallet_dir(dir: Option<&Path>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(&raw.to_string_lossy()).into_owned();
            Ok(PathBuf::from(expanded))
        }
        None => default_wallet_dir(),
    }
}

pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let read_failed = |e: std::io::Error| {
        EscrowError::Connection(format!(
            "failed to read wallet directory {}: {e}",
            dir.display()
        ))
    };
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_failed)? {
        let path = entry.map_err(read_failed)?.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some(WALLET_EXTENSION) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        wallets.push(WalletDescriptor::new(name.to_owned(), path.clone()));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    list_wallets(dir)?
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| {
            EscrowError::Connection(format!(
                "wallet '{name}' not found in {}",
                dir.display()
            ))
        })
}

/// Decrypts a keystore. A wrong password is reported the same way as a
/// missing identity: the user did not hand over a signing key.
pub fn unlock_wallet(descriptor: &WalletDescriptor, password: &str) -> Result<KeyMaterial> {
    let secret = decrypt_key(&descriptor.path, password.as_bytes()).map_err(|_| {
        EscrowError::Connection(format!(
            "invalid password for wallet '{}'",
            descriptor.name
        ))
    })?;
    key_material_from_secret(&descriptor.name, secret)
}

/// Terminal prompt variant of [`unlock_wallet`] for headless use.
pub fn prompt_and_unlock(descriptor: &WalletDescriptor) -> Result<KeyMaterial> {
    let prompt = format!("Enter password for wallet '{}': ", descriptor.name);
    let password = prompt_password(prompt).map_err(|e| {
        EscrowError::Connection(format!("password entry declined: {e}"))
    })?;
    unlock_wallet(descriptor, &password)
}

fn key_material_from_secret(name: &str, secret: Vec<u8>) -> Result<KeyMaterial> {
    if let Ok(key) = <[u8; 32]>::try_from(secret.as_slice()) {
        return Ok(KeyMaterial::SecretKey(key));
    }
    if let Ok(phrase) = String::from_utf8(secret) {
        if phrase.split_whitespace().count() >= MIN_MNEMONIC_WORDS {
            return Ok(KeyMaterial::Mnemonic(phrase));
        }
    }
    Err(EscrowError::Connection(format!(
        "wallet '{name}' contained unsupported key material"
    )))
}
