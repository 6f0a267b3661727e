use thiserror::Error;

pub type Result<T, E = EscrowError> = std::result::Result<T, E>;

/// Everything that can end an escrow action.
///
/// `InvalidAmount` and `InvalidSecret` are raised by local validation and
/// never reach the ledger. The rest come back from the ledger client or the
/// escrow program and end the running role in its `Failed` state.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EscrowError {
    #[error("no signing identity available: {0}")]
    Connection(String),
    #[error("faucet is not available on {0}")]
    FaucetUnavailable(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid secret: {0}")]
    InvalidSecret(String),
    #[error("deploy rejected: {0}")]
    Deploy(String),
    #[error("cannot resolve escrow instance: {0}")]
    Resolution(String),
    #[error("the escrow program rejected the revealed secret")]
    RevealRejected,
    #[error("escrow instance {0} has already settled")]
    AlreadySettled(String),
    #[error("ledger transport failure: {0}")]
    Transport(String),
}

impl EscrowError {
    /// True for errors caught before anything was submitted to the ledger.
    pub fn is_local_validation(&self) -> bool {
        matches!(
            self,
            EscrowError::InvalidAmount(_) | EscrowError::InvalidSecret(_)
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn is_local_validation__only_for_input_errors() {
        assert!(EscrowError::InvalidAmount("x".into()).is_local_validation());
        assert!(EscrowError::InvalidSecret("x".into()).is_local_validation());
        assert!(!EscrowError::RevealRejected.is_local_validation());
        assert!(!EscrowError::Transport("down".into()).is_local_validation());
    }

    #[test]
    fn display__names_the_settled_instance() {
        let err = EscrowError::AlreadySettled("7".into());
        assert_eq!(err.to_string(), "escrow instance 7 has already settled");
    }
}
