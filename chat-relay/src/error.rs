use thiserror::Error;

use crate::protocol::{ERR_ALREADYREGISTRED, ERR_NEEDMOREPARAMS};

/// Why a registration attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("registration is missing the {0} field")]
    MissingField(&'static str),
    #[error("nickname '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl RegisterError {
    /// Line sent to the peer before its connection is closed.
    pub fn reply(&self) -> &'static str {
        match self {
            Self::MissingField(_) => ERR_NEEDMOREPARAMS,
            Self::AlreadyRegistered(_) => ERR_ALREADYREGISTRED,
        }
    }
}

/// A line could not be queued for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbox is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}
