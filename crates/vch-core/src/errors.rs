use crate::domain::{ChannelId, ChannelKind};

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the reactor and
/// the purge loop can decide what is fatal for the current event and what only
/// aborts one half of it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// A referenced channel or member no longer exists.
    #[error("could not resolve {what} {id}")]
    Resolution { what: &'static str, id: u64 },

    #[error("channel {id} is a {found} channel, expected {expected}")]
    WrongKind {
        id: ChannelId,
        expected: ChannelKind,
        found: ChannelKind,
    },

    #[error("permission edit rejected: {0}")]
    Permission(String),

    #[error("binding store unavailable: {0}")]
    Store(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Store failures abort the whole event or sweep; everything else is local.
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
