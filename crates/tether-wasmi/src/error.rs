use thiserror::Error;

use tether_types::BridgeError;

/// Errors raised while loading or driving a guest module.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Registering a host entry point with the linker failed.
    #[error("failed to link '{name}': {reason}")]
    Link { name: String, reason: String },

    #[error(transparent)]
    Wasm(#[from] wasmi::Error),

    /// The guest module lacks an export the harness relies on.
    #[error("guest does not export '{0}'")]
    MissingExport(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
