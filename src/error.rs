use thiserror::Error;

/// Errors surfaced by the engine's public API.
///
/// Anything that goes wrong after traffic starts (transport failures, check
/// failures) is recorded as data in the run's outcomes, not raised here.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid run configuration, rejected before any traffic is generated.
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
