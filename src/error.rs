use thiserror::Error;

/// Status taxonomy shared by the tree, the active tables, the DACS codec and
/// the channel.
///
/// `Duplicate` and `Full` are conditions rather than failures: callers inside
/// the crate handle them (idempotent acceptance, flush-and-retry) and only
/// surface them where nothing can be done locally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    ParamError(String),
    #[error("capacity exhausted")]
    Full,
    #[error("custody id already present")]
    Duplicate,
    #[error("custody id not found")]
    NotFound,
    #[error("storage failure: {0}")]
    StoreFailure(String),
    #[error("bundle lifetime expired")]
    Expired,
    #[error("clock source is unreliable")]
    UnreliableTime,
    #[error("internal consistency failure: {0}")]
    FailedResponse(String),
    #[error("operation timed out")]
    Timeout,
    #[error("sdnv value does not fit")]
    SdnvOverflow,
    #[error("sdnv value is truncated")]
    SdnvIncomplete,
    #[error("unknown administrative record type `{0:#04x}`")]
    UnknownRecord(u8),
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}
