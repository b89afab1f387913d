use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Catalog unavailable: no snapshot has been published")]
    CatalogUnavailable,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    /// HTTP-equivalent status for callers exposing the engine over a request API.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidWindow(_) | Error::InvalidRule(_) | Error::Json(_) | Error::Toml(_) => 400,
            Error::RuleNotFound(_) => 404,
            Error::CatalogUnavailable => 503,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
