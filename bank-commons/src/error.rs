#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed wire message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("peer link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
