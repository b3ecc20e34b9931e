pub mod error;
pub mod traits;
pub mod types;

pub type ClientResult<T> = Result<T, error::ClientError>;
