#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Generic(String),

    /// An observer refused a delivery; the message travels verbatim so the
    /// scanner can record it.
    #[error("{0}")]
    Rejected(String),
}
