use thiserror::Error;

/// Errors raised by aggregate construction and mutation.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("invalid email: {0}")]
    InvalidEmail(String),

    #[error("invalid {field}: must not be empty")]
    EmptyField { field: &'static str },

    #[error("invalid amount: {0} (must be positive)")]
    InvalidAmount(i64),

    #[error("user is deactivated")]
    InactiveUser,

    #[error("expense is deleted")]
    DeletedExpense,
}

pub type DomainResult<T> = Result<T, DomainError>;
