use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProgressError>;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ProgressError {
    /// HTTP status the same failure maps to on the web surface.
    pub fn status_code(&self) -> u16 {
        match self {
            ProgressError::NotFound(_) => 404,
            ProgressError::Validation(_) => 400,
            ProgressError::Database(_) => 500,
        }
    }

    pub fn is_rejection(&self) -> bool {
        !matches!(self, ProgressError::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(ProgressError::NotFound("course".into()).status_code(), 404);
        assert_eq!(ProgressError::Validation("late".into()).status_code(), 400);
        assert_eq!(ProgressError::Database(sqlx::Error::RowNotFound).status_code(), 500);
    }

    #[test]
    fn database_errors_are_not_rejections() {
        assert!(ProgressError::Validation("duplicate".into()).is_rejection());
        assert!(!ProgressError::Database(sqlx::Error::PoolClosed).is_rejection());
    }
}
