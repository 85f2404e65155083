use crate::error::AppError;

/// Unknown routes.
pub async fn not_found() -> AppError {
    AppError::NotFound("The requested resource was not found.".to_string())
}

/// Known route, wrong method.
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}
