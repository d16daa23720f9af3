use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use tracing::error;

use crate::accounts::password::PasswordError;

/// Failures that escape a handler. Rendered as a generic 500 page.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Internal(e) => error!(error = ?e, "request failed"),
            AppError::Password(e) => error!(error = %e, "password handling failed"),
        }
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html("<h1>Server Error (500)</h1>"),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn internal_error_hides_details() {
        let resp = AppError::from(anyhow::anyhow!("db password is hunter2")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(!body.contains("hunter2"));
    }
}
