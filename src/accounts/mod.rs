use crate::state::AppState;
use axum::Router;

pub mod email;
pub(crate) mod extractors;
pub mod forms;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod routes;
pub mod tokens;

pub fn router() -> Router<AppState> {
    handlers::account_routes()
}
