use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database, joined with its profile.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed
    pub is_active: bool,
    pub date_joined: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
    #[sqlx(flatten)]
    pub profile: Profile,
}

/// One-to-one extension of a user. Lives and dies with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub signup_confirmation: bool,
}

/// Everything needed to insert an inactive user and its profile.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}
