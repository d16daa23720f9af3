use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::accounts::repo_types::{NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum CreateUserError {
    #[error("username already taken")]
    UsernameTaken,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence for users and their profiles.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert an inactive user together with its profile.
    async fn create_inactive(&self, new_user: NewUser) -> Result<User, CreateUserError>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;

    /// Flip an inactive user to active and confirm its profile.
    ///
    /// Returns `false` when the user was already active (or is gone), so the
    /// transition happens at most once even under concurrent requests.
    async fn activate(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Overwrite the profile's name fields. Nothing else is touched.
    async fn update_names(&self, id: Uuid, first_name: &str, last_name: &str)
        -> anyhow::Result<()>;

    async fn record_login(&self, id: Uuid) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const SELECT_USER: &str = r#"
    SELECT u.id, u.username, u.password_hash, u.is_active, u.date_joined, u.last_login,
           p.first_name, p.last_name, p.email, p.signup_confirmation
      FROM users u
      JOIN profiles p ON p.user_id = u.id
"#;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_inactive(&self, new_user: NewUser) -> Result<User, CreateUserError> {
        let id = Uuid::new_v4();
        let mut tx = self.db.begin().await.context("begin tx")?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, is_active)
            VALUES ($1, $2, $3, FALSE)
            "#,
        )
        .bind(id)
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(CreateUserError::UsernameTaken);
            }
            return Err(anyhow::Error::new(e).context("insert user").into());
        }

        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, first_name, last_name, email, signup_confirmation)
            VALUES ($1, $2, $3, $4, FALSE)
            "#,
        )
        .bind(id)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.email)
        .execute(&mut *tx)
        .await
        .context("insert profile")?;

        let user = sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE u.id = $1"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .context("reload user")?;

        tx.commit().await.context("commit tx")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE u.id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE u.username = $1"))
            .bind(username)
            .fetch_optional(&self.db)
            .await
            .context("find user by username")?;
        Ok(user)
    }

    async fn activate(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let flipped = sqlx::query(
            r#"
            UPDATE users SET is_active = TRUE
             WHERE id = $1 AND is_active = FALSE
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("activate user")?
        .rows_affected();

        if flipped == 0 {
            tx.rollback().await.context("rollback tx")?;
            return Ok(false);
        }

        sqlx::query(r#"UPDATE profiles SET signup_confirmation = TRUE WHERE user_id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("confirm profile")?;
        tx.commit().await.context("commit tx")?;
        Ok(true)
    }

    async fn update_names(
        &self,
        id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE profiles SET first_name = $2, last_name = $3
             WHERE user_id = $1
            "#,
        )
        .bind(id)
        .bind(first_name)
        .bind(last_name)
        .execute(&self.db)
        .await
        .context("update profile names")?;
        Ok(())
    }

    async fn record_login(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE users SET last_login = now() WHERE id = $1"#)
            .bind(id)
            .execute(&self.db)
            .await
            .context("record login")?;
        Ok(())
    }
}

/// In-memory store used by the handler tests.
#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use time::OffsetDateTime;

    use super::*;
    use crate::accounts::repo_types::Profile;

    #[derive(Default)]
    pub struct MemoryUserStore {
        users: Mutex<Vec<User>>,
    }

    impl MemoryUserStore {
        pub fn all(&self) -> Vec<User> {
            self.users.lock().unwrap().clone()
        }

        pub fn get(&self, id: Uuid) -> Option<User> {
            self.users.lock().unwrap().iter().find(|u| u.id == id).cloned()
        }

        /// Insert an already active user, bypassing signup.
        pub fn insert_active(&self, username: &str, password_hash: &str) -> User {
            let user = User {
                id: Uuid::new_v4(),
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                is_active: true,
                date_joined: OffsetDateTime::now_utc(),
                last_login: None,
                profile: Profile {
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    email: format!("{username}@example.com"),
                    signup_confirmation: true,
                },
            };
            self.users.lock().unwrap().push(user.clone());
            user
        }
    }

    #[async_trait]
    impl UserStore for MemoryUserStore {
        async fn create_inactive(&self, new_user: NewUser) -> Result<User, CreateUserError> {
            let mut users = self.users.lock().unwrap();
            if users.iter().any(|u| u.username == new_user.username) {
                return Err(CreateUserError::UsernameTaken);
            }
            let user = User {
                id: Uuid::new_v4(),
                username: new_user.username,
                password_hash: new_user.password_hash,
                is_active: false,
                date_joined: OffsetDateTime::now_utc(),
                last_login: None,
                profile: Profile {
                    first_name: new_user.first_name,
                    last_name: new_user.last_name,
                    email: new_user.email,
                    signup_confirmation: false,
                },
            };
            users.push(user.clone());
            Ok(user)
        }

        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            Ok(self.get(id))
        }

        async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.username == username)
                .cloned())
        }

        async fn activate(&self, id: Uuid) -> anyhow::Result<bool> {
            let mut users = self.users.lock().unwrap();
            match users.iter_mut().find(|u| u.id == id && !u.is_active) {
                Some(user) => {
                    user.is_active = true;
                    user.profile.signup_confirmation = true;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn update_names(
            &self,
            id: Uuid,
            first_name: &str,
            last_name: &str,
        ) -> anyhow::Result<()> {
            let mut users = self.users.lock().unwrap();
            if let Some(user) = users.iter_mut().find(|u| u.id == id) {
                user.profile.first_name = first_name.to_string();
                user.profile.last_name = last_name.to_string();
            }
            Ok(())
        }

        async fn record_login(&self, id: Uuid) -> anyhow::Result<()> {
            let mut users = self.users.lock().unwrap();
            if let Some(user) = users.iter_mut().find(|u| u.id == id) {
                user.last_login = Some(OffsetDateTime::now_utc());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn activate_happens_once() {
        let store = MemoryUserStore::default();
        let user = store
            .create_inactive(NewUser {
                username: "ada".into(),
                password_hash: "x".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
            })
            .await
            .unwrap();
        assert!(store.activate(user.id).await.unwrap());
        assert!(!store.activate(user.id).await.unwrap());
        assert!(store.get(user.id).unwrap().profile.signup_confirmation);
    }
}
