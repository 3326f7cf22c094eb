use intg_domain::User;
use intg_errors::HarnessResult;
use tracing::{debug, instrument};

use super::{insertion, Fixtures};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserOptions {
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub admin: bool,
    /// `None` means active.
    pub active: Option<bool>,
}

impl UserOptions {
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Default::default()
        }
    }
}

/// The row a user fixture inserts, minus the server-assigned id.
pub fn apply_user_options(options: &UserOptions, generated_username: String) -> User {
    User {
        id: 0,
        username: options
            .username
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or(generated_username),
        password_hash: options.password_hash.clone(),
        active: options.active.unwrap_or(true),
        admin: options.admin,
    }
}

impl Fixtures {
    #[instrument(skip(self))]
    pub async fn create_user(&self, options: UserOptions) -> HarnessResult<User> {
        let mut user = apply_user_options(&options, self.random_name("user"));
        user.id = sqlx::query_scalar(
            r#"
            INSERT INTO users (username, password_hash, active, admin)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.active)
        .bind(user.admin)
        .fetch_one(self.pool())
        .await
        .map_err(insertion("user"))?;

        debug!(user_id = user.id, username = %user.username, "created user");
        Ok(user)
    }
}
