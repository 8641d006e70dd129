//! `docvault create-admin`: bootstrap an administrator account.

use anyhow::{bail, Result};

use crate::auth::hash_password_blocking;
use crate::config::Config;
use crate::db;
use crate::store;

/// Creates an admin account, or promotes and re-activates an existing account
/// with the same email and sets its password.
pub async fn run_create_admin(
    config: &Config,
    email: &str,
    password: &str,
    full_name: Option<&str>,
) -> Result<()> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        bail!("A valid email address is required");
    }
    if password.is_empty() {
        bail!("password must not be empty");
    }

    let pool = db::connect(config).await?;
    let hashed = hash_password_blocking(password).await?;

    match store::get_user_by_email(&pool, email).await? {
        Some(mut user) => {
            user.is_admin = true;
            user.is_active = true;
            user.hashed_password = hashed;
            if let Some(name) = full_name {
                user.full_name = Some(name.to_string());
            }
            store::update_user(&pool, &user).await?;
            println!("Promoted existing user to admin: {}", user.email);
        }
        None => {
            let user =
                store::create_user(&pool, email, &hashed, full_name, true)
                    .await?;
            println!("Admin user created: {} ({})", user.email, user.id);
        }
    }

    pool.close().await;
    Ok(())
}
