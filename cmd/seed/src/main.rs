//! Populates a development database with an admin, a few members and a
//! welcome post. Safe to re-run: existing accounts are left alone.
//!
//! Reads the same settings as the server. The admin password comes from
//! `AGORA_SEED_PASSWORD` and defaults to `changeme`.

use anyhow::Context;
use auth_adapters::Argon2Hasher;
use domains::{Category, PasswordHasher, Post, PostQuery, PostRepository, User, UserRepository};
use secrecy::ExposeSecret;
use storage_adapters::PgStore;
use tracing::info;

const MEMBERS: [&str; 3] = ["ada", "grace", "linus"];

async fn ensure_user(
    store: &PgStore,
    hasher: &Argon2Hasher,
    username: &str,
    password: &str,
) -> anyhow::Result<User> {
    if let Some(existing) = store.find_user_by_username(username).await? {
        info!(%username, "user exists, skipping");
        return Ok(existing);
    }
    let hash = hasher.hash_password(password).await?;
    let user = store
        .create_user(User::new(
            username.to_string(),
            format!("{username}@agora.local"),
            hash,
        ))
        .await?;
    info!(%username, id = %user.id, "user created");
    Ok(user)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = configs::load().context("loading configuration")?;
    let store = PgStore::connect(settings.database.url.expose_secret(), 2)
        .await
        .context("connecting to PostgreSQL")?;
    store.migrate().await?;

    let password = std::env::var("AGORA_SEED_PASSWORD").unwrap_or_else(|_| "changeme".into());
    let hasher = Argon2Hasher::new();

    let admin = ensure_user(&store, &hasher, "admin", &password).await?;
    store.set_admin(admin.id, true).await?;
    for name in MEMBERS {
        ensure_user(&store, &hasher, name, &password).await?;
    }

    let (existing, _) = store
        .list_posts(&PostQuery::default())
        .await
        .context("listing posts")?;
    if existing.is_empty() {
        let post = store
            .create_post(
                Post::new(
                    admin.id,
                    "Welcome to Agora".into(),
                    "<p>Say hello in the comments.</p>".into(),
                    Category::General,
                    vec!["welcome".into()],
                ),
                Vec::new(),
            )
            .await?;
        info!(post_id = %post.id, "welcome post created");
    }

    info!("seeding complete");
    Ok(())
}
