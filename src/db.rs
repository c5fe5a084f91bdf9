use crate::model::{Channel, Inserted, Message, User};
use anyhow::Result;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no {entity} row with id {id}")]
    NotFound { entity: &'static str, id: i64 },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For a file-backed SQLite URL, expand a leading `~/` and make sure the
/// parent directory exists. In-memory URLs and other schemes pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{}?{}", expanded, q),
        None => format!("sqlite://{}", expanded),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all, fields(id = user.discord_id))]
pub async fn create_user_if_absent(pool: &Pool, user: &User) -> Result<Inserted, StoreError> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO users \
         (discord_id, avatar_url, is_bot, register_date, name, display_name, join_date, discriminator) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user.discord_id)
    .bind(&user.avatar_url)
    .bind(user.is_bot)
    .bind(user.register_date)
    .bind(&user.name)
    .bind(&user.display_name)
    .bind(user.join_date)
    .bind(user.discriminator)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        debug!(id = user.discord_id, "user row already present");
        return Ok(Inserted::Existing);
    }
    Ok(Inserted::Created)
}

#[instrument(skip_all, fields(id = channel.channel_id))]
pub async fn create_channel_if_absent(
    pool: &Pool,
    channel: &Channel,
) -> Result<Inserted, StoreError> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO channels (channel_id, name, topic, is_voice) VALUES (?, ?, ?, ?)",
    )
    .bind(channel.channel_id)
    .bind(&channel.name)
    .bind(&channel.topic)
    .bind(channel.is_voice)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        debug!(id = channel.channel_id, "channel row already present");
        return Ok(Inserted::Existing);
    }
    Ok(Inserted::Created)
}

#[instrument(skip_all, fields(id = message.message_id))]
pub async fn create_message_if_absent(
    pool: &Pool,
    message: &Message,
) -> Result<Inserted, StoreError> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO messages \
         (message_id, content, user_id, channel_id, sent_at, is_pinned, has_mentions) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(message.message_id)
    .bind(&message.content)
    .bind(message.user_id)
    .bind(message.channel_id)
    .bind(message.sent_at)
    .bind(message.is_pinned)
    .bind(message.has_mentions)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        debug!(id = message.message_id, "message row already present");
        return Ok(Inserted::Existing);
    }
    Ok(Inserted::Created)
}

pub async fn find_user_by_id(pool: &Pool, discord_id: i64) -> Result<User, StoreError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE discord_id = ?")
        .bind(discord_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "user",
            id: discord_id,
        })
}

pub async fn find_channel_by_id(pool: &Pool, channel_id: i64) -> Result<Channel, StoreError> {
    sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE channel_id = ?")
        .bind(channel_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "channel",
            id: channel_id,
        })
}

pub async fn count_users(pool: &Pool) -> Result<i64, StoreError> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?)
}

pub async fn count_channels(pool: &Pool) -> Result<i64, StoreError> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM channels")
        .fetch_one(pool)
        .await?)
}
