//! SQLite database operations
//!
//! Every tenant owns one `Database`. All access to users, followers,
//! followings, rules and inbox messages goes through this module.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = AppError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
}

fn user_from_row(row: &SqliteRow) -> Result<User, AppError> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        private_key_pem: row.try_get("private_key_pem")?,
        public_key_pem: row.try_get("public_key_pem")?,
        api_token_hash: row.try_get("api_token_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn follower_from_row(row: &SqliteRow) -> Result<Follower, AppError> {
    Ok(Follower {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        actor_url: row.try_get("actor_url")?,
        inbox_url: row.try_get("inbox_url")?,
        display_name: row.try_get("display_name")?,
        username: row.try_get("username")?,
        icon_url: row.try_get("icon_url")?,
        follow_activity_id: row.try_get("follow_activity_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn following_from_row(row: &SqliteRow) -> Result<Following, AppError> {
    Ok(Following {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        url: row.try_get("url")?,
        label: row.try_get("label")?,
        folder: row.try_get("folder")?,
        method: parse_column(row, "method")?,
        status: parse_column(row, "status")?,
        status_message: row.try_get("status_message")?,
        image_url: row.try_get("image_url")?,
        inbox_url: row.try_get("inbox_url")?,
        follow_activity_id: row.try_get("follow_activity_id")?,
        last_polled: row.try_get("last_polled")?,
        created_at: row.try_get("created_at")?,
    })
}

fn rule_from_row(row: &SqliteRow) -> Result<Rule, AppError> {
    Ok(Rule {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        source: parse_column(row, "source")?,
        rule_type: parse_column(row, "rule_type")?,
        trigger: row.try_get("trigger_text")?,
        behavior: parse_column(row, "behavior")?,
        comment: row.try_get("comment")?,
        is_public: row.try_get("is_public")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<InboxMessage, AppError> {
    Ok(InboxMessage {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        url: row.try_get("url")?,
        actor_url: row.try_get("actor_url")?,
        object_type: row.try_get("object_type")?,
        content: row.try_get("content")?,
        muted: row.try_get("muted")?,
        received_at: row.try_get("received_at")?,
    })
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::debug!(path = %path.display(), "Database connected and migrated");

        Ok(Self { pool })
    }

    /// Close every pooled connection. Later queries fail instead of hanging.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    pub async fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, AppError> {
        sqlx::query("SELECT * FROM users WHERE api_token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    /// Insert a user unless the username is taken. Returns true when inserted.
    pub async fn insert_user_if_absent(&self, user: &User) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO users (id, username, display_name, private_key_pem, public_key_pem, api_token_hash, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.private_key_pem)
        .bind(&user.public_key_pem)
        .bind(&user.api_token_hash)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn update_user_display_name(
        &self,
        id: &str,
        display_name: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store a key pair only if the user has none yet. Returns true when stored.
    pub async fn set_user_keys_if_absent(
        &self,
        id: &str,
        private_key_pem: &str,
        public_key_pem: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE users SET private_key_pem = ?, public_key_pem = ? WHERE id = ? AND private_key_pem IS NULL",
        )
        .bind(private_key_pem)
        .bind(public_key_pem)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_user_token_hash(&self, id: &str, token_hash: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET api_token_hash = ? WHERE id = ?")
            .bind(token_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Followers
    // =========================================================================

    pub async fn get_follower(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<Follower>, AppError> {
        sqlx::query("SELECT * FROM followers WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(follower_from_row)
            .transpose()
    }

    pub async fn get_follower_by_actor(
        &self,
        user_id: &str,
        actor_url: &str,
    ) -> Result<Option<Follower>, AppError> {
        sqlx::query("SELECT * FROM followers WHERE user_id = ? AND actor_url = ?")
            .bind(user_id)
            .bind(actor_url)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(follower_from_row)
            .transpose()
    }

    /// Insert a follower unless `(user_id, actor_url)` already exists.
    /// Returns true when a new row was written.
    pub async fn insert_follower_if_absent(&self, follower: &Follower) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO followers (id, user_id, actor_url, inbox_url, display_name, username, icon_url, follow_activity_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&follower.id)
        .bind(&follower.user_id)
        .bind(&follower.actor_url)
        .bind(&follower.inbox_url)
        .bind(&follower.display_name)
        .bind(&follower.username)
        .bind(&follower.icon_url)
        .bind(&follower.follow_activity_id)
        .bind(follower.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_followers(&self, user_id: &str) -> Result<Vec<Follower>, AppError> {
        sqlx::query("SELECT * FROM followers WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(follower_from_row)
            .collect()
    }

    pub async fn count_followers(&self, user_id: &str) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM followers WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn delete_follower_by_actor(
        &self,
        user_id: &str,
        actor_url: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM followers WHERE user_id = ? AND actor_url = ?")
            .bind(user_id)
            .bind(actor_url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Refresh the display snapshot on every follower row of one actor.
    pub async fn update_follower_profile(
        &self,
        actor_url: &str,
        display_name: Option<&str>,
        username: Option<&str>,
        icon_url: Option<&str>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE followers SET display_name = ?, username = ?, icon_url = ? WHERE actor_url = ?",
        )
        .bind(display_name)
        .bind(username)
        .bind(icon_url)
        .bind(actor_url)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Followings
    // =========================================================================

    pub async fn get_following(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<Following>, AppError> {
        sqlx::query("SELECT * FROM followings WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(following_from_row)
            .transpose()
    }

    pub async fn get_following_by_url(
        &self,
        user_id: &str,
        url: &str,
    ) -> Result<Option<Following>, AppError> {
        sqlx::query("SELECT * FROM followings WHERE user_id = ? AND url = ?")
            .bind(user_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(following_from_row)
            .transpose()
    }

    /// Insert a following unless `(user_id, url)` already exists.
    pub async fn insert_following_if_absent(&self, following: &Following) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO followings (id, user_id, url, label, folder, method, status, status_message, image_url, inbox_url, follow_activity_id, last_polled, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&following.id)
        .bind(&following.user_id)
        .bind(&following.url)
        .bind(&following.label)
        .bind(&following.folder)
        .bind(following.method.as_str())
        .bind(following.status.as_str())
        .bind(&following.status_message)
        .bind(&following.image_url)
        .bind(&following.inbox_url)
        .bind(&following.follow_activity_id)
        .bind(following.last_polled)
        .bind(following.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist every mutable field of a following.
    pub async fn update_following(&self, following: &Following) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE followings SET label = ?, folder = ?, method = ?, status = ?, status_message = ?, image_url = ?, inbox_url = ?, follow_activity_id = ?, last_polled = ? WHERE id = ?",
        )
        .bind(&following.label)
        .bind(&following.folder)
        .bind(following.method.as_str())
        .bind(following.status.as_str())
        .bind(&following.status_message)
        .bind(&following.image_url)
        .bind(&following.inbox_url)
        .bind(&following.follow_activity_id)
        .bind(following.last_polled)
        .bind(&following.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn list_followings(&self, user_id: &str) -> Result<Vec<Following>, AppError> {
        sqlx::query("SELECT * FROM followings WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(following_from_row)
            .collect()
    }

    /// Followings of every user using the given method.
    pub async fn list_followings_by_method(
        &self,
        method: FollowMethod,
    ) -> Result<Vec<Following>, AppError> {
        sqlx::query("SELECT * FROM followings WHERE method = ?")
            .bind(method.as_str())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(following_from_row)
            .collect()
    }

    pub async fn delete_following(&self, user_id: &str, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM followings WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Rules
    // =========================================================================

    pub async fn insert_rule(&self, rule: &Rule) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO rules (id, user_id, source, rule_type, trigger_text, behavior, comment, is_public, is_active, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.id)
        .bind(&rule.user_id)
        .bind(rule.source.as_str())
        .bind(rule.rule_type.as_str())
        .bind(&rule.trigger)
        .bind(rule.behavior.as_str())
        .bind(&rule.comment)
        .bind(rule.is_public)
        .bind(rule.is_active)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_rules(&self, user_id: &str, active_only: bool) -> Result<Vec<Rule>, AppError> {
        let sql = if active_only {
            "SELECT * FROM rules WHERE user_id = ? AND is_active = 1 ORDER BY created_at"
        } else {
            "SELECT * FROM rules WHERE user_id = ? ORDER BY created_at"
        };

        sqlx::query(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(rule_from_row)
            .collect()
    }

    pub async fn set_rule_active(
        &self,
        user_id: &str,
        id: &str,
        is_active: bool,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE rules SET is_active = ? WHERE user_id = ? AND id = ?")
            .bind(is_active)
            .bind(user_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_rule(&self, user_id: &str, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM rules WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Inbox messages
    // =========================================================================

    pub async fn insert_message_if_absent(&self, message: &InboxMessage) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO inbox_messages (id, user_id, url, actor_url, object_type, content, muted, received_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.user_id)
        .bind(&message.url)
        .bind(&message.actor_url)
        .bind(&message.object_type)
        .bind(&message.content)
        .bind(message.muted)
        .bind(message.received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_message_by_url(
        &self,
        user_id: &str,
        url: &str,
    ) -> Result<Option<InboxMessage>, AppError> {
        sqlx::query("SELECT * FROM inbox_messages WHERE user_id = ? AND url = ?")
            .bind(user_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(message_from_row)
            .transpose()
    }

    pub async fn list_messages(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<InboxMessage>, AppError> {
        sqlx::query(
            "SELECT * FROM inbox_messages WHERE user_id = ? ORDER BY received_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(message_from_row)
        .collect()
    }

    pub async fn set_message_muted(
        &self,
        user_id: &str,
        id: &str,
        muted: bool,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE inbox_messages SET muted = ? WHERE user_id = ? AND id = ?")
            .bind(muted)
            .bind(user_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a message only when it was received from `actor_url`.
    pub async fn delete_message_by_url_and_actor(
        &self,
        user_id: &str,
        url: &str,
        actor_url: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "DELETE FROM inbox_messages WHERE user_id = ? AND url = ? AND actor_url = ?",
        )
        .bind(user_id)
        .bind(url)
        .bind(actor_url)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Polled followings that were last polled before `cutoff` (or never).
    pub async fn list_polls_due(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Following>, AppError> {
        let followings = self.list_followings_by_method(FollowMethod::Poll).await?;
        Ok(followings
            .into_iter()
            .filter(|following| following.last_polled.is_none_or(|polled| polled < cutoff))
            .collect())
    }
}
