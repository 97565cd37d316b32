//! Persistent store for Recast
//!
//! All pipeline state lives here: credentials, the scheduled-post queue,
//! feed connections, and known episodes. Status transitions are single
//! conditional UPDATEs so concurrent invocations cannot race a post out of
//! its state machine.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::StoreError;
use crate::types::{
    Credential, CredentialStatus, Episode, FailureKind, FeedConnection, PostOutcome, PostStatus,
    Provider, PublishReceipt, ScheduledPost,
};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `db_path` and run migrations.
    pub async fn new(db_path: &str) -> Result<Self, StoreError> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Forward slashes work on both Windows and Unix; mode=rwc creates
        // the file on first open.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Insert or replace the credential for (user, provider).
    ///
    /// This is the write the OAuth callback handler performs; the conflict
    /// target enforces the one-credential-per-(user, provider) invariant.
    pub async fn upsert_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO credentials
                (user_id, provider, access_token, refresh_token, expires_at,
                 provider_account_id, account_name, status, last_sync_at,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, provider) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                provider_account_id = excluded.provider_account_id,
                account_name = excluded.account_name,
                status = excluded.status,
                last_sync_at = excluded.last_sync_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&credential.user_id)
        .bind(credential.provider.as_str())
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(&credential.provider_account_id)
        .bind(&credential.account_name)
        .bind(credential_status_str(credential.status))
        .bind(credential.last_sync_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<Credential>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, provider, access_token, refresh_token, expires_at,
                   provider_account_id, account_name, status, last_sync_at
            FROM credentials
            WHERE user_id = ? AND provider = ?
            "#,
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| credential_from_row(&r)))
    }

    /// Persist refreshed tokens. A refresh response without a rotated
    /// refresh token keeps the stored one.
    pub async fn update_credential_tokens(
        &self,
        user_id: &str,
        provider: Provider,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<i64>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE credentials SET
                access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                expires_at = ?,
                updated_at = ?
            WHERE user_id = ? AND provider = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(user_id)
        .bind(provider.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_credential_status(
        &self,
        user_id: &str,
        provider: Provider,
        status: CredentialStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE credentials SET status = ?, updated_at = ?
            WHERE user_id = ? AND provider = ?
            "#,
        )
        .bind(credential_status_str(status))
        .bind(chrono::Utc::now().timestamp())
        .bind(user_id)
        .bind(provider.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduled posts
    // ------------------------------------------------------------------

    pub async fn create_post(&self, post: &ScheduledPost) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_posts
                (id, user_id, provider, content, scheduled_at, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(post.provider.as_str())
        .bind(&post.content)
        .bind(post.scheduled_at)
        .bind(post.status.as_str())
        .bind(post.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, provider, content, scheduled_at, status,
                   platform_post_id, platform_url, failure_kind, failure_message,
                   completed_at, claimed_at, created_at
            FROM scheduled_posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| post_from_row(&r)))
    }

    pub async fn list_posts_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ScheduledPost>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, provider, content, scheduled_at, status,
                   platform_post_id, platform_url, failure_kind, failure_message,
                   completed_at, claimed_at, created_at
            FROM scheduled_posts
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(post_from_row).collect())
    }

    /// Fetch up to `limit` due posts, oldest scheduled first. Posts under a
    /// live claim are excluded; claims older than `claim_ttl_secs` belong
    /// to a crashed invocation and become eligible again.
    pub async fn due_posts(
        &self,
        now: i64,
        limit: usize,
        claim_ttl_secs: i64,
    ) -> Result<Vec<ScheduledPost>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, provider, content, scheduled_at, status,
                   platform_post_id, platform_url, failure_kind, failure_message,
                   completed_at, claimed_at, created_at
            FROM scheduled_posts
            WHERE status = 'scheduled'
              AND scheduled_at <= ?
              AND (claimed_at IS NULL OR claimed_at <= ?)
            ORDER BY scheduled_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(now - claim_ttl_secs)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(post_from_row).collect())
    }

    /// Atomically claim a post for this invocation. Returns false when the
    /// post is already claimed, already terminal, or gone - the caller must
    /// skip it.
    pub async fn claim_post(
        &self,
        post_id: &str,
        now: i64,
        claim_ttl_secs: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET claimed_at = ?
            WHERE id = ?
              AND status = 'scheduled'
              AND (claimed_at IS NULL OR claimed_at <= ?)
            "#,
        )
        .bind(now)
        .bind(post_id)
        .bind(now - claim_ttl_secs)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition a claimed post to `published`, recording the platform
    /// receipt in the same write. Returns false if the post was no longer
    /// in `scheduled` (already finished by another invocation).
    pub async fn mark_published(
        &self,
        post_id: &str,
        receipt: &PublishReceipt,
        now: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET
                status = 'published',
                platform_post_id = ?,
                platform_url = ?,
                completed_at = ?
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(&receipt.platform_post_id)
        .bind(&receipt.url)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition a claimed post to `failed` with a structured reason.
    pub async fn mark_failed(
        &self,
        post_id: &str,
        kind: FailureKind,
        message: &str,
        now: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET
                status = 'failed',
                failure_kind = ?,
                failure_message = ?,
                completed_at = ?
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(kind.as_str())
        .bind(message)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// User-initiated delete; only permitted while the post is still
    /// `scheduled`. Returns false once the post has left the queue.
    pub async fn delete_post(&self, post_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM scheduled_posts WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(post_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ------------------------------------------------------------------
    // Feed connections and episodes
    // ------------------------------------------------------------------

    pub async fn create_feed_connection(
        &self,
        connection: &FeedConnection,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO feed_connections
                (id, user_id, feed_external_id, last_resync_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&connection.id)
        .bind(&connection.user_id)
        .bind(&connection.feed_external_id)
        .bind(connection.last_resync_at)
        .bind(connection.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_feed_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<FeedConnection>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, feed_external_id, last_resync_at, created_at
            FROM feed_connections WHERE id = ?
            "#,
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| feed_connection_from_row(&r)))
    }

    pub async fn get_feed_connection_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<FeedConnection>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, feed_external_id, last_resync_at, created_at
            FROM feed_connections WHERE user_id = ?
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| feed_connection_from_row(&r)))
    }

    pub async fn touch_feed_resync(
        &self,
        connection_id: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE feed_connections SET last_resync_at = ? WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(connection_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert an episode unless its (connection, external id) pair is
    /// already known. Returns true when a new row was written.
    pub async fn insert_episode_if_unseen(&self, episode: &Episode) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO episodes
                (id, connection_id, external_id, title, published_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&episode.id)
        .bind(&episode.connection_id)
        .bind(&episode.external_id)
        .bind(&episode.title)
        .bind(episode.published_at)
        .bind(episode.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn count_episodes(&self, connection_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM episodes WHERE connection_id = ?
            "#,
        )
        .bind(connection_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("n"))
    }
}

fn credential_status_str(status: CredentialStatus) -> &'static str {
    match status {
        CredentialStatus::Connected => "connected",
        CredentialStatus::Disconnected => "disconnected",
    }
}

fn credential_from_row(row: &sqlx::sqlite::SqliteRow) -> Credential {
    Credential {
        user_id: row.get("user_id"),
        provider: Provider::parse(&row.get::<String, _>("provider"))
            .unwrap_or(Provider::SocialPost),
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        expires_at: row.get("expires_at"),
        provider_account_id: row.get("provider_account_id"),
        account_name: row.get("account_name"),
        status: match row.get::<String, _>("status").as_str() {
            "disconnected" => CredentialStatus::Disconnected,
            _ => CredentialStatus::Connected,
        },
        last_sync_at: row.get("last_sync_at"),
    }
}

fn post_from_row(row: &sqlx::sqlite::SqliteRow) -> ScheduledPost {
    let status = PostStatus::parse(&row.get::<String, _>("status")).unwrap_or(PostStatus::Scheduled);

    let outcome = match status {
        PostStatus::Scheduled => None,
        PostStatus::Published => Some(PostOutcome::Published {
            platform_post_id: row
                .get::<Option<String>, _>("platform_post_id")
                .unwrap_or_default(),
            url: row.get("platform_url"),
            published_at: row.get::<Option<i64>, _>("completed_at").unwrap_or(0),
        }),
        PostStatus::Failed => Some(PostOutcome::Failed {
            kind: row
                .get::<Option<String>, _>("failure_kind")
                .as_deref()
                .and_then(FailureKind::parse)
                .unwrap_or(FailureKind::Upstream),
            message: row
                .get::<Option<String>, _>("failure_message")
                .unwrap_or_default(),
            failed_at: row.get::<Option<i64>, _>("completed_at").unwrap_or(0),
        }),
    };

    ScheduledPost {
        id: row.get("id"),
        user_id: row.get("user_id"),
        provider: Provider::parse(&row.get::<String, _>("provider"))
            .unwrap_or(Provider::SocialPost),
        content: row.get("content"),
        scheduled_at: row.get("scheduled_at"),
        status,
        outcome,
        created_at: row.get("created_at"),
        claimed_at: row.get("claimed_at"),
    }
}

fn feed_connection_from_row(row: &sqlx::sqlite::SqliteRow) -> FeedConnection {
    FeedConnection {
        id: row.get("id"),
        user_id: row.get("user_id"),
        feed_external_id: row.get("feed_external_id"),
        last_resync_at: row.get("last_resync_at"),
        created_at: row.get("created_at"),
    }
}
