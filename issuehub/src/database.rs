//! Database Infrastructure Layer
//!
//! Handles database connection, schema initialization, and provides
//! data access methods for users, repositories, issues, their
//! classification tags, and server-side sessions.

use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(sqlx::Error),
    #[error("Database query error: {0}")]
    Query(sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::Conflict(db_err.message().to_string())
            }
            _ => DatabaseError::Query(err),
        }
    }
}

impl DatabaseError {
    /// For a unique violation, the offending `table.column` as reported by SQLite.
    pub fn conflicting_column(&self) -> Option<&str> {
        match self {
            DatabaseError::Conflict(msg) => msg
                .strip_prefix("UNIQUE constraint failed: ")
                .map(|cols| cols.split(',').next().unwrap_or(cols).trim()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

const DEFAULT_STATUSES: &[&str] = &["Open", "In Progress", "Closed"];
const DEFAULT_CATEGORIES: &[&str] = &["Bug", "Feature", "Task"];

/// Database row for users table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub about_me: Option<String>,
    pub location: Option<String>,
    pub created_at: String,
}

/// Database row for repositories table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RepositoryRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StatusRow {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: i64,
    pub title: String,
}

/// Database row for issues table, joined with the titles it references
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IssueRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub repository_id: i64,
    pub status_id: i64,
    pub status_title: String,
    pub category_id: i64,
    pub category_title: String,
    pub created_by_id: i64,
    pub author_username: String,
    pub created_at: String,
}

/// Database row for sessions table. Anonymous sessions have no user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub token: String,
    pub user_id: Option<i64>,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FlashRow {
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub about_me: Option<&'a str>,
    pub location: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewIssue<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub repository_id: i64,
    pub status_id: i64,
    pub category_id: i64,
    pub created_by_id: i64,
}

const ISSUE_SELECT: &str = r#"
    SELECT i.id, i.title, i.description, i.repository_id,
           i.status_id, s.title AS status_title,
           i.category_id, c.title AS category_title,
           i.created_by_id, u.username AS author_username,
           i.created_at
    FROM issues i
    JOIN statuses s ON s.id = i.status_id
    JOIN categories c ON c.id = i.category_id
    JOIN users u ON u.id = i.created_by_id
"#;

const INSERT_SESSION: &str = "INSERT INTO sessions (token, user_id, expires_at) \
     VALUES (?, ?, strftime('%Y-%m-%d %H:%M:%f', 'now', ?))";

const PURGE_EXPIRED_SESSIONS: &str =
    "DELETE FROM sessions WHERE expires_at <= strftime('%Y-%m-%d %H:%M:%f', 'now')";

/// SQLite date modifier such as `+3600 seconds`.
fn expiry_modifier(ttl_seconds: i64) -> String {
    format!("{ttl_seconds:+} seconds")
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let database_config = SqliteConnectOptions::from_str(database_url)
            .map_err(DatabaseError::Connection)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePool::connect_lazy_with(database_config);

        let db = Self { pool };
        db.initialize_tables().await?;

        info!("Database initialized at {}", database_url);
        Ok(db)
    }

    /// A private in-memory database. Pinned to one connection so every
    /// query sees the same data.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(DatabaseError::Connection)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(DatabaseError::Connection)?;

        let db = Self { pool };
        db.initialize_tables().await?;
        Ok(db)
    }

    async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                about_me TEXT,
                location TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                owner_id INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                FOREIGN KEY (owner_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS statuses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS issues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                repository_id INTEGER NOT NULL,
                status_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                created_by_id INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                FOREIGN KEY (repository_id) REFERENCES repositories(id),
                FOREIGN KEY (status_id) REFERENCES statuses(id),
                FOREIGN KEY (category_id) REFERENCES categories(id),
                FOREIGN KEY (created_by_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id INTEGER,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flash_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_token TEXT NOT NULL,
                category TEXT NOT NULL,
                message TEXT NOT NULL,
                FOREIGN KEY (session_token) REFERENCES sessions(token) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes for performance
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_repositories_owner_id ON repositories(owner_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_issues_repository_created ON issues(repository_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_flash_messages_session ON flash_messages(session_token)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert the default statuses and categories into whichever of the two tables is empty.
    pub async fn seed_defaults(&self) -> Result<()> {
        let (statuses,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM statuses")
            .fetch_one(&self.pool)
            .await?;
        if statuses == 0 {
            for title in DEFAULT_STATUSES {
                self.create_status(title).await?;
            }
            info!(count = DEFAULT_STATUSES.len(), "Seeded default statuses");
        }

        let (categories,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM categories")
            .fetch_one(&self.pool)
            .await?;
        if categories == 0 {
            for title in DEFAULT_CATEGORIES {
                self.create_category(title).await?;
            }
            info!(count = DEFAULT_CATEGORIES.len(), "Seeded default categories");
        }

        Ok(())
    }

    // ========== User Operations ==========

    pub async fn create_user(&self, user: NewUser<'_>) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (username, email, password_hash, about_me, location)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.about_me)
        .bind(user.location)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<UserRow> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, about_me, location, created_at
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                DatabaseError::NotFound(format!("User '{}' not found", username))
            }
            e => DatabaseError::Query(e),
        })
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<UserRow> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, about_me, location, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                DatabaseError::NotFound(format!("User with id {} not found", id))
            }
            e => DatabaseError::Query(e),
        })
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        let (exists,): (i64,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
                .bind(username)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists != 0)
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool> {
        let (exists,): (i64,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists != 0)
    }

    // ========== Repository Operations ==========

    pub async fn create_repository(
        &self,
        owner_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO repositories (name, description, owner_id)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_repository(&self, id: i64) -> Result<RepositoryRow> {
        sqlx::query_as::<_, RepositoryRow>(
            r#"
            SELECT id, name, description, owner_id, created_at
            FROM repositories
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                DatabaseError::NotFound(format!("Repository with id {} not found", id))
            }
            e => DatabaseError::Query(e),
        })
    }

    pub async fn update_repository(
        &self,
        id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE repositories
            SET name = ?, description = ?
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "Repository with id {} not found",
                id
            )));
        }
        Ok(())
    }

    /// Whether another repository already uses `name`. `except` skips the
    /// repository being edited.
    pub async fn repository_name_taken(&self, name: &str, except: Option<i64>) -> Result<bool> {
        let (taken,): (i64,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM repositories WHERE name = ? AND id IS NOT ?)",
        )
        .bind(name)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken != 0)
    }

    pub async fn list_repositories_by_owner(&self, owner_id: i64) -> Result<Vec<RepositoryRow>> {
        sqlx::query_as::<_, RepositoryRow>(
            r#"
            SELECT id, name, description, owner_id, created_at
            FROM repositories
            WHERE owner_id = ?
            ORDER BY name
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Query)
    }

    // ========== Status / Category Operations ==========

    pub async fn create_status(&self, title: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO statuses (title) VALUES (?)")
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn create_category(&self, title: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO categories (title) VALUES (?)")
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_statuses(&self) -> Result<Vec<StatusRow>> {
        sqlx::query_as::<_, StatusRow>("SELECT id, title FROM statuses ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)
    }

    pub async fn list_categories(&self) -> Result<Vec<CategoryRow>> {
        sqlx::query_as::<_, CategoryRow>("SELECT id, title FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)
    }

    // ========== Issue Operations ==========

    pub async fn create_issue(&self, issue: NewIssue<'_>) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO issues (title, description, repository_id, status_id, category_id, created_by_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(issue.title)
        .bind(issue.description)
        .bind(issue.repository_id)
        .bind(issue.status_id)
        .bind(issue.category_id)
        .bind(issue.created_by_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Issues of a repository, most recent first.
    pub async fn list_issues_by_repository(&self, repository_id: i64) -> Result<Vec<IssueRow>> {
        sqlx::query_as::<_, IssueRow>(&format!(
            "{ISSUE_SELECT} WHERE i.repository_id = ? ORDER BY i.created_at DESC, i.id DESC"
        ))
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Query)
    }

    // ========== Session Operations ==========

    /// Store a session valid for `ttl_seconds`, dropping any that already expired.
    pub async fn create_session(
        &self,
        token: &str,
        user_id: Option<i64>,
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(PURGE_EXPIRED_SESSIONS).execute(&mut *tx).await?;
        sqlx::query(INSERT_SESSION)
            .bind(token)
            .bind(user_id)
            .bind(expiry_modifier(ttl_seconds))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Expired sessions are reported as absent.
    pub async fn get_session(&self, token: &str) -> Result<Option<SessionRow>> {
        sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT token, user_id, created_at, expires_at
            FROM sessions
            WHERE token = ? AND expires_at > strftime('%Y-%m-%d %H:%M:%f', 'now')
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)
    }

    /// Replace `old_token` (if any) with `new_token` bound to `user_id`,
    /// carrying over pending flash messages.
    pub async fn rotate_session(
        &self,
        old_token: Option<&str>,
        new_token: &str,
        user_id: i64,
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(PURGE_EXPIRED_SESSIONS).execute(&mut *tx).await?;
        sqlx::query(INSERT_SESSION)
            .bind(new_token)
            .bind(user_id)
            .bind(expiry_modifier(ttl_seconds))
            .execute(&mut *tx)
            .await?;

        if let Some(old_token) = old_token {
            sqlx::query("UPDATE flash_messages SET session_token = ? WHERE session_token = ?")
                .bind(new_token)
                .bind(old_token)
                .execute(&mut *tx)
                .await?;

            sqlx::query("DELETE FROM sessions WHERE token = ?")
                .bind(old_token)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_session(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn push_flash(&self, token: &str, category: &str, message: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO flash_messages (session_token, category, message) VALUES (?, ?, ?)",
        )
        .bind(token)
        .bind(category)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove and return the pending flash messages of a session, oldest first.
    pub async fn take_flashes(&self, token: &str) -> Result<Vec<FlashRow>> {
        let mut tx = self.pool.begin().await?;

        let flashes = sqlx::query_as::<_, FlashRow>(
            "SELECT category, message FROM flash_messages WHERE session_token = ? ORDER BY id",
        )
        .bind(token)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM flash_messages WHERE session_token = ?")
            .bind(token)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(flashes)
    }
}
