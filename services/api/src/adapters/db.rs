//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `PartitionRepository` and `AccountDirectory` ports from the core crate.
//! It handles all interactions with the local SQLite database using `sqlx`.

use std::str::FromStr;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use asset_history_core::{
    Account, AccountDirectory, PartitionRepository, PortError, PortResult, StoredPartition,
    UserData,
};
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::{error, info};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage ports on top of SQLite.
#[derive(Clone)]
pub struct DbAdapter {
    pool: SqlitePool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct PartitionRecord {
    username: String,
    last_active_id: Option<String>,
    history: String,
}
impl PartitionRecord {
    fn to_stored(self) -> PortResult<StoredPartition> {
        let records = match serde_json::from_str::<Value>(&self.history).map_err(unexpected)? {
            Value::Array(records) => records,
            other => {
                return Err(PortError::Unexpected(format!(
                    "history of {} is not a JSON array but {}",
                    self.username,
                    json_kind(&other)
                )))
            }
        };
        Ok(StoredPartition {
            username: self.username,
            last_active_id: self.last_active_id,
            records,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(FromRow)]
struct AccountRecord {
    password_hash: String,
}

//=========================================================================================
// `PartitionRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl PartitionRepository for DbAdapter {
    async fn load_partition(&self, username: &str) -> PortResult<Option<StoredPartition>> {
        let record = sqlx::query_as::<_, PartitionRecord>(
            "SELECT username, last_active_id, history FROM partitions WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(PartitionRecord::to_stored).transpose()
    }

    async fn save_partition(&self, data: &UserData) -> PortResult<()> {
        let history = serde_json::to_string(&data.history).map_err(unexpected)?;
        sqlx::query(
            "INSERT INTO partitions (username, last_active_id, history, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (username) DO UPDATE SET
                last_active_id = excluded.last_active_id,
                history = excluded.history,
                updated_at = excluded.updated_at",
        )
        .bind(&data.username)
        .bind(&data.last_active_id)
        .bind(history)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `AccountDirectory` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountDirectory for DbAdapter {
    async fn verify_credentials(&self, username: &str, password: &str) -> PortResult<bool> {
        let record = sqlx::query_as::<_, AccountRecord>(
            "SELECT password_hash FROM accounts WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        let Some(record) = record else {
            return Ok(false);
        };
        let parsed_hash = PasswordHash::new(&record.password_hash).map_err(|e| {
            error!("Failed to parse password hash for {}: {:?}", username, e);
            unexpected(e)
        })?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    async fn list_accounts(&self) -> PortResult<Vec<Account>> {
        let usernames: Vec<(String,)> =
            sqlx::query_as("SELECT username FROM accounts ORDER BY username ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(usernames
            .into_iter()
            .map(|(username,)| Account { username })
            .collect())
    }

    async fn add_account(&self, username: &str, password: &str) -> PortResult<()> {
        let username = username.trim();
        if username.is_empty() || password.trim().is_empty() {
            return Err(PortError::Invalid(
                "username and password are required".to_string(),
            ));
        }
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.trim().as_bytes(), &salt)
            .map_err(|e| {
                error!("Failed to hash password: {:?}", e);
                unexpected(e)
            })?
            .to_string();

        sqlx::query(
            "INSERT INTO accounts (username, password_hash, created_at) VALUES (?, ?, ?)
             ON CONFLICT (username) DO UPDATE SET password_hash = excluded.password_hash",
        )
        .bind(username)
        .bind(password_hash)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        info!(username, "Account saved");
        Ok(())
    }

    async fn remove_account(&self, username: &str) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Account {} not found", username)));
        }
        info!(username, "Account removed");
        Ok(())
    }
}
