//! `SQLite` storage for sub-server configurations and tool records.
//!
//! The tool filter and discovery depend only on this module. Tool replace-sets
//! run inside one transaction so a listing never sees a half-written set.

mod models;
mod schema;

pub use models::{
    BuildStatus, EnvDeclaration, NewSubServer, RuntimeKind, SubServerConfig, ToolRecord,
};
pub use schema::{setup_database, setup_memory_database};

use std::path::Path;

use chrono::{DateTime, Utc};
use gateway_core::ToolInfo;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Length of generated sub-server ids
pub const SERVER_ID_LEN: usize = 8;

/// Storage handle; cheap to clone
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SubServerRow {
    id: String,
    name: String,
    source_reference: String,
    description: String,
    runtime_kind: String,
    install_command: String,
    start_command: String,
    environment_json: String,
    is_active: bool,
    build_status: String,
    build_error: Option<String>,
    image_tag: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ToolRow {
    id: i64,
    server_id: String,
    tool_name: String,
    tool_description: String,
    is_enabled: bool,
    created_at: DateTime<Utc>,
}

const SERVER_COLUMNS: &str = "id, name, source_reference, description, runtime_kind, \
     install_command, start_command, environment_json, is_active, build_status, \
     build_error, image_tag, created_at";

const TOOL_COLUMNS: &str = "id, server_id, tool_name, tool_description, is_enabled, created_at";

fn row_to_server(row: SubServerRow) -> Result<SubServerConfig> {
    let environment = serde_json::from_str(&row.environment_json).unwrap_or_else(|e| {
        warn!(server = %row.id, error = %e, "Unreadable environment declarations, ignoring");
        Vec::new()
    });

    Ok(SubServerConfig {
        runtime_kind: row.runtime_kind.parse()?,
        build_status: row.build_status.parse()?,
        id: row.id,
        name: row.name,
        source_reference: row.source_reference,
        description: row.description,
        install_command: row.install_command,
        start_command: row.start_command,
        environment,
        is_active: row.is_active,
        build_error: row.build_error,
        image_tag: row.image_tag,
        created_at: row.created_at,
    })
}

impl From<ToolRow> for ToolRecord {
    fn from(row: ToolRow) -> Self {
        Self {
            id: row.id,
            server_id: row.server_id,
            tool_name: row.tool_name,
            tool_description: row.tool_description,
            is_enabled: row.is_enabled,
            created_at: row.created_at,
        }
    }
}

/// Map unique-constraint violations on the name column to a config error
fn map_insert_error(e: sqlx::Error) -> Error {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") && msg.contains("name") {
        return Error::Config("A sub-server with that name already exists".to_string());
    }
    Error::Database(e)
}

/// Generate a short opaque id
fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..SERVER_ID_LEN].to_string()
}

impl Store {
    /// Open the database file, creating it and its schema if needed
    pub async fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            pool: setup_database(path).await?,
        })
    }

    /// Fresh in-memory database (tests, throwaway gateways)
    pub async fn in_memory() -> Result<Self> {
        Ok(Self {
            pool: setup_memory_database().await?,
        })
    }

    /// Underlying connection pool
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── sub-servers ─────────────────────────────────────────────────────

    /// Persist a new configuration with a freshly assigned id.
    ///
    /// Commands are trimmed and otherwise stored verbatim.
    pub async fn insert_server(&self, input: NewSubServer) -> Result<SubServerConfig> {
        input.validate()?;

        let mut id = generate_id();
        while self.get_server(&id).await?.is_some() {
            id = generate_id();
        }

        let environment_json = serde_json::to_string(&input.environment)?;
        sqlx::query(
            r"
            INSERT INTO sub_servers (id, name, source_reference, description, runtime_kind,
                install_command, start_command, environment_json, is_active, build_status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&id)
        .bind(input.name.trim())
        .bind(input.source_reference.trim())
        .bind(&input.description)
        .bind(input.runtime_kind.as_str())
        .bind(input.install_command.trim())
        .bind(input.start_command.trim())
        .bind(&environment_json)
        .bind(input.is_active)
        .bind(BuildStatus::Pending.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        debug!(server = %id, name = %input.name, "Stored sub-server configuration");

        self.get_server(&id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Sub-server {id} vanished after insert")))
    }

    /// Fetch one configuration
    pub async fn get_server(&self, id: &str) -> Result<Option<SubServerConfig>> {
        let query = format!("SELECT {SERVER_COLUMNS} FROM sub_servers WHERE id = ?");
        sqlx::query_as::<_, SubServerRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_server)
            .transpose()
    }

    /// All configurations, oldest first
    pub async fn list_servers(&self) -> Result<Vec<SubServerConfig>> {
        let query = format!("SELECT {SERVER_COLUMNS} FROM sub_servers ORDER BY created_at, id");
        sqlx::query_as::<_, SubServerRow>(&query)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(row_to_server)
            .collect()
    }

    /// Configurations to mount at start
    pub async fn list_active_servers(&self) -> Result<Vec<SubServerConfig>> {
        Ok(self
            .list_servers()
            .await?
            .into_iter()
            .filter(|s| s.is_active)
            .collect())
    }

    /// Record build progress. `image_tag` is only overwritten when given.
    pub async fn set_build_status(
        &self,
        id: &str,
        status: BuildStatus,
        build_error: Option<&str>,
        image_tag: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE sub_servers
            SET build_status = ?, build_error = ?, image_tag = COALESCE(?, image_tag)
            WHERE id = ?
            ",
        )
        .bind(status.as_str())
        .bind(build_error)
        .bind(image_tag)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Toggle whether a configuration is mounted on next start
    pub async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE sub_servers SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a configuration and its tool records
    pub async fn delete_server(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tool_records WHERE server_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM sub_servers WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // ── tool records ────────────────────────────────────────────────────

    /// Replace the full tool set of one server: delete, then insert enabled rows.
    ///
    /// Runs in one transaction; on failure nothing changes.
    pub async fn replace_tools(&self, server_id: &str, tools: &[ToolInfo]) -> Result<usize> {
        let persist = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM tool_records WHERE server_id = ?")
                .bind(server_id)
                .execute(&mut *tx)
                .await?;

            let now = Utc::now();
            for tool in tools {
                sqlx::query(
                    r"
                    INSERT INTO tool_records (server_id, tool_name, tool_description, is_enabled, created_at)
                    VALUES (?, ?, ?, 1, ?)
                    ",
                )
                .bind(server_id)
                .bind(&tool.name)
                .bind(&tool.description)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        };

        persist
            .await
            .map_err(|e: sqlx::Error| Error::Persistence(format!("{server_id}: {e}")))?;
        Ok(tools.len())
    }

    /// Tool records of one server, in discovery order
    pub async fn tools_for_server(&self, server_id: &str) -> Result<Vec<ToolRecord>> {
        let query = format!("SELECT {TOOL_COLUMNS} FROM tool_records WHERE server_id = ? ORDER BY id");
        Ok(sqlx::query_as::<_, ToolRow>(&query)
            .bind(server_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ToolRecord::from)
            .collect())
    }

    /// Every tool an administrator disabled, across all servers
    pub async fn disabled_tools(&self) -> Result<Vec<ToolRecord>> {
        let query = format!("SELECT {TOOL_COLUMNS} FROM tool_records WHERE is_enabled = 0 ORDER BY id");
        Ok(sqlx::query_as::<_, ToolRow>(&query)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ToolRecord::from)
            .collect())
    }

    /// Fetch one tool record by its own id
    pub async fn get_tool(&self, id: i64) -> Result<Option<ToolRecord>> {
        let query = format!("SELECT {TOOL_COLUMNS} FROM tool_records WHERE id = ?");
        Ok(sqlx::query_as::<_, ToolRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ToolRecord::from))
    }

    /// Administrator switch, keyed by the tool record id
    pub async fn set_tool_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE tool_records SET is_enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
