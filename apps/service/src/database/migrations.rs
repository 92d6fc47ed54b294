use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 3;

/// Run database migrations
///
/// This is the single source of truth for the database schema.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    // Create schema_migrations table first (tracks applied migrations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!(version = current_version, "Database schema is up to date");
        return Ok(());
    }

    tracing::info!(from = current_version, to = SCHEMA_VERSION, "Running migrations");

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Initial schema").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Add validation result history").await?;
    }

    if current_version < 3 {
        run_migration_v3(conn).await?;
        record_migration(conn, 3, "Track terminal status and pending retry").await?;
    }

    tracing::info!(version = SCHEMA_VERSION, "Database migrations completed successfully");
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!(version, description, "Applied migration");
    Ok(())
}

/// Migration v1: sites and their request headers
///
/// `status_at` stays NULL until the first result is recorded.
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL,
            check_interval_ms INTEGER NOT NULL DEFAULT 600000,
            network_timeout_ms INTEGER NOT NULL DEFAULT 10000,
            validation_mode INTEGER NOT NULL DEFAULT 1,
            validation_args TEXT,
            client_certificate TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            retry_interval_minutes INTEGER NOT NULL DEFAULT 1,
            disabled INTEGER NOT NULL DEFAULT 0,
            status INTEGER NOT NULL DEFAULT 1,
            status_reason TEXT,
            status_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // Ordered, and duplicate keys are allowed
    conn.execute(
        "CREATE TABLE IF NOT EXISTS site_headers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            FOREIGN KEY (site_id) REFERENCES sites(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_sites_disabled ON sites(disabled)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_site_headers_site ON site_headers(site_id, position)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: one row per validation outcome
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS validation_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            status INTEGER NOT NULL,
            attempt INTEGER,
            next_attempt_at INTEGER,
            reason TEXT,
            timestamp INTEGER NOT NULL,
            FOREIGN KEY (site_id) REFERENCES sites(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_validation_results_site_timestamp ON validation_results(site_id, timestamp DESC)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v3: last terminal status and pending retry per site
///
/// `status` also holds transient states (waiting for a retry, checking), so
/// the terminal status is kept on its own. Existing terminal rows seed it.
async fn run_migration_v3(conn: &Connection) -> Result<()> {
    conn.execute("ALTER TABLE sites ADD COLUMN terminal_status INTEGER", ()).await?;
    conn.execute("ALTER TABLE sites ADD COLUMN retry_attempt INTEGER", ()).await?;
    conn.execute("ALTER TABLE sites ADD COLUMN retry_at INTEGER", ()).await?;

    conn.execute(
        "UPDATE sites SET terminal_status = status WHERE status IN (3, 4) AND status_at IS NOT NULL",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_validation_results_timestamp ON validation_results(timestamp)",
        (),
    )
    .await?;

    Ok(())
}
