//! Relational store schema. The SQL files under `migrations/` are compiled in
//! and applied in version order on every open; `schema_version` records which
//! ones a store already has.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("migrations/001_baseline.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("migrations/002_tickets.sql"),
    },
];

const SCHEMA_VERSION_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Highest recorded schema version; 0 for a store that was never migrated.
fn applied_version(conn: &Connection) -> Result<i32, String> {
    conn.execute_batch(SCHEMA_VERSION_DDL)
        .map_err(|e| format!("schema_version table: {}", e))?;
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
        row.get(0)
    })
    .map_err(|e| format!("schema_version read: {}", e))
}

/// Copy a file-backed store to `<path>.v<from>.bak` with the online backup
/// API. In-memory stores have nothing to copy.
fn snapshot_before_upgrade(conn: &Connection, from: i32) -> Result<(), String> {
    let main_file: String = conn
        .query_row("SELECT file FROM pragma_database_list WHERE name = 'main'", [], |row| {
            row.get(0)
        })
        .map_err(|e| format!("database file lookup: {}", e))?;
    if main_file.is_empty() {
        return Ok(());
    }

    let target = format!("{}.v{}.bak", main_file, from);
    let mut copy = Connection::open(&target).map_err(|e| format!("open {}: {}", target, e))?;
    rusqlite::backup::Backup::new(conn, &mut copy)
        .and_then(|backup| backup.step(-1).map(|_| ()))
        .map_err(|e| format!("snapshot to {}: {}", target, e))?;

    log::info!("Schema v{} snapshot written to {}", from, target);
    Ok(())
}

/// Bring the schema up to the newest embedded migration and return how many
/// were applied. Each migration commits together with its version row. A
/// store stamped newer than this binary knows is refused.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    let from = applied_version(conn)?;
    let latest = MIGRATIONS.last().map_or(0, |m| m.version);
    if from > latest {
        return Err(format!(
            "Database schema v{} is newer than this build of sundesk supports (v{})",
            from, latest
        ));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > from).collect();
    if pending.is_empty() {
        return Ok(0);
    }
    if from > 0 {
        snapshot_before_upgrade(conn, from)?;
    }

    for migration in &pending {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| format!("v{}: {}", migration.version, e))?;
        let applied = tx.execute_batch(migration.sql).and_then(|_| {
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [migration.version])
        });
        applied
            .and_then(|_| tx.commit())
            .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;
        log::info!("Schema migrated to v{}", migration.version);
    }

    Ok(pending.len())
}
