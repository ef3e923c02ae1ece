//! SQLite access for the InventoryStore.
//!
//! Opens connections with WAL mode and the same pragmas the POS terminal
//! uses, provisions the order/inventory schema through versioned
//! migrations, and exposes the catalog probes used to detect optional
//! tables and columns.

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags};
use tracing::{error, info};

use crate::error::{DbContext, StockError, StockResult};

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Open (or create) the database file and apply pragmas, switching it to WAL.
pub fn open_and_configure(path: &Path, busy_timeout_ms: u64) -> StockResult<Connection> {
    let conn = Connection::open(path).db_ctx("sqlite open")?;
    apply_pragmas(&conn, busy_timeout_ms)?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")
        .db_ctx("enable WAL")?;
    Ok(conn)
}

/// Open an existing database without creating it.
///
/// Used for connections the reconciler owns; the schema belongs to the POS,
/// so a missing file is an error rather than an empty new database.
pub fn open_existing(path: &Path, busy_timeout_ms: u64) -> StockResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
    )
    .db_ctx("sqlite open")?;
    apply_pragmas(&conn, busy_timeout_ms)?;
    Ok(conn)
}

// busy_timeout goes first so the remaining pragmas wait on a locked file.
fn apply_pragmas(conn: &Connection, busy_timeout_ms: u64) -> StockResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA busy_timeout = {busy_timeout_ms};
         PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;"
    ))
    .db_ctx("pragma setup")
}

/// Open the database at `path` and bring its schema up to date.
pub fn init(path: &Path, busy_timeout_ms: u64) -> StockResult<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StockError::Io {
            context: format!("create data dir {}", parent.display()),
            source,
        })?;
    }

    info!("Opening database at {}", path.display());
    let conn = open_and_configure(path, busy_timeout_ms)?;
    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
pub fn run_migrations(conn: &Connection) -> StockResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .db_ctx("create schema_version")?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .db_ctx("read schema_version")?;

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: orders, line items, godowns, stock balances and movements.
fn migrate_v1(conn: &Connection) -> StockResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS Orders (
            Id INTEGER PRIMARY KEY,
            Status INTEGER NOT NULL DEFAULT 0,
            CreatedAt TEXT DEFAULT (datetime('now')),
            UpdatedAt TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS OrderItems (
            Id INTEGER PRIMARY KEY AUTOINCREMENT,
            OrderId INTEGER NOT NULL,
            MenuItemId INTEGER NOT NULL,
            Quantity REAL NOT NULL DEFAULT 0,
            UnitPrice REAL NOT NULL DEFAULT 0,
            Status INTEGER DEFAULT 0,
            FOREIGN KEY(OrderId) REFERENCES Orders(Id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS InventoryGodowns (
            Id INTEGER PRIMARY KEY AUTOINCREMENT,
            GodownCode TEXT NOT NULL,
            GodownName TEXT,
            IsActive INTEGER NOT NULL DEFAULT 1
        );

        -- one balance row per (menu item, godown)
        CREATE TABLE IF NOT EXISTS InventoryStock (
            Id INTEGER PRIMARY KEY AUTOINCREMENT,
            MenuItemId INTEGER NOT NULL,
            GodownId INTEGER NOT NULL,
            QuantityOnHand REAL NOT NULL DEFAULT 0,
            LowLevelQty REAL NOT NULL DEFAULT 0,
            UpdatedAt TEXT,
            UNIQUE(MenuItemId, GodownId),
            FOREIGN KEY(GodownId) REFERENCES InventoryGodowns(Id)
        );

        -- append-only audit trail
        CREATE TABLE IF NOT EXISTS InventoryStockMovements (
            Id INTEGER PRIMARY KEY AUTOINCREMENT,
            MovementType TEXT NOT NULL,
            ReferenceType TEXT,
            ReferenceId INTEGER,
            OrderId INTEGER,
            MenuItemId INTEGER NOT NULL,
            GodownId INTEGER NOT NULL,
            Quantity REAL NOT NULL,
            UnitCost REAL NOT NULL DEFAULT 0,
            PartyId INTEGER,
            Notes TEXT,
            CreatedBy TEXT,
            CreatedAt TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_order_items_order ON OrderItems(OrderId);
        CREATE INDEX IF NOT EXISTS idx_godowns_active ON InventoryGodowns(IsActive);
        CREATE INDEX IF NOT EXISTS idx_stock_movements_order_item
            ON InventoryStockMovements(OrderId, MenuItemId, GodownId);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|source| {
        error!("Migration v1 failed: {source}");
        StockError::Migration { version: 1, source }
    })?;

    info!("Applied migration v1 (orders + inventory tables)");
    Ok(())
}

/// Migration v2: restaurant settings with the sale-debits-inventory flag.
///
/// Older installs may already carry a `RestaurantSettings` table without the
/// flag, so the column is only added when missing.
fn migrate_v2(conn: &Connection) -> StockResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS RestaurantSettings (
            Id INTEGER PRIMARY KEY AUTOINCREMENT,
            RestaurantName TEXT,
            UpdatedAt TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|source| StockError::Migration { version: 2, source })?;

    if !column_exists(conn, "RestaurantSettings", "IsSaleFromInventory")? {
        conn.execute_batch(
            "ALTER TABLE RestaurantSettings ADD COLUMN IsSaleFromInventory INTEGER NOT NULL DEFAULT 0;",
        )
        .map_err(|source| StockError::Migration { version: 2, source })?;
    }

    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![2])
        .map_err(|source| {
            error!("Migration v2 failed: {source}");
            StockError::Migration { version: 2, source }
        })?;

    info!("Applied migration v2 (RestaurantSettings.IsSaleFromInventory)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Catalog probes
// ---------------------------------------------------------------------------

pub fn table_exists(conn: &Connection, table: &str) -> StockResult<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            params![table],
            |row| row.get(0),
        )
        .db_ctx("sqlite_master lookup")?;
    Ok(count > 0)
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> StockResult<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .db_ctx("table_info prepare")?;
    let mut rows = stmt.query([]).db_ctx("table_info query")?;
    while let Some(row) = rows.next().db_ctx("table_info next")? {
        let name: String = row.get(1).db_ctx("table_info name")?;
        if name.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// In-memory database with pragmas applied (WAL is file-only).
#[cfg(test)]
pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    conn
}

// ===========================================================================
// Tests
// ===========================================================================
