//! The "sale debits inventory" feature flag.
//!
//! The flag lives in `RestaurantSettings.IsSaleFromInventory`, which older
//! installs may not have provisioned yet. A missing table or column reads as
//! "disabled", never as an error.

use std::sync::OnceLock;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::config::SchemaProbe;
use crate::db;
use crate::error::{DbContext, StockResult};

const SETTINGS_TABLE: &str = "RestaurantSettings";
const SALE_FLAG_COLUMN: &str = "IsSaleFromInventory";

/// Whether the settings schema carries the flag column.
pub fn sale_flag_provisioned(conn: &Connection) -> StockResult<bool> {
    Ok(db::table_exists(conn, SETTINGS_TABLE)?
        && db::column_exists(conn, SETTINGS_TABLE, SALE_FLAG_COLUMN)?)
}

/// Read the flag from the first settings row. Assumes the column exists.
pub fn read_sale_flag(conn: &Connection) -> StockResult<bool> {
    let value: Option<Value> = conn
        .query_row(
            "SELECT IsSaleFromInventory FROM RestaurantSettings ORDER BY rowid LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .db_ctx("read IsSaleFromInventory")?;
    Ok(value.map(|v| is_truthy(&v)).unwrap_or(false))
}

/// Probe the catalog and read the flag in one call.
pub fn sale_debits_inventory(conn: &Connection) -> StockResult<bool> {
    if !sale_flag_provisioned(conn)? {
        debug!("RestaurantSettings.IsSaleFromInventory not provisioned, treating as disabled");
        return Ok(false);
    }
    read_sale_flag(conn)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Integer(n) => *n != 0,
        Value::Real(f) => *f != 0.0,
        Value::Text(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Value::Null | Value::Blob(_) => false,
    }
}

/// Flag reader honouring the configured [`SchemaProbe`] mode.
///
/// In `Cached` mode the catalog is probed once; later provisioning of the
/// column is only picked up by a new reader. The flag value itself is always
/// read fresh.
#[derive(Debug)]
pub struct SaleFlagReader {
    mode: SchemaProbe,
    provisioned: OnceLock<bool>,
}

impl SaleFlagReader {
    pub fn new(mode: SchemaProbe) -> Self {
        Self {
            mode,
            provisioned: OnceLock::new(),
        }
    }

    pub fn is_enabled(&self, conn: &Connection) -> StockResult<bool> {
        let provisioned = match self.mode {
            SchemaProbe::PerCall => return sale_debits_inventory(conn),
            SchemaProbe::Cached => match self.provisioned.get() {
                Some(known) => *known,
                None => {
                    let probed = sale_flag_provisioned(conn)?;
                    *self.provisioned.get_or_init(|| probed)
                }
            },
        };
        if !provisioned {
            debug!("Sale stock-out flag column missing (cached probe), treating as disabled");
            return Ok(false);
        }
        read_sale_flag(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{run_migrations_for_test, test_conn};

    #[test]
    fn test_missing_table_is_disabled() {
        let conn = test_conn();
        assert!(!sale_debits_inventory(&conn).expect("no error on missing table"));
    }

    #[test]
    fn test_missing_column_is_disabled() {
        let conn = test_conn();
        conn.execute_batch(
            "CREATE TABLE RestaurantSettings (Id INTEGER PRIMARY KEY, RestaurantName TEXT);
             INSERT INTO RestaurantSettings (Id, RestaurantName) VALUES (1, 'Cafe');",
        )
        .unwrap();
        assert!(!sale_debits_inventory(&conn).expect("no error on missing column"));
    }

    #[test]
    fn test_no_settings_row_is_disabled() {
        let conn = test_conn();
        run_migrations_for_test(&conn);
        assert!(!sale_debits_inventory(&conn).unwrap());
    }

    #[test]
    fn test_flag_values() {
        let conn = test_conn();
        run_migrations_for_test(&conn);
        conn.execute(
            "INSERT INTO RestaurantSettings (Id, IsSaleFromInventory) VALUES (1, 1)",
            [],
        )
        .unwrap();
        assert!(sale_debits_inventory(&conn).unwrap());

        conn.execute("UPDATE RestaurantSettings SET IsSaleFromInventory = 0", []).unwrap();
        assert!(!sale_debits_inventory(&conn).unwrap());

        // SQLite keeps whatever type was written; legacy rows may hold text.
        conn.execute(
            "UPDATE RestaurantSettings SET IsSaleFromInventory = 'True'",
            [],
        )
        .unwrap();
        assert!(sale_debits_inventory(&conn).unwrap());
    }

    #[test]
    fn test_cached_reader_probes_once() {
        let conn = test_conn();
        let reader = SaleFlagReader::new(SchemaProbe::Cached);
        assert!(!reader.is_enabled(&conn).unwrap());

        // Provisioned after the first probe: cached reader keeps saying no.
        run_migrations_for_test(&conn);
        conn.execute(
            "INSERT INTO RestaurantSettings (Id, IsSaleFromInventory) VALUES (1, 1)",
            [],
        )
        .unwrap();
        assert!(!reader.is_enabled(&conn).unwrap());

        let per_call = SaleFlagReader::new(SchemaProbe::PerCall);
        assert!(per_call.is_enabled(&conn).unwrap());
    }

    #[test]
    fn test_cached_reader_reads_value_fresh() {
        let conn = test_conn();
        run_migrations_for_test(&conn);
        conn.execute(
            "INSERT INTO RestaurantSettings (Id, IsSaleFromInventory) VALUES (1, 1)",
            [],
        )
        .unwrap();
        let reader = SaleFlagReader::new(SchemaProbe::Cached);
        assert!(reader.is_enabled(&conn).unwrap());

        conn.execute("UPDATE RestaurantSettings SET IsSaleFromInventory = 0", []).unwrap();
        assert!(!reader.is_enabled(&conn).unwrap());
    }

    #[test]
    fn test_per_call_reader_sees_late_provisioning() {
        let conn = test_conn();
        let reader = SaleFlagReader::new(SchemaProbe::PerCall);
        assert!(!reader.is_enabled(&conn).unwrap());

        conn.execute_batch(
            "CREATE TABLE RestaurantSettings (Id INTEGER PRIMARY KEY, RestaurantName TEXT);
             INSERT INTO RestaurantSettings (Id, RestaurantName) VALUES (1, 'Cafe');",
        )
        .unwrap();
        assert!(!reader.is_enabled(&conn).unwrap());

        conn.execute_batch(
            "ALTER TABLE RestaurantSettings ADD COLUMN IsSaleFromInventory TEXT;
             UPDATE RestaurantSettings SET IsSaleFromInventory = 'yes';",
        )
        .unwrap();
        assert!(reader.is_enabled(&conn).unwrap());
    }
}
