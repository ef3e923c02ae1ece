//! InventoryStore writes and lookups used by the stock-out: default godown
//! resolution, the movement audit trail, and stock balances.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{DbContext, StockResult};
use crate::orders::SoldLine;

pub const MOVEMENT_OUT: &str = "OUT";
pub const REFERENCE_ORDER: &str = "ORDER";
/// Reference type written by older releases for the same sale debit.
pub const REFERENCE_SALE_LEGACY: &str = "SALE";

/// One `InventoryStockMovements` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub id: i64,
    pub movement_type: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
    pub order_id: Option<i64>,
    pub menu_item_id: i64,
    pub godown_id: i64,
    pub quantity: f64,
    pub unit_cost: f64,
    pub party_id: Option<i64>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
}

/// Balance for one (menu item, godown) right after a debit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebitedBalance {
    pub quantity_on_hand: f64,
    pub low_level_qty: f64,
    /// True when the row did not exist and was created by this debit.
    pub created: bool,
}

impl DebitedBalance {
    pub fn at_or_below_low_level(&self) -> bool {
        self.low_level_qty > 0.0 && self.quantity_on_hand <= self.low_level_qty
    }
}

// ---------------------------------------------------------------------------
// Godowns
// ---------------------------------------------------------------------------

/// Pick the sales debit godown: the active one whose code matches
/// `preferred_code` (case-insensitive), else the active one with the lowest id.
pub fn default_godown(conn: &Connection, preferred_code: &str) -> StockResult<Option<i64>> {
    conn.query_row(
        "SELECT Id FROM InventoryGodowns
         WHERE COALESCE(IsActive, 0) = 1
         ORDER BY CASE WHEN UPPER(GodownCode) = UPPER(?1) THEN 0 ELSE 1 END, Id
         LIMIT 1",
        params![preferred_code],
        |row| row.get(0),
    )
    .optional()
    .db_ctx("resolve default godown")
}

// ---------------------------------------------------------------------------
// Movements
// ---------------------------------------------------------------------------

/// Id of an existing sale debit for (order, menu item, godown), if any.
///
/// Matches `OUT` movements referencing either `ORDER` or the legacy `SALE`
/// type, case-insensitively.
pub fn find_sale_movement(
    conn: &Connection,
    order_id: i64,
    menu_item_id: i64,
    godown_id: i64,
) -> StockResult<Option<i64>> {
    conn.query_row(
        "SELECT Id FROM InventoryStockMovements
         WHERE OrderId = ?1 AND MenuItemId = ?2 AND GodownId = ?3
           AND UPPER(MovementType) = ?4
           AND UPPER(COALESCE(ReferenceType, '')) IN (?5, ?6)
         ORDER BY Id
         LIMIT 1",
        params![
            order_id,
            menu_item_id,
            godown_id,
            MOVEMENT_OUT,
            REFERENCE_ORDER,
            REFERENCE_SALE_LEGACY
        ],
        |row| row.get(0),
    )
    .optional()
    .db_ctx("check existing stock-out")
}

/// Insert the `OUT` movement for one sold line and return its id.
pub fn insert_sale_movement(
    conn: &Connection,
    order_id: i64,
    godown_id: i64,
    line: &SoldLine,
    actor: &str,
    now: &str,
) -> StockResult<i64> {
    conn.execute(
        "INSERT INTO InventoryStockMovements (
            MovementType, ReferenceType, ReferenceId, OrderId, MenuItemId, GodownId,
            Quantity, UnitCost, PartyId, Notes, CreatedBy, CreatedAt
        ) VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9, ?10)",
        params![
            MOVEMENT_OUT,
            REFERENCE_ORDER,
            order_id,
            line.menu_item_id,
            godown_id,
            line.quantity,
            line.unit_cost,
            format!("Sale stock-out for order #{order_id}"),
            actor,
            now,
        ],
    )
    .db_ctx("insert stock movement")?;
    Ok(conn.last_insert_rowid())
}

/// Point a movement's `ReferenceId` at its own id.
pub fn link_movement_reference(conn: &Connection, movement_id: i64) -> StockResult<()> {
    conn.execute(
        "UPDATE InventoryStockMovements SET ReferenceId = ?1 WHERE Id = ?1",
        params![movement_id],
    )
    .db_ctx("link movement reference")?;
    Ok(())
}

pub fn movements_for_order(conn: &Connection, order_id: i64) -> StockResult<Vec<StockMovement>> {
    let mut stmt = conn
        .prepare(
            "SELECT Id, MovementType, ReferenceType, ReferenceId, OrderId, MenuItemId, GodownId,
                    Quantity, UnitCost, PartyId, Notes, CreatedBy, CreatedAt
             FROM InventoryStockMovements
             WHERE OrderId = ?1
             ORDER BY Id",
        )
        .db_ctx("prepare movements")?;
    let rows = stmt
        .query_map(params![order_id], |row| {
            Ok(StockMovement {
                id: row.get(0)?,
                movement_type: row.get(1)?,
                reference_type: row.get(2)?,
                reference_id: row.get(3)?,
                order_id: row.get(4)?,
                menu_item_id: row.get(5)?,
                godown_id: row.get(6)?,
                quantity: row.get(7)?,
                unit_cost: row.get(8)?,
                party_id: row.get(9)?,
                notes: row.get(10)?,
                created_by: row.get(11)?,
                created_at: row.get(12)?,
            })
        })
        .db_ctx("query movements")?;
    rows.collect::<Result<Vec<_>, _>>().db_ctx("read movement")
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

/// Subtract `quantity` from the (menu item, godown) balance.
///
/// The existing row is decremented by a single `UPDATE ... RETURNING`, so the
/// read and the write happen under the same write lock. A missing row is
/// created with a negative on-hand quantity; negative stock is recorded,
/// never rejected.
pub fn debit_balance(
    conn: &Connection,
    menu_item_id: i64,
    godown_id: i64,
    quantity: f64,
    now: &str,
) -> StockResult<DebitedBalance> {
    let updated: Option<(f64, f64)> = conn
        .query_row(
            "UPDATE InventoryStock
             SET QuantityOnHand = COALESCE(QuantityOnHand, 0) - ?3,
                 UpdatedAt = ?4
             WHERE MenuItemId = ?1 AND GodownId = ?2
             RETURNING QuantityOnHand, COALESCE(LowLevelQty, 0)",
            params![menu_item_id, godown_id, quantity, now],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .db_ctx("debit stock balance")?;

    if let Some((quantity_on_hand, low_level_qty)) = updated {
        return Ok(DebitedBalance {
            quantity_on_hand,
            low_level_qty,
            created: false,
        });
    }

    conn.execute(
        "INSERT INTO InventoryStock (MenuItemId, GodownId, QuantityOnHand, UpdatedAt, LowLevelQty)
         VALUES (?1, ?2, ?3, ?4, 0)",
        params![menu_item_id, godown_id, -quantity, now],
    )
    .db_ctx("insert stock balance")?;

    Ok(DebitedBalance {
        quantity_on_hand: -quantity,
        low_level_qty: 0.0,
        created: true,
    })
}

pub fn quantity_on_hand(
    conn: &Connection,
    menu_item_id: i64,
    godown_id: i64,
) -> StockResult<Option<f64>> {
    conn.query_row(
        "SELECT QuantityOnHand FROM InventoryStock WHERE MenuItemId = ?1 AND GodownId = ?2",
        params![menu_item_id, godown_id],
        |row| row.get(0),
    )
    .optional()
    .db_ctx("read stock balance")
}

// ===========================================================================
// Tests
// ===========================================================================
