//! Order status lookups, sold-line aggregation and the completion flow that
//! triggers a stock-out.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{DbContext, StockResult};
use crate::stock_out::{StockOutReconciler, StoreContext};

/// `Orders.Status` value for a completed (paid and closed) order.
pub const ORDER_STATUS_COMPLETED: i64 = 3;
/// `OrderItems.Status` value for a cancelled/voided line.
pub const LINE_STATUS_VOIDED: i64 = 5;

/// Net quantity sold for one menu item on one order.
#[derive(Debug, Clone, PartialEq)]
pub struct SoldLine {
    pub menu_item_id: i64,
    pub quantity: f64,
    /// Highest unit price among the aggregated lines.
    pub unit_cost: f64,
}

/// `None` when the order does not exist. A NULL status reads as 0.
pub fn order_status(conn: &Connection, order_id: i64) -> StockResult<Option<i64>> {
    let status: Option<Option<i64>> = conn
        .query_row(
            "SELECT Status FROM Orders WHERE Id = ?1",
            params![order_id],
            |row| row.get(0),
        )
        .optional()
        .db_ctx("read order status")?;
    Ok(status.map(|s| s.unwrap_or(0)))
}

/// Sum non-voided line quantities per menu item.
///
/// Unit cost is the maximum unit price among the lines that were summed,
/// not a quantity-weighted average. Items netting to zero or less are
/// dropped.
pub fn aggregate_sold_lines(conn: &Connection, order_id: i64) -> StockResult<Vec<SoldLine>> {
    let mut stmt = conn
        .prepare(
            "SELECT MenuItemId,
                    SUM(COALESCE(Quantity, 0)) AS Qty,
                    MAX(COALESCE(UnitPrice, 0)) AS UnitCost
             FROM OrderItems
             WHERE OrderId = ?1
               AND COALESCE(Status, 0) <> ?2
             GROUP BY MenuItemId
             HAVING SUM(COALESCE(Quantity, 0)) > 0
             ORDER BY MenuItemId",
        )
        .db_ctx("prepare sold lines")?;

    let rows = stmt
        .query_map(params![order_id, LINE_STATUS_VOIDED], |row| {
            Ok(SoldLine {
                menu_item_id: row.get(0)?,
                quantity: row.get(1)?,
                unit_cost: row.get(2)?,
            })
        })
        .db_ctx("query sold lines")?;

    rows.collect::<Result<Vec<_>, _>>().db_ctx("read sold line")
}

/// Mark an order completed and post its stock-out in the same transaction.
///
/// The reconciler runs against this connection as a borrowed context, so the
/// status change and the debits commit together. A stock-out failure is
/// logged by the reconciler and never blocks the completion. Only
/// `Orders.Status` is written; the table belongs to the order module. Returns
/// `Ok(false)` when the order does not exist.
pub fn complete_order(
    conn: &Connection,
    order_id: i64,
    reconciler: &StockOutReconciler,
) -> StockResult<bool> {
    conn.execute_batch("BEGIN IMMEDIATE").db_ctx("begin transaction")?;

    let result = (|| -> StockResult<bool> {
        let updated = conn
            .execute(
                "UPDATE Orders SET Status = ?1 WHERE Id = ?2",
                params![ORDER_STATUS_COMPLETED, order_id],
            )
            .db_ctx("update order status")?;
        if updated == 0 {
            return Ok(false);
        }

        reconciler.reconcile_completed_order(order_id, StoreContext::Borrowed(conn));
        Ok(true)
    })();

    match result {
        Ok(found) => {
            conn.execute_batch("COMMIT").db_ctx("commit")?;
            if found {
                info!(order_id, "Order completed");
            }
            Ok(found)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
