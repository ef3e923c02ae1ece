//! Sale stock-out reconciliation.
//!
//! When an order reaches the Completed status, every non-voided menu item on
//! it is debited from the default godown exactly once. The (order, menu item,
//! godown) triple is guarded by an existence check on the movement audit
//! trail, and all debits for one order commit or roll back together.
//!
//! The routine is best-effort: it is called speculatively from payment and
//! completion flows, and a failed stock-out must never block or reverse a
//! sale. Failures come back as [`ReconcileOutcome::RolledBack`] or
//! [`ReconcileOutcome::Failed`] and are logged at warn level; nothing is
//! raised to the caller.

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::db;
use crate::error::{DbContext, StockError, StockResult};
use crate::inventory;
use crate::orders::{self, SoldLine, ORDER_STATUS_COMPLETED};
use crate::settings::SaleFlagReader;

const SAVEPOINT_NAME: &str = "stock_out";

/// Who owns the transaction the debits run in.
#[derive(Debug, Clone, Copy)]
pub enum StoreContext<'c> {
    /// Open connections from the configured database path and commit or roll
    /// back locally.
    Owned,
    /// Run on the caller's connection (or `rusqlite::Transaction`).
    ///
    /// Inside an open transaction the caller keeps the boundary and the
    /// debits are wrapped in a savepoint, so a failed stock-out leaves none
    /// of its own writes behind. The write lock is then whatever the caller's
    /// transaction holds; open it with `BEGIN IMMEDIATE` to serialize
    /// concurrent completions. A connection in autocommit mode gets its own
    /// `BEGIN IMMEDIATE` transaction, committed before returning.
    Borrowed(&'c Connection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidOrderId,
    FeatureDisabled,
    OrderNotFound,
    OrderNotCompleted,
    NoActiveGodown,
    NoLineItems,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedMovement {
    pub movement_id: i64,
    pub menu_item_id: i64,
    pub quantity: f64,
    pub unit_cost: f64,
    pub quantity_on_hand: f64,
    pub below_low_level: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebitSummary {
    pub order_id: i64,
    pub godown_id: i64,
    pub posted: Vec<PostedMovement>,
    /// Menu items skipped because a sale debit already existed.
    pub already_posted: Vec<i64>,
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    Committed(DebitSummary),
    Skipped(SkipReason),
    /// The debit phase failed; every write it made was rolled back.
    RolledBack(StockError),
    /// Failed before any debit was written.
    Failed(StockError),
}

impl ReconcileOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, ReconcileOutcome::Committed(_))
    }

    /// JSON shape printed by the CLI.
    pub fn to_json(&self, order_id: i64) -> serde_json::Value {
        match self {
            ReconcileOutcome::Committed(summary) => serde_json::json!({
                "orderId": order_id,
                "status": "committed",
                "summary": summary,
            }),
            ReconcileOutcome::Skipped(reason) => serde_json::json!({
                "orderId": order_id,
                "status": "skipped",
                "reason": reason,
            }),
            ReconcileOutcome::RolledBack(e) => serde_json::json!({
                "orderId": order_id,
                "status": "rolled_back",
                "error": e.to_string(),
            }),
            ReconcileOutcome::Failed(e) => serde_json::json!({
                "orderId": order_id,
                "status": "failed",
                "error": e.to_string(),
            }),
        }
    }
}

enum Plan {
    Debit { godown_id: i64, lines: Vec<SoldLine> },
    Skip(SkipReason),
}

#[derive(Clone, Copy)]
enum DebitScope {
    Transaction,
    Savepoint,
}

impl DebitScope {
    fn begin(self, conn: &Connection) -> StockResult<()> {
        match self {
            // IMMEDIATE takes the write lock before the existence checks, so
            // concurrent completions of the same item serialize.
            DebitScope::Transaction => conn
                .execute_batch("BEGIN IMMEDIATE")
                .db_ctx("begin transaction"),
            DebitScope::Savepoint => conn
                .execute_batch(&format!("SAVEPOINT {SAVEPOINT_NAME}"))
                .db_ctx("open savepoint"),
        }
    }

    fn commit(self, conn: &Connection) -> StockResult<()> {
        match self {
            DebitScope::Transaction => conn.execute_batch("COMMIT").db_ctx("commit"),
            DebitScope::Savepoint => conn
                .execute_batch(&format!("RELEASE {SAVEPOINT_NAME}"))
                .db_ctx("release savepoint"),
        }
    }

    fn rollback(self, conn: &Connection) {
        let sql = match self {
            DebitScope::Transaction => "ROLLBACK".to_string(),
            DebitScope::Savepoint => {
                format!("ROLLBACK TO {SAVEPOINT_NAME}; RELEASE {SAVEPOINT_NAME};")
            }
        };
        if let Err(e) = conn.execute_batch(&sql) {
            warn!(error = %e, "Stock-out rollback failed");
        }
    }
}

/// Posts sale debits for completed orders.
#[derive(Debug)]
pub struct StockOutReconciler {
    config: ReconcilerConfig,
    sale_flag: SaleFlagReader,
}

impl StockOutReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        let sale_flag = SaleFlagReader::new(config.schema_probe);
        Self { config, sale_flag }
    }

    /// Debit inventory for `order_id` if it is completed and not yet debited.
    ///
    /// Never returns an error: failures are logged and reported in the
    /// outcome. Non-positive ids are ignored.
    pub fn reconcile_completed_order(
        &self,
        order_id: i64,
        context: StoreContext<'_>,
    ) -> ReconcileOutcome {
        let outcome = self.run(order_id, context);

        match &outcome {
            ReconcileOutcome::Committed(summary) if summary.posted.is_empty() => {
                debug!(
                    order_id,
                    godown_id = summary.godown_id,
                    already_posted = summary.already_posted.len(),
                    "Stock-out already posted"
                );
            }
            ReconcileOutcome::Committed(summary) => {
                info!(
                    order_id,
                    godown_id = summary.godown_id,
                    posted = summary.posted.len(),
                    already_posted = summary.already_posted.len(),
                    "Stock-out posted"
                );
                for m in summary.posted.iter().filter(|m| m.below_low_level) {
                    warn!(
                        menu_item_id = m.menu_item_id,
                        godown_id = summary.godown_id,
                        quantity_on_hand = m.quantity_on_hand,
                        "Stock at or below low level after sale"
                    );
                }
            }
            ReconcileOutcome::Skipped(reason) => {
                debug!(order_id, reason = ?reason, "Stock-out skipped");
            }
            ReconcileOutcome::RolledBack(e) => {
                warn!(order_id, error = %e, "Stock-out rolled back");
            }
            ReconcileOutcome::Failed(e) => {
                warn!(order_id, error = %e, "Stock-out failed");
            }
        }

        outcome
    }

    fn run(&self, order_id: i64, context: StoreContext<'_>) -> ReconcileOutcome {
        if order_id <= 0 {
            return ReconcileOutcome::Skipped(SkipReason::InvalidOrderId);
        }

        match context {
            StoreContext::Borrowed(conn) => match self.sale_flag.is_enabled(conn) {
                Ok(true) => {
                    let scope = if conn.is_autocommit() {
                        DebitScope::Transaction
                    } else {
                        DebitScope::Savepoint
                    };
                    self.debit_order(conn, order_id, scope)
                }
                Ok(false) => ReconcileOutcome::Skipped(SkipReason::FeatureDisabled),
                Err(e) => ReconcileOutcome::Failed(e),
            },
            StoreContext::Owned => {
                // The flag check gets its own short-lived connection.
                let enabled = self
                    .open_connection()
                    .and_then(|conn| self.sale_flag.is_enabled(&conn));
                match enabled {
                    Ok(true) => {}
                    Ok(false) => return ReconcileOutcome::Skipped(SkipReason::FeatureDisabled),
                    Err(e) => return ReconcileOutcome::Failed(e),
                }
                match self.open_connection() {
                    Ok(conn) => self.debit_order(&conn, order_id, DebitScope::Transaction),
                    Err(e) => ReconcileOutcome::Failed(e),
                }
            }
        }
    }

    fn open_connection(&self) -> StockResult<Connection> {
        db::open_existing(&self.config.db_path, self.config.busy_timeout_ms)
    }

    fn plan(&self, conn: &Connection, order_id: i64) -> StockResult<Plan> {
        match orders::order_status(conn, order_id)? {
            None => return Ok(Plan::Skip(SkipReason::OrderNotFound)),
            Some(status) if status != ORDER_STATUS_COMPLETED => {
                return Ok(Plan::Skip(SkipReason::OrderNotCompleted))
            }
            Some(_) => {}
        }

        let Some(godown_id) = inventory::default_godown(conn, &self.config.default_godown_code)?
        else {
            return Ok(Plan::Skip(SkipReason::NoActiveGodown));
        };

        let lines = orders::aggregate_sold_lines(conn, order_id)?;
        if lines.is_empty() {
            return Ok(Plan::Skip(SkipReason::NoLineItems));
        }

        Ok(Plan::Debit { godown_id, lines })
    }

    fn debit_order(&self, conn: &Connection, order_id: i64, scope: DebitScope) -> ReconcileOutcome {
        let (godown_id, lines) = match self.plan(conn, order_id) {
            Ok(Plan::Debit { godown_id, lines }) => (godown_id, lines),
            Ok(Plan::Skip(reason)) => return ReconcileOutcome::Skipped(reason),
            Err(e) => return ReconcileOutcome::Failed(e),
        };

        if let Err(e) = scope.begin(conn) {
            return ReconcileOutcome::Failed(e);
        }

        let applied = self
            .apply_debits(conn, order_id, godown_id, &lines)
            .and_then(|summary| scope.commit(conn).map(|()| summary));

        match applied {
            Ok(summary) => ReconcileOutcome::Committed(summary),
            Err(e) => {
                scope.rollback(conn);
                ReconcileOutcome::RolledBack(e)
            }
        }
    }

    fn apply_debits(
        &self,
        conn: &Connection,
        order_id: i64,
        godown_id: i64,
        lines: &[SoldLine],
    ) -> StockResult<DebitSummary> {
        let now = Utc::now().to_rfc3339();
        let mut summary = DebitSummary {
            order_id,
            godown_id,
            posted: Vec::new(),
            already_posted: Vec::new(),
        };

        for line in lines {
            if line.quantity <= 0.0 {
                continue;
            }

            if let Some(existing) =
                inventory::find_sale_movement(conn, order_id, line.menu_item_id, godown_id)?
            {
                debug!(
                    order_id,
                    menu_item_id = line.menu_item_id,
                    movement_id = existing,
                    "Sale debit already recorded"
                );
                summary.already_posted.push(line.menu_item_id);
                continue;
            }

            let movement_id = inventory::insert_sale_movement(
                conn,
                order_id,
                godown_id,
                line,
                &self.config.actor,
                &now,
            )?;
            let balance =
                inventory::debit_balance(conn, line.menu_item_id, godown_id, line.quantity, &now)?;
            if balance.created {
                debug!(
                    menu_item_id = line.menu_item_id,
                    godown_id,
                    quantity_on_hand = balance.quantity_on_hand,
                    "Stock balance row created by sale debit"
                );
            }
            inventory::link_movement_reference(conn, movement_id)?;

            summary.posted.push(PostedMovement {
                movement_id,
                menu_item_id: line.menu_item_id,
                quantity: line.quantity,
                unit_cost: line.unit_cost,
                quantity_on_hand: balance.quantity_on_hand,
                below_low_level: balance.at_or_below_low_level(),
            });
        }

        Ok(summary)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
