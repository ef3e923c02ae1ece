//! The Small POS - sale stock-out reconciliation.
//!
//! When an order is completed, each sold menu item is debited from the
//! default godown exactly once. Order and payment flows call
//! [`StockOutReconciler::reconcile_completed_order`] with either their own
//! open connection ([`StoreContext::Borrowed`]) or let the reconciler open
//! its own ([`StoreContext::Owned`]). A failed stock-out is logged and never
//! blocks the sale.

pub mod config;
pub mod db;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod orders;
pub mod settings;
pub mod stock_out;

pub use config::{ReconcilerConfig, SchemaProbe};
pub use error::{StockError, StockResult};
pub use orders::complete_order;
pub use stock_out::{
    DebitSummary, PostedMovement, ReconcileOutcome, SkipReason, StockOutReconciler, StoreContext,
};
