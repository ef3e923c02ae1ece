//! `pos-stock-out` operator tool.
//!
//! `reconcile` replays the stock-out for orders whose debit was missed; it is
//! safe to repeat since already-posted items are skipped.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use pos_stock_out::{db, inventory, logging, ReconcilerConfig, StockOutReconciler, StoreContext};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sale stock-out reconciliation for The Small POS")]
struct Cli {
    /// JSON config file; missing means defaults.
    #[arg(long, global = true, default_value = "stock-out.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Create or upgrade the inventory schema.
    Migrate,
    /// Post the stock-out for completed orders.
    Reconcile {
        #[arg(required = true)]
        order_ids: Vec<i64>,
    },
    /// Print the on-hand quantity of a menu item.
    Stock {
        menu_item_id: i64,
        /// Defaults to the configured sales godown.
        godown_id: Option<i64>,
    },
    /// Print the movement audit trail of an order.
    Movements { order_id: i64 },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ReconcilerConfig::load(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    let _guard = logging::init_logging(config.log_dir.as_deref());

    info!("Starting pos-stock-out v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Migrate => {
            db::init(&config.db_path, config.busy_timeout_ms)
                .with_context(|| format!("migrate {}", config.db_path.display()))?;
        }
        Command::Reconcile { order_ids } => {
            let reconciler = StockOutReconciler::new(config);
            for order_id in order_ids {
                let outcome = reconciler.reconcile_completed_order(order_id, StoreContext::Owned);
                println!("{}", outcome.to_json(order_id));
            }
        }
        Command::Stock {
            menu_item_id,
            godown_id,
        } => {
            let conn = db::open_existing(&config.db_path, config.busy_timeout_ms)
                .with_context(|| format!("open {}", config.db_path.display()))?;
            let godown_id = match godown_id {
                Some(id) => id,
                None => inventory::default_godown(&conn, &config.default_godown_code)?
                    .ok_or_else(|| anyhow!("no active godown"))?,
            };
            let on_hand = inventory::quantity_on_hand(&conn, menu_item_id, godown_id)?;
            println!(
                "{}",
                serde_json::json!({
                    "menuItemId": menu_item_id,
                    "godownId": godown_id,
                    "quantityOnHand": on_hand,
                })
            );
        }
        Command::Movements { order_id } => {
            let conn = db::open_existing(&config.db_path, config.busy_timeout_ms)
                .with_context(|| format!("open {}", config.db_path.display()))?;
            let movements = inventory::movements_for_order(&conn, order_id)?;
            println!("{}", serde_json::to_string(&movements)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_parse_reconcile_with_config_anywhere() {
        let cli = Cli::try_parse_from([
            "pos-stock-out",
            "reconcile",
            "101",
            "--config",
            "/etc/pos/stock.json",
            "102",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/pos/stock.json"));
        assert_eq!(
            cli.command,
            Command::Reconcile {
                order_ids: vec![101, 102]
            }
        );

        let cli = Cli::try_parse_from(["pos-stock-out", "--config=x.json", "migrate"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("x.json"));
        assert_eq!(cli.command, Command::Migrate);
    }

    #[test]
    fn test_parse_stock_defaults() {
        let cli = Cli::try_parse_from(["pos-stock-out", "stock", "7"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("stock-out.json"));
        assert_eq!(
            cli.command,
            Command::Stock {
                menu_item_id: 7,
                godown_id: None
            }
        );
    }

    #[test]
    fn test_parse_movements() {
        let cli = Cli::try_parse_from(["pos-stock-out", "movements", "55"]).unwrap();
        assert_eq!(cli.command, Command::Movements { order_id: 55 });
    }

    #[test]
    fn test_help_and_version() {
        let help = Cli::try_parse_from(["pos-stock-out", "--help"]).unwrap_err();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);
        let version = Cli::try_parse_from(["pos-stock-out", "--version"]).unwrap_err();
        assert_eq!(version.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_parse_errors() {
        for args in [
            vec!["pos-stock-out"],
            vec!["pos-stock-out", "reconcile"],
            vec!["pos-stock-out", "reconcile", "abc"],
            vec!["pos-stock-out", "--config"],
            vec!["pos-stock-out", "sweep"],
        ] {
            assert!(Cli::try_parse_from(args.iter().copied()).is_err(), "{args:?}");
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
