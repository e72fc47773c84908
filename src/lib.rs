//! Data-access core for the Tradia wholesale management desktop app.
//!
//! In-process library only: the GUI, receipt rendering, and login flow live
//! elsewhere and call in through these modules. All state is owned by a
//! single SQLite file; the invoice ledger and the migration runner are the
//! two components with real invariants (no oversell, monotonic schema
//! upgrades) and everything else is straightforward parameterized SQL.

pub mod activity;
pub mod backup;
pub mod customers;
pub mod db;
pub mod error;
pub mod invoices;
pub mod products;
pub mod reports;
pub mod schema;
pub mod settings;
pub mod users;

pub use db::Database;
pub use error::{Error, Result};
pub use invoices::LineItem;
