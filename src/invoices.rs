//! Invoice ledger: atomic invoice writes with consistent stock adjustment.
//!
//! Every mutating operation runs as one immediate-mode transaction so that
//! two concurrent submissions cannot both pass stock validation against a
//! stale read. Validation of every line happens before any row is written;
//! a single failing line aborts the whole invoice.

use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activity;
use crate::db::{now_stamp, Database};
use crate::error::{Error, Result};

/// One product/quantity/price entry submitted for an invoice.
#[derive(Debug, Clone, Deserialize)]
pub struct LineItem {
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceSummary {
    pub invoice_id: i64,
    pub customer_name: String,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceLineDetail {
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    pub invoice_id: i64,
    pub customer_id: i64,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub invoice_date: String,
    pub discount: f64,
    pub tax: f64,
    pub total_amount: f64,
    pub lines: Vec<InvoiceLineDetail>,
}

fn validate_submission(lines: &[LineItem], discount: f64, tax: f64) -> Result<()> {
    if lines.is_empty() {
        return Err(Error::Validation("an invoice needs at least one line".into()));
    }
    for line in lines {
        if line.quantity <= 0 {
            return Err(Error::Validation("line quantity must be greater than 0".into()));
        }
        if line.unit_price < 0.0 {
            return Err(Error::Validation("unit price must be 0 or greater".into()));
        }
    }
    if discount < 0.0 {
        return Err(Error::Validation("discount must be 0 or greater".into()));
    }
    if tax < 0.0 {
        return Err(Error::Validation("tax must be 0 or greater".into()));
    }
    Ok(())
}

/// Combined requested quantity per distinct product. Two lines for the same
/// product are validated against their summed quantity, not independently.
fn aggregate_quantities(lines: &[LineItem]) -> BTreeMap<i64, i64> {
    let mut requested = BTreeMap::new();
    for line in lines {
        *requested.entry(line.product_id).or_insert(0) += line.quantity;
    }
    requested
}

fn check_stock(tx: &Transaction<'_>, requested: &BTreeMap<i64, i64>) -> Result<()> {
    for (&product_id, &quantity) in requested {
        let available: Option<i64> = tx
            .query_row(
                "SELECT stock_quantity FROM products WHERE product_id = ?",
                params![product_id],
                |row| row.get(0),
            )
            .optional()?;
        let available = available.ok_or(Error::NotFound {
            entity: "product",
            id: product_id,
        })?;
        if quantity > available {
            return Err(Error::InsufficientStock {
                product_id,
                available,
                requested: quantity,
            });
        }
    }
    Ok(())
}

fn customer_exists(tx: &Transaction<'_>, customer_id: i64) -> Result<()> {
    tx.query_row(
        "SELECT 1 FROM customers WHERE customer_id = ?",
        params![customer_id],
        |_| Ok(()),
    )
    .optional()?
    .ok_or(Error::NotFound {
        entity: "customer",
        id: customer_id,
    })
}

fn subtotal(lines: &[LineItem]) -> f64 {
    lines
        .iter()
        .map(|line| line.quantity as f64 * line.unit_price)
        .sum()
}

fn insert_lines_and_decrement_stock(
    tx: &Transaction<'_>,
    invoice_id: i64,
    lines: &[LineItem],
    requested: &BTreeMap<i64, i64>,
) -> Result<()> {
    for line in lines {
        tx.execute(
            "INSERT INTO invoice_items (invoice_id, product_id, quantity, unit_price)
             VALUES (?, ?, ?, ?)",
            params![invoice_id, line.product_id, line.quantity, line.unit_price],
        )?;
    }
    // one combined decrement per product
    for (&product_id, &quantity) in requested {
        tx.execute(
            "UPDATE products SET stock_quantity = stock_quantity - ? WHERE product_id = ?",
            params![quantity, product_id],
        )?;
    }
    Ok(())
}

/// Restore stock from the lines currently stored for `invoice_id`.
fn restore_stock_from_lines(tx: &Transaction<'_>, invoice_id: i64) -> Result<()> {
    let mut stmt =
        tx.prepare("SELECT product_id, quantity FROM invoice_items WHERE invoice_id = ?")?;
    let rows = stmt.query_map(params![invoice_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (product_id, quantity) = row?;
        tx.execute(
            "UPDATE products SET stock_quantity = stock_quantity + ? WHERE product_id = ?",
            params![quantity, product_id],
        )?;
    }
    Ok(())
}

fn invoice_header_exists(tx: &Transaction<'_>, invoice_id: i64) -> Result<()> {
    tx.query_row(
        "SELECT 1 FROM invoices WHERE invoice_id = ?",
        params![invoice_id],
        |_| Ok(()),
    )
    .optional()?
    .ok_or(Error::NotFound {
        entity: "invoice",
        id: invoice_id,
    })
}

/// Create an invoice with its lines and decrement stock, all-or-nothing.
///
/// `actor` is the audit identity of whoever performed the action; `None`
/// records a system event. The audit row is part of the same transaction.
pub fn create_invoice(
    db: &Database,
    actor: Option<&str>,
    customer_id: i64,
    lines: &[LineItem],
    discount: f64,
    tax: f64,
) -> Result<i64> {
    validate_submission(lines, discount, tax)?;
    let mut conn = db.connect()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    customer_exists(&tx, customer_id)?;
    let requested = aggregate_quantities(lines);
    check_stock(&tx, &requested)?;

    let total = subtotal(lines) - discount + tax;
    tx.execute(
        "INSERT INTO invoices (customer_id, invoice_date, discount, tax, total_amount)
         VALUES (?, ?, ?, ?, ?)",
        params![customer_id, now_stamp(), discount, tax, total],
    )?;
    let invoice_id = tx.last_insert_rowid();
    insert_lines_and_decrement_stock(&tx, invoice_id, lines, &requested)?;
    activity::record(
        &tx,
        actor,
        "invoice.create",
        &format!("invoice {invoice_id} for customer {customer_id}, total {total:.2}"),
    )?;

    tx.commit()?;
    info!(invoice_id, customer_id, "invoice created");
    Ok(invoice_id)
}

/// Replace an invoice's lines and header, equivalent to "undo old effect,
/// then apply new effect" in one transaction. The old lines' stock is
/// restored first, so reducing a quantity frees that stock for other lines
/// of the same update.
pub fn update_invoice(
    db: &Database,
    actor: Option<&str>,
    invoice_id: i64,
    customer_id: i64,
    lines: &[LineItem],
    discount: f64,
    tax: f64,
) -> Result<()> {
    validate_submission(lines, discount, tax)?;
    let mut conn = db.connect()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    invoice_header_exists(&tx, invoice_id)?;
    customer_exists(&tx, customer_id)?;

    restore_stock_from_lines(&tx, invoice_id)?;
    tx.execute(
        "DELETE FROM invoice_items WHERE invoice_id = ?",
        params![invoice_id],
    )?;

    let requested = aggregate_quantities(lines);
    check_stock(&tx, &requested)?;

    let total = subtotal(lines) - discount + tax;
    tx.execute(
        "UPDATE invoices SET customer_id = ?, discount = ?, tax = ?, total_amount = ?
         WHERE invoice_id = ?",
        params![customer_id, discount, tax, total, invoice_id],
    )?;
    insert_lines_and_decrement_stock(&tx, invoice_id, lines, &requested)?;
    activity::record(
        &tx,
        actor,
        "invoice.update",
        &format!("invoice {invoice_id} for customer {customer_id}, total {total:.2}"),
    )?;

    tx.commit()?;
    info!(invoice_id, customer_id, "invoice updated");
    Ok(())
}

/// Delete an invoice and its lines, restoring stock, in one transaction.
pub fn delete_invoice(db: &Database, actor: Option<&str>, invoice_id: i64) -> Result<()> {
    let mut conn = db.connect()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    invoice_header_exists(&tx, invoice_id)?;
    restore_stock_from_lines(&tx, invoice_id)?;
    tx.execute(
        "DELETE FROM invoice_items WHERE invoice_id = ?",
        params![invoice_id],
    )?;
    tx.execute(
        "DELETE FROM invoices WHERE invoice_id = ?",
        params![invoice_id],
    )?;
    activity::record(
        &tx,
        actor,
        "invoice.delete",
        &format!("invoice {invoice_id}"),
    )?;

    tx.commit()?;
    info!(invoice_id, "invoice deleted");
    Ok(())
}

pub fn all_invoices(db: &Database) -> Result<Vec<InvoiceSummary>> {
    let conn = db.connect()?;
    let mut stmt = conn.prepare(
        "SELECT i.invoice_id, c.name, i.total_amount
         FROM invoices i
         JOIN customers c ON c.customer_id = i.customer_id
         ORDER BY i.invoice_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(InvoiceSummary {
            invoice_id: row.get(0)?,
            customer_name: row.get(1)?,
            total_amount: row.get(2)?,
        })
    })?;

    let mut invoices = Vec::new();
    for row in rows {
        invoices.push(row?);
    }
    Ok(invoices)
}

pub fn invoice_by_id(db: &Database, invoice_id: i64) -> Result<Option<InvoiceDetail>> {
    let conn = db.connect()?;
    let header = conn
        .query_row(
            "SELECT i.invoice_id, i.customer_id, c.name, c.phone_number,
                    i.invoice_date, i.discount, i.tax, i.total_amount
             FROM invoices i
             JOIN customers c ON c.customer_id = i.customer_id
             WHERE i.invoice_id = ?",
            params![invoice_id],
            |row| {
                Ok(InvoiceDetail {
                    invoice_id: row.get(0)?,
                    customer_id: row.get(1)?,
                    customer_name: row.get(2)?,
                    customer_phone: row.get(3)?,
                    invoice_date: row.get(4)?,
                    discount: row.get(5)?,
                    tax: row.get(6)?,
                    total_amount: row.get(7)?,
                    lines: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut detail) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT p.name, ii.quantity, ii.unit_price
         FROM invoice_items ii
         JOIN products p ON p.product_id = ii.product_id
         WHERE ii.invoice_id = ?
         ORDER BY ii.item_id",
    )?;
    let rows = stmt.query_map(params![invoice_id], |row| {
        Ok(InvoiceLineDetail {
            product_name: row.get(0)?,
            quantity: row.get(1)?,
            unit_price: row.get(2)?,
        })
    })?;
    for row in rows {
        detail.lines.push(row?);
    }
    Ok(Some(detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;
    use crate::{customers, products};

    fn seed(db: &Database, stock: i64) -> (i64, i64) {
        let customer_id = customers::add_customer(db, "Kofi", "0241234567", "Accra").unwrap();
        let product_id = products::add_product(db, "Rice 25kg", 2.5, stock).unwrap();
        (customer_id, product_id)
    }

    fn stock_of(db: &Database, product_id: i64) -> i64 {
        products::product_by_id(db, product_id)
            .unwrap()
            .unwrap()
            .stock_quantity
    }

    fn line(product_id: i64, quantity: i64, unit_price: f64) -> LineItem {
        LineItem {
            product_id,
            quantity,
            unit_price,
        }
    }

    #[test]
    fn create_decrements_stock_and_computes_total() {
        let (_dir, db) = test_db();
        let (customer_id, product_id) = seed(&db, 100);
        let invoice_id =
            create_invoice(&db, Some("admin"), customer_id, &[line(product_id, 10, 2.5)], 2.5, 1.0)
                .unwrap();
        let detail = invoice_by_id(&db, invoice_id).unwrap().unwrap();
        assert!((detail.total_amount - 23.5).abs() < f64::EPSILON);
        assert_eq!(stock_of(&db, product_id), 90);
        assert_eq!(detail.lines.len(), 1);
    }

    #[test]
    fn same_product_lines_validated_against_combined_quantity() {
        let (_dir, db) = test_db();
        let (customer_id, product_id) = seed(&db, 100);
        create_invoice(
            &db,
            None,
            customer_id,
            &[line(product_id, 5, 2.5), line(product_id, 7, 2.5)],
            0.0,
            0.0,
        )
        .unwrap();
        assert_eq!(stock_of(&db, product_id), 88);
    }

    #[test]
    fn combined_overdraft_rejected_even_when_each_line_fits() {
        let (_dir, db) = test_db();
        let (customer_id, product_id) = seed(&db, 100);
        let err = create_invoice(
            &db,
            None,
            customer_id,
            &[line(product_id, 60, 2.5), line(product_id, 50, 2.5)],
            0.0,
            0.0,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientStock {
                available: 100,
                requested: 110,
                ..
            }
        ));
        assert_eq!(stock_of(&db, product_id), 100);
    }

    #[test]
    fn failing_line_leaves_no_partial_invoice() {
        let (_dir, db) = test_db();
        let (customer_id, product_id) = seed(&db, 100);
        let err = create_invoice(
            &db,
            None,
            customer_id,
            &[line(product_id, 10, 2.5), line(999, 1, 1.0)],
            0.0,
            0.0,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                entity: "product",
                id: 999
            }
        ));
        assert_eq!(stock_of(&db, product_id), 100);
        assert!(all_invoices(&db).unwrap().is_empty());
        let conn = db.connect().unwrap();
        let items: i64 = conn
            .query_row("SELECT COUNT(*) FROM invoice_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(items, 0);
    }

    #[test]
    fn update_reduced_quantity_frees_stock() {
        let (_dir, db) = test_db();
        let (customer_id, product_id) = seed(&db, 100);
        let invoice_id =
            create_invoice(&db, None, customer_id, &[line(product_id, 5, 2.5)], 0.0, 0.0).unwrap();
        assert_eq!(stock_of(&db, product_id), 95);
        update_invoice(
            &db,
            None,
            invoice_id,
            customer_id,
            &[line(product_id, 2, 2.5)],
            0.0,
            0.0,
        )
        .unwrap();
        // net +3 relative to the pre-update state
        assert_eq!(stock_of(&db, product_id), 98);
    }

    #[test]
    fn update_may_consume_stock_restored_within_same_call() {
        let (_dir, db) = test_db();
        let (customer_id, product_id) = seed(&db, 10);
        let invoice_id =
            create_invoice(&db, None, customer_id, &[line(product_id, 8, 2.5)], 0.0, 0.0).unwrap();
        assert_eq!(stock_of(&db, product_id), 2);
        // 9 > 2 live stock, but the restored 8 makes 10 available
        update_invoice(
            &db,
            None,
            invoice_id,
            customer_id,
            &[line(product_id, 9, 2.5)],
            0.0,
            0.0,
        )
        .unwrap();
        assert_eq!(stock_of(&db, product_id), 1);
    }

    #[test]
    fn failed_update_rolls_back_restoration() {
        let (_dir, db) = test_db();
        let (customer_id, product_id) = seed(&db, 10);
        let invoice_id =
            create_invoice(&db, None, customer_id, &[line(product_id, 8, 2.5)], 0.0, 0.0).unwrap();
        let err = update_invoice(
            &db,
            None,
            invoice_id,
            customer_id,
            &[line(product_id, 11, 2.5)],
            0.0,
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InsufficientStock { .. }));
        // old lines and stock effect intact
        assert_eq!(stock_of(&db, product_id), 2);
        let detail = invoice_by_id(&db, invoice_id).unwrap().unwrap();
        assert_eq!(detail.lines.len(), 1);
        assert_eq!(detail.lines[0].quantity, 8);
    }

    #[test]
    fn delete_restores_stock_and_cascades_lines() {
        let (_dir, db) = test_db();
        let (customer_id, product_id) = seed(&db, 100);
        let invoice_id =
            create_invoice(&db, None, customer_id, &[line(product_id, 12, 2.5)], 0.0, 0.0).unwrap();
        assert_eq!(stock_of(&db, product_id), 88);
        delete_invoice(&db, Some("admin"), invoice_id).unwrap();
        assert_eq!(stock_of(&db, product_id), 100);
        assert!(invoice_by_id(&db, invoice_id).unwrap().is_none());
        let conn = db.connect().unwrap();
        let items: i64 = conn
            .query_row("SELECT COUNT(*) FROM invoice_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(items, 0);
    }

    #[test]
    fn delete_missing_invoice_is_not_found() {
        let (_dir, db) = test_db();
        seed(&db, 100);
        let err = delete_invoice(&db, None, 42).unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                entity: "invoice",
                id: 42
            }
        ));
    }

    #[test]
    fn unknown_customer_is_not_found_before_any_write() {
        let (_dir, db) = test_db();
        let (_customer_id, product_id) = seed(&db, 100);
        let err =
            create_invoice(&db, None, 777, &[line(product_id, 1, 2.5)], 0.0, 0.0).unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                entity: "customer",
                id: 777
            }
        ));
        assert_eq!(stock_of(&db, product_id), 100);
    }

    #[test]
    fn ledger_writes_audit_rows_with_actor() {
        let (_dir, db) = test_db();
        let (customer_id, product_id) = seed(&db, 100);
        create_invoice(&db, Some("admin"), customer_id, &[line(product_id, 1, 2.5)], 0.0, 0.0)
            .unwrap();
        let entries = crate::activity::recent(&db, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].username, "admin");
        assert_eq!(entries[0].action_type, "invoice.create");
    }

    #[test]
    fn empty_line_list_rejected_before_store_access() {
        let (_dir, db) = test_db();
        let (customer_id, _product_id) = seed(&db, 100);
        let err = create_invoice(&db, None, customer_id, &[], 0.0, 0.0).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
