use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub customer_id: i64,
    pub name: String,
    pub phone_number: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseRecord {
    pub invoice_id: i64,
    pub invoice_date: String,
    pub total_amount: f64,
}

/// Normalized phone: `None` when blank, otherwise exactly 10 ASCII digits.
fn normalize_phone(phone: &str) -> Result<Option<String>> {
    let phone = phone.trim();
    if phone.is_empty() {
        return Ok(None);
    }
    if phone.len() != 10 || !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation("phone number must be 10 digits".into()));
    }
    Ok(Some(phone.to_string()))
}

fn validate(name: &str, address: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("customer name is required".into()));
    }
    if address.trim().is_empty() {
        return Err(Error::Validation("address is required".into()));
    }
    Ok(())
}

fn exists_by_name_and_phone(
    db: &Database,
    name: &str,
    phone: Option<&str>,
    exclude_id: Option<i64>,
) -> Result<bool> {
    let conn = db.connect()?;
    let found = conn
        .query_row(
            "SELECT 1 FROM customers
             WHERE name = ?1 COLLATE NOCASE
               AND ((?2 IS NULL AND phone_number IS NULL) OR phone_number = ?2)
               AND (?3 IS NULL OR customer_id != ?3)
             LIMIT 1",
            params![name, phone, exclude_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn add_customer(db: &Database, name: &str, phone_number: &str, address: &str) -> Result<i64> {
    validate(name, address)?;
    let phone = normalize_phone(phone_number)?;
    let name = name.trim();
    if exists_by_name_and_phone(db, name, phone.as_deref(), None)? {
        return Err(Error::Integrity(
            "a customer with the same name and phone number already exists".into(),
        ));
    }
    let conn = db.connect()?;
    conn.execute(
        "INSERT INTO customers (name, phone_number, address) VALUES (?, ?, ?)",
        params![name, phone, address.trim()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_customer(
    db: &Database,
    customer_id: i64,
    name: &str,
    phone_number: &str,
    address: &str,
) -> Result<()> {
    validate(name, address)?;
    let phone = normalize_phone(phone_number)?;
    let name = name.trim();
    if exists_by_name_and_phone(db, name, phone.as_deref(), Some(customer_id))? {
        return Err(Error::Integrity(
            "a customer with the same name and phone number already exists".into(),
        ));
    }
    let conn = db.connect()?;
    let changed = conn.execute(
        "UPDATE customers SET name = ?, phone_number = ?, address = ? WHERE customer_id = ?",
        params![name, phone, address.trim(), customer_id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound {
            entity: "customer",
            id: customer_id,
        });
    }
    Ok(())
}

/// Fails with [`Error::Integrity`] while invoices still reference the
/// customer.
pub fn delete_customer(db: &Database, customer_id: i64) -> Result<()> {
    let conn = db.connect()?;
    let changed = conn.execute(
        "DELETE FROM customers WHERE customer_id = ?",
        params![customer_id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound {
            entity: "customer",
            id: customer_id,
        });
    }
    Ok(())
}

pub fn all_customers(db: &Database) -> Result<Vec<Customer>> {
    let conn = db.connect()?;
    let mut stmt = conn.prepare(
        "SELECT customer_id, name, phone_number, address
         FROM customers
         ORDER BY name COLLATE NOCASE",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Customer {
            customer_id: row.get(0)?,
            name: row.get(1)?,
            phone_number: row.get(2)?,
            address: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        })
    })?;

    let mut customers = Vec::new();
    for row in rows {
        customers.push(row?);
    }
    Ok(customers)
}

pub fn customer_by_id(db: &Database, customer_id: i64) -> Result<Option<Customer>> {
    let conn = db.connect()?;
    let customer = conn
        .query_row(
            "SELECT customer_id, name, phone_number, address FROM customers WHERE customer_id = ?",
            params![customer_id],
            |row| {
                Ok(Customer {
                    customer_id: row.get(0)?,
                    name: row.get(1)?,
                    phone_number: row.get(2)?,
                    address: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                })
            },
        )
        .optional()?;
    Ok(customer)
}

/// Invoice history for a customer, newest first.
pub fn purchase_history(db: &Database, customer_id: i64) -> Result<Vec<PurchaseRecord>> {
    let conn = db.connect()?;
    let mut stmt = conn.prepare(
        "SELECT invoice_id, invoice_date, total_amount
         FROM invoices
         WHERE customer_id = ?
         ORDER BY invoice_date DESC",
    )?;
    let rows = stmt.query_map(params![customer_id], |row| {
        Ok(PurchaseRecord {
            invoice_id: row.get(0)?,
            invoice_date: row.get(1)?,
            total_amount: row.get(2)?,
        })
    })?;

    let mut history = Vec::new();
    for row in rows {
        history.push(row?);
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;

    #[test]
    fn add_with_blank_phone_stores_null() {
        let (_dir, db) = test_db();
        let id = add_customer(&db, "Ama", "", "Market St").unwrap();
        let customer = customer_by_id(&db, id).unwrap().unwrap();
        assert_eq!(customer.phone_number, None);
    }

    #[test]
    fn bad_phone_rejected_before_insert() {
        let (_dir, db) = test_db();
        let err = add_customer(&db, "Ama", "12345", "Market St").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(all_customers(&db).unwrap().is_empty());
    }

    #[test]
    fn duplicate_name_phone_pair_rejected_case_insensitive() {
        let (_dir, db) = test_db();
        add_customer(&db, "Kofi", "0241234567", "Accra").unwrap();
        let err = add_customer(&db, "kofi", "0241234567", "Kumasi").unwrap_err();
        assert!(matches!(err, Error::Integrity(_)), "got {err:?}");
    }

    #[test]
    fn update_may_keep_own_name_phone_pair() {
        let (_dir, db) = test_db();
        let id = add_customer(&db, "Kofi", "0241234567", "Accra").unwrap();
        update_customer(&db, id, "Kofi", "0241234567", "Tema").unwrap();
        let customer = customer_by_id(&db, id).unwrap().unwrap();
        assert_eq!(customer.address, "Tema");
    }

    #[test]
    fn missing_required_fields_rejected() {
        let (_dir, db) = test_db();
        assert!(matches!(
            add_customer(&db, "", "0241234567", "Accra"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            add_customer(&db, "Kofi", "0241234567", "  "),
            Err(Error::Validation(_))
        ));
    }
}
