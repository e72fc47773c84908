use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub product_id: i64,
    pub name: String,
    pub price: f64,
    pub stock_quantity: i64,
}

fn validate(name: &str, price: f64, stock_quantity: i64) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("product name is required".into()));
    }
    if price < 0.0 {
        return Err(Error::Validation("price must be 0 or greater".into()));
    }
    if stock_quantity < 0 {
        return Err(Error::Validation("stock quantity must be 0 or greater".into()));
    }
    Ok(())
}

pub fn add_product(db: &Database, name: &str, price: f64, stock_quantity: i64) -> Result<i64> {
    validate(name, price, stock_quantity)?;
    let conn = db.connect()?;
    conn.execute(
        "INSERT INTO products (name, price, stock_quantity) VALUES (?, ?, ?)",
        params![name.trim(), price, stock_quantity],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_product(
    db: &Database,
    product_id: i64,
    name: &str,
    price: f64,
    stock_quantity: i64,
) -> Result<()> {
    validate(name, price, stock_quantity)?;
    let conn = db.connect()?;
    let changed = conn.execute(
        "UPDATE products SET name = ?, price = ?, stock_quantity = ? WHERE product_id = ?",
        params![name.trim(), price, stock_quantity, product_id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound {
            entity: "product",
            id: product_id,
        });
    }
    Ok(())
}

/// Fails with [`Error::Integrity`] while any invoice line still references
/// the product.
pub fn delete_product(db: &Database, product_id: i64) -> Result<()> {
    let conn = db.connect()?;
    let changed = conn.execute(
        "DELETE FROM products WHERE product_id = ?",
        params![product_id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound {
            entity: "product",
            id: product_id,
        });
    }
    Ok(())
}

pub fn all_products(db: &Database) -> Result<Vec<Product>> {
    let conn = db.connect()?;
    let mut stmt = conn.prepare(
        "SELECT product_id, name, price, stock_quantity
         FROM products
         ORDER BY name COLLATE NOCASE",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Product {
            product_id: row.get(0)?,
            name: row.get(1)?,
            price: row.get(2)?,
            stock_quantity: row.get(3)?,
        })
    })?;

    let mut products = Vec::new();
    for row in rows {
        products.push(row?);
    }
    Ok(products)
}

pub fn product_by_id(db: &Database, product_id: i64) -> Result<Option<Product>> {
    let conn = db.connect()?;
    let product = conn
        .query_row(
            "SELECT product_id, name, price, stock_quantity FROM products WHERE product_id = ?",
            params![product_id],
            |row| {
                Ok(Product {
                    product_id: row.get(0)?,
                    name: row.get(1)?,
                    price: row.get(2)?,
                    stock_quantity: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(product)
}

/// Overwrite a product's stock level outside of invoicing (stocktake
/// corrections). Invoice-driven adjustments go through the ledger.
pub fn set_stock(db: &Database, product_id: i64, new_quantity: i64) -> Result<()> {
    if new_quantity < 0 {
        return Err(Error::Validation("stock quantity must be 0 or greater".into()));
    }
    let conn = db.connect()?;
    let changed = conn.execute(
        "UPDATE products SET stock_quantity = ? WHERE product_id = ?",
        params![new_quantity, product_id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound {
            entity: "product",
            id: product_id,
        });
    }
    Ok(())
}

pub fn products_below_stock(db: &Database, threshold: i64) -> Result<Vec<Product>> {
    let conn = db.connect()?;
    let mut stmt = conn.prepare(
        "SELECT product_id, name, price, stock_quantity
         FROM products
         WHERE stock_quantity <= ?
         ORDER BY name COLLATE NOCASE",
    )?;
    let rows = stmt.query_map(params![threshold], |row| {
        Ok(Product {
            product_id: row.get(0)?,
            name: row.get(1)?,
            price: row.get(2)?,
            stock_quantity: row.get(3)?,
        })
    })?;

    let mut products = Vec::new();
    for row in rows {
        products.push(row?);
    }
    Ok(products)
}
