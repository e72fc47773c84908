//! Sales report queries and reporting period windows.
//!
//! Period bounds are returned as ISO dates with an exclusive end so they can
//! be used directly in SQL: `invoice_date >= start AND invoice_date < end`.
//! Weeks start on Monday (ISO-8601); "last N days" windows include today.

use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use rusqlite::params;
use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    WeekToDate,
    ThisMonth,
    LastMonth,
    MonthToDate,
    ThisQuarter,
    LastQuarter,
    QuarterToDate,
    ThisYear,
    LastYear,
    YearToDate,
    Last7Days,
    Last30Days,
    Last90Days,
}

impl FromStr for Period {
    type Err = Error;

    /// Accepts UI labels as well as keywords: "This Month", "last-7-days"
    /// and "last_7_days" all parse to the same period.
    fn from_str(s: &str) -> Result<Self> {
        let mut normalized = s
            .trim()
            .to_lowercase()
            .replace(['-', ' '], "_");
        while normalized.contains("__") {
            normalized = normalized.replace("__", "_");
        }
        match normalized.as_str() {
            "today" => Ok(Period::Today),
            "yesterday" => Ok(Period::Yesterday),
            "this_week" => Ok(Period::ThisWeek),
            "last_week" => Ok(Period::LastWeek),
            "week_to_date" => Ok(Period::WeekToDate),
            "this_month" => Ok(Period::ThisMonth),
            "last_month" => Ok(Period::LastMonth),
            "month_to_date" => Ok(Period::MonthToDate),
            "this_quarter" => Ok(Period::ThisQuarter),
            "last_quarter" => Ok(Period::LastQuarter),
            "quarter_to_date" => Ok(Period::QuarterToDate),
            "this_year" => Ok(Period::ThisYear),
            "last_year" => Ok(Period::LastYear),
            "year_to_date" => Ok(Period::YearToDate),
            "last_7_days" => Ok(Period::Last7Days),
            "last_30_days" => Ok(Period::Last30Days),
            "last_90_days" => Ok(Period::Last90Days),
            other => Err(Error::Validation(format!("unknown report period: {other}"))),
        }
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid calendar date")
}

fn start_of_week(d: NaiveDate) -> NaiveDate {
    d - Days::new(d.weekday().num_days_from_monday() as u64)
}

fn start_of_month(d: NaiveDate) -> NaiveDate {
    ymd(d.year(), d.month(), 1)
}

fn start_of_next_month(d: NaiveDate) -> NaiveDate {
    if d.month() == 12 {
        ymd(d.year() + 1, 1, 1)
    } else {
        ymd(d.year(), d.month() + 1, 1)
    }
}

fn start_of_quarter(d: NaiveDate) -> NaiveDate {
    let quarter_start_month = 3 * ((d.month() - 1) / 3) + 1;
    ymd(d.year(), quarter_start_month, 1)
}

fn start_of_next_quarter(d: NaiveDate) -> NaiveDate {
    let q = start_of_quarter(d);
    let month = q.month() + 3;
    if month > 12 {
        ymd(q.year() + 1, month - 12, 1)
    } else {
        ymd(q.year(), month, 1)
    }
}

fn start_of_year(d: NaiveDate) -> NaiveDate {
    ymd(d.year(), 1, 1)
}

/// `(start, end_exclusive)` ISO dates for the period anchored at `today`.
pub fn period_bounds(today: NaiveDate, period: Period) -> (String, String) {
    let day = Days::new(1);
    let (start, end) = match period {
        Period::Today => (today, today + day),
        Period::Yesterday => (today - day, today),
        Period::ThisWeek => {
            let start = start_of_week(today);
            (start, start + Days::new(7))
        }
        Period::LastWeek => {
            let this_week = start_of_week(today);
            (this_week - Days::new(7), this_week)
        }
        Period::WeekToDate => (start_of_week(today), today + day),
        Period::ThisMonth => (start_of_month(today), start_of_next_month(today)),
        Period::LastMonth => {
            let this_month = start_of_month(today);
            (start_of_month(this_month - day), this_month)
        }
        Period::MonthToDate => (start_of_month(today), today + day),
        Period::ThisQuarter => (start_of_quarter(today), start_of_next_quarter(today)),
        Period::LastQuarter => {
            let this_quarter = start_of_quarter(today);
            (start_of_quarter(this_quarter - day), this_quarter)
        }
        Period::QuarterToDate => (start_of_quarter(today), today + day),
        Period::ThisYear => (start_of_year(today), ymd(today.year() + 1, 1, 1)),
        Period::LastYear => (ymd(today.year() - 1, 1, 1), start_of_year(today)),
        Period::YearToDate => (start_of_year(today), today + day),
        Period::Last7Days => (today - Days::new(6), today + day),
        Period::Last30Days => (today - Days::new(29), today + day),
        Period::Last90Days => (today - Days::new(89), today + day),
    };
    (
        start.format("%Y-%m-%d").to_string(),
        end.format("%Y-%m-%d").to_string(),
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleRow {
    pub invoice_date: String,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueBucket {
    pub period: String,
    pub total: f64,
}

/// Invoice totals between `start` (inclusive) and `end` (exclusive), in
/// chronological order. Stored timestamps sort lexicographically, so plain
/// ISO dates work as bounds.
pub fn sales_between(db: &Database, start: &str, end: &str) -> Result<Vec<SaleRow>> {
    let conn = db.connect()?;
    let mut stmt = conn.prepare(
        "SELECT invoice_date, total_amount
         FROM invoices
         WHERE invoice_date >= ?1 AND invoice_date < ?2
         ORDER BY invoice_date",
    )?;
    let rows = stmt.query_map(params![start, end], |row| {
        Ok(SaleRow {
            invoice_date: row.get(0)?,
            total_amount: row.get(1)?,
        })
    })?;

    let mut sales = Vec::new();
    for row in rows {
        sales.push(row?);
    }
    Ok(sales)
}

pub fn revenue_by_month(db: &Database) -> Result<Vec<RevenueBucket>> {
    revenue_grouped(db, "%Y-%m")
}

pub fn revenue_by_year(db: &Database) -> Result<Vec<RevenueBucket>> {
    revenue_grouped(db, "%Y")
}

fn revenue_grouped(db: &Database, format: &str) -> Result<Vec<RevenueBucket>> {
    let conn = db.connect()?;
    let mut stmt = conn.prepare(
        "SELECT strftime(?1, invoice_date) AS period, SUM(total_amount) AS total
         FROM invoices
         GROUP BY period
         ORDER BY period",
    )?;
    let rows = stmt.query_map(params![format], |row| {
        Ok(RevenueBucket {
            period: row.get(0)?,
            total: row.get(1)?,
        })
    })?;

    let mut buckets = Vec::new();
    for row in rows {
        buckets.push(row?);
    }
    Ok(buckets)
}
