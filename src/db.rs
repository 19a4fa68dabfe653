use anyhow::Context;
use rusqlite::types::Value;
use rusqlite::{
    params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{
    coerce_amount, Class, Discount, DiscountCategory, FeeStructure, Payment, ScoreRecord,
    ScoreRow, Student,
};
use crate::promotion::{CommitCounts, CommitPlan, PromotionStore};
use crate::settings::{Settings, SETTINGS_KEY};

pub const DB_FILE: &str = "termledger.sqlite3";

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    // Workspaces created before classes carried a promotion order.
    ensure_classes_sort_order(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_sort ON classes(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL DEFAULT '',
            first_name TEXT NOT NULL DEFAULT '',
            admission_no TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_structures(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            amount REAL,
            class_id TEXT,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            is_optional INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_structures_period ON fee_structures(session, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_optional_fees(
            student_id TEXT NOT NULL,
            fee_id TEXT NOT NULL,
            PRIMARY KEY(student_id, fee_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(fee_id) REFERENCES fee_structures(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS discounts(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            amount REAL,
            reason TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_discounts_student ON discounts(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            amount REAL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            paid_at TEXT,
            reference TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student_period ON payments(student_id, session, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            average REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(student_id, session, term)
        )",
        [],
    )?;
    ensure_score_records_promoted_to(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_records_period ON score_records(session, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_rows(
            record_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            subject TEXT NOT NULL,
            total REAL,
            PRIMARY KEY(record_id, idx),
            FOREIGN KEY(record_id) REFERENCES score_records(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS promotion_log(
            proposal_id TEXT PRIMARY KEY,
            source_class_id TEXT NOT NULL,
            next_class_id TEXT NOT NULL,
            session TEXT NOT NULL,
            threshold REAL NOT NULL,
            students_moved INTEGER NOT NULL,
            students_retained INTEGER NOT NULL,
            records_annotated INTEGER NOT NULL,
            committed_at TEXT NOT NULL
        )",
        [],
    )?;

    tracing::info!(path = %db_path.to_string_lossy(), "workspace database ready");
    Ok(conn)
}

fn ensure_classes_sort_order(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "sort_order")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE classes ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0",
        [],
    )?;

    // Best-effort backfill: name order is what the class list used to show.
    let mut stmt = conn.prepare("SELECT id FROM classes ORDER BY name, rowid")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for (i, id) in ids.iter().enumerate() {
        conn.execute(
            "UPDATE classes SET sort_order = ? WHERE id = ?",
            (i as i64, id),
        )?;
    }
    Ok(())
}

fn ensure_score_records_promoted_to(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "score_records", "promoted_to")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE score_records ADD COLUMN promoted_to TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s)
                .with_context(|| format!("settings {} is not valid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Stored academic settings, or the unconfigured default.
pub fn load_settings(conn: &Connection) -> anyhow::Result<Settings> {
    match settings_get_json(conn, SETTINGS_KEY)? {
        Some(v) => serde_json::from_value(v).context("stored academic settings are malformed"),
        None => Ok(Settings::default()),
    }
}

pub fn save_settings(conn: &Connection, settings: &Settings) -> anyhow::Result<()> {
    settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(settings)?)
}

/// Money and score columns may hold NULL or stray text; both read as 0.
fn amount_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<f64> {
    let v: Value = row.get(idx)?;
    Ok(match v {
        Value::Real(f) => coerce_amount(f),
        Value::Integer(i) => i as f64,
        Value::Text(s) => s.trim().parse::<f64>().map(coerce_amount).unwrap_or(0.0),
        Value::Null | Value::Blob(_) => 0.0,
    })
}

pub fn load_classes(conn: &Connection) -> anyhow::Result<Vec<Class>> {
    let mut stmt =
        conn.prepare("SELECT id, name, sort_order FROM classes ORDER BY sort_order, rowid")?;
    let classes = stmt
        .query_map([], |r| {
            Ok(Class {
                id: r.get(0)?,
                name: r.get(1)?,
                sort_order: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(classes)
}

pub fn class_exists(conn: &Connection, class_id: &str) -> anyhow::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn insert_class(
    conn: &Connection,
    name: &str,
    sort_order: Option<i64>,
) -> anyhow::Result<Class> {
    let sort_order = match sort_order {
        Some(v) => v,
        None => conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM classes",
            [],
            |r| r.get(0),
        )?,
    };
    let class = Class {
        id: new_id(),
        name: name.to_string(),
        sort_order,
    };
    conn.execute(
        "INSERT INTO classes(id, name, sort_order) VALUES(?, ?, ?)",
        (&class.id, &class.name, class.sort_order),
    )?;
    Ok(class)
}

/// Rewrites the promotion order. `ordered_ids` must name every class once.
pub fn reorder_classes(conn: &Connection, ordered_ids: &[String]) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for (i, id) in ordered_ids.iter().enumerate() {
        tx.execute(
            "UPDATE classes SET sort_order = ? WHERE id = ?",
            (i as i64, id),
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn load_discounts_by_student(
    conn: &Connection,
    class_id: Option<&str>,
) -> anyhow::Result<HashMap<String, Vec<Discount>>> {
    let mut sql = String::from(
        "SELECT d.id, d.student_id, d.amount, d.reason, d.category, d.session, d.term
         FROM discounts d",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(cid) = class_id {
        sql.push_str(" JOIN students s ON s.id = d.student_id WHERE s.class_id = ?");
        binds.push(Value::Text(cid.to_string()));
    }
    sql.push_str(" ORDER BY d.rowid");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(binds), |r| {
        let category: String = r.get(4)?;
        Ok((
            r.get::<_, String>(1)?,
            category,
            Discount {
                id: r.get(0)?,
                amount: amount_col(r, 2)?,
                reason: r.get(3)?,
                category: DiscountCategory::Discount,
                session: r.get(5)?,
                term: r.get(6)?,
            },
        ))
    })?;

    let mut out: HashMap<String, Vec<Discount>> = HashMap::new();
    for row in rows {
        let (student_id, category, mut d) = row?;
        let Some(cat) = DiscountCategory::parse(&category) else {
            tracing::warn!(
                discount_id = %d.id,
                category = %category,
                "skipping discount with unknown category"
            );
            continue;
        };
        d.category = cat;
        out.entry(student_id).or_default().push(d);
    }
    Ok(out)
}

fn load_assigned_fees_by_student(
    conn: &Connection,
    class_id: Option<&str>,
) -> anyhow::Result<HashMap<String, BTreeSet<String>>> {
    let mut sql = String::from("SELECT f.student_id, f.fee_id FROM student_optional_fees f");
    let mut binds: Vec<Value> = Vec::new();
    if let Some(cid) = class_id {
        sql.push_str(" JOIN students s ON s.id = f.student_id WHERE s.class_id = ?");
        binds.push(Value::Text(cid.to_string()));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(binds), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;
    let mut out: HashMap<String, BTreeSet<String>> = HashMap::new();
    for row in rows {
        let (student_id, fee_id) = row?;
        out.entry(student_id).or_default().insert(fee_id);
    }
    Ok(out)
}

/// Students in roster order (`sort_order`, then insertion order). This order
/// is the tie-break for rankings.
pub fn load_students(conn: &Connection, class_id: Option<&str>) -> anyhow::Result<Vec<Student>> {
    let mut sql = String::from(
        "SELECT id, class_id, first_name, last_name, admission_no, sort_order FROM students",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(cid) = class_id {
        sql.push_str(" WHERE class_id = ?");
        binds.push(Value::Text(cid.to_string()));
    }
    sql.push_str(" ORDER BY sort_order, rowid");

    let mut stmt = conn.prepare(&sql)?;
    let mut students = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(Student {
                id: r.get(0)?,
                class_id: r.get(1)?,
                first_name: r.get(2)?,
                last_name: r.get(3)?,
                admission_no: r.get(4)?,
                sort_order: r.get(5)?,
                assigned_fees: BTreeSet::new(),
                discounts: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut discounts = load_discounts_by_student(conn, class_id)?;
    let mut assigned = load_assigned_fees_by_student(conn, class_id)?;
    for s in &mut students {
        s.discounts = discounts.remove(&s.id).unwrap_or_default();
        s.assigned_fees = assigned.remove(&s.id).unwrap_or_default();
    }
    Ok(students)
}

pub fn load_student(conn: &Connection, student_id: &str) -> anyhow::Result<Option<Student>> {
    let class_id: Option<String> = conn
        .query_row("SELECT class_id FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(class_id) = class_id else {
        return Ok(None);
    };
    Ok(load_students(conn, Some(&class_id))?
        .into_iter()
        .find(|s| s.id == student_id))
}

pub struct NewStudent<'a> {
    pub class_id: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub admission_no: Option<&'a str>,
}

pub fn insert_student(conn: &Connection, s: &NewStudent<'_>) -> anyhow::Result<Student> {
    let sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
        [s.class_id],
        |r| r.get(0),
    )?;
    let student = Student {
        id: new_id(),
        class_id: s.class_id.to_string(),
        first_name: s.first_name.to_string(),
        last_name: s.last_name.to_string(),
        admission_no: s.admission_no.map(str::to_string),
        sort_order,
        assigned_fees: BTreeSet::new(),
        discounts: Vec::new(),
    };
    conn.execute(
        "INSERT INTO students(id, class_id, first_name, last_name, admission_no, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student.id,
            &student.class_id,
            &student.first_name,
            &student.last_name,
            &student.admission_no,
            student.sort_order,
            now_rfc3339(),
        ),
    )?;
    Ok(student)
}

/// Replaces the student's opted-in optional fee set.
pub fn set_assigned_fees(
    conn: &Connection,
    student_id: &str,
    fee_ids: &BTreeSet<String>,
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM student_optional_fees WHERE student_id = ?",
        [student_id],
    )?;
    for fee_id in fee_ids {
        tx.execute(
            "INSERT INTO student_optional_fees(student_id, fee_id) VALUES(?, ?)",
            (student_id, fee_id),
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn insert_discount(conn: &Connection, student_id: &str, d: &Discount) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO discounts(id, student_id, amount, reason, category, session, term, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &d.id,
            student_id,
            d.amount,
            &d.reason,
            d.category.as_str(),
            &d.session,
            &d.term,
            now_rfc3339(),
        ),
    )?;
    Ok(())
}

pub fn insert_fee(conn: &Connection, f: &FeeStructure) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO fee_structures(id, name, amount, class_id, session, term, is_optional)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &f.id,
            &f.name,
            f.amount,
            &f.class_id,
            &f.session,
            &f.term,
            f.is_optional as i64,
        ),
    )?;
    Ok(())
}

pub fn load_fees(
    conn: &Connection,
    session: &str,
    term: &str,
) -> anyhow::Result<Vec<FeeStructure>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, amount, class_id, session, term, is_optional
         FROM fee_structures
         WHERE session = ? AND term = ?
         ORDER BY rowid",
    )?;
    let fees = stmt
        .query_map((session, term), |r| {
            Ok(FeeStructure {
                id: r.get(0)?,
                name: r.get(1)?,
                amount: amount_col(r, 2)?,
                class_id: r.get(3)?,
                session: r.get(4)?,
                term: r.get(5)?,
                is_optional: r.get::<_, i64>(6)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(fees)
}

pub fn fee_exists(conn: &Connection, fee_id: &str) -> anyhow::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM fee_structures WHERE id = ?", [fee_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

pub fn insert_payment(conn: &Connection, p: &Payment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO payments(id, student_id, amount, session, term, paid_at, reference)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &p.id,
            &p.student_id,
            p.amount,
            &p.session,
            &p.term,
            &p.paid_at,
            &p.reference,
        ),
    )?;
    Ok(())
}

pub fn load_payments(
    conn: &Connection,
    student_id: Option<&str>,
    session: &str,
    term: &str,
) -> anyhow::Result<Vec<Payment>> {
    let mut sql = String::from(
        "SELECT id, student_id, amount, session, term, paid_at, reference
         FROM payments
         WHERE session = ? AND term = ?",
    );
    let mut binds = vec![
        Value::Text(session.to_string()),
        Value::Text(term.to_string()),
    ];
    if let Some(sid) = student_id {
        sql.push_str(" AND student_id = ?");
        binds.push(Value::Text(sid.to_string()));
    }
    sql.push_str(" ORDER BY rowid");

    let mut stmt = conn.prepare(&sql)?;
    let payments = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(Payment {
                id: r.get(0)?,
                student_id: r.get(1)?,
                amount: amount_col(r, 2)?,
                session: r.get(3)?,
                term: r.get(4)?,
                paid_at: r.get(5)?,
                reference: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(payments)
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter<'a> {
    pub student_id: Option<&'a str>,
    pub session: Option<&'a str>,
    pub term: Option<&'a str>,
}

pub fn load_score_records(
    conn: &Connection,
    filter: &RecordFilter<'_>,
) -> anyhow::Result<Vec<ScoreRecord>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(v) = filter.student_id {
        clauses.push("student_id = ?");
        binds.push(Value::Text(v.to_string()));
    }
    if let Some(v) = filter.session {
        clauses.push("session = ?");
        binds.push(Value::Text(v.to_string()));
    }
    if let Some(v) = filter.term {
        clauses.push("term = ?");
        binds.push(Value::Text(v.to_string()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT id, student_id, class_id, session, term, average, promoted_to
         FROM score_records{}
         ORDER BY rowid",
        where_sql
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut records = stmt
        .query_map(params_from_iter(binds.clone()), |r| {
            Ok(ScoreRecord {
                id: r.get(0)?,
                student_id: r.get(1)?,
                class_id: r.get(2)?,
                session: r.get(3)?,
                term: r.get(4)?,
                rows: Vec::new(),
                average: amount_col(r, 5)?,
                promoted_to: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if records.is_empty() {
        return Ok(records);
    }

    let rows_sql = format!(
        "SELECT record_id, subject, total
         FROM score_rows
         WHERE record_id IN (SELECT id FROM score_records{})
         ORDER BY record_id, idx",
        where_sql
    );
    let mut rows_stmt = conn.prepare(&rows_sql)?;
    let row_iter = rows_stmt.query_map(params_from_iter(binds), |r| {
        Ok((
            r.get::<_, String>(0)?,
            ScoreRow {
                subject: r.get(1)?,
                total: amount_col(r, 2)?,
            },
        ))
    })?;
    let mut by_record: HashMap<String, Vec<ScoreRow>> = HashMap::new();
    for row in row_iter {
        let (record_id, score_row) = row?;
        by_record.entry(record_id).or_default().push(score_row);
    }
    for rec in &mut records {
        rec.rows = by_record.remove(&rec.id).unwrap_or_default();
    }
    Ok(records)
}

/// Inserts or replaces the record for (student, session, term). The average
/// is always derived from the rows; `promoted_to` of an existing record is
/// preserved.
pub fn upsert_score_record(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
    session: &str,
    term: &str,
    rows: Vec<ScoreRow>,
) -> anyhow::Result<ScoreRecord> {
    let tx = conn.unchecked_transaction()?;
    let existing: Option<(String, Option<String>)> = tx
        .query_row(
            "SELECT id, promoted_to FROM score_records
             WHERE student_id = ? AND session = ? AND term = ?",
            (student_id, session, term),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let (id, promoted_to) = existing.unwrap_or_else(|| (new_id(), None));
    let mut rec = ScoreRecord::new(id, student_id, class_id, session, term, rows);
    rec.promoted_to = promoted_to;

    tx.execute(
        "INSERT INTO score_records(id, student_id, class_id, session, term, average, promoted_to, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           class_id = excluded.class_id,
           average = excluded.average,
           updated_at = excluded.updated_at",
        (
            &rec.id,
            &rec.student_id,
            &rec.class_id,
            &rec.session,
            &rec.term,
            rec.average,
            &rec.promoted_to,
            now_rfc3339(),
        ),
    )?;
    tx.execute("DELETE FROM score_rows WHERE record_id = ?", [&rec.id])?;
    for (i, row) in rec.rows.iter().enumerate() {
        tx.execute(
            "INSERT INTO score_rows(record_id, idx, subject, total) VALUES(?, ?, ?, ?)",
            (&rec.id, i as i64, &row.subject, row.total),
        )?;
    }
    tx.commit()?;
    Ok(rec)
}

pub fn promotion_committed(conn: &Connection, proposal_id: &str) -> anyhow::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM promotion_log WHERE proposal_id = ?",
            [proposal_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Applies promotion plans inside one IMMEDIATE transaction so the write lock
/// is held from the first roster check to the final commit.
pub struct SqlitePromotionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePromotionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn db_failure(e: rusqlite::Error) -> EngineError {
    EngineError::partial_commit(e.to_string(), None)
}

fn apply_plan_in_tx(tx: &Transaction<'_>, plan: &CommitPlan) -> Result<CommitCounts, EngineError> {
    let logged: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM promotion_log WHERE proposal_id = ?",
            [&plan.proposal_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_failure)?;
    if logged.is_some() {
        return Err(EngineError::AlreadyCommitted {
            proposal_id: plan.proposal_id.clone(),
        });
    }

    let now = now_rfc3339();
    let mut counts = CommitCounts::default();
    for d in &plan.decisions {
        let current: Option<String> = tx
            .query_row(
                "SELECT class_id FROM students WHERE id = ?",
                [&d.student_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_failure)?;
        let Some(current) = current else {
            return Err(EngineError::partial_commit(
                "student no longer exists",
                Some(&d.student_id),
            ));
        };
        if current != plan.source_class_id {
            return Err(EngineError::partial_commit(
                "student is no longer in the source class",
                Some(&d.student_id),
            ));
        }

        if current != d.target_class_id {
            tx.execute(
                "UPDATE students SET class_id = ?, updated_at = ? WHERE id = ? AND class_id = ?",
                (&d.target_class_id, &now, &d.student_id, &plan.source_class_id),
            )
            .map_err(db_failure)?;
            counts.students_moved += 1;
        } else {
            counts.students_retained += 1;
        }

        counts.records_annotated += tx
            .execute(
                "UPDATE score_records SET promoted_to = ?
                 WHERE student_id = ? AND session = ?
                   AND (promoted_to IS NULL OR promoted_to <> ?)",
                (
                    &d.target_class_id,
                    &d.student_id,
                    &plan.session,
                    &d.target_class_id,
                ),
            )
            .map_err(db_failure)?;
    }

    tx.execute(
        "INSERT INTO promotion_log(
            proposal_id, source_class_id, next_class_id, session, threshold,
            students_moved, students_retained, records_annotated, committed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &plan.proposal_id,
            &plan.source_class_id,
            &plan.next_class_id,
            &plan.session,
            plan.threshold,
            counts.students_moved as i64,
            counts.students_retained as i64,
            counts.records_annotated as i64,
            &now,
        ),
    )
    .map_err(db_failure)?;
    Ok(counts)
}

impl PromotionStore for SqlitePromotionStore<'_> {
    fn apply(&mut self, plan: &CommitPlan) -> Result<CommitCounts, EngineError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(db_failure)?;
        let outcome = apply_plan_in_tx(&tx, plan);
        match outcome {
            Ok(counts) => {
                tx.commit().map_err(db_failure)?;
                Ok(counts)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    tracing::error!(
                        proposal_id = %plan.proposal_id,
                        error = %rb,
                        "rollback failed"
                    );
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promotion::{self, Roster};
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    fn row(subject: &str, total: f64) -> ScoreRow {
        ScoreRow {
            subject: subject.to_string(),
            total,
        }
    }

    #[test]
    fn upsert_derives_average_and_keeps_one_record_per_term() {
        let conn = open_db(&temp_workspace("termledger-db-upsert")).expect("open");
        let jss1 = insert_class(&conn, "JSS1", None).expect("class");
        let s = insert_student(
            &conn,
            &NewStudent {
                class_id: &jss1.id,
                first_name: "Ada",
                last_name: "Obi",
                admission_no: None,
            },
        )
        .expect("student");

        let first = vec![row("Maths", 40.0)];
        upsert_score_record(&conn, &s.id, &jss1.id, "2024/2025", "First Term", first)
            .expect("first");
        let rec = upsert_score_record(
            &conn,
            &s.id,
            &jss1.id,
            "2024/2025",
            "First Term",
            vec![row("Maths", 80.0), row("Art", 0.0), row("English", 60.0)],
        )
        .expect("second");
        assert_eq!(rec.average, 70.0);

        let all = load_score_records(&conn, &RecordFilter::default()).expect("load");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].rows.len(), 3);
        assert_eq!(all[0].average, 70.0);
    }

    #[test]
    fn stray_text_amounts_read_as_zero() {
        let conn = open_db(&temp_workspace("termledger-db-amounts")).expect("open");
        conn.execute(
            "INSERT INTO fee_structures(id, name, amount, session, term, is_optional)
             VALUES('f1', 'broken', 'n/a', 'S', 'T', 0), ('f2', 'null', NULL, 'S', 'T', 0)",
            [],
        )
        .expect("insert");
        let fees = load_fees(&conn, "S", "T").expect("fees");
        assert_eq!(fees.len(), 2);
        assert!(fees.iter().all(|f| f.amount == 0.0));
    }

    #[test]
    fn sqlite_commit_is_atomic_on_stale_roster() {
        let conn = open_db(&temp_workspace("termledger-db-commit")).expect("open");
        let jss1 = insert_class(&conn, "JSS1", None).expect("jss1");
        let jss2 = insert_class(&conn, "JSS2", None).expect("jss2");
        let jss3 = insert_class(&conn, "JSS3", None).expect("jss3");
        let mut ids = Vec::new();
        for name in ["Ada", "Bayo"] {
            let s = insert_student(
                &conn,
                &NewStudent {
                    class_id: &jss1.id,
                    first_name: name,
                    last_name: "Test",
                    admission_no: None,
                },
            )
            .expect("student");
            let rows = vec![row("Maths", 90.0)];
            upsert_score_record(&conn, &s.id, &jss1.id, "2024/2025", "First Term", rows)
                .expect("record");
            ids.push(s.id);
        }

        let classes = load_classes(&conn).expect("classes");
        let students = load_students(&conn, None).expect("students");
        let records = load_score_records(&conn, &RecordFilter::default()).expect("records");
        let roster = Roster {
            classes: &classes,
            students: &students,
            records: &records,
            terms: &[],
        };
        let mut proposal =
            promotion::propose(&roster, &jss1.id, "2024/2025", 50.0).expect("propose");

        // Second student moved by someone else after the proposal was built.
        conn.execute(
            "UPDATE students SET class_id = ? WHERE id = ?",
            (&jss3.id, &ids[1]),
        )
        .expect("move");

        let mut store = SqlitePromotionStore::new(&conn);
        let e = promotion::commit(&mut proposal, &mut store).expect_err("stale");
        assert_eq!(e.code(), "partial_commit");

        let first_class: String = conn
            .query_row("SELECT class_id FROM students WHERE id = ?", [&ids[0]], |r| {
                r.get(0)
            })
            .expect("class");
        assert_eq!(first_class, jss1.id);
        let annotated: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM score_records WHERE promoted_to IS NOT NULL",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(annotated, 0);
        assert!(!promotion_committed(&conn, &proposal.id).expect("log"));
        assert_ne!(first_class, jss2.id);
    }
}
