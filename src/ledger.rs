use crate::allocation::Assignment;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

/// What has already been sent toward one domain. Read-only input to the
/// allocation engine; grows append-only as assignments are confirmed.
#[derive(Debug, Default, Clone)]
pub struct DomainHistory {
    pub used_variant_ids: HashSet<String>,
    pub used_personas: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryUsage {
    pub category: String,
    pub day: NaiveDate,
    pub domains_found: u32,
    pub domains_new: u32,
}

/// Persisted outcome of one domain scan, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub domain: String,
    pub category: String,
    pub technologies: Vec<String>,
    pub main_technology: Option<String>,
    pub portal_ids: Vec<String>,
    pub emails: Vec<String>,
    pub error: Option<String>,
}

/// The single source of truth shared across runs. Check-and-mark and
/// quota check-and-increment are atomic at the store, never read-then-write
/// in process.
pub trait Ledger: Send + Sync {
    /// Conditionally record a domain as seen. Returns false when some run
    /// (this one or a concurrent one) already claimed it.
    fn mark_seen(&self, domain: &str, category: &str) -> Result<bool>;

    fn domain_seen(&self, domain: &str) -> Result<bool>;

    fn domain_history(&self, domain: &str) -> Result<DomainHistory>;

    /// Record a confirmed send: appends to the domain history and marks the
    /// lead emailed. Only called after the transport reports success.
    fn record_assignment(&self, domain: &str, assignment: &Assignment) -> Result<()>;

    fn inbox_sent_today(&self, inbox: &str) -> Result<u32>;

    /// Conditional increment against the per-inbox daily counter. Returns
    /// false when the inbox is at cap; the losing writer of a race sees
    /// false, not a double-spent slot.
    fn try_increment_inbox(&self, inbox: &str, cap: u32) -> Result<bool>;

    /// Usage rows from the last `lookback_days` days, inclusive of today.
    fn category_usage(&self, lookback_days: u32) -> Result<Vec<CategoryUsage>>;

    fn record_category_usage(&self, category: &str, found: u32, new: u32) -> Result<()>;

    fn record_scan(&self, record: &ScanRecord) -> Result<()>;
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub domains_seen: u64,
    pub scans: u64,
    pub assignments: u64,
    pub sends_today: u64,
}

/// SQLite-backed ledger. Uniqueness and conditional updates enforce the
/// atomicity contracts.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create ledger directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open ledger database: {db_path}"))?;
        Self::init_schema(&conn)?;
        Ok(SqliteLedger {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(SqliteLedger {
            conn: Mutex::new(conn),
        })
    }

    /// Operator-facing counters for the stats command.
    pub fn stats(&self) -> Result<LedgerStats> {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str| -> Result<u64> {
            Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };
        let sends_today: u64 = conn
            .query_row(
                "SELECT COALESCE(SUM(sent_count), 0) FROM inbox_counters WHERE day = ?",
                params![today().to_string()],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)?;
        Ok(LedgerStats {
            domains_seen: count("SELECT COUNT(*) FROM domains_seen")?,
            scans: count("SELECT COUNT(*) FROM scans")?,
            assignments: count("SELECT COUNT(*) FROM assignments")?,
            sends_today,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS domains_seen (
                domain TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                seen_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                category TEXT NOT NULL,
                technologies TEXT NOT NULL,
                main_technology TEXT,
                portal_ids TEXT NOT NULL,
                emails TEXT NOT NULL,
                error TEXT,
                scanned_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS assignments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                persona_id TEXT NOT NULL,
                inbox_email TEXT NOT NULL,
                variant_id TEXT NOT NULL,
                main_tech TEXT NOT NULL,
                subject TEXT NOT NULL,
                assigned_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS inbox_counters (
                inbox TEXT NOT NULL,
                day TEXT NOT NULL,
                sent_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (inbox, day)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS category_usage (
                category TEXT NOT NULL,
                day TEXT NOT NULL,
                domains_found INTEGER NOT NULL DEFAULT 0,
                domains_new INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (category, day)
            )",
            [],
        )?;

        Ok(())
    }
}

impl Ledger for SqliteLedger {
    fn mark_seen(&self, domain: &str, category: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO domains_seen (domain, category, seen_at) VALUES (?, ?, ?)",
            params![domain, category, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }

    fn domain_seen(&self, domain: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM domains_seen WHERE domain = ?",
            params![domain],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn domain_history(&self, domain: &str) -> Result<DomainHistory> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT variant_id, persona_id FROM assignments WHERE domain = ?")?;
        let mut history = DomainHistory::default();
        let rows = stmt.query_map(params![domain], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (variant_id, persona_id) = row?;
            history.used_variant_ids.insert(variant_id);
            history.used_personas.insert(persona_id);
        }
        Ok(history)
    }

    fn record_assignment(&self, domain: &str, assignment: &Assignment) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO assignments
                 (domain, persona_id, inbox_email, variant_id, main_tech, subject, assigned_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                domain,
                assignment.persona_id,
                assignment.inbox_email,
                assignment.variant_id,
                assignment.main_tech,
                assignment.subject,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn inbox_sent_today(&self, inbox: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: Option<u32> = conn
            .query_row(
                "SELECT sent_count FROM inbox_counters WHERE inbox = ? AND day = ?",
                params![inbox, today().to_string()],
                |row| row.get(0),
            )
            .ok();
        Ok(count.unwrap_or(0))
    }

    fn try_increment_inbox(&self, inbox: &str, cap: u32) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let day = today().to_string();
        conn.execute(
            "INSERT OR IGNORE INTO inbox_counters (inbox, day, sent_count) VALUES (?, ?, 0)",
            params![inbox, day],
        )?;
        // Single conditional update: two racing writers cannot both take the
        // last slot under the cap.
        let updated = conn.execute(
            "UPDATE inbox_counters SET sent_count = sent_count + 1
             WHERE inbox = ? AND day = ? AND sent_count < ?",
            params![inbox, day, cap],
        )?;
        Ok(updated == 1)
    }

    fn category_usage(&self, lookback_days: u32) -> Result<Vec<CategoryUsage>> {
        let conn = self.conn.lock().unwrap();
        let cutoff = today() - Duration::days(lookback_days as i64);
        let mut stmt = conn.prepare(
            "SELECT category, day, domains_found, domains_new
             FROM category_usage WHERE day > ? ORDER BY day DESC",
        )?;
        let rows = stmt.query_map(params![cutoff.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
            ))
        })?;
        let mut usage = Vec::new();
        for row in rows {
            let (category, day, domains_found, domains_new) = row?;
            let day = day
                .parse::<NaiveDate>()
                .with_context(|| format!("Bad day value in category_usage: {day}"))?;
            usage.push(CategoryUsage {
                category,
                day,
                domains_found,
                domains_new,
            });
        }
        Ok(usage)
    }

    fn record_category_usage(&self, category: &str, found: u32, new: u32) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO category_usage (category, day, domains_found, domains_new)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(category, day) DO UPDATE SET
                 domains_found = domains_found + excluded.domains_found,
                 domains_new = domains_new + excluded.domains_new",
            params![category, today().to_string(), found, new],
        )?;
        Ok(())
    }

    fn record_scan(&self, record: &ScanRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scans
                 (domain, category, technologies, main_technology, portal_ids, emails, error, scanned_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.domain,
                record.category,
                serde_json::to_string(&record.technologies)?,
                record.main_technology,
                serde_json::to_string(&record.portal_ids)?,
                serde_json::to_string(&record.emails)?,
                record.error,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    domains_seen: HashSet<String>,
    histories: HashMap<String, DomainHistory>,
    inbox_counts: HashMap<(String, NaiveDate), u32>,
    usage: Vec<CategoryUsage>,
    scans: Vec<ScanRecord>,
}

/// In-memory ledger for tests and dry runs. Same contracts, no durability.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan_count(&self) -> usize {
        self.state.lock().unwrap().scans.len()
    }
}

impl Ledger for MemoryLedger {
    fn mark_seen(&self, domain: &str, _category: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        Ok(state.domains_seen.insert(domain.to_string()))
    }

    fn domain_seen(&self, domain: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().domains_seen.contains(domain))
    }

    fn domain_history(&self, domain: &str) -> Result<DomainHistory> {
        let state = self.state.lock().unwrap();
        Ok(state.histories.get(domain).cloned().unwrap_or_default())
    }

    fn record_assignment(&self, domain: &str, assignment: &Assignment) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let history = state.histories.entry(domain.to_string()).or_default();
        history
            .used_variant_ids
            .insert(assignment.variant_id.clone());
        history.used_personas.insert(assignment.persona_id.clone());
        Ok(())
    }

    fn inbox_sent_today(&self, inbox: &str) -> Result<u32> {
        let state = self.state.lock().unwrap();
        Ok(*state
            .inbox_counts
            .get(&(inbox.to_string(), today()))
            .unwrap_or(&0))
    }

    fn try_increment_inbox(&self, inbox: &str, cap: u32) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let count = state
            .inbox_counts
            .entry((inbox.to_string(), today()))
            .or_insert(0);
        if *count >= cap {
            return Ok(false);
        }
        *count += 1;
        Ok(true)
    }

    fn category_usage(&self, lookback_days: u32) -> Result<Vec<CategoryUsage>> {
        let cutoff = today() - Duration::days(lookback_days as i64);
        let state = self.state.lock().unwrap();
        Ok(state
            .usage
            .iter()
            .filter(|u| u.day > cutoff)
            .cloned()
            .collect())
    }

    fn record_category_usage(&self, category: &str, found: u32, new: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let day = today();
        match state
            .usage
            .iter()
            .position(|u| u.category == category && u.day == day)
        {
            Some(idx) => {
                state.usage[idx].domains_found += found;
                state.usage[idx].domains_new += new;
            }
            None => state.usage.push(CategoryUsage {
                category: category.to_string(),
                day,
                domains_found: found,
                domains_new: new,
            }),
        }
        Ok(())
    }

    fn record_scan(&self, record: &ScanRecord) -> Result<()> {
        self.state.lock().unwrap().scans.push(record.clone());
        Ok(())
    }
}
