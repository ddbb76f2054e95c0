//! Database schema for the audit trail

/// SQL to create the audit tables
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    user_id TEXT,
    username TEXT,
    ip_address TEXT,
    user_agent TEXT,
    request_id TEXT,
    encrypted_message BLOB NOT NULL,
    encryption_iv BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_category ON audit_logs(category);
CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_logs_user_id ON audit_logs(user_id);
CREATE INDEX IF NOT EXISTS idx_audit_logs_category_timestamp ON audit_logs(category, timestamp);

CREATE TABLE IF NOT EXISTS audit_log_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    encryption_key BLOB NOT NULL,
    key_created_at TEXT,
    key_rotated_at TEXT,
    retention_days INTEGER DEFAULT 30,
    last_cleanup_at TEXT,
    total_logs_written INTEGER DEFAULT 0,
    total_logs_purged INTEGER DEFAULT 0,
    created_at TEXT,
    updated_at TEXT
);
"#;

pub const SELECT_CONFIG: &str = r#"
SELECT encryption_key, key_created_at, key_rotated_at, retention_days,
       last_cleanup_at, total_logs_written, total_logs_purged
FROM audit_log_config
WHERE id = 1
"#;

/// Insert the singleton row unless another initializer got there first
pub const INSERT_CONFIG: &str = r#"
INSERT OR IGNORE INTO audit_log_config
    (id, encryption_key, key_created_at, retention_days, created_at, updated_at)
VALUES (1, ?1, ?2, ?3, ?2, ?2)
"#;

pub const UPDATE_RETENTION_DAYS: &str = r#"
UPDATE audit_log_config SET retention_days = ?1, updated_at = ?2 WHERE id = 1
"#;

pub const INCREMENT_WRITTEN: &str = r#"
UPDATE audit_log_config SET total_logs_written = total_logs_written + 1 WHERE id = 1
"#;

pub const RECORD_CLEANUP: &str = r#"
UPDATE audit_log_config
SET total_logs_purged = total_logs_purged + ?1,
    last_cleanup_at = ?2,
    updated_at = ?2
WHERE id = 1
"#;

pub const INSERT_ENTRY: &str = r#"
INSERT INTO audit_logs
    (category, timestamp, user_id, username, ip_address, user_agent,
     request_id, encrypted_message, encryption_iv, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#;

/// SQL to query entries; filter clauses are appended
pub const SELECT_ENTRIES: &str = r#"
SELECT id, category, timestamp, user_id, username, ip_address, user_agent,
       request_id, encrypted_message, encryption_iv, created_at
FROM audit_logs
WHERE 1=1
"#;

pub const COUNT_ENTRIES: &str = "SELECT COUNT(*) FROM audit_logs WHERE 1=1";

pub const SUMMARY: &str = "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM audit_logs";

pub const DISTINCT_CATEGORIES: &str =
    "SELECT DISTINCT category FROM audit_logs ORDER BY category";

/// SQL to delete entries older than a cutoff
pub const DELETE_BEFORE: &str = "DELETE FROM audit_logs WHERE timestamp < ?1";
