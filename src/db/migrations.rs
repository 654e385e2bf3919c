//! Database migrations

/// SQL for creating the database schema
pub const INIT_SCHEMA: &str = r#"
-- Namespaced key/value records
CREATE TABLE IF NOT EXISTS kv_store (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    PRIMARY KEY (namespace, key)
);

CREATE INDEX IF NOT EXISTS idx_kv_namespace ON kv_store(namespace);
"#;
