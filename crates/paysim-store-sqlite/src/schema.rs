//! SQL schema for the simulator's SQLite store.
//!
//! Executed once at connection startup. `seq` columns give every table a
//! stable insertion order, which is what "creation order" means for rules
//! and "newest first" means for payments and logs.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS payments (
    seq                INTEGER PRIMARY KEY AUTOINCREMENT,
    id                 TEXT NOT NULL UNIQUE,
    status             TEXT NOT NULL,
    payment_method     TEXT NOT NULL,
    external_reference TEXT,
    preapproval_id     TEXT,
    created_at         TEXT NOT NULL,   -- RFC 3339, fixed width
    doc                TEXT NOT NULL    -- full Payment as JSON
);

CREATE TABLE IF NOT EXISTS plans (
    seq  INTEGER PRIMARY KEY AUTOINCREMENT,
    id   TEXT NOT NULL UNIQUE,
    doc  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subscriptions (
    seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
    id                  TEXT NOT NULL UNIQUE,
    status              TEXT NOT NULL,
    payer_email         TEXT NOT NULL,
    preapproval_plan_id TEXT,
    next_payment_date   TEXT NOT NULL,
    doc                 TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rules (
    seq  INTEGER PRIMARY KEY AUTOINCREMENT,
    id   TEXT NOT NULL UNIQUE,
    doc  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS webhooks (
    seq  INTEGER PRIMARY KEY AUTOINCREMENT,
    id   TEXT NOT NULL UNIQUE,
    doc  TEXT NOT NULL
);

-- Append-only. No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS delivery_logs (
    seq                     INTEGER PRIMARY KEY AUTOINCREMENT,
    id                      TEXT NOT NULL UNIQUE,
    webhook_subscription_id TEXT,
    resource_id             TEXT NOT NULL,
    event                   TEXT NOT NULL,
    success                 INTEGER NOT NULL,
    doc                     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS payments_status_idx      ON payments(status);
CREATE INDEX IF NOT EXISTS payments_ext_ref_idx     ON payments(external_reference);
CREATE INDEX IF NOT EXISTS payments_preapproval_idx ON payments(preapproval_id);
CREATE INDEX IF NOT EXISTS subscriptions_status_idx ON subscriptions(status);
CREATE INDEX IF NOT EXISTS logs_resource_idx        ON delivery_logs(resource_id);
CREATE INDEX IF NOT EXISTS logs_webhook_idx         ON delivery_logs(webhook_subscription_id);

PRAGMA user_version = 1;
";
