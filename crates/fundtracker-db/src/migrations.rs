use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS profiles (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL UNIQUE REFERENCES users(id),
            full_name   TEXT NOT NULL,
            email       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Exactly one role per identity, assigned at signup.
        CREATE TABLE IF NOT EXISTS user_roles (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL UNIQUE REFERENCES users(id),
            role        TEXT NOT NULL CHECK (role IN ('admin', 'ngo', 'donor')),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS ngos (
            id                  TEXT PRIMARY KEY,
            user_id             TEXT NOT NULL REFERENCES users(id),
            name                TEXT NOT NULL,
            description         TEXT,
            registration_number TEXT,
            is_verified         INTEGER NOT NULL DEFAULT 0,
            verified_at         TEXT,
            verified_by         TEXT REFERENCES users(id),
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_ngos_owner ON ngos(user_id);

        CREATE TABLE IF NOT EXISTS projects (
            id              TEXT PRIMARY KEY,
            ngo_id          TEXT NOT NULL REFERENCES ngos(id),
            name            TEXT NOT NULL,
            description     TEXT,
            target_amount   INTEGER NOT NULL DEFAULT 0,
            status          TEXT NOT NULL DEFAULT 'active',
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_projects_ngo ON projects(ngo_id);

        CREATE TABLE IF NOT EXISTS donations (
            id              TEXT PRIMARY KEY,
            project_id      TEXT NOT NULL REFERENCES projects(id),
            donor_id        TEXT REFERENCES users(id),
            amount          INTEGER NOT NULL,
            message         TEXT,
            is_anonymous    INTEGER NOT NULL DEFAULT 0,
            status          TEXT NOT NULL DEFAULT 'completed',
            transaction_id  TEXT UNIQUE,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_donations_project
            ON donations(project_id, created_at);

        CREATE TABLE IF NOT EXISTS expenses (
            id              TEXT PRIMARY KEY,
            project_id      TEXT NOT NULL REFERENCES projects(id),
            amount          INTEGER NOT NULL,
            purpose         TEXT NOT NULL,
            description     TEXT,
            expense_date    TEXT,
            proof_url       TEXT,
            is_flagged      INTEGER NOT NULL DEFAULT 0,
            flagged_by      TEXT REFERENCES users(id),
            flagged_reason  TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_expenses_project
            ON expenses(project_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
