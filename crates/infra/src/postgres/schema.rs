//! Schema for the Postgres adapter. Every statement is idempotent.

pub(super) const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id              UUID PRIMARY KEY,
        email           TEXT NOT NULL UNIQUE,
        display_name    TEXT NOT NULL,
        password_hash   TEXT NOT NULL,
        status          TEXT NOT NULL,
        version         BIGINT NOT NULL DEFAULT 0,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id              UUID PRIMARY KEY,
        code            TEXT NOT NULL UNIQUE,
        name            TEXT NOT NULL UNIQUE,
        description     TEXT,
        role_type       TEXT NOT NULL,
        is_system       BOOLEAN NOT NULL DEFAULT FALSE,
        is_default      BOOLEAN NOT NULL DEFAULT FALSE,
        active          BOOLEAN NOT NULL DEFAULT TRUE,
        priority        INTEGER NOT NULL DEFAULT 10,
        parent_role_id  UUID REFERENCES roles(id) ON DELETE SET NULL,
        version         BIGINT NOT NULL DEFAULT 0,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS permissions (
        id              UUID PRIMARY KEY,
        name            TEXT NOT NULL UNIQUE,
        resource        TEXT NOT NULL,
        action          TEXT NOT NULL,
        scope           TEXT,
        effective_scope TEXT NOT NULL,
        description     TEXT,
        category        TEXT,
        sensitive       BOOLEAN NOT NULL DEFAULT FALSE,
        active          BOOLEAN NOT NULL DEFAULT TRUE,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL,
        UNIQUE (resource, action, effective_scope)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS role_permissions (
        role_id         UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        permission_id   UUID NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, permission_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_roles (
        user_id         UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id         UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, role_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_sessions (
        id              UUID PRIMARY KEY,
        token           TEXT NOT NULL UNIQUE,
        user_id         UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at      TIMESTAMPTZ NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_user_roles_role ON user_roles (role_id)",
    "CREATE INDEX IF NOT EXISTS idx_refresh_sessions_user ON refresh_sessions (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_refresh_sessions_expiry ON refresh_sessions (expires_at)",
];
