//! Database migrations module
//!
//! All migrations are embedded directly in Rust code as SQL strings so the
//! portal ships as a single binary.
//!
//! # Usage
//!
//! ```ignore
//! use nco_portal::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```
//!
//! List-valued columns (keywords, synonyms, matched keywords) and free-form
//! payloads (`original_data`, `metadata`) hold JSON text.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::DbPool;

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements
    pub up: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// All migrations, applied in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users_table",
        up: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(255) NOT NULL,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                phone VARCHAR(50),
                region VARCHAR(100),
                language VARCHAR(10) NOT NULL DEFAULT 'en',
                role VARCHAR(20) NOT NULL DEFAULT 'USER',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
            CREATE INDEX IF NOT EXISTS idx_users_region ON users(region);
        "#,
    },
    Migration {
        version: 2,
        name: "create_nco_codes_table",
        up: r#"
            CREATE TABLE IF NOT EXISTS nco_codes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nco_code VARCHAR(8) NOT NULL UNIQUE,
                title VARCHAR(500) NOT NULL,
                description TEXT NOT NULL,
                major_group VARCHAR(10) NOT NULL,
                sub_major_group VARCHAR(10) NOT NULL,
                minor_group VARCHAR(10) NOT NULL,
                unit_group VARCHAR(10) NOT NULL,
                sector VARCHAR(100),
                skill_level VARCHAR(50),
                education_level VARCHAR(100),
                keywords TEXT NOT NULL DEFAULT '[]',
                synonyms TEXT NOT NULL DEFAULT '[]',
                version VARCHAR(20) NOT NULL DEFAULT 'NCO-2015',
                is_active INTEGER NOT NULL DEFAULT 1,
                is_verified INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_nco_codes_major_group ON nco_codes(major_group);
            CREATE INDEX IF NOT EXISTS idx_nco_codes_sector ON nco_codes(sector);
            CREATE INDEX IF NOT EXISTS idx_nco_codes_active ON nco_codes(is_active);
        "#,
    },
    Migration {
        version: 3,
        name: "create_search_tables",
        up: r#"
            CREATE TABLE IF NOT EXISTS search_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                query TEXT NOT NULL,
                language VARCHAR(10) NOT NULL DEFAULT 'en',
                input_method VARCHAR(10) NOT NULL DEFAULT 'TEXT',
                session_id VARCHAR(255),
                user_agent TEXT,
                ip_address VARCHAR(64),
                total_results INTEGER NOT NULL DEFAULT 0,
                processing_time INTEGER,
                ai_service_status VARCHAR(20),
                searched_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_search_history_user ON search_history(user_id);
            CREATE INDEX IF NOT EXISTS idx_search_history_searched_at ON search_history(searched_at);

            CREATE TABLE IF NOT EXISTS search_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                search_id INTEGER NOT NULL REFERENCES search_history(id) ON DELETE CASCADE,
                nco_code_id INTEGER NOT NULL REFERENCES nco_codes(id),
                relevance_score REAL NOT NULL,
                confidence_score REAL NOT NULL,
                rank INTEGER NOT NULL,
                match_type VARCHAR(20) NOT NULL,
                matched_keywords TEXT NOT NULL DEFAULT '[]',
                explanation TEXT,
                was_viewed INTEGER NOT NULL DEFAULT 0,
                viewed_at TIMESTAMP,
                was_selected INTEGER NOT NULL DEFAULT 0,
                selected_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_search_results_search ON search_results(search_id);
            CREATE INDEX IF NOT EXISTS idx_search_results_code ON search_results(nco_code_id);

            CREATE TABLE IF NOT EXISTS search_feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                search_id INTEGER NOT NULL UNIQUE REFERENCES search_history(id) ON DELETE CASCADE,
                selected_code_id INTEGER REFERENCES nco_codes(id),
                rating INTEGER,
                is_correct INTEGER,
                was_helpful INTEGER,
                comments TEXT,
                correction_reason TEXT,
                suggested_keywords TEXT NOT NULL DEFAULT '[]',
                reported_issue TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_search_feedback_user ON search_feedback(user_id);
        "#,
    },
    Migration {
        version: 4,
        name: "create_dataset_tables",
        up: r#"
            CREATE TABLE IF NOT EXISTS datasets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                type VARCHAR(30) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'UPLOADED',
                original_file_name VARCHAR(500),
                file_size INTEGER,
                file_url TEXT,
                mime_type VARCHAR(100),
                total_records INTEGER NOT NULL DEFAULT 0,
                processed_records INTEGER NOT NULL DEFAULT 0,
                ai_processing_started TIMESTAMP,
                created_by INTEGER NOT NULL REFERENCES users(id),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_datasets_created_by ON datasets(created_by);
            CREATE INDEX IF NOT EXISTS idx_datasets_status ON datasets(status);

            CREATE TABLE IF NOT EXISTS data_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id INTEGER NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
                original_data TEXT NOT NULL,
                suggested_code_id INTEGER REFERENCES nco_codes(id),
                manual_code_id INTEGER REFERENCES nco_codes(id),
                confidence_score REAL,
                is_processed INTEGER NOT NULL DEFAULT 0,
                has_errors INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                is_verified INTEGER NOT NULL DEFAULT 0,
                verified_by INTEGER REFERENCES users(id),
                verified_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_data_records_dataset ON data_records(dataset_id);
        "#,
    },
    Migration {
        version: 5,
        name: "create_admin_tables",
        up: r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                action VARCHAR(100) NOT NULL,
                resource_type VARCHAR(100) NOT NULL,
                resource_id VARCHAR(100),
                method VARCHAR(10),
                endpoint TEXT,
                user_agent TEXT,
                ip_address VARCHAR(64),
                metadata TEXT,
                success INTEGER NOT NULL DEFAULT 1,
                error_message TEXT,
                duration INTEGER,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_audit_logs_user ON audit_logs(user_id);
            CREATE INDEX IF NOT EXISTS idx_audit_logs_action ON audit_logs(action);
            CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs(created_at);

            CREATE TABLE IF NOT EXISTS system_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key VARCHAR(255) NOT NULL UNIQUE,
                value TEXT NOT NULL,
                description TEXT,
                category VARCHAR(100) NOT NULL DEFAULT 'general',
                data_type VARCHAR(20) NOT NULL DEFAULT 'string',
                is_public INTEGER NOT NULL DEFAULT 0,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS api_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                service_name VARCHAR(100) NOT NULL,
                endpoint TEXT NOT NULL,
                method VARCHAR(10) NOT NULL,
                status VARCHAR(20) NOT NULL,
                status_code INTEGER,
                response_time INTEGER NOT NULL,
                error_message TEXT,
                search_id INTEGER REFERENCES search_history(id) ON DELETE SET NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_api_requests_service ON api_requests(service_name);
        "#,
    },
    Migration {
        version: 6,
        name: "create_search_analytics_table",
        up: r#"
            CREATE TABLE IF NOT EXISTS search_analytics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date VARCHAR(10) NOT NULL,
                language VARCHAR(10) NOT NULL,
                region VARCHAR(100) NOT NULL DEFAULT '',
                total_searches INTEGER NOT NULL DEFAULT 0,
                unique_users INTEGER NOT NULL DEFAULT 0,
                avg_processing_time REAL,
                avg_results REAL,
                successful_searches INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(date, language, region)
            );
        "#,
    },
];

/// Run all pending migrations
///
/// Returns the number of migrations applied.
pub async fn run_migrations(pool: &DbPool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

/// Create the migrations tracking table if it doesn't exist
async fn create_migrations_table(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create migrations table")?;
    Ok(())
}

/// Get list of already applied migrations
async fn get_applied_migrations(pool: &DbPool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read applied migrations")?;

    let mut records = Vec::new();
    for row in rows {
        records.push(MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        });
    }

    Ok(records)
}

/// Apply a single migration inside a transaction
async fn apply_migration(pool: &DbPool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin migration")?;

    for statement in split_sql_statements(migration.up) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name, applied_at) VALUES (?, ?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

    tx.commit().await.context("Failed to commit migration")?;
    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, skipping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Get pending migrations count
pub async fn pending_count(pool: &DbPool) -> Result<usize> {
    create_migrations_table(pool).await?;
    let applied = get_applied_migrations(pool).await?;
    Ok(MIGRATIONS.len().saturating_sub(applied.len()))
}
