//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite

use crate::db::DbPool;
use crate::models::{ListParams, User, UserFilter, UserRole};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

/// Searches, datasets and feedbacks owned by one user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityCounts {
    pub searches: i64,
    pub datasets: i64,
    pub feedbacks: i64,
}

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Update a user (profile fields, role, active flag and password hash)
    async fn update(&self, user: &User) -> Result<User>;

    /// List users matching the filter, newest first
    async fn list(&self, filter: &UserFilter, params: &ListParams) -> Result<(Vec<User>, i64)>;

    /// Count active users
    async fn count_active(&self) -> Result<i64>;

    /// Count users per role
    async fn count_by_role(&self) -> Result<Vec<(String, i64)>>;

    /// Count the records a user owns
    async fn activity_counts(&self, user_id: i64) -> Result<ActivityCounts>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DbPool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DbPool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

const USER_COLUMNS: &str =
    "id, name, email, password_hash, phone, region, language, role, is_active, created_at, updated_at";

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO users (name, email, password_hash, phone, region, language, role, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.phone)
        .bind(&user.region)
        .bind(&user.language)
        .bind(user.role.to_string())
        .bind(user.is_active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create user")?;

        Ok(User {
            id: result.last_insert_rowid(),
            created_at: now,
            updated_at: now,
            ..user.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get user by ID")?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get user by email")?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn update(&self, user: &User) -> Result<User> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE users
            SET name = ?, email = ?, password_hash = ?, phone = ?, region = ?, language = ?,
                role = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.phone)
        .bind(&user.region)
        .bind(&user.language)
        .bind(user.role.to_string())
        .bind(user.is_active)
        .bind(now)
        .bind(user.id)
        .execute(&self.pool)
        .await
        .context("Failed to update user")?;

        self.get_by_id(user.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User not found after update"))
    }

    async fn list(&self, filter: &UserFilter, params: &ListParams) -> Result<(Vec<User>, i64)> {
        let role = filter.role.map(|r| r.to_string());
        let where_clause = r#"
            WHERE (? IS NULL OR role = ?)
              AND (? IS NULL OR region = ?)
              AND (? IS NULL OR is_active = ?)
        "#;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM users {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            USER_COLUMNS, where_clause
        ))
        .bind(&role)
        .bind(&role)
        .bind(&filter.region)
        .bind(&filter.region)
        .bind(filter.is_active)
        .bind(filter.is_active)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users {}", where_clause))
            .bind(&role)
            .bind(&role)
            .bind(&filter.region)
            .bind(&filter.region)
            .bind(filter.is_active)
            .bind(filter.is_active)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")?;

        let users = rows.iter().map(row_to_user).collect::<Result<Vec<_>>>()?;
        Ok((users, total))
    }

    async fn count_active(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count active users")?;
        Ok(count)
    }

    async fn count_by_role(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT role, COUNT(*) AS count FROM users GROUP BY role ORDER BY role")
            .fetch_all(&self.pool)
            .await
            .context("Failed to count users by role")?;

        Ok(rows
            .iter()
            .map(|row| (row.get("role"), row.get("count")))
            .collect())
    }

    async fn activity_counts(&self, user_id: i64) -> Result<ActivityCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM search_history WHERE user_id = ?) AS searches,
                (SELECT COUNT(*) FROM datasets WHERE created_by = ?) AS datasets,
                (SELECT COUNT(*) FROM search_feedback WHERE user_id = ?) AS feedbacks
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count user activity")?;

        Ok(ActivityCounts {
            searches: row.get("searches"),
            datasets: row.get("datasets"),
            feedbacks: row.get("feedbacks"),
        })
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let role_str: String = row.get("role");
    let role = UserRole::from_str(&role_str)
        .with_context(|| format!("Invalid role in database: {}", role_str))?;

    Ok(User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        phone: row.get("phone"),
        region: row.get("region"),
        language: row.get("language"),
        role,
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> (DbPool, SqlxUserRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxUserRepository::new(pool.clone());
        (pool, repo)
    }

    fn test_user(name: &str, email: &str, role: UserRole) -> User {
        User::new(name.to_string(), email.to_string(), "hash".to_string(), role)
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let (_pool, repo) = setup_test_repo().await;

        let created = repo
            .create(&test_user("Asha", "asha@example.com", UserRole::User))
            .await
            .expect("Failed to create user");
        assert!(created.id > 0);

        let found = repo
            .get_by_email("asha@example.com")
            .await
            .expect("Failed to get user")
            .expect("User not found");
        assert_eq!(found.id, created.id);
        assert_eq!(found.role, UserRole::User);
        assert!(found.is_active);

        assert!(repo.get_by_id(999).await.expect("Failed to get user").is_none());
    }

    #[tokio::test]
    async fn test_update_user() {
        let (_pool, repo) = setup_test_repo().await;
        let mut user = repo
            .create(&test_user("Ravi", "ravi@example.com", UserRole::User))
            .await
            .expect("Failed to create user");

        user.region = Some("Karnataka".to_string());
        user.role = UserRole::Admin;
        user.is_active = false;
        let updated = repo.update(&user).await.expect("Failed to update user");

        assert_eq!(updated.region.as_deref(), Some("Karnataka"));
        assert_eq!(updated.role, UserRole::Admin);
        assert!(!updated.is_active);
    }

    #[tokio::test]
    async fn test_list_filters_by_role_and_active() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&test_user("A", "a@example.com", UserRole::Admin)).await.unwrap();
        let mut b = repo.create(&test_user("B", "b@example.com", UserRole::User)).await.unwrap();
        repo.create(&test_user("C", "c@example.com", UserRole::User)).await.unwrap();
        b.is_active = false;
        repo.update(&b).await.unwrap();

        let params = ListParams::new(1, 10);
        let (all, total) = repo.list(&UserFilter::default(), &params).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(all.len(), 3);

        let filter = UserFilter {
            role: Some(UserRole::User),
            is_active: Some(true),
            ..Default::default()
        };
        let (users, total) = repo.list(&filter, &params).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(users[0].email, "c@example.com");

        assert_eq!(repo.count_active().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_count_by_role_and_activity() {
        let (_pool, repo) = setup_test_repo().await;
        let admin = repo.create(&test_user("A", "a@example.com", UserRole::Admin)).await.unwrap();
        repo.create(&test_user("B", "b@example.com", UserRole::User)).await.unwrap();

        let counts = repo.count_by_role().await.unwrap();
        assert_eq!(counts, vec![("ADMIN".to_string(), 1), ("USER".to_string(), 1)]);

        let activity = repo.activity_counts(admin.id).await.unwrap();
        assert_eq!(activity, ActivityCounts::default());
    }
}
