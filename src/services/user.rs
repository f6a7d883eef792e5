//! User service
//!
//! Implements business logic for user management:
//! - Registration and login, both answering with a signed access token
//! - Token authentication for the request middleware
//! - Profile reads and updates, password changes
//! - Admin listing, role changes and deactivation
//!
//! Accounts are never removed. Deactivated users cannot log in and their
//! existing tokens stop working.

use crate::db::repositories::UserRepository;
use crate::models::{
    ListParams, PagedResult, UpdateProfileInput, User, UserFilter, UserRole, UserWithCounts,
};
use crate::services::password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};
use crate::services::token::{TokenError, TokenService};
use anyhow::Context;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[\d\s\-()]+$").expect("valid phone regex"));

/// Check an email address shape (`local@domain.tld`, no whitespace)
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Check a phone number: digits, spaces, dashes and parentheses with an
/// optional leading `+`
pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Validation error (invalid input)
    #[error("{0}")]
    ValidationError(String),

    /// Email already registered
    #[error("User with this email already exists.")]
    UserExists,

    /// Credentials rejected. `reason` is recorded in the audit log and never
    /// shown to the client.
    #[error("Invalid email or password.")]
    LoginFailed {
        user_id: Option<i64>,
        reason: &'static str,
    },

    /// Missing, invalid or expired token, or deactivated account
    #[error("{0}")]
    Unauthorized(String),

    #[error("User not found.")]
    NotFound,

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Input for user registration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub phone: Option<String>,
    pub region: Option<String>,
    pub language: Option<String>,
}

impl RegisterInput {
    pub fn new(name: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            ..Default::default()
        }
    }
}

/// Input for user login
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginInput {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl LoginInput {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// A user together with a freshly issued token
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

/// User service for managing users and authentication
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    tokens: TokenService,
}

impl UserService {
    pub fn new(user_repo: Arc<dyn UserRepository>, tokens: TokenService) -> Self {
        Self { user_repo, tokens }
    }

    /// Register a new user with the `USER` role
    ///
    /// # Errors
    ///
    /// - `ValidationError` for missing fields or malformed email, password or phone
    /// - `UserExists` if the email is already registered
    pub async fn register(&self, input: RegisterInput) -> Result<AuthResponse, UserServiceError> {
        let email = normalize_email(&input.email);
        validate_registration(&input, &email)?;

        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists);
        }

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;

        let mut user = User::new(input.name.trim().to_string(), email, password_hash, UserRole::User);
        user.phone = input.phone.filter(|p| !p.trim().is_empty());
        user.region = input.region.filter(|r| !r.trim().is_empty());
        if let Some(language) = input.language.filter(|l| !l.trim().is_empty()) {
            user.language = language;
        }

        let user = self
            .user_repo
            .create(&user)
            .await
            .context("Failed to create user")?;

        tracing::info!(user_id = user.id, "User registered");

        let token = self.tokens.issue(&user);
        Ok(AuthResponse { user, token })
    }

    /// Check credentials and issue a token
    ///
    /// Unknown, inactive and wrong-password attempts all fail with
    /// `LoginFailed`; only the recorded reason differs.
    pub async fn login(&self, input: LoginInput) -> Result<AuthResponse, UserServiceError> {
        if input.email.trim().is_empty() || input.password.is_empty() {
            return Err(UserServiceError::ValidationError(
                "Email and password are required.".to_string(),
            ));
        }

        let user = self
            .user_repo
            .get_by_email(&normalize_email(&input.email))
            .await
            .context("Failed to get user by email")?
            .filter(|u| u.is_active)
            .ok_or(UserServiceError::LoginFailed {
                user_id: None,
                reason: "User not found",
            })?;

        let password_valid = verify_password(&input.password, &user.password_hash)
            .context("Failed to verify password")?;
        if !password_valid {
            return Err(UserServiceError::LoginFailed {
                user_id: Some(user.id),
                reason: "Invalid password",
            });
        }

        let token = self.tokens.issue(&user);
        Ok(AuthResponse { user, token })
    }

    /// Resolve a bearer token to an active user
    pub async fn authenticate(&self, token: &str) -> Result<User, UserServiceError> {
        let claims = self.tokens.verify(token).map_err(|e| match e {
            TokenError::Expired => UserServiceError::Unauthorized("Token expired.".to_string()),
            _ => UserServiceError::Unauthorized("Invalid access token.".to_string()),
        })?;

        let user = self
            .user_repo
            .get_by_id(claims.sub)
            .await
            .context("Failed to load token user")?
            .filter(|u| u.is_active)
            .ok_or_else(|| UserServiceError::Unauthorized("Invalid access token.".to_string()))?;

        Ok(user)
    }

    /// Get a user by ID
    pub async fn get_by_id(&self, id: i64) -> Result<User, UserServiceError> {
        self.user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user")?
            .ok_or(UserServiceError::NotFound)
    }

    /// Profile of a user with counts of their searches, datasets and feedbacks
    pub async fn profile(&self, user_id: i64) -> Result<UserWithCounts, UserServiceError> {
        let user = self.get_by_id(user_id).await?;
        self.with_counts(user).await
    }

    pub async fn update_profile(
        &self,
        user_id: i64,
        input: UpdateProfileInput,
    ) -> Result<User, UserServiceError> {
        if let Some(phone) = input.phone.as_deref() {
            if !phone.is_empty() && !is_valid_phone(phone) {
                return Err(UserServiceError::ValidationError(
                    "Invalid phone number format.".to_string(),
                ));
            }
        }

        let mut user = self.get_by_id(user_id).await?;

        if let Some(name) = input.name.filter(|n| !n.trim().is_empty()) {
            user.name = name.trim().to_string();
        }
        if let Some(phone) = input.phone {
            user.phone = Some(phone).filter(|p| !p.is_empty());
        }
        if let Some(region) = input.region {
            user.region = Some(region).filter(|r| !r.is_empty());
        }
        if let Some(language) = input.language.filter(|l| !l.is_empty()) {
            user.language = language;
        }
        user.updated_at = Utc::now();

        let user = self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update profile")?;
        Ok(user)
    }

    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), UserServiceError> {
        if current_password.is_empty() || new_password.is_empty() {
            return Err(UserServiceError::ValidationError(
                "Current password and new password are required.".to_string(),
            ));
        }
        if new_password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(UserServiceError::ValidationError(format!(
                "New password must be at least {} characters long.",
                MIN_PASSWORD_LENGTH
            )));
        }

        let mut user = self.get_by_id(user_id).await?;

        let current_valid = verify_password(current_password, &user.password_hash)
            .context("Failed to verify password")?;
        if !current_valid {
            return Err(UserServiceError::ValidationError(
                "Current password is incorrect.".to_string(),
            ));
        }

        user.password_hash = hash_password(new_password).context("Failed to hash password")?;
        user.updated_at = Utc::now();
        self.user_repo
            .update(&user)
            .await
            .context("Failed to update password")?;

        tracing::info!(user_id, "Password changed");
        Ok(())
    }

    /// Admin listing, newest first, each user with activity counts
    pub async fn list_users(
        &self,
        filter: &UserFilter,
        params: &ListParams,
    ) -> Result<PagedResult<UserWithCounts>, UserServiceError> {
        let (users, total) = self
            .user_repo
            .list(filter, params)
            .await
            .context("Failed to list users")?;

        let mut items = Vec::with_capacity(users.len());
        for user in users {
            items.push(self.with_counts(user).await?);
        }

        Ok(PagedResult::new(items, total, params))
    }

    /// Change a user's role and/or active flag
    pub async fn update_role(
        &self,
        user_id: i64,
        role: Option<UserRole>,
        is_active: Option<bool>,
    ) -> Result<User, UserServiceError> {
        let mut user = self.get_by_id(user_id).await?;

        if let Some(role) = role {
            user.role = role;
        }
        if let Some(is_active) = is_active {
            user.is_active = is_active;
        }
        user.updated_at = Utc::now();

        let user = self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update user")?;

        tracing::info!(user_id, role = %user.role, is_active = user.is_active, "User updated");
        Ok(user)
    }

    /// Soft-delete a user. Admins cannot deactivate themselves.
    pub async fn deactivate(&self, actor_id: i64, user_id: i64) -> Result<User, UserServiceError> {
        if actor_id == user_id {
            return Err(UserServiceError::ValidationError(
                "Cannot delete your own account.".to_string(),
            ));
        }
        self.update_role(user_id, None, Some(false)).await
    }

    pub async fn count_active(&self) -> Result<i64, UserServiceError> {
        Ok(self
            .user_repo
            .count_active()
            .await
            .context("Failed to count users")?)
    }

    pub async fn count_by_role(&self) -> Result<Vec<(String, i64)>, UserServiceError> {
        Ok(self
            .user_repo
            .count_by_role()
            .await
            .context("Failed to count users by role")?)
    }

    async fn with_counts(&self, user: User) -> Result<UserWithCounts, UserServiceError> {
        let counts = self
            .user_repo
            .activity_counts(user.id)
            .await
            .context("Failed to count user activity")?;

        Ok(UserWithCounts {
            user,
            search_count: counts.searches,
            dataset_count: counts.datasets,
            feedback_count: counts.feedbacks,
        })
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_registration(input: &RegisterInput, email: &str) -> Result<(), UserServiceError> {
    if input.name.trim().is_empty() || email.is_empty() || input.password.is_empty() {
        return Err(UserServiceError::ValidationError(
            "Name, email and password are required.".to_string(),
        ));
    }

    if !is_valid_email(email) {
        return Err(UserServiceError::ValidationError(
            "Invalid email format.".to_string(),
        ));
    }

    if input.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(UserServiceError::ValidationError(format!(
            "Password must be at least {} characters long.",
            MIN_PASSWORD_LENGTH
        )));
    }

    if let Some(phone) = input.phone.as_deref() {
        if !phone.is_empty() && !is_valid_phone(phone) {
            return Err(UserServiceError::ValidationError(
                "Invalid phone number format.".to_string(),
            ));
        }
    }

    Ok(())
}
