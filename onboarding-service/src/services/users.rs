use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use sqlx::postgres::{PgConnection, PgPool};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    models::{
        CompanyProfile, IdentityCard, ProfileUpdate, RegistrationStatus, Role, User, UserRow,
        PROGRESS_DATA_SUBMITTED,
    },
    utils::Identifier,
};

use super::ServiceError;

const USER_COLUMNS: &str = "user_id, phone, email, name, gender, address, role_code, \
    registration_status_code, registration_progress, phone_verified, email_verified, pin_hash, \
    review_notes, reviewed_by, reviewed_utc, created_utc, updated_utc";

/// Credential store. Every state-changing write is conditional on the
/// current state and reports whether it applied.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError>;

    async fn find_by_identifier(
        &self,
        identifier: &Identifier,
        role: Role,
    ) -> Result<Option<User>, ServiceError>;

    /// Fails with `UserAlreadyExists` when the identifier is taken for the role.
    async fn insert(&self, user: &User) -> Result<(), ServiceError>;

    /// Saves profile fields and moves `incomplete` to `pin_verification_required`.
    async fn submit_profile(
        &self,
        user_id: Uuid,
        profile: &ProfileUpdate,
    ) -> Result<bool, ServiceError>;

    /// Writes the PIN hash only when none is stored. Progress never decreases.
    async fn set_pin_if_absent(
        &self,
        user_id: Uuid,
        pin_hash: &str,
        status: RegistrationStatus,
        progress: i32,
    ) -> Result<bool, ServiceError>;

    /// Records an admin decision on a `pending` user.
    async fn record_review(
        &self,
        user_id: Uuid,
        status: RegistrationStatus,
        reviewer: Uuid,
        notes: Option<&str>,
    ) -> Result<bool, ServiceError>;

    /// Stores the card and moves the user to `pending` together, only while
    /// the status is one of `expected`. Nothing is written otherwise.
    async fn submit_identity_card(
        &self,
        card: &IdentityCard,
        expected: &[RegistrationStatus],
    ) -> Result<bool, ServiceError>;

    async fn find_identity_card(&self, user_id: Uuid) -> Result<Option<IdentityCard>, ServiceError>;

    /// Company profile counterpart of [`UserRepository::submit_identity_card`].
    async fn submit_company_profile(
        &self,
        profile: &CompanyProfile,
        expected: &[RegistrationStatus],
    ) -> Result<bool, ServiceError>;

    async fn find_company_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<CompanyProfile>, ServiceError>;

    async fn list_by_status(
        &self,
        status: RegistrationStatus,
        role: Option<Role>,
    ) -> Result<Vec<User>, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Conditional move to `pending` inside the caller's transaction.
async fn mark_pending(
    conn: &mut PgConnection,
    user_id: Uuid,
    expected: &[RegistrationStatus],
) -> Result<bool, sqlx::Error> {
    let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
    let result = sqlx::query(
        r#"
        UPDATE users
        SET registration_status_code = $2,
            registration_progress = GREATEST(registration_progress, $3), updated_utc = NOW()
        WHERE user_id = $1 AND registration_status_code = ANY($4)
        "#,
    )
    .bind(user_id)
    .bind(RegistrationStatus::Pending.as_str())
    .bind(PROGRESS_DATA_SUBMITTED)
    .bind(&expected)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn into_users(rows: Vec<UserRow>) -> Result<Vec<User>, ServiceError> {
    rows.into_iter()
        .map(|row| User::try_from(row).map_err(ServiceError::from))
        .collect()
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE user_id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose().map_err(ServiceError::from)
    }

    #[instrument(skip(self, identifier), fields(identifier = %identifier))]
    async fn find_by_identifier(
        &self,
        identifier: &Identifier,
        role: Role,
    ) -> Result<Option<User>, ServiceError> {
        let column = if identifier.is_phone() { "phone" } else { "email" };
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE {} = $1 AND role_code = $2",
            USER_COLUMNS, column
        ))
        .bind(identifier.as_str())
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose().map_err(ServiceError::from)
    }

    #[instrument(skip(self, user), fields(user_id = %user.user_id, role = %user.role))]
    async fn insert(&self, user: &User) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, phone, email, name, gender, address, role_code,
                registration_status_code, registration_progress, phone_verified, email_verified,
                pin_hash, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.gender)
        .bind(&user.address)
        .bind(user.role.as_str())
        .bind(user.registration_status.as_str())
        .bind(user.registration_progress)
        .bind(user.phone_verified)
        .bind(user.email_verified)
        .bind(&user.pin_hash)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                ServiceError::UserAlreadyExists
            }
            other => ServiceError::Database(other),
        })?;

        Ok(())
    }

    #[instrument(skip(self, profile))]
    async fn submit_profile(
        &self,
        user_id: Uuid,
        profile: &ProfileUpdate,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, gender = $3, address = $4,
                registration_status_code = $5, updated_utc = NOW()
            WHERE user_id = $1 AND registration_status_code = $6
            "#,
        )
        .bind(user_id)
        .bind(&profile.name)
        .bind(&profile.gender)
        .bind(&profile.address)
        .bind(RegistrationStatus::PinVerificationRequired.as_str())
        .bind(RegistrationStatus::Incomplete.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, pin_hash))]
    async fn set_pin_if_absent(
        &self,
        user_id: Uuid,
        pin_hash: &str,
        status: RegistrationStatus,
        progress: i32,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET pin_hash = $2, registration_status_code = $3,
                registration_progress = GREATEST(registration_progress, $4), updated_utc = NOW()
            WHERE user_id = $1 AND pin_hash IS NULL
            "#,
        )
        .bind(user_id)
        .bind(pin_hash)
        .bind(status.as_str())
        .bind(progress)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, notes))]
    async fn record_review(
        &self,
        user_id: Uuid,
        status: RegistrationStatus,
        reviewer: Uuid,
        notes: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET registration_status_code = $2, review_notes = $3, reviewed_by = $4,
                reviewed_utc = NOW(), updated_utc = NOW()
            WHERE user_id = $1 AND registration_status_code = $5
            "#,
        )
        .bind(user_id)
        .bind(status.as_str())
        .bind(notes)
        .bind(reviewer)
        .bind(RegistrationStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, card), fields(user_id = %card.user_id))]
    async fn submit_identity_card(
        &self,
        card: &IdentityCard,
        expected: &[RegistrationStatus],
    ) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await?;
        if !mark_pending(&mut tx, card.user_id, expected).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO identity_cards (user_id, identity_number, full_name, address, photo_url, submitted_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE
            SET identity_number = EXCLUDED.identity_number, full_name = EXCLUDED.full_name,
                address = EXCLUDED.address, photo_url = EXCLUDED.photo_url,
                submitted_utc = EXCLUDED.submitted_utc
            "#,
        )
        .bind(card.user_id)
        .bind(&card.identity_number)
        .bind(&card.full_name)
        .bind(&card.address)
        .bind(&card.photo_url)
        .bind(card.submitted_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn find_identity_card(&self, user_id: Uuid) -> Result<Option<IdentityCard>, ServiceError> {
        let card = sqlx::query_as::<_, IdentityCard>(
            r#"
            SELECT user_id, identity_number, full_name, address, photo_url, submitted_utc
            FROM identity_cards
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(card)
    }

    #[instrument(skip(self, profile), fields(user_id = %profile.user_id))]
    async fn submit_company_profile(
        &self,
        profile: &CompanyProfile,
        expected: &[RegistrationStatus],
    ) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await?;
        if !mark_pending(&mut tx, profile.user_id, expected).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO company_profiles (user_id, company_name, company_address, company_phone,
                company_email, photo_url, submitted_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE
            SET company_name = EXCLUDED.company_name, company_address = EXCLUDED.company_address,
                company_phone = EXCLUDED.company_phone, company_email = EXCLUDED.company_email,
                photo_url = EXCLUDED.photo_url, submitted_utc = EXCLUDED.submitted_utc
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.company_name)
        .bind(&profile.company_address)
        .bind(&profile.company_phone)
        .bind(&profile.company_email)
        .bind(&profile.photo_url)
        .bind(profile.submitted_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn find_company_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<CompanyProfile>, ServiceError> {
        let profile = sqlx::query_as::<_, CompanyProfile>(
            r#"
            SELECT user_id, company_name, company_address, company_phone, company_email,
                photo_url, submitted_utc
            FROM company_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    #[instrument(skip(self))]
    async fn list_by_status(
        &self,
        status: RegistrationStatus,
        role: Option<Role>,
    ) -> Result<Vec<User>, ServiceError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users \
             WHERE registration_status_code = $1 AND ($2::TEXT IS NULL OR role_code = $2) \
             ORDER BY updated_utc ASC",
            USER_COLUMNS
        ))
        .bind(status.as_str())
        .bind(role.map(|r| r.as_str()))
        .fetch_all(&self.pool)
        .await?;

        into_users(rows)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-memory credential store for tests and local development.
#[derive(Default)]
pub struct MemoryUserRepository {
    users: DashMap<Uuid, User>,
    by_identifier: DashMap<(String, Role), Uuid>,
    identity_cards: DashMap<Uuid, IdentityCard>,
    company_profiles: DashMap<Uuid, CompanyProfile>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `update` when `guard` holds. The shard lock makes the check
    /// and write atomic per user.
    fn update_if(
        &self,
        user_id: Uuid,
        guard: impl FnOnce(&User) -> bool,
        update: impl FnOnce(&mut User),
    ) -> bool {
        let Some(mut user) = self.users.get_mut(&user_id) else {
            return false;
        };
        if !guard(&user) {
            return false;
        }
        update(&mut user);
        user.updated_utc = Utc::now();
        true
    }
}

fn mark_pending_in_place(user: &mut User) {
    user.registration_status = RegistrationStatus::Pending;
    user.registration_progress = user.registration_progress.max(PROGRESS_DATA_SUBMITTED);
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }

    async fn find_by_identifier(
        &self,
        identifier: &Identifier,
        role: Role,
    ) -> Result<Option<User>, ServiceError> {
        let key = (identifier.as_str().to_string(), role);
        let user_id = match self.by_identifier.get(&key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.find_by_id(user_id).await
    }

    async fn insert(&self, user: &User) -> Result<(), ServiceError> {
        let identifier = user
            .phone
            .clone()
            .or_else(|| user.email.clone())
            .ok_or_else(|| ServiceError::InvalidInput("User has no identifier".to_string()))?;

        match self.by_identifier.entry((identifier, user.role)) {
            Entry::Occupied(_) => Err(ServiceError::UserAlreadyExists),
            Entry::Vacant(slot) => {
                self.users.insert(user.user_id, user.clone());
                slot.insert(user.user_id);
                Ok(())
            }
        }
    }

    async fn submit_profile(
        &self,
        user_id: Uuid,
        profile: &ProfileUpdate,
    ) -> Result<bool, ServiceError> {
        Ok(self.update_if(
            user_id,
            |u| u.registration_status == RegistrationStatus::Incomplete,
            |u| {
                u.name = Some(profile.name.clone());
                u.gender = Some(profile.gender.clone());
                u.address = Some(profile.address.clone());
                u.registration_status = RegistrationStatus::PinVerificationRequired;
            },
        ))
    }

    async fn set_pin_if_absent(
        &self,
        user_id: Uuid,
        pin_hash: &str,
        status: RegistrationStatus,
        progress: i32,
    ) -> Result<bool, ServiceError> {
        Ok(self.update_if(
            user_id,
            |u| u.pin_hash.is_none(),
            |u| {
                u.pin_hash = Some(pin_hash.to_string());
                u.registration_status = status;
                u.registration_progress = u.registration_progress.max(progress);
            },
        ))
    }

    async fn record_review(
        &self,
        user_id: Uuid,
        status: RegistrationStatus,
        reviewer: Uuid,
        notes: Option<&str>,
    ) -> Result<bool, ServiceError> {
        Ok(self.update_if(
            user_id,
            |u| u.registration_status == RegistrationStatus::Pending,
            |u| {
                u.registration_status = status;
                u.review_notes = notes.map(str::to_string);
                u.reviewed_by = Some(reviewer);
                u.reviewed_utc = Some(Utc::now());
            },
        ))
    }

    async fn submit_identity_card(
        &self,
        card: &IdentityCard,
        expected: &[RegistrationStatus],
    ) -> Result<bool, ServiceError> {
        // the card is written under the user's shard lock
        Ok(self.update_if(
            card.user_id,
            |u| expected.contains(&u.registration_status),
            |u| {
                mark_pending_in_place(u);
                self.identity_cards.insert(card.user_id, card.clone());
            },
        ))
    }

    async fn find_identity_card(&self, user_id: Uuid) -> Result<Option<IdentityCard>, ServiceError> {
        Ok(self.identity_cards.get(&user_id).map(|c| c.clone()))
    }

    async fn submit_company_profile(
        &self,
        profile: &CompanyProfile,
        expected: &[RegistrationStatus],
    ) -> Result<bool, ServiceError> {
        Ok(self.update_if(
            profile.user_id,
            |u| expected.contains(&u.registration_status),
            |u| {
                mark_pending_in_place(u);
                self.company_profiles.insert(profile.user_id, profile.clone());
            },
        ))
    }

    async fn find_company_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<CompanyProfile>, ServiceError> {
        Ok(self.company_profiles.get(&user_id).map(|p| p.clone()))
    }

    async fn list_by_status(
        &self,
        status: RegistrationStatus,
        role: Option<Role>,
    ) -> Result<Vec<User>, ServiceError> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|u| u.registration_status == status && role.map_or(true, |r| u.role == r))
            .map(|u| u.clone())
            .collect();
        users.sort_by_key(|u| u.updated_utc);
        Ok(users)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PROGRESS_DATA_SUBMITTED;

    fn citizen() -> User {
        User::registered(&Identifier::phone("6281234567890").unwrap(), Role::Masyarakat)
    }

    #[tokio::test]
    async fn test_phone_and_role_are_unique_together() {
        let repo = MemoryUserRepository::new();
        repo.insert(&citizen()).await.unwrap();

        let duplicate = repo.insert(&citizen()).await;
        assert!(matches!(duplicate, Err(ServiceError::UserAlreadyExists)));

        let collector =
            User::registered(&Identifier::phone("6281234567890").unwrap(), Role::Pengepul);
        assert!(repo.insert(&collector).await.is_ok());
    }

    #[tokio::test]
    async fn test_pin_is_written_once() {
        let repo = MemoryUserRepository::new();
        let user = citizen();
        repo.insert(&user).await.unwrap();

        let first = repo
            .set_pin_if_absent(user.user_id, "h1", RegistrationStatus::Complete, PROGRESS_DATA_SUBMITTED)
            .await
            .unwrap();
        let second = repo
            .set_pin_if_absent(user.user_id, "h2", RegistrationStatus::Complete, PROGRESS_DATA_SUBMITTED)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        let stored = repo.find_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(stored.pin_hash.as_deref(), Some("h1"));
    }

    fn card(user_id: Uuid) -> IdentityCard {
        IdentityCard {
            user_id,
            identity_number: "3201234567890001".to_string(),
            full_name: "Budi".to_string(),
            address: "Jl. Merdeka 1".to_string(),
            photo_url: "https://files.example.com/ktp.jpg".to_string(),
            submitted_utc: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_document_and_status_are_written_together() {
        let repo = MemoryUserRepository::new();
        let mut user =
            User::registered(&Identifier::phone("6281111111111").unwrap(), Role::Pengepul);
        user.registration_status = RegistrationStatus::Rejected;
        user.registration_progress = PROGRESS_DATA_SUBMITTED;
        repo.insert(&user).await.unwrap();

        let refused = repo
            .submit_identity_card(&card(user.user_id), &[RegistrationStatus::OtpVerified])
            .await
            .unwrap();
        assert!(!refused);
        assert!(repo.find_identity_card(user.user_id).await.unwrap().is_none());

        let applied = repo
            .submit_identity_card(
                &card(user.user_id),
                &[RegistrationStatus::OtpVerified, RegistrationStatus::Rejected],
            )
            .await
            .unwrap();
        assert!(applied);
        assert!(repo.find_identity_card(user.user_id).await.unwrap().is_some());
        let stored = repo.find_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(stored.registration_status, RegistrationStatus::Pending);
        assert_eq!(stored.registration_progress, PROGRESS_DATA_SUBMITTED);
    }

    #[tokio::test]
    async fn test_review_requires_pending() {
        let repo = MemoryUserRepository::new();
        let user = citizen();
        repo.insert(&user).await.unwrap();

        let applied = repo
            .record_review(user.user_id, RegistrationStatus::Approved, Uuid::new_v4(), None)
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_list_by_status_filters_role() {
        let repo = MemoryUserRepository::new();
        let mut collector =
            User::registered(&Identifier::phone("6281111111111").unwrap(), Role::Pengepul);
        collector.registration_status = RegistrationStatus::Pending;
        let mut operator =
            User::registered(&Identifier::phone("6282222222222").unwrap(), Role::Pengelola);
        operator.registration_status = RegistrationStatus::Pending;
        repo.insert(&collector).await.unwrap();
        repo.insert(&operator).await.unwrap();
        repo.insert(&citizen()).await.unwrap();

        let all = repo.list_by_status(RegistrationStatus::Pending, None).await.unwrap();
        let collectors = repo
            .list_by_status(RegistrationStatus::Pending, Some(Role::Pengepul))
            .await
            .unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(collectors.len(), 1);
        assert_eq!(collectors[0].user_id, collector.user_id);
    }
}
