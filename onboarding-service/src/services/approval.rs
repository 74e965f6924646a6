use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use thiserror::Error;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{RegistrationStatus, Role, User, PROGRESS_DATA_SUBMITTED};

use super::{metrics::Metrics, ServiceError, TokenService, UserRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    #[serde(alias = "approve")]
    Approved,
    #[serde(alias = "reject")]
    Rejected,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Approved => "approved",
            ReviewAction::Rejected => "rejected",
        }
    }

    fn target_status(&self) -> RegistrationStatus {
        match self {
            ReviewAction::Approved => RegistrationStatus::Approved,
            ReviewAction::Rejected => RegistrationStatus::Rejected,
        }
    }
}

/// Why a review was refused. Nothing is written when one of these is returned.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("User not found")]
    UserNotFound,

    #[error("Role {0} does not require admin approval")]
    RoleNotEligible(Role),

    #[error("User is not pending review (status: {0})")]
    NotPending(RegistrationStatus),

    #[error("User has not submitted registration data (progress: {0})")]
    DataNotSubmitted(i32),

    #[error("Identity card has not been submitted")]
    MissingIdentityCard,

    #[error("Company profile has not been submitted")]
    MissingCompanyProfile,

    #[error("Rejection notes are required")]
    NotesRequired,

    #[error("User was reviewed concurrently")]
    ConcurrentUpdate,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApprovalError {
    /// Machine-readable reason used in bulk reports.
    pub fn reason(&self) -> &'static str {
        match self {
            ApprovalError::UserNotFound => "USER_NOT_FOUND",
            ApprovalError::RoleNotEligible(_) => "ROLE_NOT_ELIGIBLE",
            ApprovalError::NotPending(_) => "NOT_PENDING",
            ApprovalError::DataNotSubmitted(_) => "DATA_NOT_SUBMITTED",
            ApprovalError::MissingIdentityCard => "MISSING_IDENTITY_CARD",
            ApprovalError::MissingCompanyProfile => "MISSING_COMPANY_PROFILE",
            ApprovalError::NotesRequired => "NOTES_REQUIRED",
            ApprovalError::ConcurrentUpdate => "CONCURRENT_UPDATE",
            ApprovalError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<ServiceError> for ApprovalError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::UserNotFound => ApprovalError::UserNotFound,
            other => ApprovalError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<ApprovalError> for AppError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::UserNotFound => AppError::NotFound("User not found".to_string()),
            ApprovalError::NotesRequired => AppError::InvalidInput(err.to_string()),
            ApprovalError::Internal(e) => AppError::InternalError(e),
            other => AppError::Conflict(format!("{} ({})", other, other.reason())),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReviewOutcome {
    pub user_id: Uuid,
    pub role: Role,
    pub registration_status: RegistrationStatus,
    pub reviewed_by: Uuid,
    pub review_notes: Option<String>,
    pub revoked_sessions: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkFailure {
    pub user_id: Uuid,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct BulkReport {
    pub successes: Vec<ReviewOutcome>,
    pub failures: Vec<BulkFailure>,
}

/// Only writer of `approved` and `rejected`.
#[derive(Clone)]
pub struct ApprovalService {
    users: Arc<dyn UserRepository>,
    tokens: TokenService,
    metrics: Arc<Metrics>,
}

impl ApprovalService {
    pub fn new(users: Arc<dyn UserRepository>, tokens: TokenService, metrics: Arc<Metrics>) -> Self {
        Self {
            users,
            tokens,
            metrics,
        }
    }

    pub async fn approve(
        &self,
        user_id: Uuid,
        admin_id: Uuid,
        notes: Option<&str>,
    ) -> Result<ReviewOutcome, ApprovalError> {
        self.review(user_id, admin_id, ReviewAction::Approved, notes)
            .await
    }

    pub async fn reject(
        &self,
        user_id: Uuid,
        admin_id: Uuid,
        notes: &str,
    ) -> Result<ReviewOutcome, ApprovalError> {
        self.review(user_id, admin_id, ReviewAction::Rejected, Some(notes))
            .await
    }

    #[instrument(skip(self, notes))]
    pub async fn review(
        &self,
        user_id: Uuid,
        admin_id: Uuid,
        action: ReviewAction,
        notes: Option<&str>,
    ) -> Result<ReviewOutcome, ApprovalError> {
        let result = self.apply(user_id, admin_id, action, notes).await;
        match &result {
            Ok(_) => self.metrics.approval_decision(action.as_str(), "applied"),
            Err(e) => {
                self.metrics.approval_decision(action.as_str(), e.reason());
                tracing::warn!(user_id = %user_id, reason = e.reason(), "Review refused");
            }
        }
        result
    }

    async fn apply(
        &self,
        user_id: Uuid,
        admin_id: Uuid,
        action: ReviewAction,
        notes: Option<&str>,
    ) -> Result<ReviewOutcome, ApprovalError> {
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        if action == ReviewAction::Rejected && notes.is_none() {
            return Err(ApprovalError::NotesRequired);
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ApprovalError::UserNotFound)?;
        self.check_guards(&user).await?;

        let applied = self
            .users
            .record_review(user_id, action.target_status(), admin_id, notes)
            .await?;
        if !applied {
            return Err(ApprovalError::ConcurrentUpdate);
        }

        let revoked_sessions = self.tokens.revoke_all(user_id).await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Review applied but session revocation failed");
            ApprovalError::from(e)
        })?;

        tracing::info!(
            user_id = %user_id,
            admin_id = %admin_id,
            action = action.as_str(),
            revoked_sessions,
            "Registration reviewed"
        );

        Ok(ReviewOutcome {
            user_id,
            role: user.role,
            registration_status: action.target_status(),
            reviewed_by: admin_id,
            review_notes: notes.map(str::to_string),
            revoked_sessions,
        })
    }

    async fn check_guards(&self, user: &User) -> Result<(), ApprovalError> {
        if !user.role.requires_admin_approval() {
            return Err(ApprovalError::RoleNotEligible(user.role));
        }
        if user.registration_status != RegistrationStatus::Pending {
            return Err(ApprovalError::NotPending(user.registration_status));
        }
        if user.registration_progress < PROGRESS_DATA_SUBMITTED {
            return Err(ApprovalError::DataNotSubmitted(user.registration_progress));
        }

        match user.role {
            Role::Pengepul => {
                if self.users.find_identity_card(user.user_id).await?.is_none() {
                    return Err(ApprovalError::MissingIdentityCard);
                }
            }
            Role::Pengelola => {
                if self.users.find_company_profile(user.user_id).await?.is_none() {
                    return Err(ApprovalError::MissingCompanyProfile);
                }
            }
            Role::Masyarakat | Role::Administrator => {}
        }
        Ok(())
    }

    /// Reviews each user independently. One failure does not stop the rest.
    #[instrument(skip(self, user_ids, notes), fields(count = user_ids.len()))]
    pub async fn bulk_process(
        &self,
        user_ids: &[Uuid],
        action: ReviewAction,
        admin_id: Uuid,
        notes: Option<&str>,
    ) -> BulkReport {
        let results = join_all(
            user_ids
                .iter()
                .map(|user_id| self.review(*user_id, admin_id, action, notes)),
        )
        .await;

        let mut report = BulkReport::default();
        for (user_id, result) in user_ids.iter().zip(results) {
            match result {
                Ok(outcome) => report.successes.push(outcome),
                Err(e) => report.failures.push(BulkFailure {
                    user_id: *user_id,
                    reason: e.reason().to_string(),
                    message: e.to_string(),
                }),
            }
        }

        tracing::info!(
            succeeded = report.successes.len(),
            failed = report.failures.len(),
            "Bulk review finished"
        );
        report
    }

    pub async fn list_pending(&self, role: Option<Role>) -> Result<Vec<User>, ServiceError> {
        if let Some(role) = role {
            if !role.requires_admin_approval() {
                return Ok(Vec::new());
            }
        }
        self.users
            .list_by_status(RegistrationStatus::Pending, role)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::JwtConfig,
        models::IdentityCard,
        services::{MemoryStore, MemoryUserRepository},
        utils::Identifier,
    };
    use chrono::Utc;

    struct Fixture {
        approvals: ApprovalService,
        users: Arc<MemoryUserRepository>,
        tokens: TokenService,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(MemoryUserRepository::new());
        let tokens = TokenService::new(
            &JwtConfig {
                secret: "unit-test-secret-that-is-long-enough-0123".to_string(),
                issuer: "onboarding-service".to_string(),
                access_token_expiry_minutes: 15,
                refresh_token_expiry_days: 7,
            },
            Arc::new(MemoryStore::new()),
        );
        let approvals =
            ApprovalService::new(users.clone(), tokens.clone(), Arc::new(Metrics::new().unwrap()));
        Fixture {
            approvals,
            users,
            tokens,
        }
    }

    async fn pending_collector(f: &Fixture, phone: &str, with_card: bool) -> User {
        let mut user = User::registered(&Identifier::phone(phone).unwrap(), Role::Pengepul);
        user.registration_status = if with_card {
            RegistrationStatus::OtpVerified
        } else {
            RegistrationStatus::Pending
        };
        user.registration_progress = PROGRESS_DATA_SUBMITTED;
        f.users.insert(&user).await.unwrap();
        if with_card {
            let applied = f
                .users
                .submit_identity_card(
                    &IdentityCard {
                        user_id: user.user_id,
                        identity_number: "3201234567890001".to_string(),
                        full_name: "Sari".to_string(),
                        address: "Jl. Kenanga 2".to_string(),
                        photo_url: "https://files.example.com/ktp.jpg".to_string(),
                        submitted_utc: Utc::now(),
                    },
                    &[RegistrationStatus::OtpVerified],
                )
                .await
                .unwrap();
            assert!(applied);
            user.registration_status = RegistrationStatus::Pending;
        }
        user
    }

    #[tokio::test]
    async fn test_approve_sets_status_and_revokes_sessions() {
        let f = fixture();
        let user = pending_collector(&f, "6281111111111", true).await;
        let pair = f
            .tokens
            .issue_pair(user.user_id, user.role, "d", user.registration_status, user.registration_progress)
            .await
            .unwrap();
        let admin = Uuid::new_v4();

        let outcome = f.approvals.approve(user.user_id, admin, None).await.unwrap();

        assert_eq!(outcome.registration_status, RegistrationStatus::Approved);
        assert_eq!(outcome.revoked_sessions, 1);
        let stored = f.users.find_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(stored.registration_status, RegistrationStatus::Approved);
        assert_eq!(stored.reviewed_by, Some(admin));
        assert_eq!(f.tokens.refresh_token_owner(&pair.refresh_token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_identity_card_blocks_without_mutation() {
        let f = fixture();
        let user = pending_collector(&f, "6281111111111", false).await;

        let err = f.approvals.approve(user.user_id, Uuid::new_v4(), None).await.unwrap_err();

        assert!(matches!(err, ApprovalError::MissingIdentityCard));
        let stored = f.users.find_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(stored.registration_status, RegistrationStatus::Pending);
        assert!(stored.reviewed_by.is_none());
    }

    #[tokio::test]
    async fn test_reject_requires_notes_and_keeps_progress() {
        let f = fixture();
        let user = pending_collector(&f, "6281111111111", true).await;

        let err = f.approvals.reject(user.user_id, Uuid::new_v4(), "  ").await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotesRequired));

        let outcome = f
            .approvals
            .reject(user.user_id, Uuid::new_v4(), "document illegible")
            .await
            .unwrap();
        assert_eq!(outcome.registration_status, RegistrationStatus::Rejected);

        let stored = f.users.find_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(stored.registration_progress, PROGRESS_DATA_SUBMITTED);
        assert_eq!(stored.review_notes.as_deref(), Some("document illegible"));
    }

    #[tokio::test]
    async fn test_citizen_is_not_eligible() {
        let f = fixture();
        let user = User::registered(&Identifier::phone("6283333333333").unwrap(), Role::Masyarakat);
        f.users.insert(&user).await.unwrap();

        let err = f.approvals.approve(user.user_id, Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, ApprovalError::RoleNotEligible(Role::Masyarakat)));
    }

    #[tokio::test]
    async fn test_second_review_is_refused() {
        let f = fixture();
        let user = pending_collector(&f, "6281111111111", true).await;
        f.approvals.approve(user.user_id, Uuid::new_v4(), None).await.unwrap();

        let err = f.approvals.approve(user.user_id, Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotPending(RegistrationStatus::Approved)));
    }

    #[tokio::test]
    async fn test_bulk_reports_each_user() {
        let f = fixture();
        let good = pending_collector(&f, "6281111111111", true).await;
        let no_card = pending_collector(&f, "6282222222222", false).await;
        let unknown = Uuid::new_v4();

        let report = f
            .approvals
            .bulk_process(&[good.user_id, no_card.user_id, unknown], ReviewAction::Approved, Uuid::new_v4(), None)
            .await;

        assert_eq!(report.successes.len(), 1);
        assert_eq!(report.successes[0].user_id, good.user_id);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].reason, "MISSING_IDENTITY_CARD");
        assert_eq!(report.failures[1].reason, "USER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_pending() {
        let f = fixture();
        let user = pending_collector(&f, "6281111111111", true).await;

        let all = f.approvals.list_pending(None).await.unwrap();
        let citizens = f.approvals.list_pending(Some(Role::Masyarakat)).await.unwrap();

        assert_eq!(all.len(), 1);
        assert_eq!(all[0].user_id, user.user_id);
        assert!(citizens.is_empty());
    }
}
