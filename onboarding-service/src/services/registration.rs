use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::{
    models::{CompanyProfile, IdentityCard, ProfileUpdate, RegistrationStatus, Role, User},
    utils::Identifier,
};

use super::{ServiceError, UserRepository};

/// Statuses from which role documents may be (re)submitted.
const DOCUMENT_STAGE: [RegistrationStatus; 2] =
    [RegistrationStatus::OtpVerified, RegistrationStatus::Rejected];

/// Profile and document submission.
#[derive(Clone)]
pub struct RegistrationService {
    users: Arc<dyn UserRepository>,
}

impl RegistrationService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    async fn load(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    #[instrument(skip(self, profile))]
    pub async fn submit_profile(
        &self,
        user_id: Uuid,
        profile: &ProfileUpdate,
    ) -> Result<User, ServiceError> {
        if !self.users.submit_profile(user_id, profile).await? {
            let user = self.load(user_id).await?;
            return Err(ServiceError::StatusNotAllowed(format!(
                "Profile cannot be submitted while status is {}",
                user.registration_status
            )));
        }

        tracing::info!(user_id = %user_id, "Profile submitted");
        self.load(user_id).await
    }

    #[instrument(skip(self, card), fields(user_id = %card.user_id))]
    pub async fn submit_identity_card(&self, card: &IdentityCard) -> Result<User, ServiceError> {
        self.ensure_document_stage(card.user_id, Role::Pengepul)
            .await?;
        let applied = self
            .users
            .submit_identity_card(card, &DOCUMENT_STAGE)
            .await?;
        self.submitted(card.user_id, applied).await
    }

    #[instrument(skip(self, profile), fields(user_id = %profile.user_id))]
    pub async fn submit_company_profile(
        &self,
        profile: &CompanyProfile,
    ) -> Result<User, ServiceError> {
        self.ensure_document_stage(profile.user_id, Role::Pengelola)
            .await?;
        let applied = self
            .users
            .submit_company_profile(profile, &DOCUMENT_STAGE)
            .await?;
        self.submitted(profile.user_id, applied).await
    }

    async fn ensure_document_stage(&self, user_id: Uuid, role: Role) -> Result<(), ServiceError> {
        let user = self.load(user_id).await?;
        if user.role != role {
            return Err(ServiceError::StatusNotAllowed(format!(
                "This document is only submitted by {}",
                role
            )));
        }
        if !DOCUMENT_STAGE.contains(&user.registration_status) {
            return Err(ServiceError::StatusNotAllowed(format!(
                "Documents cannot be submitted while status is {}",
                user.registration_status
            )));
        }
        Ok(())
    }

    async fn submitted(&self, user_id: Uuid, applied: bool) -> Result<User, ServiceError> {
        if !applied {
            return Err(ServiceError::StatusNotAllowed(
                "Registration status changed during submission".to_string(),
            ));
        }

        tracing::info!(user_id = %user_id, "Documents submitted for review");
        self.load(user_id).await
    }

    /// Creates the provisioned administrator when it does not exist yet.
    pub async fn bootstrap_administrator(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<User>, ServiceError> {
        if self
            .users
            .find_by_identifier(identifier, Role::Administrator)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let admin = User::registered(identifier, Role::Administrator);
        match self.users.insert(&admin).await {
            Ok(()) => {
                tracing::info!(user_id = %admin.user_id, admin = %identifier, "Administrator provisioned");
                Ok(Some(admin))
            }
            Err(ServiceError::UserAlreadyExists) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
