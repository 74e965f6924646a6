use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::{Role, UserResponse},
    services::ReviewAction,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReviewRequest {
    pub action: ReviewAction,

    /// Required when rejecting.
    #[validate(length(max = 1000, message = "Notes are too long"))]
    #[schema(example = "document illegible")]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct BulkReviewRequest {
    #[validate(length(min = 1, max = 100, message = "Between 1 and 100 user ids"))]
    pub user_ids: Vec<Uuid>,

    pub action: ReviewAction,

    #[validate(length(max = 1000, message = "Notes are too long"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PendingQuery {
    /// Only users with this role
    #[param(example = "pengepul")]
    pub role: Option<Role>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingUsersResponse {
    pub total: usize,
    pub users: Vec<UserResponse>,
}
