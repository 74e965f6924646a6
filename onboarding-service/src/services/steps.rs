//! Registration step resolution.
//!
//! Maps a user's (role, progress, status) to the step they are on. Status
//! selects the step; progress only guards completion.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{RegistrationStatus, Role, PROGRESS_DATA_SUBMITTED, PROGRESS_OTP_VERIFIED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStep {
    VerifyOtp,
    CompleteProfile,
    CreatePin,
    UploadIdentityCard,
    SubmitCompanyProfile,
    AwaitingApproval,
    Completed,
}

impl RegistrationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStep::VerifyOtp => "verify_otp",
            RegistrationStep::CompleteProfile => "complete_profile",
            RegistrationStep::CreatePin => "create_pin",
            RegistrationStep::UploadIdentityCard => "upload_identity_card",
            RegistrationStep::SubmitCompanyProfile => "submit_company_profile",
            RegistrationStep::AwaitingApproval => "awaiting_approval",
            RegistrationStep::Completed => "completed",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RegistrationStep::VerifyOtp => "Verify the one-time code sent to your phone",
            RegistrationStep::CompleteProfile => "Fill in your name, gender and address",
            RegistrationStep::CreatePin => "Create a 6-digit PIN",
            RegistrationStep::UploadIdentityCard => "Upload your identity card",
            RegistrationStep::SubmitCompanyProfile => "Submit your company profile",
            RegistrationStep::AwaitingApproval => "Your documents are being reviewed",
            RegistrationStep::Completed => "Registration complete",
        }
    }

    pub fn requires_admin_approval(&self) -> bool {
        matches!(self, RegistrationStep::AwaitingApproval)
    }
}

impl std::fmt::Display for RegistrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

use RegistrationStep::*;

const MASYARAKAT_FLOW: &[RegistrationStep] = &[VerifyOtp, CompleteProfile, CreatePin, Completed];
const PENGEPUL_FLOW: &[RegistrationStep] = &[
    VerifyOtp,
    CompleteProfile,
    CreatePin,
    UploadIdentityCard,
    AwaitingApproval,
    Completed,
];
const PENGELOLA_FLOW: &[RegistrationStep] = &[
    VerifyOtp,
    CompleteProfile,
    CreatePin,
    SubmitCompanyProfile,
    AwaitingApproval,
    Completed,
];
const ADMINISTRATOR_FLOW: &[RegistrationStep] = &[VerifyOtp, CreatePin, Completed];

/// Ordered steps a role walks through.
pub fn flow(role: Role) -> &'static [RegistrationStep] {
    match role {
        Role::Masyarakat => MASYARAKAT_FLOW,
        Role::Pengepul => PENGEPUL_FLOW,
        Role::Pengelola => PENGELOLA_FLOW,
        Role::Administrator => ADMINISTRATOR_FLOW,
    }
}

/// 1-based position of `step` in the role's flow.
pub fn step_position(role: Role, step: RegistrationStep) -> Option<usize> {
    flow(role).iter().position(|s| *s == step).map(|i| i + 1)
}

/// Document step for roles that submit documents for review.
pub fn document_step(role: Role) -> Option<RegistrationStep> {
    match role {
        Role::Pengepul => Some(UploadIdentityCard),
        Role::Pengelola => Some(SubmitCompanyProfile),
        Role::Masyarakat | Role::Administrator => None,
    }
}

pub fn terminal_progress(_role: Role) -> i32 {
    PROGRESS_DATA_SUBMITTED
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RegistrationStepInfo {
    pub step: RegistrationStep,
    pub step_number: usize,
    pub total_steps: usize,
    pub status: String,
    pub description: String,
    pub requires_admin_approval: bool,
    pub is_accessible: bool,
    pub is_completed: bool,
}

fn current_step(role: Role, progress: i32, status: RegistrationStatus) -> RegistrationStep {
    // step that raises progress to terminal when a final status arrives early
    let unfinished = || document_step(role).unwrap_or(CreatePin);

    match status {
        RegistrationStatus::Pending if role.requires_admin_approval() => AwaitingApproval,
        _ if progress < PROGRESS_OTP_VERIFIED => VerifyOtp,
        RegistrationStatus::Incomplete => {
            if step_position(role, CompleteProfile).is_some() {
                CompleteProfile
            } else {
                CreatePin
            }
        }
        RegistrationStatus::PinVerificationRequired => CreatePin,
        RegistrationStatus::OtpVerified | RegistrationStatus::Rejected => unfinished(),
        RegistrationStatus::Pending
        | RegistrationStatus::Approved
        | RegistrationStatus::Complete => {
            if progress >= terminal_progress(role) {
                Completed
            } else {
                unfinished()
            }
        }
    }
}

/// Pure mapping from a user's state to their current step.
pub fn resolve(role: Role, progress: i32, status: RegistrationStatus) -> RegistrationStepInfo {
    let step = current_step(role, progress, status);
    let steps = flow(role);
    let requires_admin_approval = step.requires_admin_approval();

    RegistrationStepInfo {
        step,
        step_number: step_position(role, step).unwrap_or(1),
        total_steps: steps.len(),
        status: status.label().to_string(),
        description: step.description().to_string(),
        requires_admin_approval,
        is_accessible: !(requires_admin_approval && status == RegistrationStatus::Pending),
        is_completed: step == Completed,
    }
}
