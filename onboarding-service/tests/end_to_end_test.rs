mod common;

use axum::http::{Method, StatusCode};
use common::{token, TestApp, TEST_OTP, TEST_PIN};
use onboarding_service::models::{RegistrationStatus, Role};
use serde_json::json;

#[tokio::test]
async fn test_citizen_registers_and_logs_in() {
    let app = TestApp::spawn();
    let phone = "6281234567890";

    let res = app.request_otp(phone, "masyarakat").await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["purpose"], "register");

    let res = app.verify_otp(phone, "masyarakat", TEST_OTP, "phone-1").await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["user"]["registration_status"], "incomplete");
    assert_eq!(res.body["user"]["registration_progress"], 1);
    assert_eq!(res.body["next_step"], "complete_profile");
    assert_eq!(res.body["token_type"], "partial");

    let res = app.submit_profile(token(&res.body)).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["user"]["registration_status"], "pin_verification_required");
    assert_eq!(res.body["next_step"], "create_pin");

    let res = app.create_pin(token(&res.body), TEST_PIN).await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    assert_eq!(res.body["user"]["registration_status"], "complete");
    assert_eq!(res.body["user"]["registration_progress"], 2);
    assert_eq!(res.body["next_step"], "completed");

    let res = app.verify_pin(token(&res.body), "phone-1", TEST_PIN).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["token_type"], "full");
    assert_eq!(res.body["registration"]["is_completed"], true);

    // a new device starts partial and needs the PIN
    let res = app.request_otp(phone, "masyarakat").await;
    assert_eq!(res.body["purpose"], "login");
    let res = app.verify_otp(phone, "masyarakat", TEST_OTP, "phone-2").await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["token_type"], "partial");
    assert_eq!(res.body["next_step"], "verify_pin");

    let res = app.verify_pin(token(&res.body), "phone-2", TEST_PIN).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["token_type"], "full");

    let user = app.stored_user(phone, Role::Masyarakat).await;
    assert_eq!(user.name.as_deref(), Some("Budi Santoso"));
    assert!(user.pin_hash.as_deref().is_some_and(|h| !h.contains(TEST_PIN)));
}

#[tokio::test]
async fn test_collector_rejected_then_resubmits_and_is_approved() {
    let app = TestApp::spawn();
    let admin = app.admin_token().await;
    let phone = "081666000001";

    let pending = app.pending_pengepul(phone, "phone-1").await;
    assert_eq!(pending["user"]["registration_status"], "pending");
    assert_eq!(pending["token_type"], "partial");
    let user_id = pending["user"]["user_id"].as_str().unwrap().to_string();

    let res = app
        .send(
            Method::PATCH,
            &format!("/admusers/reguser/{}", user_id),
            Some(&admin),
            None,
            Some(json!({ "action": "rejected", "notes": "document illegible" })),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["registration_status"], "rejected");

    let res = app
        .send(
            Method::GET,
            "/auth/registration-status",
            Some(token(&pending)),
            None,
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let login = app.otp_session(phone, "pengepul", "phone-1").await;
    assert_eq!(login["next_step"], "verify_pin");
    let res = app.verify_pin(token(&login), "phone-1", TEST_PIN).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["token_type"], "partial");
    assert_eq!(res.body["next_step"], "upload_identity_card");
    assert_eq!(res.body["user"]["registration_status"], "rejected");
    assert_eq!(res.body["user"]["review_notes"], "document illegible");

    let res = app.submit_identity_card(token(&res.body)).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["user"]["registration_status"], "pending");
    assert_eq!(res.body["next_step"], "awaiting_approval");

    let res = app
        .send(
            Method::PATCH,
            &format!("/admusers/reguser/{}", user_id),
            Some(&admin),
            None,
            Some(json!({ "action": "approved" })),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);

    let login = app.otp_session(phone, "pengepul", "phone-1").await;
    let res = app.verify_pin(token(&login), "phone-1", TEST_PIN).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["token_type"], "full");
    assert_eq!(res.body["next_step"], "completed");

    let stored = app.stored_user(phone, Role::Pengepul).await;
    assert_eq!(stored.registration_status, RegistrationStatus::Approved);
    assert_eq!(stored.registration_progress, 2);
}

#[tokio::test]
async fn test_waste_bank_manager_flow() {
    let app = TestApp::spawn();
    let admin = app.admin_token().await;
    let phone = "081666000002";

    let session = app.register_through_pin(phone, "pengelola", "tablet-1").await;
    assert_eq!(session["next_step"], "submit_company_profile");

    // collectors' document route is closed to this role
    let res = app.submit_identity_card(token(&session)).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["code"], "ROLE_NOT_ALLOWED");

    let res = app.submit_company_profile(token(&session)).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["next_step"], "awaiting_approval");
    let user_id = res.body["user"]["user_id"].as_str().unwrap().to_string();

    let res = app
        .send(
            Method::GET,
            "/admusers/pending?role=pengelola",
            Some(&admin),
            None,
            None,
        )
        .await;
    assert_eq!(res.body["total"], 1);
    assert_eq!(res.body["users"][0]["user_id"], user_id.as_str());

    let res = app
        .send(
            Method::PATCH,
            &format!("/admusers/reguser/{}", user_id),
            Some(&admin),
            None,
            Some(json!({ "action": "approve" })),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["registration_status"], "approved");
}
