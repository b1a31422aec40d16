//! E2E tests for access checks and device sessions

mod common;

use chrono::{Duration, Utc};
use common::TestServer;
use reelpass::data::{AccessType, NewContentPurchase};
use rust_decimal::Decimal;
use serde_json::{Value, json};

#[tokio::test]
async fn test_free_content_is_open_to_anonymous_viewers() {
    let server = TestServer::new().await;
    let trailer = server
        .create_content(AccessType::Free, Decimal::ZERO, 1)
        .await;

    let response = server
        .rpc(
            "check_content_access",
            None,
            json!({ "content_id": trailer.id }),
        )
        .await;

    assert_eq!(response.status(), 200);
    let decision: Value = response.json().await.unwrap();
    assert_eq!(decision["has_access"], true);
    assert_eq!(decision["reason"], "FREE");
}

#[tokio::test]
async fn test_paid_content_requires_session() {
    let server = TestServer::new().await;
    let movie = server
        .create_content(AccessType::Purchase, Decimal::new(15, 0), 2)
        .await;

    let response = server
        .rpc(
            "check_content_access",
            None,
            json!({ "content_id": movie.id }),
        )
        .await;

    let decision: Value = response.json().await.unwrap();
    assert_eq!(decision["has_access"], false);
    assert_eq!(decision["reason"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_unknown_and_malformed_content() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");

    let unknown = server
        .rpc(
            "check_content_access",
            Some(&token),
            json!({ "content_id": reelpass::data::EntityId::new().0 }),
        )
        .await;
    assert_eq!(unknown.status(), 404);
    let body: Value = unknown.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");

    let malformed = server
        .rpc(
            "check_content_access",
            Some(&token),
            json!({ "content_id": "not-an-id" }),
        )
        .await;
    assert_eq!(malformed.status(), 400);
    let body: Value = malformed.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_purchase_grants_access_until_device_cap() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let movie = server
        .create_content(AccessType::Purchase, Decimal::new(15, 0), 2)
        .await;

    let before: Value = server
        .rpc(
            "check_content_access",
            Some(&token),
            json!({ "content_id": movie.id }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(before["reason"], "NO_PURCHASE");

    server.fund(&token, "20", "pay-1").await;
    let purchase = server
        .rpc(
            "purchase_content_with_wallet",
            Some(&token),
            json!({ "content_id": movie.id, "amount": "15" }),
        )
        .await;
    assert_eq!(purchase.status(), 200);

    for device in ["living-room-tv", "phone"] {
        let registered: bool = server
            .rpc(
                "register_device_session",
                Some(&token),
                json!({
                    "content_id": movie.id,
                    "device_id": device,
                    "device_info": { "platform": "test" }
                }),
            )
            .await
            .json()
            .await
            .unwrap();
        assert!(registered, "{device} should fit under the cap");
    }

    let third: bool = server
        .rpc(
            "register_device_session",
            Some(&token),
            json!({ "content_id": movie.id, "device_id": "tablet" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert!(!third);

    let on_tablet: Value = server
        .rpc(
            "check_content_access",
            Some(&token),
            json!({ "content_id": movie.id, "device_id": "tablet" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(on_tablet["has_access"], false);
    assert_eq!(on_tablet["reason"], "DEVICE_LIMIT_REACHED");
    assert_eq!(on_tablet["devices_used"], 2);
    assert_eq!(on_tablet["max_devices"], 2);

    let on_phone: Value = server
        .rpc(
            "check_content_access",
            Some(&token),
            json!({ "content_id": movie.id, "device_id": "phone" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(on_phone["has_access"], true);
    assert_eq!(on_phone["reason"], "PURCHASE_ACTIVE");

    let devices: Vec<Value> = server
        .get(&format!("/api/v1/contents/{}/devices", movie.id), &token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(devices.len(), 2);
    assert!(
        devices
            .iter()
            .any(|d| d["device_id"] == "living-room-tv" && d["device_info"]["platform"] == "test")
    );

    let removed: bool = server
        .rpc(
            "deactivate_device_session",
            Some(&token),
            json!({ "content_id": movie.id, "device_id": "phone" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert!(removed);

    let tablet_again: bool = server
        .rpc(
            "register_device_session",
            Some(&token),
            json!({ "content_id": movie.id, "device_id": "tablet" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert!(tablet_again);
}

#[tokio::test]
async fn test_membership_unlocks_membership_content() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let series = server
        .create_content(AccessType::Membership, Decimal::ZERO, 1)
        .await;
    let plan = server.create_plan(Decimal::new(999, 2), 4).await;

    let before: Value = server
        .rpc(
            "check_content_access",
            Some(&token),
            json!({ "content_id": series.id }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(before["reason"], "NO_MEMBERSHIP");

    server.fund(&token, "9.99", "pay-1").await;
    let bought = server
        .rpc(
            "purchase_membership_with_wallet",
            Some(&token),
            json!({ "plan_id": plan.id, "amount": "9.99" }),
        )
        .await;
    assert_eq!(bought.status(), 200);

    let after: Value = server
        .rpc(
            "check_content_access",
            Some(&token),
            json!({ "content_id": series.id, "device_id": "tv" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(after["has_access"], true);
    assert_eq!(after["reason"], "MEMBERSHIP_ACTIVE");
    assert_eq!(after["max_devices"], 4);
}

#[tokio::test]
async fn test_episode_override_and_parent_purchase() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let show = server
        .create_content(AccessType::Purchase, Decimal::new(5, 0), 2)
        .await;
    let pilot = server
        .create_episode(&show, 1, Some(AccessType::Free))
        .await;
    let second = server.create_episode(&show, 2, None).await;

    let pilot_decision: Value = server
        .rpc(
            "check_episode_access",
            None,
            json!({ "episode_id": pilot.id }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(pilot_decision["reason"], "FREE");

    let locked: Value = server
        .rpc(
            "check_episode_access",
            Some(&token),
            json!({ "episode_id": second.id }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(locked["reason"], "NO_PURCHASE");

    server.fund(&token, "5", "pay-1").await;
    server
        .rpc(
            "purchase_content_with_wallet",
            Some(&token),
            json!({ "content_id": show.id, "amount": 5 }),
        )
        .await;

    let unlocked: Value = server
        .rpc(
            "check_episode_access",
            Some(&token),
            json!({ "episode_id": second.id }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(unlocked["has_access"], true);
    assert_eq!(unlocked["reason"], "PURCHASE_ACTIVE");
}

#[tokio::test]
async fn test_device_registration_requires_session() {
    let server = TestServer::new().await;
    let movie = server
        .create_content(AccessType::Purchase, Decimal::new(15, 0), 2)
        .await;

    let response = server
        .rpc(
            "register_device_session",
            None,
            json!({ "content_id": movie.id, "device_id": "tv" }),
        )
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_membership_plan_cap_limits_registration() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let series = server
        .create_content(AccessType::Membership, Decimal::ZERO, 1)
        .await;
    let plan = server.create_plan(Decimal::new(5, 0), 2).await;
    server.fund(&token, "5", "pay-1").await;
    server
        .rpc(
            "purchase_membership_with_wallet",
            Some(&token),
            json!({ "plan_id": plan.id, "amount": "5" }),
        )
        .await;

    let mut outcomes = Vec::new();
    for device in ["tv", "phone", "tablet"] {
        let registered: bool = server
            .rpc(
                "register_device_session",
                Some(&token),
                json!({ "content_id": series.id, "device_id": device }),
            )
            .await
            .json()
            .await
            .unwrap();
        outcomes.push(registered);
    }
    assert_eq!(outcomes, vec![true, true, false]);

    let on_tablet: Value = server
        .rpc(
            "check_content_access",
            Some(&token),
            json!({ "content_id": series.id, "device_id": "tablet" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(on_tablet["reason"], "DEVICE_LIMIT_REACHED");
    assert_eq!(on_tablet["max_devices"], 2);
}

#[tokio::test]
async fn test_episode_device_cap_bounds_show_purchase() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let show = server
        .create_content(AccessType::Purchase, Decimal::new(5, 0), 2)
        .await;
    let finale = server
        .create_episode_with(&show, 10, None, None, Some(1))
        .await;
    server.fund(&token, "5", "pay-1").await;
    server
        .rpc(
            "purchase_content_with_wallet",
            Some(&token),
            json!({ "content_id": show.id, "amount": "5" }),
        )
        .await;

    let mut outcomes = Vec::new();
    for device in ["A", "B"] {
        let registered: bool = server
            .rpc(
                "register_device_session",
                Some(&token),
                json!({ "content_id": show.id, "episode_id": finale.id, "device_id": device }),
            )
            .await
            .json()
            .await
            .unwrap();
        outcomes.push(registered);
    }
    assert_eq!(outcomes, vec![true, false]);

    let on_b: Value = server
        .rpc(
            "check_episode_access",
            Some(&token),
            json!({ "episode_id": finale.id, "device_id": "B" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(on_b["has_access"], false);
    assert_eq!(on_b["reason"], "DEVICE_LIMIT_REACHED");
    assert_eq!(on_b["max_devices"], 1);

    let show_on_b: bool = server
        .rpc(
            "register_device_session",
            Some(&token),
            json!({ "content_id": show.id, "device_id": "B" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert!(show_on_b);
}

#[tokio::test]
async fn test_episode_can_be_bought_under_free_show() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let show = server
        .create_content(AccessType::Free, Decimal::ZERO, 2)
        .await;
    let bonus = server
        .create_episode_with(&show, 9, Some(AccessType::Purchase), Some(Decimal::new(3, 0)), None)
        .await;
    server.fund(&token, "10", "pay-1").await;

    let locked: Value = server
        .rpc(
            "check_episode_access",
            Some(&token),
            json!({ "episode_id": bonus.id }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(locked["reason"], "NO_PURCHASE");

    let whole_show = server
        .rpc(
            "purchase_content_with_wallet",
            Some(&token),
            json!({ "content_id": show.id, "amount": "3" }),
        )
        .await;
    assert_eq!(whole_show.status(), 400);

    let bought = server
        .rpc(
            "purchase_content_with_wallet",
            Some(&token),
            json!({ "content_id": show.id, "episode_id": bonus.id, "amount": "3" }),
        )
        .await;
    assert_eq!(bought.status(), 200);
    let outcome: Value = bought.json().await.unwrap();
    assert_eq!(common::decimal(&outcome["new_balance"]), Decimal::new(7, 0));

    let unlocked: Value = server
        .rpc(
            "check_episode_access",
            Some(&token),
            json!({ "episode_id": bonus.id }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(unlocked["has_access"], true);
    assert_eq!(unlocked["reason"], "PURCHASE_ACTIVE");
    assert_eq!(unlocked["max_devices"], 2);
}

#[tokio::test]
async fn test_authorize_playback_claims_a_slot() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let movie = server
        .create_content(AccessType::Purchase, Decimal::new(15, 0), 1)
        .await;

    let unpaid = server
        .rpc(
            "authorize_playback",
            Some(&token),
            json!({ "content_id": movie.id, "device_id": "tv" }),
        )
        .await;
    assert_eq!(unpaid.status(), 403);

    server.fund(&token, "15", "pay-1").await;
    server
        .rpc(
            "purchase_content_with_wallet",
            Some(&token),
            json!({ "content_id": movie.id, "amount": "15" }),
        )
        .await;

    let on_tv = server
        .rpc(
            "authorize_playback",
            Some(&token),
            json!({ "content_id": movie.id, "device_id": "tv" }),
        )
        .await;
    assert_eq!(on_tv.status(), 200);
    let decision: Value = on_tv.json().await.unwrap();
    assert_eq!(decision["reason"], "PURCHASE_ACTIVE");

    let devices: Vec<Value> = server
        .get(&format!("/api/v1/contents/{}/devices", movie.id), &token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(devices.len(), 1);

    let on_phone = server
        .rpc(
            "authorize_playback",
            Some(&token),
            json!({ "content_id": movie.id, "device_id": "phone" }),
        )
        .await;
    assert_eq!(on_phone.status(), 409);
    let body: Value = on_phone.json().await.unwrap();
    assert_eq!(body["code"], "DEVICE_LIMIT_REACHED");
}

#[tokio::test]
async fn test_authorize_playback_reports_lapsed_rental() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let movie = server
        .create_content(AccessType::Purchase, Decimal::new(15, 0), 2)
        .await;
    server.fund(&token, "15", "pay-1").await;

    let now = Utc::now();
    server
        .state
        .db
        .purchase_content(
            &NewContentPurchase {
                user_id: "viewer-1",
                content: &movie,
                units: movie.price,
                currency: "USD",
                expires_at: now - Duration::hours(1),
            },
            now - Duration::days(7),
        )
        .await
        .unwrap();

    let response = server
        .rpc(
            "authorize_playback",
            Some(&token),
            json!({ "content_id": movie.id, "device_id": "tv" }),
        )
        .await;
    assert_eq!(response.status(), 410);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "EXPIRED");
}
