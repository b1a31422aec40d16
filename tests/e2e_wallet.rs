//! E2E tests for wallet ledger endpoints

mod common;

use common::{TestServer, decimal};
use reelpass::data::AccessType;
use rust_decimal::Decimal;
use serde_json::{Value, json};

#[tokio::test]
async fn test_insufficient_balance_blocks_purchase() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let movie = server
        .create_content(AccessType::Purchase, Decimal::new(15, 0), 2)
        .await;
    server.fund(&token, "10", "pay-1").await;

    let response = server
        .rpc(
            "purchase_content_with_wallet",
            Some(&token),
            json!({ "content_id": movie.id, "amount": "15", "currency": "USD" }),
        )
        .await;
    assert_eq!(response.status(), 402);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INSUFFICIENT_FUNDS");

    let summary: Value = server.get("/api/v1/wallet", &token).await.json().await.unwrap();
    assert_eq!(decimal(&summary["balance"]), Decimal::new(10, 0));
    assert_eq!(summary["transaction_count"], 1);
}

#[tokio::test]
async fn test_purchase_debits_wallet() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let movie = server
        .create_content(AccessType::Purchase, Decimal::new(15, 0), 2)
        .await;
    server.fund(&token, "20", "pay-1").await;

    let response = server
        .rpc(
            "purchase_content_with_wallet",
            Some(&token),
            json!({ "content_id": movie.id, "amount": "15" }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["success"], true);
    assert_eq!(decimal(&outcome["new_balance"]), Decimal::new(5, 0));
    assert!(outcome["transaction_id"].is_string());
    assert!(outcome["expires_at"].is_string());

    let again = server
        .rpc(
            "purchase_content_with_wallet",
            Some(&token),
            json!({ "content_id": movie.id, "amount": "15" }),
        )
        .await;
    assert_eq!(again.status(), 409);
    let body: Value = again.json().await.unwrap();
    assert_eq!(body["code"], "ALREADY_ACTIVE");
}

#[tokio::test]
async fn test_top_up_is_idempotent() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");

    let first: Value = server
        .rpc(
            "add_wallet_funds",
            Some(&token),
            json!({ "amount": "12.50", "transaction_id": "stripe_pi_1" }),
        )
        .await
        .json()
        .await
        .unwrap();
    let replay: Value = server
        .rpc(
            "add_wallet_funds",
            Some(&token),
            json!({ "amount": "12.50", "transaction_id": "stripe_pi_1" }),
        )
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(first["applied"], true);
    assert_eq!(replay["applied"], false);
    assert_eq!(decimal(&replay["new_balance"]), Decimal::new(1250, 2));

    let summary: Value = server.get("/api/v1/wallet", &token).await.json().await.unwrap();
    assert_eq!(summary["transaction_count"], 1);
    assert_eq!(summary["currency"], "USD");
}

#[tokio::test]
async fn test_body_user_must_match_session() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");

    let response = server
        .rpc(
            "add_wallet_funds",
            Some(&token),
            json!({ "user_id": "viewer-2", "amount": "5", "transaction_id": "pay-1" }),
        )
        .await;
    assert_eq!(response.status(), 403);

    let same_user = server
        .rpc(
            "add_wallet_funds",
            Some(&token),
            json!({ "user_id": "viewer-1", "amount": "5", "transaction_id": "pay-1" }),
        )
        .await;
    assert_eq!(same_user.status(), 200);
}

#[tokio::test]
async fn test_ledger_requires_session() {
    let server = TestServer::new().await;

    let response = server
        .rpc(
            "add_wallet_funds",
            None,
            json!({ "amount": "5", "transaction_id": "pay-1" }),
        )
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_invalid_amount_is_rejected() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");

    for amount in ["0", "-3", "1.00001"] {
        let response = server
            .rpc(
                "add_wallet_funds",
                Some(&token),
                json!({ "amount": amount, "transaction_id": format!("pay-{amount}") }),
            )
            .await;
        assert_eq!(response.status(), 400, "amount {amount}");
    }
}

#[tokio::test]
async fn test_support_and_history() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let show = server
        .create_content(AccessType::Membership, Decimal::ZERO, 2)
        .await;
    server.fund(&token, "10", "pay-1").await;

    let tip: Value = server
        .rpc(
            "support_content_with_wallet",
            Some(&token),
            json!({ "content_id": show.id, "amount": "2.5" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(decimal(&tip["new_balance"]), Decimal::new(75, 1));

    let history: Vec<Value> = server
        .get("/api/v1/wallet/transactions?limit=10", &token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["category"], "support");
    assert_eq!(decimal(&history[0]["amount"]), Decimal::new(-25, 1));
    assert_eq!(history[1]["category"], "top_up");

    let older: Vec<Value> = server
        .get(
            &format!(
                "/api/v1/wallet/transactions?max_id={}",
                history[0]["id"].as_str().unwrap()
            ),
            &token,
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(older.len(), 1);
    assert_eq!(older[0]["category"], "top_up");

    let supports: Vec<Value> = server
        .get("/api/v1/wallet/supports", &token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(supports.len(), 1);
    assert_eq!(supports[0]["content_id"], show.id.as_str());
    assert_eq!(decimal(&supports[0]["amount"]), Decimal::new(25, 1));

    let access: Value = server
        .rpc(
            "check_content_access",
            Some(&token),
            json!({ "content_id": show.id }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(access["has_access"], false);
}

#[tokio::test]
async fn test_reconcile_reports_consistent_wallet() {
    let server = TestServer::new().await;
    let token = server.create_test_token("viewer-1");
    let plan = server.create_plan(Decimal::new(4, 0), 2).await;
    server.fund(&token, "10", "pay-1").await;
    server
        .rpc(
            "purchase_membership_with_wallet",
            Some(&token),
            json!({ "plan_id": plan.id, "amount": "4" }),
        )
        .await;

    let report: Value = server
        .get("/api/v1/wallet/reconcile", &token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report["consistent"], true);
    assert_eq!(decimal(&report["balance"]), Decimal::new(6, 0));
    assert_eq!(decimal(&report["ledger_sum"]), Decimal::new(6, 0));
}
