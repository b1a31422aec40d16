//! Common test utilities for E2E tests

#![allow(dead_code)]

use chrono::Utc;
use reelpass::data::{
    AccessType, Content, ContentType, DurationUnit, EntityId, Episode, MembershipPlan,
};
use reelpass::{AppState, config};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

pub fn test_config(db_path: std::path::PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            domain: "watch.test.example.com".to_string(),
            protocol: "https".to_string(),
        },
        database: config::DatabaseConfig { path: db_path },
        auth: config::AuthConfig {
            session_secret: "test-secret-key-for-e2e-tests-32-bytes".to_string(),
            session_max_age: 604800,
        },
        access: config::AccessConfig {
            device_session_window_seconds: 2_592_000,
        },
        ledger: config::LedgerConfig {
            default_currency: "USD".to_string(),
            audit_interval_seconds: 0,
            max_transaction_amount: Decimal::new(100_000, 0),
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path().join("test.db"));

        let state = AppState::new(config).await.unwrap();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = reelpass::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Create a signed session token for `user_id`
    pub fn create_test_token(&self, user_id: &str) -> String {
        self.create_token_with_lifetime(user_id, 3600)
    }

    /// Create a signed session token valid for `lifetime_seconds`
    pub fn create_token_with_lifetime(&self, user_id: &str, lifetime_seconds: i64) -> String {
        use reelpass::auth::session::{Session, create_session_token};

        let session = Session::new(user_id, Some("Test Viewer".to_string()), lifetime_seconds);
        create_session_token(&session, &self.state.config.auth.session_secret)
            .expect("Failed to create test token")
    }

    /// POST a JSON RPC, optionally authenticated
    pub async fn rpc(&self, name: &str, token: Option<&str>, body: Value) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url(&format!("/api/rpc/{}", name)))
            .json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }

    /// GET an authenticated endpoint
    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    /// Insert a catalog entry
    ///
    /// `price` is in currency units.
    pub async fn create_content(
        &self,
        access_type: AccessType,
        price: Decimal,
        max_devices: i64,
    ) -> Content {
        let now = Utc::now();
        let content = Content {
            id: EntityId::new().0,
            title: "Test Feature".to_string(),
            content_type: ContentType::Movie,
            access_type,
            price: reelpass::data::money::amount_to_units(price).unwrap_or(0),
            currency: "USD".to_string(),
            purchase_period: 7,
            max_devices,
            tmdb_id: None,
            created_at: now,
            updated_at: now,
        };
        self.state.db.insert_content(&content).await.unwrap();
        content
    }

    /// Insert an episode of `show` with an optional access type override
    pub async fn create_episode(
        &self,
        show: &Content,
        number: i64,
        access_type: Option<AccessType>,
    ) -> Episode {
        self.create_episode_with(show, number, access_type, None, None)
            .await
    }

    /// Insert an episode of `show` overriding access type, price and cap
    pub async fn create_episode_with(
        &self,
        show: &Content,
        number: i64,
        access_type: Option<AccessType>,
        price: Option<Decimal>,
        max_devices: Option<i64>,
    ) -> Episode {
        let episode = Episode {
            id: EntityId::new().0,
            content_id: show.id.clone(),
            season_id: None,
            episode_number: number,
            title: format!("Episode {}", number),
            access_type,
            price: price.map(|p| reelpass::data::money::amount_to_units(p).unwrap()),
            currency: None,
            max_devices,
            created_at: Utc::now(),
        };
        self.state.db.insert_episode(&episode).await.unwrap();
        episode
    }

    /// Insert an active membership plan
    pub async fn create_plan(&self, price: Decimal, max_devices: i64) -> MembershipPlan {
        let plan = MembershipPlan {
            id: EntityId::new().0,
            name: "Premium".to_string(),
            price: reelpass::data::money::amount_to_units(price).unwrap(),
            currency: "USD".to_string(),
            duration: 1,
            duration_unit: DurationUnit::Month,
            max_devices,
            is_active: true,
            created_at: Utc::now(),
        };
        self.state.db.insert_membership_plan(&plan).await.unwrap();
        plan
    }

    /// Credit `user_id` through the API
    pub async fn fund(&self, token: &str, amount: &str, reference: &str) {
        let response = self
            .rpc(
                "add_wallet_funds",
                Some(token),
                serde_json::json!({ "amount": amount, "transaction_id": reference }),
            )
            .await;
        assert_eq!(response.status(), 200);
    }
}

/// Parse a decimal serialized as a JSON string
pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal serialized as string")
        .parse()
        .unwrap()
}
