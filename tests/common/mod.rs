use std::time::Duration;

use blog_api::{get_random_free_port, run_app, BootstrapAdmin, Config};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tempfile::TempDir;

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin-password";

/// A server running against a fresh database; dropping it deletes the database directory.
pub struct TestApp {
    pub base_url: String,
    pub client: Client,
    _dir: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let dir = TempDir::new().unwrap();
        let (_, address) = get_random_free_port().unwrap();
        let config = Config {
            database_url: format!("sqlite://{}", dir.path().join("blog.db").display()),
            jwt_secret: "integration-secret".to_owned(),
            jwt_expiry_days: 1,
            bind_address: address,
            upload_dir: dir.path().join("upload"),
            request_timeout: Duration::from_secs(10),
            bootstrap_admin: Some(BootstrapAdmin {
                name: "Admin".to_owned(),
                email: ADMIN_EMAIL.to_owned(),
                password: ADMIN_PASSWORD.to_owned(),
            }),
        };
        tokio::spawn(run_app(config));

        let app = TestApp {
            base_url: format!("http://{}", address),
            client: Client::new(),
            _dir: dir,
        };
        app.wait_until_alive().await;
        app
    }

    async fn wait_until_alive(&self) {
        for _ in 0..50 {
            if let Ok(response) = self.client.get(self.url("/check_health")).send().await {
                if response.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("server at {} never became healthy", self.base_url);
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.client.put(self.url(path))
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.client.patch(self.url(path))
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path))
    }

    pub async fn login(&self, email: &str, password: &str) -> String {
        let body = self
            .post("/login")
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap();
        body["data"]["token"].as_str().unwrap().to_owned()
    }

    pub async fn admin_token(&self) -> String {
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await
    }

    /// Registers a reader account and returns its token.
    pub async fn register(&self, name: &str) -> String {
        let response = self
            .post("/register")
            .json(&serde_json::json!({
                "name": name,
                "email": format!("{}@example.com", name.to_lowercase()),
                "password": "password123",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        let body = response.json::<Value>().await.unwrap();
        body["data"]["token"].as_str().unwrap().to_owned()
    }
}

/// Splits a response into its status code and JSON envelope.
pub async fn envelope(response: Response) -> (u16, Value) {
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.unwrap();
    (status, body)
}
