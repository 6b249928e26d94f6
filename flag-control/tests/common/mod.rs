use std::net::SocketAddr;
use std::sync::Arc;

use common_redis::MockRedisClient;
use reqwest::header::CONTENT_TYPE;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use flag_control::api::auth::ADMIN_KEY_HEADER;
use flag_control::config::Config;
use flag_control::router;
use flag_control::test_utils::{test_admin_directory, RecordingAuditSink};

pub struct ServerHandle {
    pub addr: SocketAddr,
    pub store: MockRedisClient,
    pub audit: Arc<RecordingAuditSink>,
    client: reqwest::Client,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    /// Serves the full router against `store`, with the admin keys from
    /// [`test_admin_directory`].
    pub async fn for_store(config: Config, store: MockRedisClient) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();
        let audit = Arc::new(RecordingAuditSink::default());

        let app = router::router(
            Arc::new(store.clone()),
            Arc::new(test_admin_directory()),
            audit.clone(),
            config,
        );

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { notify.notified().await })
                .await
                .unwrap()
        });

        ServerHandle {
            addr,
            store,
            audit,
            client: reqwest::Client::new(),
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str, admin_key: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(key) = admin_key {
            request = request.header(ADMIN_KEY_HEADER, key);
        }
        request.send().await.expect("failed to send request")
    }

    pub async fn create(&self, name: &str, admin_key: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/feature/{name}")))
            .header(ADMIN_KEY_HEADER, admin_key)
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn update<T: Into<reqwest::Body>>(
        &self,
        name: &str,
        admin_key: &str,
        body: T,
    ) -> reqwest::Response {
        self.client
            .patch(self.url(&format!("/feature/{name}")))
            .header(ADMIN_KEY_HEADER, admin_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn delete(&self, name: &str, admin_key: &str) -> reqwest::Response {
        self.client
            .delete(self.url(&format!("/feature/{name}")))
            .header(ADMIN_KEY_HEADER, admin_key)
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn restore(&self, name: &str, admin_key: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/feature/{name}/restore")))
            .header(ADMIN_KEY_HEADER, admin_key)
            .send()
            .await
            .expect("failed to send request")
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}
