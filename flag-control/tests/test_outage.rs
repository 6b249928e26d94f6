use anyhow::Result;
use assert_json_diff::assert_json_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common_redis::{CustomRedisError, MockRedisClient};
use flag_control::config::DEFAULT_TEST_CONFIG;

pub mod common;
use common::ServerHandle;

async fn server_with_flags() -> Result<ServerHandle> {
    let server = ServerHandle::for_store(DEFAULT_TEST_CONFIG.clone(), MockRedisClient::new()).await;

    for name in ["on", "off"] {
        assert_eq!(server.create(name, "root-key").await.status(), StatusCode::CREATED);
    }
    let res = server.update("on", "root-key", r#"{"enabled": true}"#).await;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(server)
}

#[tokio::test]
async fn it_reads_from_the_local_cache_during_an_outage() -> Result<()> {
    let server = server_with_flags().await?;
    server.store.go_offline();

    let on: Value = server.get("/feature/status/on", None).await.json().await?;
    assert_json_eq!(
        on,
        json!({"feature": "on", "exists": true, "active": true, "source": "local_cache"})
    );

    let off: Value = server.get("/feature/status/off", None).await.json().await?;
    assert_eq!(off["active"], json!(false));

    let never: Value = server.get("/feature/status/never", None).await.json().await?;
    assert_json_eq!(
        never,
        json!({"feature": "never", "exists": false, "active": false, "source": "local_cache"})
    );
    Ok(())
}

#[tokio::test]
async fn it_lists_from_the_local_cache_during_an_outage() -> Result<()> {
    let server = server_with_flags().await?;
    server.store.set_failure(Some(CustomRedisError::Timeout));

    let res = server.get("/features", None).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_json_eq!(
        res.json::<Value>().await?,
        json!({
            "features": {"on": {"enabled": true}, "off": {"enabled": false}},
            "source": "local_cache"
        })
    );
    Ok(())
}

#[tokio::test]
async fn it_refuses_writes_during_an_outage() -> Result<()> {
    let server = server_with_flags().await?;
    let events_before = server.audit.events().len();
    server.store.go_offline();

    for res in [
        server.create("new", "root-key").await,
        server.update("on", "root-key", r#"{"enabled": false}"#).await,
        server.delete("on", "root-key").await,
        server.restore("on", "root-key").await,
    ] {
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_json_eq!(
            res.json::<Value>().await?,
            json!({"error": "Feature service temporarily unavailable", "code": "service_unavailable"})
        );
    }
    assert_eq!(server.audit.events().len(), events_before);

    // The failed update did not touch the cache.
    let on: Value = server.get("/feature/status/on", None).await.json().await?;
    assert_eq!(on["active"], json!(true));
    assert_eq!(on["source"], json!("local_cache"));
    Ok(())
}

#[tokio::test]
async fn it_recovers_when_the_store_comes_back() -> Result<()> {
    let server = server_with_flags().await?;
    server.store.go_offline();
    let res = server.update("on", "root-key", r#"{"enabled": false}"#).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    server.store.go_online();
    let res = server.update("on", "root-key", r#"{"enabled": false}"#).await;
    assert_eq!(res.status(), StatusCode::OK);

    server.store.go_offline();
    let on: Value = server.get("/feature/status/on", None).await.json().await?;
    assert_eq!(on["active"], json!(false));
    Ok(())
}

#[tokio::test]
async fn it_starts_with_an_empty_cache() -> Result<()> {
    let mut store = MockRedisClient::new();
    store.with_value("feature:on", "1");
    store.go_offline();
    let server = ServerHandle::for_store(DEFAULT_TEST_CONFIG.clone(), store).await;

    let on: Value = server.get("/feature/status/on", None).await.json().await?;
    assert_eq!(on["active"], json!(false));

    let listing: Value = server.get("/features", None).await.json().await?;
    assert_json_eq!(listing, json!({"features": {}, "source": "local_cache"}));
    Ok(())
}
