// Field-wrapper validation runs before any database work, so these pass
// with or without a reachable database behind the server.
mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn create_pool_rejects_empty_name() -> Result<()> {
    let server = common::ensure_server().await?;
    let token = common::bearer_token("ops@example.com")?;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/api/pools", server.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "name": { "value": "   ", "value_type": "string" },
            "parent_id": { "value": uuid::Uuid::new_v4(), "value_type": "uuid" },
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["success"], json!(false));
    assert!(body["message"].as_str().unwrap_or_default().contains("name"));
    Ok(())
}

#[tokio::test]
async fn add_device_rejects_malformed_uuid() -> Result<()> {
    let server = common::ensure_server().await?;
    let token = common::bearer_token("ops@example.com")?;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/api/pools/devices", server.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "pool_id": { "value": uuid::Uuid::new_v4(), "value_type": "uuid" },
            "device_id": { "value": "not-a-uuid", "value_type": "uuid" },
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = res.json::<serde_json::Value>().await?;
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("device_id"));
    Ok(())
}

#[tokio::test]
async fn invite_rejects_invalid_email() -> Result<()> {
    let server = common::ensure_server().await?;
    let token = common::bearer_token("ops@example.com")?;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/api/org/invite", server.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "target_email": { "value": "not-an-email", "value_type": "email" },
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn wrong_value_type_tag_is_rejected() -> Result<()> {
    let server = common::ensure_server().await?;
    let token = common::bearer_token("ops@example.com")?;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/api/devices", server.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "name": { "value": "sensor-7", "value_type": "int" },
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}
