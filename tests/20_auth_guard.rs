mod common;

use anyhow::Result;
use reqwest::StatusCode;

#[tokio::test]
async fn api_routes_reject_missing_token() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    for path in [
        "/api/patients",
        "/api/appointments",
        "/api/progress-notes",
        "/api/collections",
        "/api/image-tags",
        "/api/auth/whoami",
    ] {
        let res = client
            .get(format!("{}{}", server.base_url, path))
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "path: {}", path);

        let body = res.json::<serde_json::Value>().await?;
        assert_eq!(body["success"], false, "path: {}", path);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED", "path: {}", path);
    }
    Ok(())
}

#[tokio::test]
async fn api_routes_reject_malformed_bearer_token() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/api/patients", server.base_url))
        .header("Authorization", "Bearer not-a-jwt")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn login_validates_the_payload() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/auth/login", server.base_url))
        .json(&serde_json::json!({}))
        .send()
        .await?;

    // No credentials supplied at all is a validation failure, not a 401
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["details"]["field_errors"]["username"].is_string());
    Ok(())
}
