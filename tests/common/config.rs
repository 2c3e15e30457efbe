//! Test configuration and backend mocks

use protected_dl::{Config, Downloader, ExposureConfig, PersistenceConfig};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{CONTENT_ID, FakeTransferEngine, expected_spc};

pub const CUSTOMER: &str = "cu";
pub const BUSINESS_UNIT: &str = "bu";
pub const SESSION_TOKEN: &str = "session-token";

/// Path of the download entitlement endpoint for `asset_id`
pub fn entitlement_path(asset_id: &str) -> String {
    format!("/v1/customer/{CUSTOMER}/businessunit/{BUSINESS_UNIT}/entitlement/{asset_id}/download")
}

/// Configuration pointing at `server`, with the database under `dir`
pub fn test_config(server: &MockServer, dir: &TempDir) -> Config {
    Config {
        exposure: ExposureConfig {
            base_url: server.uri(),
            customer: CUSTOMER.to_string(),
            business_unit: BUSINESS_UNIT.to_string(),
            session_token: Some(SESSION_TOKEN.to_string()),
            request_timeout: None,
        },
        persistence: PersistenceConfig {
            database_path: dir.path().join("sessions.db"),
        },
        ..Default::default()
    }
}

/// A downloader talking to the mock backend, plus its fake transfer engine
pub struct TestDownloader {
    pub downloader: Downloader,
    pub transfer: Arc<FakeTransferEngine>,
}

pub async fn create_test_downloader(server: &MockServer, dir: &TempDir) -> TestDownloader {
    let transfer = FakeTransferEngine::new(dir.path().join("media"));
    let downloader = Downloader::new(test_config(server, dir), transfer.clone())
        .await
        .unwrap();
    TestDownloader {
        downloader,
        transfer,
    }
}

/// Grant `asset_id` with FairPlay endpoints on the same server
pub async fn mount_entitlement(server: &MockServer, asset_id: &str, expected: u64) {
    Mock::given(method("GET"))
        .and(path(entitlement_path(asset_id)))
        .and(header("authorization", format!("Bearer {SESSION_TOKEN}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "playToken": "play-token",
            "mediaLocator": format!("https://cdn.example.com/{asset_id}/master.m3u8"),
            "fairplay": {
                "certificateUrl": format!("{}/fairplay/certificate", server.uri()),
                "licenseAcquisitionUrl": format!("{}/fairplay/license", server.uri())
            },
            "playSessionId": "ps-1"
        })))
        .expect(expected)
        .mount(server)
        .await;
}

/// Serve the application certificate `CERT`
pub async fn mount_certificate(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/fairplay/certificate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"certificate": "Q0VSVA=="})))
        .mount(server)
        .await;
}

/// Answer the fake task's SPC with the CKC `KEY`
pub async fn mount_license(server: &MockServer) {
    mount_license_response(
        server,
        ResponseTemplate::new(200).set_body_json(json!({"ckc": "S0VZ"})),
    )
    .await;
}

pub async fn mount_license_response(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/fairplay/license"))
        .and(body_json(json!({
            "mediaId": CONTENT_ID,
            "spc": expected_spc(),
        })))
        .respond_with(response)
        .mount(server)
        .await;
}
