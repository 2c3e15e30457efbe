//! Certificate and license endpoint exchanges.
//!
//! Certificate: `GET <certificateUrl>` → `{"certificate": "<base64>"}`.
//! License: `POST <licenseUrl>` with `{"mediaId": "...", "spc": "<base64>"}`
//! → `{"ckc": "<base64>"}`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{KeyExchangeError, NetworkError};

#[derive(Debug, Deserialize)]
struct CertificateEnvelope {
    certificate: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LicenseRequest<'a> {
    media_id: &'a str,
    spc: String,
}

/// Decode base64 tolerating line breaks and padding whitespace
fn decode_base64(text: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact)
}

/// Extract the raw application certificate from its JSON envelope
pub fn parse_application_certificate(body: &[u8]) -> Result<Vec<u8>, KeyExchangeError> {
    let envelope: CertificateEnvelope = serde_json::from_slice(body).map_err(|e| {
        KeyExchangeError::ApplicationCertificateDataFormatInvalid {
            reason: format!("envelope: {}", e),
        }
    })?;

    let certificate = decode_base64(&envelope.certificate).map_err(|e| {
        KeyExchangeError::ApplicationCertificateDataFormatInvalid {
            reason: format!("base64: {}", e),
        }
    })?;

    if certificate.is_empty() {
        return Err(KeyExchangeError::ApplicationCertificateDataFormatInvalid {
            reason: "empty certificate".to_string(),
        });
    }

    Ok(certificate)
}

/// Extract the raw content key context from the license response
pub fn parse_content_key_context(body: &[u8]) -> Result<Vec<u8>, KeyExchangeError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        KeyExchangeError::ContentKeyContextDataFormatInvalid {
            reason: format!("envelope: {}", e),
        }
    })?;

    let ckc = value
        .get("ckc")
        .and_then(serde_json::Value::as_str)
        .filter(|ckc| !ckc.is_empty())
        .ok_or(KeyExchangeError::MissingContentKeyContext)?;

    decode_base64(ckc).map_err(|e| KeyExchangeError::ContentKeyContextDataFormatInvalid {
        reason: format!("base64: {}", e),
    })
}

async fn success_body(response: reqwest::Response) -> Result<Vec<u8>, NetworkError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.ok().filter(|b| !b.is_empty());
        return Err(NetworkError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.bytes().await?.to_vec())
}

/// Fetch and decode the application certificate
pub(crate) async fn fetch_application_certificate(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<u8>, KeyExchangeError> {
    let body = async {
        let response = client.get(url).send().await?;
        success_body(response).await
    }
    .await
    .map_err(KeyExchangeError::ApplicationCertificateTransport)?;

    parse_application_certificate(&body)
}

/// Post the SPC and decode the returned content key context
pub(crate) async fn fetch_content_key_context(
    client: &reqwest::Client,
    url: &str,
    media_id: &str,
    spc: &[u8],
) -> Result<Vec<u8>, KeyExchangeError> {
    let request = LicenseRequest {
        media_id,
        spc: STANDARD.encode(spc),
    };

    let body = async {
        let response = client.post(url).json(&request).send().await?;
        success_body(response).await
    }
    .await
    .map_err(KeyExchangeError::ContentKeyContextTransport)?;

    parse_content_key_context(&body)
}
