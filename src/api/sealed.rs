//! Envelope-aware request bodies and signed responses

use axum::{
    async_trait,
    body::to_bytes,
    extract::{FromRequest, Request},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};

use super::error::{ApiError, ApiResult};
use super::state::ApiState;
use crate::transport::envelope::{
    ENCRYPTED_HEADER, EnvelopeHeaders, EnvelopeOpener, HASH_HEADER, MAX_PAYLOAD_BYTES,
};

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = MAX_PAYLOAD_BYTES;

/// JSON body that has passed envelope opening
///
/// The body is decrypted, checked against the signature header and
/// decompressed before it is deserialized into `T`.
pub struct SealedJson<T>(pub T);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[async_trait]
impl<T> FromRequest<ApiState> for SealedJson<T>
where
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &ApiState) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let body = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("failed to read body: {e}")))?;

        let headers = EnvelopeHeaders {
            content_encoding: header_str(&parts.headers, header::CONTENT_ENCODING.as_str()),
            signature: header_str(&parts.headers, HASH_HEADER),
            encrypted: header_str(&parts.headers, ENCRYPTED_HEADER),
        };

        let payload = state.opener.open(&body, &headers)?;
        Ok(SealedJson(serde_json::from_slice(&payload)?))
    }
}

/// Serialize `payload` as a JSON response, signed when a secret is configured
pub fn signed_json<T: Serialize>(opener: &EnvelopeOpener, payload: &T) -> ApiResult<Response> {
    let body = serde_json::to_vec(payload).map_err(|e| ApiError::Internal(e.to_string()))?;
    let signature = opener.sign_response(&body)?;

    let mut response = (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )],
        body,
    )
        .into_response();

    if let Some(signature) = signature {
        let value =
            HeaderValue::from_str(&signature).map_err(|e| ApiError::Internal(e.to_string()))?;
        response.headers_mut().insert(HASH_HEADER, value);
    }

    Ok(response)
}
