//! Registration check endpoint
//!
//! `POST /check-whatsapp` with `{"phoneNumber": "..."}`.
//!
//! Preconditions are checked in order: the number must be present, the
//! messaging session must be open, and the number must normalize. Only then
//! is the network queried.
//!
//! Error bodies keep the API's Portuguese wording.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::json_response;
use crate::phone;
use crate::server::AppState;
use crate::types::ServiceError;

/// Hint sent with every validation error
pub const EXPECTED_FORMAT: &str = "Formato esperado: 5548991196884 ou 48991196884";

const MISSING_NUMBER: &str = "Número de telefone é obrigatório.";

/// Successful check
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub exists: bool,
    /// Network address when registered, bare digits otherwise
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    pub status: &'static str,
}

#[derive(Serialize)]
struct ValidationBody<'a> {
    error: &'a str,
    example: &'static str,
}

#[derive(Serialize)]
struct FailureBody {
    error: &'static str,
    message: &'static str,
}

/// Handle a check request whose body has already been read
pub async fn check_whatsapp(state: Arc<AppState>, body: Bytes) -> Response<Full<Bytes>> {
    let request_id = Uuid::new_v4();

    match check(&state, &body, request_id).await {
        Ok(result) => json_response(StatusCode::OK, &result),
        Err(e) => {
            if e.is_validation() {
                debug!(%request_id, "Rejected check request: {}", e);
            }
            error_response(&e)
        }
    }
}

async fn check(
    state: &AppState,
    body: &[u8],
    request_id: Uuid,
) -> Result<CheckResponse, ServiceError> {
    let raw = extract_phone_number(body)
        .ok_or_else(|| ServiceError::BadRequest(MISSING_NUMBER.to_string()))?;

    let session = state.session.live_session().ok_or_else(|| {
        warn!(%request_id, state = %state.session.state(), "Check refused, session not open");
        ServiceError::NotConnected
    })?;

    let address = phone::normalize(&raw)?;

    let record = state
        .lookup
        .lookup(session.as_ref(), &address)
        .await
        .map_err(|e| {
            error!(%request_id, address = %address, "Registration query failed: {}", e);
            ServiceError::from(e)
        })?;

    info!(
        %request_id,
        address = %address,
        exists = record.exists,
        "Registration checked"
    );

    Ok(CheckResponse {
        exists: record.exists,
        phone_number: record.canonical_address,
        status: "success",
    })
}

/// Pull `phoneNumber` out of a JSON body.
///
/// A missing body, malformed JSON, an empty string, the number zero or a
/// value that is neither a string nor a number all count as absent.
fn extract_phone_number(body: &[u8]) -> Option<String> {
    let json: Value = serde_json::from_slice(body).ok()?;
    match json.get("phoneNumber")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

fn error_response(err: &ServiceError) -> Response<Full<Bytes>> {
    let status = err.status_code();
    match err {
        ServiceError::BadRequest(message) => json_response(
            status,
            &ValidationBody {
                error: message,
                example: EXPECTED_FORMAT,
            },
        ),
        ServiceError::InvalidPhoneNumber(invalid) => json_response(
            status,
            &ValidationBody {
                error: &invalid.to_string(),
                example: EXPECTED_FORMAT,
            },
        ),
        ServiceError::NotConnected => json_response(
            status,
            &FailureBody {
                error: "WhatsApp não está conectado.",
                message: "Aguarde alguns segundos e tente novamente",
            },
        ),
        _ => json_response(
            status,
            &FailureBody {
                error: "Erro ao verificar número no WhatsApp",
                message: "Tente novamente em alguns segundos",
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use crate::phone::PhoneAddress;
    use crate::protocol::{ProtocolError, RegistrationEntry, Session};
    use crate::session::{ConnectionState, SessionHandle, SessionSnapshot};
    use clap::Parser;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers every query with a fixed result and counts calls
    struct StubSession {
        result: Result<Vec<RegistrationEntry>, ProtocolError>,
        calls: AtomicU32,
    }

    impl StubSession {
        fn answering(result: Result<Vec<RegistrationEntry>, ProtocolError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Session for StubSession {
        async fn query_registration(
            &self,
            _address: &PhoneAddress,
        ) -> Result<Vec<RegistrationEntry>, ProtocolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }

        async fn close(&self) {}
    }

    fn state_with(state: ConnectionState, session: Option<Arc<StubSession>>) -> Arc<AppState> {
        let snapshot = SessionSnapshot {
            state,
            session: session.map(|s| s as Arc<dyn Session>),
            pairing_code: None,
        };
        let args = Args::parse_from(["wa-check"]);
        Arc::new(AppState::new(args, SessionHandle::fixed(snapshot)))
    }

    fn open_state(session: &Arc<StubSession>) -> Arc<AppState> {
        state_with(ConnectionState::Open, Some(Arc::clone(session)))
    }

    fn registered(jid: &str) -> Vec<RegistrationEntry> {
        vec![RegistrationEntry {
            jid: Some(jid.to_string()),
        }]
    }

    async fn call(state: Arc<AppState>, body: &str) -> (StatusCode, Value) {
        let response = check_whatsapp(state, Bytes::from(body.to_string())).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_registered_number() {
        let session = StubSession::answering(Ok(registered("5548991196884@s.whatsapp.net")));
        let (status, json) = call(open_state(&session), r#"{"phoneNumber":"48991196884"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            serde_json::json!({
                "exists": true,
                "phoneNumber": "5548991196884@s.whatsapp.net",
                "status": "success"
            })
        );
        assert_eq!(session.calls(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_number() {
        let session = StubSession::answering(Ok(vec![]));
        let (status, json) =
            call(open_state(&session), r#"{"phoneNumber":"+55 (11) 90000-0000"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["exists"], false);
        assert_eq!(json["phoneNumber"], "5511900000000");
        assert_eq!(json["status"], "success");
    }

    #[tokio::test]
    async fn test_numeric_phone_number() {
        let session = StubSession::answering(Ok(registered("5548991196884@s.whatsapp.net")));
        let (status, json) = call(open_state(&session), r#"{"phoneNumber":5548991196884}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["exists"], true);
    }

    #[tokio::test]
    async fn test_missing_number() {
        let session = StubSession::answering(Ok(vec![]));

        for body in [
            "{}",
            "",
            "not json",
            r#"{"phoneNumber":""}"#,
            r#"{"phoneNumber":null}"#,
            r#"{"phoneNumber":0}"#,
        ] {
            let (status, json) = call(open_state(&session), body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {:?}", body);
            assert_eq!(json["error"], MISSING_NUMBER);
            assert_eq!(json["example"], EXPECTED_FORMAT);
        }
        assert_eq!(session.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_number_checked_before_connection() {
        let state = state_with(ConnectionState::Disconnected, None);
        let (status, json) = call(state, "{}").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], MISSING_NUMBER);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let session = StubSession::answering(Ok(vec![]));
        let state = state_with(ConnectionState::Connecting, Some(Arc::clone(&session)));
        let (status, json) = call(state, r#"{"phoneNumber":"48991196884"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "WhatsApp não está conectado.");
        assert_eq!(json["message"], "Aguarde alguns segundos e tente novamente");
        assert_eq!(session.calls(), 0);
    }

    #[tokio::test]
    async fn test_connection_checked_before_normalization() {
        let state = state_with(ConnectionState::Disconnected, None);
        let (status, json) = call(state, r#"{"phoneNumber":"123"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "WhatsApp não está conectado.");
    }

    #[tokio::test]
    async fn test_invalid_number() {
        let session = StubSession::answering(Ok(vec![]));
        let (status, json) = call(open_state(&session), r#"{"phoneNumber":"123"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Número de telefone inválido");
        assert_eq!(json["example"], EXPECTED_FORMAT);
        assert_eq!(session.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failure_after_retries() {
        let session = StubSession::answering(Err(ProtocolError::Timeout));
        let (status, json) = call(open_state(&session), r#"{"phoneNumber":"48991196884"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Erro ao verificar número no WhatsApp");
        assert_eq!(json["message"], "Tente novamente em alguns segundos");
        assert_eq!(session.calls(), 3);
    }

    #[test]
    fn test_extract_phone_number() {
        assert_eq!(
            extract_phone_number(br#"{"phoneNumber":"48 99119-6884"}"#),
            Some("48 99119-6884".to_string())
        );
        assert_eq!(
            extract_phone_number(br#"{"phoneNumber":48991196884}"#),
            Some("48991196884".to_string())
        );
        assert_eq!(extract_phone_number(br#"{"phoneNumber":0}"#), None);
        assert_eq!(extract_phone_number(br#"{"phoneNumber":true}"#), None);
        assert_eq!(extract_phone_number(br#"{"phoneNumber":["1"]}"#), None);
        assert_eq!(extract_phone_number(br#"[1,2]"#), None);
    }
}
