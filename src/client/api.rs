use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::session::Session;
use crate::schemas::{PaymentOrder, RentDue, VerificationResult};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server rejected our credentials; the session must be discarded.
    #[error("Session expired. Please sign in again.")]
    AuthExpired,
    #[error("Payment gateway is not configured.")]
    GatewayNotConfigured,
    /// Server-reported error, carrying the server's detail message.
    #[error("{0}")]
    Api(String),
    #[error("Network error: {0}")]
    Network(String),
}

/// The payment endpoints the client consumes. Implemented over HTTP in
/// production and by in-memory stubs in tests.
#[allow(async_fn_in_trait)]
pub trait TenantPaymentsApi {
    async fn next_due(&self) -> Result<RentDue, ClientError>;
    async fn create_order(&self, payment_id: &str) -> Result<PaymentOrder, ClientError>;
    async fn verify(&self, payment_id: &str) -> Result<VerificationResult, ClientError>;
    async fn generate_invoice(&self, payment_id: &str) -> Result<Vec<u8>, ClientError>;
}

pub struct HttpTenantPaymentsApi {
    http: reqwest::Client,
    session: Session,
}

impl HttpTenantPaymentsApi {
    pub fn new(http: reqwest::Client, session: Session) -> Self {
        Self { http, session }
    }

    async fn request(&self, method: Method, path: &str) -> Result<reqwest::Response, ClientError> {
        let response = self
            .http
            .request(method, self.session.endpoint(path))
            .bearer_auth(self.session.bearer_token())
            .send()
            .await
            .map_err(|error| ClientError::Network(error.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::AuthExpired),
            status if !status.is_success() => {
                let detail = response
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|body| {
                        body.get("detail")
                            .and_then(Value::as_str)
                            .map(ToOwned::to_owned)
                    })
                    .unwrap_or_else(|| format!("Request failed ({status})"));
                Err(ClientError::Api(detail))
            }
            _ => Ok(response),
        }
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
    ) -> Result<T, ClientError> {
        self.request(method, path)
            .await?
            .json::<T>()
            .await
            .map_err(|error| ClientError::Api(format!("Invalid server response: {error}")))
    }
}

impl TenantPaymentsApi for HttpTenantPaymentsApi {
    async fn next_due(&self) -> Result<RentDue, ClientError> {
        self.request_json(Method::GET, "/pg-tenant/payments/next-due")
            .await
    }

    async fn create_order(&self, payment_id: &str) -> Result<PaymentOrder, ClientError> {
        self.request_json(
            Method::POST,
            &format!("/pg-tenant/payments/{payment_id}/create-order"),
        )
        .await
    }

    async fn verify(&self, payment_id: &str) -> Result<VerificationResult, ClientError> {
        self.request_json(
            Method::POST,
            &format!("/pg-tenant/payments/{payment_id}/verify"),
        )
        .await
    }

    async fn generate_invoice(&self, payment_id: &str) -> Result<Vec<u8>, ClientError> {
        let response = self
            .request(
                Method::POST,
                &format!("/pg-tenant/payments/{payment_id}/generate-invoice"),
            )
            .await?;
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|error| ClientError::Network(error.to_string()))
    }
}
