// libs/consultation-cell/src/services/midtrans.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use shared_config::ClinicConfig;

use crate::models::ConsultationError;

/// Outbound payment-gateway contract. Only the calls the lifecycle needs:
/// create an order (returning a payment link) and request a refund. The
/// gateway's own transaction semantics stay on its side of the wire.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(
        &self,
        order_ref: &str,
        gross_amount: i64,
        item_desc: &str,
        customer_name: &str,
        customer_email: &str,
    ) -> Result<String, ConsultationError>;

    async fn refund(
        &self,
        order_ref: &str,
        amount: i64,
        reason: &str,
    ) -> Result<(), ConsultationError>;
}

pub struct MidtransClient {
    client: Client,
    base_url: String,
    server_key: String,
}

impl MidtransClient {
    pub fn new(config: &ClinicConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.midtrans_base_url.clone(),
            server_key: config.midtrans_server_key.clone(),
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        // Midtrans uses basic auth with the server key as username.
        let token = STANDARD.encode(format!("{}:", self.server_key));
        if let Ok(value) = HeaderValue::from_str(&format!("Basic {}", token)) {
            headers.insert(AUTHORIZATION, value);
        }

        headers
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ConsultationError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Midtrans request to {}", url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| ConsultationError::GatewayError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Midtrans error ({}): {}", status, error_text);
            return Err(ConsultationError::GatewayError(format!(
                "{}: {}",
                status, error_text
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ConsultationError::GatewayError(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for MidtransClient {
    async fn create_order(
        &self,
        order_ref: &str,
        gross_amount: i64,
        item_desc: &str,
        customer_name: &str,
        customer_email: &str,
    ) -> Result<String, ConsultationError> {
        let body = json!({
            "transaction_details": {
                "order_id": order_ref,
                "gross_amount": gross_amount
            },
            "item_details": [{
                "id": order_ref,
                "price": gross_amount,
                "quantity": 1,
                "name": item_desc
            }],
            "customer_details": {
                "first_name": customer_name,
                "email": customer_email
            }
        });

        let result = self.post("/snap/v1/transactions", body).await?;

        let link = result["redirect_url"].as_str().ok_or_else(|| {
            ConsultationError::GatewayError("payment link missing from gateway response".to_string())
        })?;

        info!("Midtrans order {} created", order_ref);
        Ok(link.to_string())
    }

    async fn refund(&self, order_ref: &str, amount: i64, reason: &str) -> Result<(), ConsultationError> {
        let body = json!({
            "refund_key": format!("REFUND-{}", order_ref),
            "amount": amount,
            "reason": reason
        });

        self.post(&format!("/v2/{}/refund", order_ref), body).await?;

        info!("Midtrans refund requested for order {}", order_ref);
        Ok(())
    }
}
