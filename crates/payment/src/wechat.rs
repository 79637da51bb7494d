use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Value, json};

use crate::{
    ClientPayment, GatewayError, MerchantSigner, PaymentError, PaymentGateway, PrepayHandle,
    PrepayRequest, RefundReceipt, RefundRequest, Result,
    gateway::{CURRENCY, nonce_str, to_minor_units},
};

pub const JSAPI_PATH: &str = "/v3/pay/transactions/jsapi";
pub const REFUNDS_PATH: &str = "/v3/refund/domestic/refunds";
pub const DEFAULT_BASE_URL: &str = "https://api.mch.weixin.qq.com";

/// Merchant credentials and endpoints.
#[derive(Debug, Clone)]
pub struct WechatPayConfig {
    pub app_id: String,
    pub mch_id: String,
    pub mch_serial_no: String,
    /// PKCS#8 PEM of the merchant private key.
    pub private_key_pem: String,
    pub notify_url: String,
    pub refund_notify_url: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Gateway client over HTTPS.
#[derive(Debug, Clone)]
pub struct WechatPayClient {
    http: reqwest::Client,
    signer: MerchantSigner,
    app_id: String,
    notify_url: String,
    refund_notify_url: String,
    base_url: String,
}

impl WechatPayClient {
    pub fn new(config: WechatPayConfig) -> std::result::Result<Self, GatewayError> {
        let signer = MerchantSigner::from_pem(
            &config.mch_id,
            &config.mch_serial_no,
            &config.private_key_pem,
        )?;
        Self::with_signer(config, signer)
    }

    /// Builds a client around an already loaded signer.
    pub fn with_signer(
        config: WechatPayConfig,
        signer: MerchantSigner,
    ) -> std::result::Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(GatewayError::from_reqwest)?;

        Ok(Self {
            http,
            signer,
            app_id: config.app_id,
            notify_url: config.notify_url,
            refund_notify_url: config.refund_notify_url,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, endpoint: &'static str, path: &str, body: Value) -> Result<Value> {
        let started = Instant::now();
        let result = self.send(path, body).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) if e.is_retryable() => "retryable",
            Err(_) => "fatal",
        };
        metrics::counter!("gateway_requests_total", "endpoint" => endpoint, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("gateway_request_duration_seconds", "endpoint" => endpoint)
            .record(started.elapsed().as_secs_f64());

        Ok(result?)
    }

    async fn send(&self, path: &str, body: Value) -> std::result::Result<Value, GatewayError> {
        let body = serde_json::to_string(&body)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        let authorization = self.signer.authorization(
            "POST",
            path,
            Utc::now().timestamp(),
            &nonce_str(),
            &body,
        )?;

        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header(AUTHORIZATION, authorization)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        let status = response.status();
        let text = response.text().await.map_err(GatewayError::from_reqwest)?;

        if status.is_server_error() {
            return Err(GatewayError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| GatewayError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for WechatPayClient {
    #[tracing::instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn initiate(&self, request: PrepayRequest) -> Result<PrepayHandle> {
        let total = to_minor_units(request.amount)?;
        if !total.is_positive() {
            return Err(PaymentError::Validation(format!(
                "payment amount must be positive, got {total}"
            )));
        }

        let body = json!({
            "appid": self.app_id,
            "mchid": self.signer.mch_id(),
            "description": request.description,
            "out_trade_no": request.order_number,
            "notify_url": self.notify_url,
            "amount": { "total": total.cents(), "currency": CURRENCY },
            "payer": { "openid": request.payer_openid },
        });

        let response = self.post("prepay", JSAPI_PATH, body).await?;
        let prepay_id = response
            .get("prepay_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(GatewayError::MissingPrepayId)?
            .to_string();

        tracing::info!(%prepay_id, "Prepay order created");
        let client = self.sign_client_payment(&prepay_id)?;
        Ok(PrepayHandle { prepay_id, client })
    }

    fn sign_client_payment(&self, prepay_id: &str) -> Result<ClientPayment> {
        Ok(self
            .signer
            .client_payment(&self.app_id, prepay_id, Utc::now().timestamp())?)
    }

    #[tracing::instrument(
        skip(self, request),
        fields(order_number = %request.order_number, refund_number = %request.refund_number)
    )]
    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt> {
        let (refund, total) = request.minor_units()?;

        let body = json!({
            "out_trade_no": request.order_number,
            "out_refund_no": request.refund_number,
            "amount": { "refund": refund.cents(), "total": total.cents(), "currency": CURRENCY },
            "notify_url": self.refund_notify_url,
        });

        let response = self.post("refund", REFUNDS_PATH, body).await?;
        tracing::info!(%refund, "Refund submitted");

        Ok(RefundReceipt {
            refund_number: request.refund_number,
            refund_id: response
                .get("refund_id")
                .and_then(Value::as_str)
                .map(String::from),
            status: response
                .get("status")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }
}
