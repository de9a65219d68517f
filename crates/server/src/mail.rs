//! Outbound quotation mail. Delivery goes through the company's HTTP mail
//! gateway; a noop dispatcher stands in when mail is disabled or in tests.

use async_trait::async_trait;
use base64::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail gateway rejected the message: status {status}, body {body}")]
    Gateway { status: u16, body: String },
}

/// Document attached to an outbound mail. Raw bytes here; the gateway wire
/// format base64-encodes them.
#[derive(Clone, Debug)]
pub struct MailAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct OutboundQuotationMail {
    pub recipient: String,
    pub subject: String,
    pub body_html: String,
    pub attachment: Option<MailAttachment>,
}

#[derive(Clone, Debug, Default)]
pub struct DeliveryReceipt {
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait MailDispatcher: Send + Sync {
    async fn dispatch(&self, mail: OutboundQuotationMail) -> Result<DeliveryReceipt, MailError>;
}

pub struct HttpMailDispatcher {
    client: reqwest::Client,
    gateway_url: String,
    api_key: SecretString,
    from_address: String,
}

impl HttpMailDispatcher {
    pub fn new(gateway_url: String, api_key: SecretString, from_address: String) -> Self {
        Self { client: reqwest::Client::new(), gateway_url, api_key, from_address }
    }
}

#[derive(Serialize)]
struct GatewayAttachment<'a> {
    filename: &'a str,
    content_type: &'a str,
    content: String,
}

impl<'a> From<&'a MailAttachment> for GatewayAttachment<'a> {
    fn from(attachment: &'a MailAttachment) -> Self {
        Self {
            filename: &attachment.filename,
            content_type: &attachment.content_type,
            content: BASE64_STANDARD.encode(&attachment.content),
        }
    }
}

#[derive(Serialize)]
struct GatewayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<GatewayAttachment<'a>>,
}

#[derive(serde::Deserialize)]
struct GatewayResponse {
    message_id: Option<String>,
}

#[async_trait]
impl MailDispatcher for HttpMailDispatcher {
    async fn dispatch(&self, mail: OutboundQuotationMail) -> Result<DeliveryReceipt, MailError> {
        let response = self
            .client
            .post(&self.gateway_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&GatewayRequest {
                from: &self.from_address,
                to: &mail.recipient,
                subject: &mail.subject,
                html: &mail.body_html,
                attachments: mail.attachment.iter().map(GatewayAttachment::from).collect(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Gateway { status: status.as_u16(), body });
        }

        let parsed: GatewayResponse =
            response.json().await.unwrap_or(GatewayResponse { message_id: None });
        info!(
            event_name = "delivery.mail_dispatched",
            recipient = %mail.recipient,
            message_id = parsed.message_id.as_deref().unwrap_or("unknown"),
            "quotation mail accepted by gateway"
        );
        Ok(DeliveryReceipt { provider_message_id: parsed.message_id })
    }
}

/// Accepts every message without sending anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMailDispatcher;

#[async_trait]
impl MailDispatcher for NoopMailDispatcher {
    async fn dispatch(&self, mail: OutboundQuotationMail) -> Result<DeliveryReceipt, MailError> {
        info!(
            event_name = "delivery.mail_skipped",
            recipient = %mail.recipient,
            "mail dispatch disabled, message dropped"
        );
        Ok(DeliveryReceipt { provider_message_id: None })
    }
}

#[cfg(test)]
mod tests {
    use super::{GatewayAttachment, GatewayRequest, MailAttachment};

    #[test]
    fn gateway_request_carries_base64_attachment() {
        let attachment = MailAttachment {
            filename: "COT-2025-0001.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            content: b"%PDF-1.4 stub".to_vec(),
        };
        let request = GatewayRequest {
            from: "cotizaciones@mekanos.example",
            to: "compras@client77.example",
            subject: "Cotización COT-2025-0001",
            html: "<p>Adjunto</p>",
            attachments: vec![GatewayAttachment::from(&attachment)],
        };

        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["attachments"][0]["filename"], "COT-2025-0001.pdf");
        assert_eq!(value["attachments"][0]["content"], "JVBERi0xLjQgc3R1Yg==");
    }

    #[test]
    fn gateway_request_omits_empty_attachment_list() {
        let request = GatewayRequest {
            from: "cotizaciones@mekanos.example",
            to: "compras@client77.example",
            subject: "Cotización COT-2025-0001",
            html: "<p>Adjunto</p>",
            attachments: Vec::new(),
        };

        let value = serde_json::to_value(&request).expect("serialize");
        assert!(value.get("attachments").is_none());
    }
}
