//! Renders the client-facing quotation document. Templates are Tera HTML;
//! when wkhtmltopdf is installed the HTML is converted to PDF, otherwise the
//! HTML itself is served for browser printing.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{error, info, warn};

use mekanos_core::domain::line_item::LineItemKind;
use mekanos_core::domain::quotation::Quotation;

use crate::mail::MailAttachment;

/// Seam between the lifecycle service and the concrete Tera/wkhtmltopdf
/// renderer, so the send path can be exercised without templates on disk.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, quotation: &Quotation) -> Result<RenderedDocument, PdfError>;
}

#[async_trait]
impl DocumentRenderer for QuotationRenderer {
    async fn render(&self, quotation: &Quotation) -> Result<RenderedDocument, PdfError> {
        QuotationRenderer::render(self, quotation).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("template error: {0}")]
    Template(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Formats a decimal string or number with thousands separators and two
/// decimal places. Usage: `totals.grand_total | money`
fn tera_money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let amount = match value {
        tera::Value::String(raw) => raw.parse::<f64>().unwrap_or(0.0),
        tera::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    };

    let formatted = format!("{amount:.2}");
    let (integer, fraction) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));
    let mut grouped = String::new();
    let digits: Vec<char> = integer.chars().collect();
    for (index, digit) in digits.iter().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 && *digit != '-' {
            grouped.push(',');
        }
        grouped.push(*digit);
    }
    Ok(tera::Value::String(format!("{grouped}.{fraction}")))
}

pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("money", tera_money_filter);
}

pub struct QuotationRenderer {
    tera: Tera,
    company_name: String,
    wkhtmltopdf_path: Option<String>,
}

impl QuotationRenderer {
    pub fn new(template_dir: &str, company_name: &str) -> Result<Self, PdfError> {
        let mut tera = Tera::new(&format!("{template_dir}/**/*.tera"))
            .map_err(|e| PdfError::Template(e.to_string()))?;
        register_template_filters(&mut tera);

        let wkhtmltopdf_path =
            which::which("wkhtmltopdf").ok().map(|path| path.to_string_lossy().to_string());
        match &wkhtmltopdf_path {
            Some(path) => info!(path = %path, "wkhtmltopdf found"),
            None => warn!("wkhtmltopdf not found in PATH, documents will render as HTML"),
        }

        Ok(Self { tera, company_name: company_name.to_string(), wkhtmltopdf_path })
    }

    /// Renderer backed by the template compiled into the binary. Used when no
    /// template directory is configured and in tests.
    pub fn with_embedded_templates(company_name: &str) -> Result<Self, PdfError> {
        let mut tera = Tera::default();
        register_template_filters(&mut tera);
        tera.add_raw_template(
            "quotations/detailed.html.tera",
            include_str!("../../../templates/quotations/detailed.html.tera"),
        )
        .map_err(|e| PdfError::Template(e.to_string()))?;

        let wkhtmltopdf_path =
            which::which("wkhtmltopdf").ok().map(|path| path.to_string_lossy().to_string());

        Ok(Self { tera, company_name: company_name.to_string(), wkhtmltopdf_path })
    }

    pub fn render_html(&self, quotation: &Quotation) -> Result<String, PdfError> {
        let services: Vec<_> =
            quotation.items.iter().filter(|item| item.kind == LineItemKind::Service).collect();
        let components: Vec<_> =
            quotation.items.iter().filter(|item| item.kind == LineItemKind::Component).collect();

        let mut context = Context::new();
        context.insert("quotation", quotation);
        context.insert("services", &services);
        context.insert("components", &components);
        context.insert("totals", &quotation.totals);
        context.insert("company_name", &self.company_name);

        self.tera
            .render("quotations/detailed.html.tera", &context)
            .map_err(|e| PdfError::Template(e.to_string()))
    }

    /// Renders the document, converting to PDF when wkhtmltopdf is present.
    /// Conversion failures fall back to HTML rather than failing the request.
    pub async fn render(&self, quotation: &Quotation) -> Result<RenderedDocument, PdfError> {
        let html = self.render_html(quotation)?;

        if let Some(ref wkhtmltopdf) = self.wkhtmltopdf_path {
            match convert_html_to_pdf(&html, wkhtmltopdf).await {
                Ok(bytes) => return Ok(RenderedDocument::Pdf(bytes)),
                Err(e) => {
                    warn!(error = %e, "PDF conversion failed, falling back to HTML");
                }
            }
        }
        Ok(RenderedDocument::Html(html))
    }
}

async fn convert_html_to_pdf(html: &str, wkhtmltopdf_path: &str) -> Result<Vec<u8>, PdfError> {
    let temp_dir = std::env::temp_dir();
    let stem = uuid::Uuid::new_v4();
    let html_path = temp_dir.join(format!("quotation_{stem}.html"));
    let pdf_path = temp_dir.join(format!("quotation_{stem}.pdf"));

    tokio::fs::write(&html_path, html).await?;

    let output = Command::new(wkhtmltopdf_path)
        .arg("--page-size")
        .arg("Letter")
        .arg("--margin-top")
        .arg("12mm")
        .arg("--margin-bottom")
        .arg("12mm")
        .arg("--encoding")
        .arg("utf-8")
        .arg(&html_path)
        .arg(&pdf_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(stderr = %stderr, "wkhtmltopdf failed");
        let _ = tokio::fs::remove_file(&html_path).await;
        return Err(PdfError::Conversion(stderr.to_string()));
    }

    let pdf_bytes = tokio::fs::read(&pdf_path).await?;
    let _ = tokio::fs::remove_file(&html_path).await;
    let _ = tokio::fs::remove_file(&pdf_path).await;

    info!(size = pdf_bytes.len(), "quotation PDF generated");
    Ok(pdf_bytes)
}

pub enum RenderedDocument {
    Pdf(Vec<u8>),
    Html(String),
}

impl RenderedDocument {
    /// Packages the rendered document for mail dispatch. The filename follows
    /// the document code, with the extension matching the rendered format.
    pub fn into_attachment(self, code: &str) -> MailAttachment {
        match self {
            RenderedDocument::Pdf(bytes) => MailAttachment {
                filename: format!("{code}.pdf"),
                content_type: "application/pdf".to_string(),
                content: bytes,
            },
            RenderedDocument::Html(html) => MailAttachment {
                filename: format!("{code}.html"),
                content_type: "text/html; charset=utf-8".to_string(),
                content: html.into_bytes(),
            },
        }
    }

    pub fn into_response(self, filename: &str) -> Result<Response, axum::http::Error> {
        match self {
            RenderedDocument::Pdf(bytes) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/pdf")
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}.pdf\""),
                )
                .body(Body::from(bytes)),
            RenderedDocument::Html(html) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                .body(Body::from(html)),
        }
    }
}
