//! HTTP client for the external document renderer.
//!
//! Two renderer flavours are supported. Both accept a multipart upload of the
//! source document and answer with the PDF as the response body; they differ
//! in the endpoint path and the form field carrying the file.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::multipart::{Form, Part};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Rendered PDF bytes, streamed as they arrive.
pub type Rendered = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    /// Upload `source` under `file_name` and return the rendered output.
    async fn render(&self, file_name: &str, source: tokio::fs::File) -> Result<Rendered>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    /// Gotenberg's LibreOffice route.
    Gotenberg,
    /// A docx-to-pdf service exposing `POST /pdf`.
    DocxToPdf,
}

impl RendererKind {
    pub fn path(self) -> &'static str {
        match self {
            RendererKind::Gotenberg => "/forms/libreoffice/convert",
            RendererKind::DocxToPdf => "/pdf",
        }
    }

    pub fn field(self) -> &'static str {
        match self {
            RendererKind::Gotenberg => "files",
            RendererKind::DocxToPdf => "document",
        }
    }
}

impl std::fmt::Display for RendererKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RendererKind::Gotenberg => "gotenberg",
            RendererKind::DocxToPdf => "docx-to-pdf",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RendererKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gotenberg" => Ok(RendererKind::Gotenberg),
            "docx-to-pdf" => Ok(RendererKind::DocxToPdf),
            other => Err(Error::Config(format!(
                "unknown renderer kind {other:?} (expected gotenberg or docx-to-pdf)"
            ))),
        }
    }
}

/// Renderer reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
    kind: RendererKind,
}

impl HttpRenderer {
    pub fn new(base_url: &str, kind: RendererKind) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(Error::Config("renderer url is empty".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            endpoint: format!("{base}{}", kind.path()),
            kind,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, file_name: &str, source: tokio::fs::File) -> Result<Rendered> {
        let body = reqwest::Body::wrap_stream(ReaderStream::new(source));
        let part = Part::stream(body).file_name(file_name.to_string());
        let form = Form::new().part(self.kind.field(), part);

        debug!(endpoint = %self.endpoint, kind = %self.kind, "uploading document to renderer");
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::processing("upload", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::processing(
                "render",
                format!("renderer responded with status {}", status.as_u16()),
            ));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::processing("download", e)))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_and_route() {
        let kind: RendererKind = "docx-to-pdf".parse().unwrap();
        assert_eq!(kind, RendererKind::DocxToPdf);
        assert_eq!(kind.field(), "document");
        assert!("pandoc".parse::<RendererKind>().is_err());
    }

    #[test]
    fn endpoint_joins_base_and_path() {
        let renderer = HttpRenderer::new("http://renderer:3000/", RendererKind::Gotenberg).unwrap();
        assert_eq!(
            renderer.endpoint(),
            "http://renderer:3000/forms/libreoffice/convert"
        );
    }
}
