//! Resume text extraction. PDF or DOCX bytes come in from an upload, a remote URL, or a
//! stored S3 object; plain text or a typed `ExtractionFailure` comes out. Never panics on
//! bad input.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::OnceLock;

use bytes::Bytes;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Extracted text shorter than this (after trimming) counts as a failed extraction.
pub const MIN_TEXT_CHARS: usize = 50;

const DOCX_BODY_PATH: &str = "word/document.xml";

/// Cap on the decompressed `word/document.xml`.
pub const MAX_DOCX_XML_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    NoFile,
    ImageBasedPdf,
    ExtractionFailed,
    FetchFailed,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::NoFile => "NO_FILE",
            FailureCode::ImageBasedPdf => "IMAGE_BASED_PDF",
            FailureCode::ExtractionFailed => "EXTRACTION_FAILED",
            FailureCode::FetchFailed => "FETCH_FAILED",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed extraction failure, surfaced to HTTP callers as a 400.
#[derive(Debug, Clone, Serialize, Error)]
#[error("{code}: {message}")]
pub struct ExtractionFailure {
    pub code: FailureCode,
    pub message: String,
}

impl ExtractionFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeKind {
    Pdf,
    Docx,
}

impl ResumeKind {
    /// Magic bytes win over the file name, which wins over the declared content type.
    pub fn detect(
        bytes: &[u8],
        file_name: Option<&str>,
        content_type: Option<&str>,
    ) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            return Some(ResumeKind::Pdf);
        }
        if bytes.starts_with(b"PK\x03\x04") {
            return Some(ResumeKind::Docx);
        }

        let name = file_name.unwrap_or_default().to_lowercase();
        if name.ends_with(".pdf") {
            return Some(ResumeKind::Pdf);
        }
        if name.ends_with(".docx") {
            return Some(ResumeKind::Docx);
        }

        match content_type.unwrap_or_default() {
            "application/pdf" => Some(ResumeKind::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(ResumeKind::Docx)
            }
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ResumeKind::Pdf => "pdf",
            ResumeKind::Docx => "docx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ResumeKind::Pdf => "application/pdf",
            ResumeKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

/// Where a resume comes from.
#[derive(Debug, Clone)]
pub enum ResumeSource {
    Upload {
        bytes: Bytes,
        file_name: Option<String>,
        content_type: Option<String>,
    },
    Url(String),
    /// Object key in the resume bucket.
    Stored(String),
}

#[derive(Debug, Clone)]
pub struct ResumeFile {
    pub bytes: Bytes,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractedResume {
    pub text: String,
    pub kind: ResumeKind,
}

/// Pulls resume bytes from remote URLs and the S3 resume bucket.
#[derive(Clone)]
pub struct ResumeFetcher {
    http: reqwest::Client,
    s3: aws_sdk_s3::Client,
    bucket: String,
    max_bytes: usize,
}

impl ResumeFetcher {
    pub fn new(s3: aws_sdk_s3::Client, bucket: String, max_bytes: usize) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            s3,
            bucket,
            max_bytes,
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<(Bytes, Option<String>), ExtractionFailure> {
        download_capped(&self.http, url, self.max_bytes).await
    }

    async fn fetch_stored(&self, key: &str) -> Result<Bytes, ExtractionFailure> {
        let object = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                ExtractionFailure::new(
                    FailureCode::FetchFailed,
                    format!("Could not load stored resume '{key}': {e}"),
                )
            })?;

        let data = object.body.collect().await.map_err(|e| {
            ExtractionFailure::new(
                FailureCode::FetchFailed,
                format!("Could not read stored resume '{key}': {e}"),
            )
        })?;

        Ok(data.into_bytes())
    }

    /// Raw bytes for any source, with whatever naming hints it carries.
    pub async fn resolve(&self, source: &ResumeSource) -> Result<ResumeFile, ExtractionFailure> {
        match source {
            ResumeSource::Upload {
                bytes,
                file_name,
                content_type,
            } => Ok(ResumeFile {
                bytes: bytes.clone(),
                file_name: file_name.clone(),
                content_type: content_type.clone(),
            }),
            ResumeSource::Url(url) => {
                let (bytes, content_type) = self.fetch_url(url).await?;
                Ok(ResumeFile {
                    bytes,
                    file_name: Some(url.clone()),
                    content_type,
                })
            }
            ResumeSource::Stored(key) => Ok(ResumeFile {
                bytes: self.fetch_stored(key).await?,
                file_name: Some(key.clone()),
                content_type: None,
            }),
        }
    }

    pub async fn upload(&self, key: &str, bytes: Bytes, kind: ResumeKind) -> Result<(), String> {
        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(bytes))
            .content_type(kind.content_type())
            .send()
            .await
            .map(|_| ())
            .map_err(|e| format!("S3 upload of '{key}' failed: {e}"))
    }
}

/// GETs `url`, refusing bodies larger than `max_bytes` whether or not the
/// server declares a Content-Length.
async fn download_capped(
    http: &reqwest::Client,
    url: &str,
    max_bytes: usize,
) -> Result<(Bytes, Option<String>), ExtractionFailure> {
    let fetch_failed = |e: reqwest::Error| {
        ExtractionFailure::new(
            FailureCode::FetchFailed,
            format!("Could not download resume from {url}: {e}"),
        )
    };
    let too_large = || {
        ExtractionFailure::new(
            FailureCode::FetchFailed,
            format!("Resume at {url} is larger than {max_bytes} bytes"),
        )
    };

    let mut response = http
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(fetch_failed)?;

    if response
        .content_length()
        .is_some_and(|len| len > max_bytes as u64)
    {
        return Err(too_large());
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(fetch_failed)? {
        if body.len() + chunk.len() > max_bytes {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    Ok((Bytes::from(body), content_type))
}

/// Resolves the source to bytes and extracts its text.
pub async fn extract_text(
    source: &ResumeSource,
    fetcher: &ResumeFetcher,
) -> Result<ExtractedResume, ExtractionFailure> {
    let file = fetcher.resolve(source).await?;
    extract_from_bytes(file.bytes, file.file_name.as_deref(), file.content_type.as_deref()).await
}

pub async fn extract_from_bytes(
    bytes: Bytes,
    file_name: Option<&str>,
    content_type: Option<&str>,
) -> Result<ExtractedResume, ExtractionFailure> {
    if bytes.is_empty() {
        return Err(ExtractionFailure::new(
            FailureCode::NoFile,
            "No resume file was provided",
        ));
    }

    let kind = ResumeKind::detect(&bytes, file_name, content_type).ok_or_else(|| {
        ExtractionFailure::new(
            FailureCode::ExtractionFailed,
            "Unsupported resume format. Upload a PDF or DOCX file.",
        )
    })?;

    let raw = match kind {
        ResumeKind::Pdf => pdf_text(bytes).await?,
        ResumeKind::Docx => docx_text(&bytes, MAX_DOCX_XML_BYTES)?,
    };

    let text = validate_text(&raw, kind)?;
    debug!("Extracted {} characters from {:?} resume", text.len(), kind);
    Ok(ExtractedResume { text, kind })
}

/// Rejects text that is too short to be a real resume.
pub fn validate_text(raw: &str, kind: ResumeKind) -> Result<String, ExtractionFailure> {
    let text = raw.trim();
    if text.chars().count() >= MIN_TEXT_CHARS {
        return Ok(text.to_string());
    }

    Err(match kind {
        ResumeKind::Pdf => ExtractionFailure::new(
            FailureCode::ImageBasedPdf,
            "The PDF contains little or no selectable text. It may be a scanned image; \
             upload a text-based PDF or a DOCX file.",
        ),
        ResumeKind::Docx => ExtractionFailure::new(
            FailureCode::ExtractionFailed,
            "Could not read enough text from the document.",
        ),
    })
}

async fn pdf_text(bytes: Bytes) -> Result<String, ExtractionFailure> {
    // pdf-extract can panic on malformed input; the blocking task contains it.
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| {
            ExtractionFailure::new(
                FailureCode::ExtractionFailed,
                format!("PDF parser aborted: {e}"),
            )
        })?
        .map_err(|e| {
            ExtractionFailure::new(
                FailureCode::ExtractionFailed,
                format!("Could not read PDF: {e}"),
            )
        })
}

fn docx_text(bytes: &[u8], limit: u64) -> Result<String, ExtractionFailure> {
    let unreadable = |e: &dyn fmt::Display| {
        ExtractionFailure::new(
            FailureCode::ExtractionFailed,
            format!("Could not read DOCX: {e}"),
        )
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| unreadable(&e))?;
    let entry = archive.by_name(DOCX_BODY_PATH).map_err(|e| unreadable(&e))?;

    // One byte past the limit tells an oversized body apart from one that fits exactly.
    let mut xml = String::new();
    entry
        .take(limit + 1)
        .read_to_string(&mut xml)
        .map_err(|e| unreadable(&e))?;
    if xml.len() as u64 > limit {
        return Err(ExtractionFailure::new(
            FailureCode::ExtractionFailed,
            format!("DOCX body expands past {limit} bytes"),
        ));
    }

    Ok(docx_xml_to_text(&xml))
}

fn text_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // <w:t> or <w:t xml:space="preserve">, never <w:tab/> or <w:tbl>
    RE.get_or_init(|| Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>").expect("static regex"))
}

/// Joins `<w:t>` runs per paragraph; one line per non-empty paragraph.
fn docx_xml_to_text(xml: &str) -> String {
    let re = text_run_regex();
    xml.split("</w:p>")
        .map(|para| {
            re.captures_iter(para)
                .filter_map(|c| c.get(1))
                .map(|m| decode_xml_entities(m.as_str()))
                .collect::<String>()
        })
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_xml_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one HTTP response with a PDF-looking body of `len` bytes, then closes.
    async fn serve_once(len: usize, declare_length: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;

            let mut head = String::from("HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\n");
            if declare_length {
                head.push_str(&format!("Content-Length: {len}\r\n"));
            }
            head.push_str("Connection: close\r\n\r\n");

            let mut body = b"%PDF".to_vec();
            body.resize(len, b'x');
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/resume.pdf")
    }

    fn build_docx(paragraphs: &[&str]) -> Bytes {
        let body: String = paragraphs
            .iter()
            .map(|p| format!(r#"<w:p><w:r><w:t xml:space="preserve">{p}</w:t></w:r></w:p>"#))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0"?><w:document><w:body>{body}</w:body></w:document>"#
        );

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(DOCX_BODY_PATH, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        Bytes::from(writer.finish().unwrap().into_inner())
    }

    #[test]
    fn test_detect_prefers_magic_bytes() {
        assert_eq!(
            ResumeKind::detect(b"%PDF-1.7 ...", Some("resume.docx"), None),
            Some(ResumeKind::Pdf)
        );
        assert_eq!(
            ResumeKind::detect(b"PK\x03\x04rest", Some("resume.pdf"), None),
            Some(ResumeKind::Docx)
        );
    }

    #[test]
    fn test_detect_falls_back_to_name_then_content_type() {
        assert_eq!(
            ResumeKind::detect(b"????", Some("CV.PDF"), None),
            Some(ResumeKind::Pdf)
        );
        assert_eq!(
            ResumeKind::detect(b"????", None, Some("application/pdf")),
            Some(ResumeKind::Pdf)
        );
        assert_eq!(ResumeKind::detect(b"????", Some("cv.txt"), Some("text/plain")), None);
    }

    #[test]
    fn test_short_pdf_text_is_image_based_failure() {
        let err = validate_text("  John Doe  ", ResumeKind::Pdf).unwrap_err();
        assert_eq!(err.code, FailureCode::ImageBasedPdf);
    }

    #[test]
    fn test_short_docx_text_is_extraction_failure() {
        let err = validate_text("short", ResumeKind::Docx).unwrap_err();
        assert_eq!(err.code, FailureCode::ExtractionFailed);
    }

    #[test]
    fn test_text_at_threshold_passes() {
        let text = "x".repeat(MIN_TEXT_CHARS);
        assert_eq!(validate_text(&text, ResumeKind::Pdf).unwrap(), text);
    }

    #[test]
    fn test_docx_xml_ignores_tabs_and_decodes_entities() {
        let xml = r#"<w:p><w:r><w:t>R&amp;D</w:t></w:r><w:r><w:tab/><w:t xml:space="preserve"> lead</w:t></w:r></w:p><w:p></w:p><w:p><w:r><w:t>Python</w:t></w:r></w:p>"#;
        assert_eq!(docx_xml_to_text(xml), "R&D lead\nPython");
    }

    #[tokio::test]
    async fn test_empty_upload_is_no_file() {
        let err = extract_from_bytes(Bytes::new(), Some("cv.pdf"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::NoFile);
    }

    #[tokio::test]
    async fn test_unknown_format_is_extraction_failure() {
        let err = extract_from_bytes(Bytes::from_static(b"plain text"), Some("cv.txt"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::ExtractionFailed);
    }

    #[tokio::test]
    async fn test_docx_upload_extracts_paragraphs() {
        let docx = build_docx(&[
            "Jane Student, Computer Science, class of 2025",
            "Skills: Python, React, SQL and Machine Learning",
        ]);
        let extracted = extract_from_bytes(docx, Some("jane.docx"), None).await.unwrap();
        assert_eq!(extracted.kind, ResumeKind::Docx);
        assert!(extracted.text.contains("Machine Learning"));
        assert_eq!(extracted.text.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_short_docx_upload_returns_failure_not_panic() {
        let docx = build_docx(&["Jane"]);
        let err = extract_from_bytes(docx, None, None).await.unwrap_err();
        assert_eq!(err.code, FailureCode::ExtractionFailed);
    }

    #[tokio::test]
    async fn test_corrupt_pdf_returns_failure_not_panic() {
        let bytes = Bytes::from_static(b"%PDF-1.4\nthis is not really a pdf");
        let err = extract_from_bytes(bytes, Some("cv.pdf"), None).await.unwrap_err();
        assert!(matches!(
            err.code,
            FailureCode::ExtractionFailed | FailureCode::ImageBasedPdf
        ));
    }

    #[tokio::test]
    async fn test_download_within_cap_keeps_body_and_content_type() {
        let url = serve_once(2048, true).await;
        let (bytes, content_type) = download_capped(&reqwest::Client::new(), &url, 4096)
            .await
            .unwrap();
        assert_eq!(bytes.len(), 2048);
        assert!(bytes.starts_with(b"%PDF"));
        assert_eq!(content_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_download_rejects_declared_length_over_cap() {
        let url = serve_once(64 * 1024, true).await;
        let err = download_capped(&reqwest::Client::new(), &url, 4096)
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::FetchFailed);
    }

    #[tokio::test]
    async fn test_download_rejects_undeclared_body_over_cap() {
        let url = serve_once(64 * 1024, false).await;
        let err = download_capped(&reqwest::Client::new(), &url, 4096)
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::FetchFailed);
        assert!(err.message.contains("larger than 4096"));
    }

    #[test]
    fn test_docx_body_past_limit_is_extraction_failure() {
        let paragraph = "Python and SQL experience ".repeat(200);
        let docx = build_docx(&[paragraph.as_str()]);

        let err = docx_text(&docx, 1024).unwrap_err();
        assert_eq!(err.code, FailureCode::ExtractionFailed);
        assert!(docx_text(&docx, MAX_DOCX_XML_BYTES).is_ok());
    }

    #[test]
    fn test_failure_serializes_screaming_code() {
        let failure = ExtractionFailure::new(FailureCode::FetchFailed, "timeout");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["code"], "FETCH_FAILED");
        assert_eq!(failure.to_string(), "FETCH_FAILED: timeout");
    }
}
