use crate::{
    errors::UploadError,
    upload_config::{UploadConfig, normalize_base_url},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, header};
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

pub const ACCEPT_VALUE: &str = "application/hal+json; v=2.0";
pub const CONTENT_TYPE_VALUE: &str = "application/octet-stream; v=2.0";
pub const CONTENT_MD5: &str = "Content-MD5";

/// Pushes a local file to the storage endpoint.
///
/// Implementations are stateless per call, the relay may invoke `upload`
/// from many connections at once.
pub trait Uploader: Send + Sync + 'static {
    fn upload(&self, path: &Path) -> impl Future<Output = Result<(), UploadError>> + Send;
}

/// `PUT <base_url><file name>` with Basic credentials and the raw file bytes
/// as body. Succeeds iff the endpoint answers with a 2xx status.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    config: UploadConfig,
    base_url: Url,
}

impl HttpUploader {
    pub fn new(config: UploadConfig) -> Result<Self, UploadError> {
        let normalized = normalize_base_url(&config.base_url);
        let base_url = Url::parse(&normalized)
            .map_err(|e| UploadError::InvalidBaseUrl(format!("{}: {}", normalized, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(UploadError::InvalidBaseUrl(normalized));
        }

        if config.accept_invalid_certs {
            warn!(
                "TLS certificate validation is disabled for uploads to {}",
                base_url
            );
        }

        let mut builder =
            Client::builder().danger_accept_invalid_certs(config.accept_invalid_certs);
        if config.timeout_secs > 0 {
            builder = builder.timeout(config.timeout());
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Base URL with `file_name` appended as a single, percent-encoded segment.
    pub fn target_url(&self, file_name: &str) -> Result<Url, UploadError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| UploadError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(file_name);
        Ok(url)
    }
}

impl Uploader for HttpUploader {
    async fn upload(&self, path: &Path) -> Result<(), UploadError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| UploadError::InvalidFileName(path.display().to_string()))?;
        let url = self.target_url(file_name)?;

        let body = tokio::fs::read(path).await?;
        debug!("Uploading {} ({} bytes) to {}", path.display(), body.len(), url);

        let mut req = self
            .client
            .put(url.clone())
            .header(header::ACCEPT, ACCEPT_VALUE)
            .header(header::CONTENT_TYPE, CONTENT_TYPE_VALUE)
            .basic_auth(&self.config.username, Some(&self.config.password));

        if self.config.content_md5 {
            req = req.header(CONTENT_MD5, content_md5(&body));
        }

        let response = req.body(body).send().await?;
        let status = response.status();
        if status.is_success() {
            info!("Uploaded {} to {} ({})", file_name, url, status);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(UploadError::StatusError { status, body })
        }
    }
}

/// Base64 of the MD5 digest, the `Content-MD5` header format.
pub fn content_md5(data: &[u8]) -> String {
    STANDARD.encode(md5::compute(data).0)
}
