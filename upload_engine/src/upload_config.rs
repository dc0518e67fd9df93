use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://192.168.125.1/fileservice/$home/";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct UploadConfig {
    /// Storage endpoint the file name is appended to, always ends with `/`
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Skip TLS certificate validation on the outbound PUT. Only for endpoints
    /// that serve self-signed certificates, must be enabled explicitly.
    pub accept_invalid_certs: bool,
    pub timeout_secs: u64,
    /// Send a `Content-MD5` header computed over the request body
    pub content_md5: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: "Default User".to_string(),
            password: "robotics".to_string(),
            accept_invalid_certs: false,
            timeout_secs: 60,
            content_md5: false,
        }
    }
}

impl UploadConfig {
    /// Sets the base URL, falling back to the default when empty and
    /// appending the trailing slash when missing.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base_url(&base_url.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(normalize_base_url(""), DEFAULT_BASE_URL);
        assert_eq!(
            normalize_base_url("https://10.0.0.5/fileservice/$home"),
            "https://10.0.0.5/fileservice/$home/"
        );
        assert_eq!(
            normalize_base_url(" https://10.0.0.5/files/ "),
            "https://10.0.0.5/files/"
        );
    }

    #[test]
    fn test_insecure_tls_is_opt_in() {
        let config = UploadConfig::default();
        assert!(!config.accept_invalid_certs);
        assert_eq!(config.timeout(), Duration::from_secs(60));
    }
}
