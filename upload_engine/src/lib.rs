pub mod errors;
pub mod upload_config;
pub mod uploader;

pub use errors::UploadError;
pub use upload_config::UploadConfig;
pub use uploader::{HttpUploader, Uploader};
