use crate::rpc::{
    events::{EventKind, EventSender},
    messages::{Command, CommandError, Response, parse_command},
};
use std::{
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};
use upload_engine::Uploader;

/// Turns decoded commands into responses. Shared by every connection handler.
#[derive(Debug)]
pub struct Dispatcher<U> {
    base_dir: PathBuf,
    uploader: Arc<U>,
    events: EventSender,
}

impl<U: Uploader> Dispatcher<U> {
    pub fn new(base_dir: impl Into<PathBuf>, uploader: Arc<U>, events: EventSender) -> Self {
        Self {
            base_dir: base_dir.into(),
            uploader,
            events,
        }
    }

    /// Decodes a frame payload and dispatches it. Malformed payloads become
    /// an `error` response, never a failure of the connection.
    pub async fn handle_payload(&self, peer: SocketAddr, payload: &[u8]) -> Response {
        match parse_command(payload) {
            Ok(command) => {
                self.events.emit(EventKind::CommandReceived {
                    peer,
                    command: command.to_string(),
                });
                self.dispatch(command).await
            }
            Err(err) => {
                self.events.emit(EventKind::InvalidCommand {
                    peer,
                    reason: err.to_string(),
                });
                err.into()
            }
        }
    }

    pub async fn dispatch(&self, command: Command) -> Response {
        match self.try_dispatch(command).await {
            Ok(response) => response,
            Err(err) => err.into(),
        }
    }

    async fn try_dispatch(&self, command: Command) -> Result<Response, CommandError> {
        match command {
            Command::Upload { filename } => self.upload(filename).await,
        }
    }

    async fn upload(&self, filename: String) -> Result<Response, CommandError> {
        let path = resolve_filename(&self.base_dir, &filename)?;

        // symlinks are followed, so the check runs on the real locations
        let (real_base, real_path) = match tokio::try_join!(
            tokio::fs::canonicalize(&self.base_dir),
            tokio::fs::canonicalize(&path)
        ) {
            Ok(paths) => paths,
            Err(e) => {
                debug!("No file at {}: {}", path.display(), e);
                return Err(CommandError::NotFound(filename));
            }
        };
        if !real_path.starts_with(&real_base) {
            warn!(
                "{} resolves to {}, outside {}",
                filename,
                real_path.display(),
                real_base.display()
            );
            return Err(CommandError::InvalidFilename(filename));
        }

        match tokio::fs::metadata(&real_path).await {
            Ok(metadata) if metadata.is_file() => {}
            _ => {
                debug!("No file at {}", real_path.display());
                return Err(CommandError::NotFound(filename));
            }
        }

        self.events.emit(EventKind::UploadStarted {
            filename: filename.clone(),
        });

        match self.uploader.upload(&path).await {
            Ok(()) => {
                self.events.emit(EventKind::UploadSucceeded { filename });
                Ok(Response::upload_successful())
            }
            Err(err) => {
                self.events.emit(EventKind::UploadFailed {
                    filename,
                    status: err.status().map(|status| status.as_u16()),
                    detail: err.to_string(),
                });
                Err(CommandError::UploadFailed)
            }
        }
    }
}

/// Joins `filename` onto `base_dir`, refusing anything that could leave it:
/// empty names, absolute paths, drive prefixes and `..` segments (with either
/// separator, whatever the host platform).
pub fn resolve_filename(base_dir: &Path, filename: &str) -> Result<PathBuf, CommandError> {
    let invalid = || CommandError::InvalidFilename(filename.to_string());

    if filename.trim().is_empty() || filename.contains('\0') {
        return Err(invalid());
    }
    if filename.starts_with(['/', '\\']) || filename.split(['/', '\\']).any(|part| part == "..") {
        return Err(invalid());
    }

    let relative = Path::new(filename);
    let mut has_name = false;
    for component in relative.components() {
        match component {
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid());
            }
        }
    }
    if !has_name {
        return Err(invalid());
    }

    Ok(base_dir.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::tempdir;
    use upload_engine::UploadError;

    #[derive(Default)]
    struct RecordingUploader {
        fail: bool,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl Uploader for RecordingUploader {
        async fn upload(&self, path: &Path) -> Result<(), UploadError> {
            self.calls.lock().push(path.to_path_buf());
            if self.fail {
                Err(UploadError::InvalidFileName("stubbed failure".into()))
            } else {
                Ok(())
            }
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[test]
    fn test_resolve_filename_rejects_traversal() {
        let base = Path::new("/srv/relay");

        for name in [
            "../secret.txt",
            "a/../../b",
            "..",
            "/etc/passwd",
            "\\windows\\system32",
            "..\\boot.ini",
            "",
            "   ",
            ".",
            "./",
        ] {
            assert_eq!(
                resolve_filename(base, name),
                Err(CommandError::InvalidFilename(name.to_string())),
                "{name:?} should be rejected"
            );
        }

        assert_eq!(
            resolve_filename(base, "programs/main.mod").unwrap(),
            PathBuf::from("/srv/relay/programs/main.mod")
        );
        assert_eq!(
            resolve_filename(base, "a..b.txt").unwrap(),
            PathBuf::from("/srv/relay/a..b.txt")
        );
    }

    #[tokio::test]
    async fn test_missing_file_skips_upload() {
        let dir = tempdir().unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let dispatcher = Dispatcher::new(dir.path(), uploader.clone(), EventSender::default());

        let response = dispatcher.dispatch(Command::upload("absent.mod")).await;

        assert_eq!(response, Response::error("File not found: absent.mod"));
        assert!(uploader.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_file() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("programs")).unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let dispatcher = Dispatcher::new(dir.path(), uploader.clone(), EventSender::default());

        let response = dispatcher.dispatch(Command::upload("programs")).await;

        assert_eq!(response, Response::error("File not found: programs"));
        assert!(uploader.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_successful_upload_passes_resolved_path() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("main.mod"), "MODULE main").unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let events = EventSender::default();
        let mut rx = events.subscribe();
        let dispatcher = Dispatcher::new(dir.path(), uploader.clone(), events);

        let response = dispatcher
            .handle_payload(peer(), br#"{"action":"upload","filename":"main.mod"}"#)
            .await;

        assert_eq!(response, Response::upload_successful());
        assert_eq!(*uploader.calls.lock(), vec![dir.path().join("main.mod")]);

        let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| event.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::CommandReceived {
                    peer: peer(),
                    command: "upload main.mod".into()
                },
                EventKind::UploadStarted {
                    filename: "main.mod".into()
                },
                EventKind::UploadSucceeded {
                    filename: "main.mod".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_failure_detail_stays_in_events() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("main.mod"), "MODULE main").unwrap();
        let uploader = Arc::new(RecordingUploader {
            fail: true,
            ..Default::default()
        });
        let events = EventSender::default();
        let mut rx = events.subscribe();
        let dispatcher = Dispatcher::new(dir.path(), uploader, events);

        let response = dispatcher.dispatch(Command::upload("main.mod")).await;

        assert_eq!(response, Response::error("Upload failed"));
        let (status, detail) = std::iter::from_fn(|| rx.try_recv().ok())
            .find_map(|event| match event.kind {
                EventKind::UploadFailed { status, detail, .. } => Some((status, detail)),
                _ => None,
            })
            .unwrap();
        assert!(detail.contains("stubbed failure"));
        // the endpoint was never reached
        assert_eq!(status, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_base_dir_is_rejected() {
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.mod"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("elsewhere")).unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let dispatcher = Dispatcher::new(dir.path(), uploader.clone(), EventSender::default());

        let response = dispatcher.dispatch(Command::upload("link.mod")).await;
        assert_eq!(response, Response::error("Invalid filename: link.mod"));

        let response = dispatcher.dispatch(Command::upload("elsewhere/secret.txt")).await;
        assert_eq!(
            response,
            Response::error("Invalid filename: elsewhere/secret.txt")
        );

        assert!(uploader.calls.lock().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_inside_base_dir_is_uploaded() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("programs")).unwrap();
        std::fs::write(dir.path().join("programs/main.mod"), "MODULE main").unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("programs/main.mod"),
            dir.path().join("current.mod"),
        )
        .unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let dispatcher = Dispatcher::new(dir.path(), uploader.clone(), EventSender::default());

        let response = dispatcher.dispatch(Command::upload("current.mod")).await;

        assert_eq!(response, Response::upload_successful());
        // the requested name is what reaches the endpoint
        assert_eq!(*uploader.calls.lock(), vec![dir.path().join("current.mod")]);
    }

    #[tokio::test]
    async fn test_rejected_payloads_never_reach_uploader() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("x"), "x").unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let dispatcher = Dispatcher::new(dir.path(), uploader.clone(), EventSender::default());

        let cases: [(&[u8], &str); 4] = [
            (br#"{"action":"delete","filename":"x"}"#, "Unsupported action: delete"),
            (b"\xff\xfe not json", "Invalid command"),
            (br#"{"action":"upload"}"#, "Missing field: filename"),
            (
                br#"{"action":"upload","filename":"../x"}"#,
                "Invalid filename: ../x",
            ),
        ];
        for (payload, message) in cases {
            let response = dispatcher.handle_payload(peer(), payload).await;
            assert_eq!(response, Response::error(message));
        }
        assert!(uploader.calls.lock().is_empty());
    }
}
