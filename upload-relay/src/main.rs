use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, debug, error, warn};
use upload_engine::{HttpUploader, UploadConfig, Uploader};
use utils::{
    logging::{self, Component, LogConfig},
    relay_config::RelayConfig,
    rpc::{
        client::{DEFAULT_TIMEOUT, request_upload},
        server::RelayServer,
    },
};

mod pretty_print_events;

use pretty_print_events::{print_event, print_response};

const PRINTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory for log files
    #[arg(short = 'l', long = "log-dir", value_name = "DIR", default_value = ".dev/logs")]
    log_dir: PathBuf,

    /// Set log level
    #[arg(long = "log-level", value_name = "LEVEL",
          value_parser = ["trace", "debug", "info", "warn", "error"],
          default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Accept upload commands over TCP and push the named files to the storage endpoint
    Serve {
        /// TOML config file, created with defaults when missing
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Address to listen on
        #[arg(long = "listen", value_name = "ADDR")]
        listen: Option<String>,

        /// TCP port to listen on
        #[arg(short = 'p', long = "port", value_name = "PORT")]
        port: Option<u16>,

        /// Directory requested filenames are resolved against
        #[arg(short = 'd', long = "dir", value_name = "DIR")]
        dir: Option<PathBuf>,

        #[command(flatten)]
        upload: UploadArgs,
    },

    /// Ask a running relay to upload one file
    Send {
        host: String,
        port: u16,
        filename: String,

        /// Seconds to wait for connect and for the response
        #[arg(short = 't', long = "timeout", default_value_t = DEFAULT_TIMEOUT.as_secs())]
        timeout: u64,
    },

    /// Upload a local file directly, without a relay
    Put {
        file: PathBuf,

        #[command(flatten)]
        upload: UploadArgs,
    },
}

#[derive(Args)]
pub struct UploadArgs {
    /// Storage endpoint the file name is appended to
    #[arg(short = 'u', long = "base-url", value_name = "URL")]
    base_url: Option<String>,

    #[arg(long = "username")]
    username: Option<String>,

    #[arg(long = "password")]
    password: Option<String>,

    /// Accept invalid TLS certificates from the storage endpoint
    #[arg(long = "insecure", action = ArgAction::SetTrue)]
    insecure: bool,

    /// Send a Content-MD5 header with each upload
    #[arg(long = "content-md5", action = ArgAction::SetTrue)]
    content_md5: bool,

    /// Outbound request timeout in seconds, 0 disables it
    #[arg(long = "upload-timeout", value_name = "SECS")]
    timeout: Option<u64>,
}

impl UploadArgs {
    fn apply(self, mut config: UploadConfig) -> UploadConfig {
        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(username) = self.username {
            config.username = username;
        }
        if let Some(password) = self.password {
            config.password = password;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        config.accept_invalid_certs |= self.insecure;
        config.content_md5 |= self.content_md5;
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let component = match cli.command {
        Commands::Serve { .. } => Component::Relay,
        Commands::Send { .. } => Component::Client,
        Commands::Put { .. } => Component::Put,
    };
    match logging::init_logging(LogConfig {
        component,
        log_dir: Some(cli.log_dir.clone()),
        max_level: logging::parse_level(&cli.log_level).unwrap_or(Level::INFO),
        // the relay prints its own event log
        log_to_console: component != Component::Relay,
        ..Default::default()
    }) {
        Ok(_) => {
            debug!("Logger initialized for {}", component.as_str());
        }
        Err(e) => {
            eprintln!("Failed to initialize logger: {}", e);
        }
    }

    let result = match cli.command {
        Commands::Serve {
            config,
            listen,
            port,
            dir,
            upload,
        } => serve(config, listen, port, dir, upload).await,
        Commands::Send {
            host,
            port,
            filename,
            timeout,
        } => send(&host, port, &filename, Duration::from_secs(timeout)).await,
        Commands::Put { file, upload } => put(file, upload).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "error:".red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(
    config_path: Option<PathBuf>,
    listen: Option<String>,
    port: Option<u16>,
    dir: Option<PathBuf>,
    upload: UploadArgs,
) -> Result<bool> {
    let mut config = match config_path {
        Some(path) => RelayConfig::load_config(&path)?,
        None => RelayConfig::default(),
    };
    if let Some(listen) = listen {
        config.relay.listen_address = listen;
    }
    if let Some(port) = port {
        config.relay.listen_port = port;
    }
    if let Some(dir) = dir {
        config.relay.base_dir = dir;
    }
    config.upload = upload.apply(config.upload);

    let uploader =
        HttpUploader::new(config.upload.clone()).context("Invalid upload configuration")?;
    let mut server = RelayServer::new(config.relay.clone(), Arc::new(uploader));

    let mut events = server.events().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    server.start().await?;
    println!("Using base URL: {}", config.upload.base_url);
    if config.upload.accept_invalid_certs {
        println!("{}", "TLS certificate validation is disabled".yellow());
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    server.stop().await;
    // the printer sees `Closed` once the last sender is gone
    drop(server);
    if tokio::time::timeout(PRINTER_DRAIN_TIMEOUT, printer).await.is_err() {
        warn!("Event log did not drain within {:?}", PRINTER_DRAIN_TIMEOUT);
    }

    Ok(true)
}

async fn send(host: &str, port: u16, filename: &str, timeout: Duration) -> Result<bool> {
    println!("Sending upload request for {} to {}:{}...", filename, host, port);
    let response = request_upload(host, port, filename, timeout)
        .await
        .with_context(|| format!("Upload request to {}:{} failed", host, port))?;

    print_response(&response);
    Ok(response.is_success())
}

async fn put(file: PathBuf, upload: UploadArgs) -> Result<bool> {
    let config = upload.apply(UploadConfig::default());
    let uploader = HttpUploader::new(config).context("Invalid upload configuration")?;

    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    match uploader.upload(&file).await {
        Ok(()) => {
            println!("{} {}", name, "uploaded successfully".green());
            Ok(true)
        }
        Err(e) => {
            println!("{} {}", "Failed to upload file:".red(), e);
            Ok(false)
        }
    }
}
