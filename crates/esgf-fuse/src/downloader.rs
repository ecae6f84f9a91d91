//! Download tool invocation.
//!
//! Downloads run an external tool as a child process. Its stderr is streamed
//! line by line into the raw log and scanned for TLS failures, which are
//! noted in the error log together with the URL.

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use snafu::ResultExt;
use snafu::Snafu;
use tokio::fs::File;
use tokio::fs::OpenOptions;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::LOG_FILE_MODE;
use crate::constants::MAX_LOG_LINE_LENGTH;
use crate::constants::TLS_ERROR_MARKER;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DownloadError {
    #[snafu(display("failed to spawn '{program}': {source}"))]
    Spawn { program: String, source: std::io::Error },

    #[snafu(display("failed to open log '{}': {source}", path.display()))]
    Log { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed waiting for '{program}': {source}"))]
    Wait { program: String, source: std::io::Error },
}

/// One file to fetch.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    /// Output file written by the tool.
    pub destination: PathBuf,
    /// Receives every stderr line of the tool.
    pub raw_log: PathBuf,
    /// Receives failure notes.
    pub error_log: PathBuf,
}

/// How a finished download went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    /// Exit code of the tool, `-1` when killed by a signal.
    pub exit_code: i32,
    /// Number of stderr lines carrying the TLS error marker.
    pub tls_errors: usize,
}

impl DownloadReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Fetches a URL into a local file.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadReport, DownloadError>;
}

/// Downloader settings for the wget tool.
#[derive(Debug, Clone)]
pub struct WgetDownloader {
    program: PathBuf,
    /// PEM file used as both client certificate and private key.
    certificate: Option<PathBuf>,
    secure_protocol: String,
}

impl WgetDownloader {
    pub fn new(program: impl Into<PathBuf>, certificate: Option<PathBuf>, secure_protocol: impl Into<String>) -> Self {
        Self { program: program.into(), certificate, secure_protocol: secure_protocol.into() }
    }

    /// Tool arguments for a request. No shell is involved.
    pub fn args(&self, request: &DownloadRequest) -> Vec<String> {
        let mut args = vec![
            "--no-check-certificate".to_string(),
            "-O".to_string(),
            request.destination.display().to_string(),
            format!("--secure-protocol={}", self.secure_protocol),
        ];
        if let Some(cert) = &self.certificate {
            let cert = cert.display().to_string();
            args.extend(["--certificate".to_string(), cert.clone(), "--private-key".to_string(), cert]);
        }
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl Downloader for WgetDownloader {
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadReport, DownloadError> {
        let program = self.program.display().to_string();
        info!(url = %request.url, destination = %request.destination.display(), "starting download");

        let mut raw_log = open_log(&request.raw_log).await?;

        // An early return must not leave the tool writing the destination unlocked.
        let mut child = Command::new(&self.program)
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu { program: program.clone() })?;

        let stderr = child.stderr.take().ok_or_else(|| DownloadError::Spawn {
            program: program.clone(),
            source: std::io::Error::other("stderr pipe not available"),
        })?;

        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        let mut tls_errors = 0;

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if line.len() > MAX_LOG_LINE_LENGTH {
                        truncate_line(&mut line);
                    }
                    if let Err(e) = raw_log.write_all(line.as_bytes()).await {
                        warn!(log = %request.raw_log.display(), error = %e, "failed to write raw log");
                    }
                    if line.contains(TLS_ERROR_MARKER) {
                        tls_errors += 1;
                        warn!(url = %request.url, "certificate error reported by download tool");
                        let note = format!("Certificate Error:\nURL: {}\n{}", request.url, line.trim_end());
                        append_note(&request.error_log, &note).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "error reading download tool stderr");
                    break;
                }
            }
        }

        if let Err(e) = raw_log.flush().await {
            warn!(log = %request.raw_log.display(), error = %e, "failed to flush raw log");
        }

        let status = child.wait().await.context(WaitSnafu { program })?;
        let exit_code = status.code().unwrap_or(-1);
        debug!(url = %request.url, exit_code, tls_errors, "download tool exited");

        Ok(DownloadReport { exit_code, tls_errors })
    }
}

fn truncate_line(line: &mut String) {
    let mut cut = MAX_LOG_LINE_LENGTH;
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    line.truncate(cut);
    line.push_str("... [truncated]\n");
}

async fn open_log(path: &Path) -> Result<File, DownloadError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(LOG_FILE_MODE)
        .open(path)
        .await
        .context(LogSnafu { path: path.to_path_buf() })
}

/// Append a note to a log file. Failures are logged and otherwise ignored.
pub async fn append_note(path: &Path, note: &str) {
    let result = async {
        let mut file = open_log(path).await.map_err(|e| std::io::Error::other(e.to_string()))?;
        file.write_all(note.as_bytes()).await?;
        if !note.ends_with('\n') {
            file.write_all(b"\n").await?;
        }
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        warn!(log = %path.display(), error = %e, "failed to append note");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DownloadRequest {
        DownloadRequest {
            url: "https://node/thredds/fileServer/tas_Amon.nc".into(),
            destination: PathBuf::from("/cache/tas_Amon.nc"),
            raw_log: PathBuf::from("/logs/wget_raw.log"),
            error_log: PathBuf::from("/logs/download_error.log"),
        }
    }

    #[test]
    fn builds_wget_arguments() {
        let wget = WgetDownloader::new("wget", Some(PathBuf::from("/home/u/.esg/credentials.pem")), "TLSv1");
        assert_eq!(wget.args(&request()), vec![
            "--no-check-certificate",
            "-O",
            "/cache/tas_Amon.nc",
            "--secure-protocol=TLSv1",
            "--certificate",
            "/home/u/.esg/credentials.pem",
            "--private-key",
            "/home/u/.esg/credentials.pem",
            "https://node/thredds/fileServer/tas_Amon.nc",
        ]);
    }

    #[test]
    fn omits_certificate_when_unset() {
        let wget = WgetDownloader::new("wget", None, "TLSv1_2");
        let args = wget.args(&request());
        assert!(!args.iter().any(|arg| arg == "--certificate"));
        assert_eq!(args.last().map(String::as_str), Some("https://node/thredds/fileServer/tas_Amon.nc"));
    }

    #[test]
    fn truncates_long_lines_on_char_boundary() {
        let mut line = "é".repeat(MAX_LOG_LINE_LENGTH);
        truncate_line(&mut line);
        assert!(line.ends_with("... [truncated]\n"));
        assert!(line.len() <= MAX_LOG_LINE_LENGTH + "... [truncated]\n".len());
    }
}
