//! WgetDownloader against a stand-in shell script that speaks wget's
//! command line.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use esgf_fuse::CacheLayout;
use esgf_fuse::DispatchOutcome;
use esgf_fuse::Dispatcher;
use esgf_fuse::VirtualPath;
use esgf_fuse::WgetDownloader;
use esgf_fuse::downloader::DownloadError;
use esgf_fuse::downloader::DownloadReport;
use esgf_fuse::downloader::DownloadRequest;
use esgf_fuse::downloader::Downloader;

const URL: &str = "https://esgf-data.example/thredds/fileServer/cmip5/tas_Amon.nc";

/// Writes a fake wget that saves "payload" to the `-O` target, records its
/// arguments, reports a TLS failure on stderr and exits with `exit_code`.
fn fake_wget(dir: &Path, exit_code: i32) -> PathBuf {
    let script = dir.join("fake-wget");
    let args_file = dir.join("args.txt");
    let body = format!(
        r#"#!/bin/sh
printf '%s\n' "$@" > '{args}'
out=""
while [ $# -gt 0 ]; do
    if [ "$1" = "-O" ]; then
        shift
        out="$1"
    fi
    shift
done
printf 'payload' > "$out"
echo "Connecting to esgf-data.example... connected." >&2
echo "OpenSSL: error:14094410:SSL routines:sslv3 alert handshake failure" >&2
exit {exit_code}
"#,
        args = args_file.display(),
    );
    std::fs::write(&script, body).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn request(dir: &Path) -> DownloadRequest {
    DownloadRequest {
        url: URL.to_string(),
        destination: dir.join("tas_Amon.nc"),
        raw_log: dir.join("wget_raw.log"),
        error_log: dir.join("download_error.log"),
    }
}

/// A freshly written script can briefly be busy for exec while another test
/// thread forks; retry until the kernel lets go of it.
async fn download_with_retry(downloader: &WgetDownloader, request: &DownloadRequest) -> DownloadReport {
    for _ in 0..50 {
        match downloader.download(request).await {
            Err(DownloadError::Spawn { source, .. }) if source.raw_os_error() == Some(libc::ETXTBSY) => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            other => return other.unwrap(),
        }
    }
    panic!("download tool stayed busy");
}

#[tokio::test]
async fn test_wget_streams_stderr_and_notes_tls_errors() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_wget(dir.path(), 0);
    let downloader = WgetDownloader::new(&script, Some(dir.path().join("creds.pem")), "TLSv1");
    let request = request(dir.path());

    let report = download_with_retry(&downloader, &request).await;
    assert!(report.success());
    assert_eq!(report.tls_errors, 1);

    assert_eq!(std::fs::read(&request.destination).unwrap(), b"payload");

    let raw = std::fs::read_to_string(&request.raw_log).unwrap();
    assert!(raw.contains("Connecting to esgf-data.example"));
    assert!(raw.contains("OpenSSL: error:"));

    let errors = std::fs::read_to_string(&request.error_log).unwrap();
    assert!(errors.starts_with("Certificate Error:\n"));
    assert!(errors.contains(&format!("URL: {URL}\n")));

    let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(args, downloader.args(&request));
}

#[tokio::test]
async fn test_wget_reports_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_wget(dir.path(), 4);
    let downloader = WgetDownloader::new(&script, None, "TLSv1");

    let report = download_with_retry(&downloader, &request(dir.path())).await;
    assert_eq!(report.exit_code, 4);
    assert!(!report.success());
}

#[tokio::test]
async fn test_missing_program_is_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let downloader = WgetDownloader::new(dir.path().join("no-such-wget"), None, "TLSv1");

    let err = downloader.download(&request(dir.path())).await.unwrap_err();
    assert!(matches!(err, DownloadError::Spawn { .. }));
}

#[tokio::test]
async fn test_unwritable_raw_log_fails_before_running_tool() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_wget(dir.path(), 0);
    let downloader = WgetDownloader::new(&script, None, "TLSv1");
    let mut request = request(dir.path());
    request.raw_log = dir.path().join("missing-dir").join("wget_raw.log");

    let err = downloader.download(&request).await.unwrap_err();
    assert!(matches!(err, DownloadError::Log { .. }));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!request.destination.exists());
    assert!(!dir.path().join("args.txt").exists());
}

#[test]
fn test_dispatcher_removes_partial_file_after_failed_wget() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_wget(dir.path(), 8);
    let layout = CacheLayout::new(dir.path().join("root"), None);
    layout.prepare().unwrap();

    let path =
        VirtualPath::parse("/CMIP5/output/MPI-M/MPI-ESM-LR/decadal2001/mon/atmos/tas/r1i1p1/tas_Amon.nc").unwrap();
    layout.ensure_parent(&path).unwrap();

    let downloader = Arc::new(WgetDownloader::new(&script, None, "TLSv1"));
    let dispatcher = Dispatcher::new(layout, downloader, 5, None).unwrap();

    let outcome = loop {
        match dispatcher.dispatch(&path, URL) {
            DispatchOutcome::Failed { reason } if reason.contains("Text file busy") => {
                std::thread::sleep(Duration::from_millis(20));
            }
            other => break other,
        }
    };

    assert!(matches!(outcome, DispatchOutcome::Failed { ref reason } if reason.contains("code 8")));
    assert!(!dispatcher.layout().data_path(&path).exists());
    assert!(!dispatcher.layout().lock_path(&path).exists());

    let errors = std::fs::read_to_string(dispatcher.layout().error_log()).unwrap();
    assert!(errors.contains("Certificate Error:"));
    assert!(errors.contains("Download Failed:"));
}
