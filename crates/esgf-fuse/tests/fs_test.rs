//! Tests for the FUSE binding.
//!
//! Calls the `FileSystem` trait methods directly, without a mount.

mod common;

use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use common::FakeDownloader;
use common::SCENARIO_PATH;
use common::catalogue_for;
use common::lazy_cache;
use esgf_fuse::EsgfFs;
use esgf_fuse::constants::ROOT_INODE;
use fuse_backend_rs::api::filesystem::Context;
use fuse_backend_rs::api::filesystem::Entry;
use fuse_backend_rs::api::filesystem::FileSystem;

const FILE_SIZE: usize = 8192;

fn filesystem() -> (tempfile::TempDir, Arc<FakeDownloader>, EsgfFs) {
    let downloader = Arc::new(FakeDownloader::new(FILE_SIZE, Duration::ZERO));
    let (dir, cache) = lazy_cache(catalogue_for(&[SCENARIO_PATH.to_string()], FILE_SIZE as u64), downloader.clone(), 5);
    (dir, downloader, EsgfFs::new(Arc::new(cache), 1000, 1000))
}

/// Look up every component of `path` starting at the root.
fn walk(fs: &EsgfFs, path: &str) -> Entry {
    let ctx = Context::new();
    let mut parent = ROOT_INODE;
    let mut entry = None;
    for name in path.trim_start_matches('/').split('/') {
        let name = CString::new(name).unwrap();
        let found = fs.lookup(&ctx, parent, &name).unwrap();
        parent = found.inode;
        entry = Some(found);
    }
    entry.unwrap()
}

fn errno(err: std::io::Error) -> Option<i32> {
    err.raw_os_error()
}

#[test]
fn test_lookup_chain_reports_directories_then_file() {
    let (_dir, _downloader, fs) = filesystem();
    let ctx = Context::new();

    let project = fs.lookup(&ctx, ROOT_INODE, &CString::new("CMIP5").unwrap()).unwrap();
    assert_eq!(project.attr.st_mode & libc::S_IFMT, libc::S_IFDIR);
    assert_eq!(project.attr.st_mode & 0o777, 0o755);

    let file = walk(&fs, SCENARIO_PATH);
    assert_eq!(file.attr.st_mode & libc::S_IFMT, libc::S_IFREG);
    assert_eq!(file.attr.st_mode & 0o777, 0o444);
    assert_eq!(file.attr.st_size, FILE_SIZE as i64);
    assert_eq!(file.attr.st_uid, 1000);
    assert_ne!(file.inode, ROOT_INODE);
}

#[test]
fn test_lookup_is_stable_across_calls() {
    let (_dir, _downloader, fs) = filesystem();

    let first = walk(&fs, SCENARIO_PATH);
    let second = walk(&fs, SCENARIO_PATH);
    assert_eq!(first.inode, second.inode);
}

#[test]
fn test_getattr_root_and_file() {
    let (_dir, _downloader, fs) = filesystem();
    let ctx = Context::new();

    let (root, _ttl) = fs.getattr(&ctx, ROOT_INODE, None).unwrap();
    assert_eq!(root.st_mode & libc::S_IFMT, libc::S_IFDIR);
    assert_eq!(root.st_nlink, 2);

    let file = walk(&fs, SCENARIO_PATH);
    let (attr, _ttl) = fs.getattr(&ctx, file.inode, None).unwrap();
    assert_eq!(attr.st_size, FILE_SIZE as i64);
    assert_eq!(attr.st_nlink, 1);
}

#[test]
fn test_open_read_only_downloads() {
    let (_dir, downloader, fs) = filesystem();
    let ctx = Context::new();
    let file = walk(&fs, SCENARIO_PATH);

    let (handle, _options, _passthrough) = fs.open(&ctx, file.inode, libc::O_RDONLY as u32, 0).unwrap();
    assert!(handle.is_none());
    assert_eq!(downloader.calls(), 1);

    let vpath = esgf_fuse::VirtualPath::parse(SCENARIO_PATH).unwrap();
    assert!(fs.cache().layout().data_path(&vpath).is_file());
}

#[test]
fn test_open_for_writing_is_read_only_error() {
    let (_dir, downloader, fs) = filesystem();
    let ctx = Context::new();
    let file = walk(&fs, SCENARIO_PATH);

    for flags in [libc::O_WRONLY, libc::O_RDWR] {
        let err = fs.open(&ctx, file.inode, flags as u32, 0).unwrap_err();
        assert_eq!(errno(err), Some(libc::EROFS));
    }
    assert_eq!(downloader.calls(), 0);
}

#[test]
fn test_open_directory_is_rejected() {
    let (_dir, _downloader, fs) = filesystem();
    let ctx = Context::new();
    let project = fs.lookup(&ctx, ROOT_INODE, &CString::new("CMIP5").unwrap()).unwrap();

    let err = fs.open(&ctx, project.inode, libc::O_RDONLY as u32, 0).unwrap_err();
    assert_eq!(errno(err), Some(libc::EISDIR));
}

#[test]
fn test_lookup_below_file_is_not_a_directory() {
    let (_dir, _downloader, fs) = filesystem();
    let ctx = Context::new();
    let file = walk(&fs, SCENARIO_PATH);

    let err = fs.lookup(&ctx, file.inode, &CString::new("child").unwrap()).unwrap_err();
    assert_eq!(errno(err), Some(libc::ENOTDIR));
}

#[test]
fn test_dot_names_are_invalid() {
    let (_dir, _downloader, fs) = filesystem();
    let ctx = Context::new();

    for name in [".", ".."] {
        let err = fs.lookup(&ctx, ROOT_INODE, &CString::new(name).unwrap()).unwrap_err();
        assert_eq!(errno(err), Some(libc::EINVAL));
    }
}

#[test]
fn test_unknown_inode_is_not_found() {
    let (_dir, _downloader, fs) = filesystem();
    let ctx = Context::new();

    let err = fs.getattr(&ctx, 0xdead_beef, None).unwrap_err();
    assert_eq!(errno(err), Some(libc::ENOENT));
}

#[test]
fn test_forget_drops_inode() {
    let (_dir, _downloader, fs) = filesystem();
    let ctx = Context::new();
    let project = fs.lookup(&ctx, ROOT_INODE, &CString::new("CMIP5").unwrap()).unwrap();

    fs.forget(&ctx, project.inode, 1);
    let err = fs.getattr(&ctx, project.inode, None).unwrap_err();
    assert_eq!(errno(err), Some(libc::ENOENT));
}
