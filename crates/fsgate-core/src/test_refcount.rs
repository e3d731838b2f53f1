// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Every dirent reference taken for a call is released when it returns.

use crate::abi;
use crate::error::FsError;
use crate::resolve::DirFd;
use crate::testing::Fixture;

#[test]
fn successful_operations_release_their_references() {
    let fx = Fixture::new();
    let baseline = fx.fs.outstanding_refs();

    fx.mkdir("/a", 0o755);
    fx.mkdir("/a/b", 0o755);
    fx.touch("/a/b/f", 0o644);
    fx.symlink("b/f", "/a/l");
    fx.dispatcher.link(&fx.task, "/a/l", "/a/hard").unwrap();
    fx.dispatcher.rename(&fx.task, "/a/hard", "/a/b/moved").unwrap();
    fx.dispatcher.chmod(&fx.task, "/a/l", 0o600).unwrap();
    fx.dispatcher.truncate(&fx.task, "/a/l", 10).unwrap();
    fx.dispatcher.readlink(&fx.task, "/a/l", 16).unwrap();
    fx.dispatcher.access(&fx.task, "/a/b/f", abi::R_OK).unwrap();
    fx.dispatcher.unlink(&fx.task, "/a/b/moved").unwrap();
    fx.dispatcher.chdir(&fx.task, "/a/b").unwrap();
    fx.dispatcher.chdir(&fx.task, "/").unwrap();
    fx.dispatcher.getcwd(&fx.task, 64).unwrap();

    assert_eq!(fx.fs.outstanding_refs(), baseline);
}

#[test]
fn failing_operations_release_their_references() {
    let fx = Fixture::new();
    fx.mkdir("/d", 0o755);
    fx.touch("/d/f", 0o644);
    fx.symlink("loop", "/loop");
    let baseline = fx.fs.outstanding_refs();

    let failures = [
        fx.dispatcher.mkdir(&fx.task, "/d", 0o755),
        fx.dispatcher.rmdir(&fx.task, "/d"),
        fx.dispatcher.unlink(&fx.task, "/d/missing"),
        fx.dispatcher.rename(&fx.task, "/d", "/d/sub"),
        fx.dispatcher.link(&fx.task, "/d", "/d2"),
        fx.dispatcher.truncate(&fx.task, "/loop", 1),
        fx.dispatcher.chdir(&fx.task, "/d/f"),
        fx.dispatcher
            .open(&fx.task, "/d/f", abi::O_CREAT | abi::O_EXCL | abi::O_WRONLY, 0o644)
            .map(drop),
        fx.dispatcher
            .open(&fx.task, "/loop", abi::O_CREAT | abi::O_WRONLY, 0o644)
            .map(drop),
        fx.dispatcher.resolve(&fx.task, DirFd::Cwd, "/d/f/x", true).map(drop),
    ];
    assert!(failures.iter().all(Result::is_err));
    assert_eq!(fx.fs.outstanding_refs(), baseline);
}

#[test]
fn open_files_hold_a_reference_until_closed() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    let baseline = fx.fs.outstanding_refs();

    let fd = fx.dispatcher.open(&fx.task, "/f", abi::O_RDONLY, 0).unwrap();
    assert!(fx.fs.outstanding_refs() > baseline);

    fx.fds.close(fd).unwrap();
    assert_eq!(fx.fs.outstanding_refs(), baseline);
    assert_eq!(fx.fds.close(fd), Err(FsError::BadFileDescriptor));
}
