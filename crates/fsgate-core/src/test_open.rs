// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! open(2) and create-or-open.

use crate::abi;
use crate::config::DispatchConfig;
use crate::creds::Credentials;
use crate::dispatch::FsDispatcher;
use crate::error::FsError;
use crate::fault::{FaultErrno, FaultOp, FaultPolicy, FaultRule};
use crate::resolve::DirFd;
use crate::task::{DescriptorTable, Task};
use crate::testing::{Fixture, TestFdTable};
use crate::types::{FilePerms, NodeKind};
use std::sync::Arc;

const CREATE: u32 = abi::O_CREAT | abi::O_WRONLY;

#[test]
fn create_applies_umask_and_owner() {
    let fx = Fixture::new();
    fx.dispatcher.open(&fx.task, "/f", CREATE, 0o666).unwrap();

    let attr = fx.attr("/f");
    assert_eq!(attr.perms, FilePerms(0o644));
    assert_eq!(attr.owner, fx.task.file_owner());
    assert_eq!(fx.lookup("/f").unwrap().kind(), NodeKind::Regular);
}

#[test]
fn descriptors_are_lowest_free() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);

    let fds: Vec<i32> = (0..3)
        .map(|_| fx.dispatcher.open(&fx.task, "/f", abi::O_RDONLY, 0).unwrap())
        .collect();
    assert_eq!(fds, vec![0, 1, 2]);

    fx.fds.close(1).unwrap();
    assert_eq!(fx.dispatcher.open(&fx.task, "/f", abi::O_RDONLY, 0).unwrap(), 1);
}

#[test]
fn cloexec_lands_in_descriptor_flags() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);

    let plain = fx.dispatcher.open(&fx.task, "/f", abi::O_RDONLY, 0).unwrap();
    let cloexec = fx
        .dispatcher
        .open(&fx.task, "/f", abi::O_RDONLY | abi::O_CLOEXEC, 0)
        .unwrap();
    assert!(!fx.fds.get(plain).unwrap().1.close_on_exec);
    assert!(fx.fds.get(cloexec).unwrap().1.close_on_exec);

    let flags = fx.file(cloexec).flags();
    assert!(flags.read);
    assert!(!flags.write);
}

#[test]
fn exclusive_create_never_touches_existing_names() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    fx.dispatcher.truncate(&fx.task, "/f", 10).unwrap();
    fx.symlink("missing", "/dangling");

    let flags = CREATE | abi::O_EXCL | abi::O_TRUNC;
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/f", flags, 0o644).unwrap_err(),
        FsError::AlreadyExists
    );
    assert_eq!(fx.attr("/f").size, 10);

    assert_eq!(
        fx.dispatcher.open(&fx.task, "/dangling", flags, 0o644).unwrap_err(),
        FsError::AlreadyExists
    );
    assert_eq!(fx.lookup("/missing").unwrap_err(), FsError::NotFound);
    assert_eq!(fx.fds.len(), 0);
}

#[test]
fn create_through_dangling_symlink_makes_the_target() {
    let fx = Fixture::new();
    fx.mkdir("/d", 0o755);
    fx.symlink("target", "/d/rel");
    fx.symlink("/d/abs-target", "/abs");

    fx.dispatcher.open(&fx.task, "/d/rel", CREATE, 0o600).unwrap();
    fx.dispatcher.open(&fx.task, "/abs", CREATE, 0o600).unwrap();

    assert_eq!(fx.lookup("/d/target").unwrap().kind(), NodeKind::Regular);
    assert_eq!(fx.lookup("/d/abs-target").unwrap().kind(), NodeKind::Regular);
    // The links themselves are left alone.
    assert_eq!(fx.dispatcher.readlink(&fx.task, "/d/rel", 64).unwrap(), b"target");
    assert!(fx.lookup("/abs").unwrap().is_symlink());
}

#[test]
fn create_needs_an_existing_parent() {
    let fx = Fixture::new();
    fx.symlink("/nope/x", "/l");

    assert_eq!(
        fx.dispatcher.open(&fx.task, "/nope/x", CREATE, 0o644).unwrap_err(),
        FsError::NotFound
    );
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/l", CREATE, 0o644).unwrap_err(),
        FsError::NotFound
    );

    fx.touch("/file", 0o644);
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/file/x", CREATE, 0o644).unwrap_err(),
        FsError::NotADirectory
    );
}

#[test]
fn nofollow_refuses_final_symlink() {
    let fx = Fixture::new();
    fx.touch("/t", 0o644);
    fx.symlink("t", "/l");

    assert_eq!(
        fx.dispatcher
            .open(&fx.task, "/l", abi::O_RDONLY | abi::O_NOFOLLOW, 0)
            .unwrap_err(),
        FsError::TooManySymlinks
    );
    assert_eq!(
        fx.dispatcher
            .open(&fx.task, "/l", CREATE | abi::O_NOFOLLOW, 0o644)
            .unwrap_err(),
        FsError::TooManySymlinks
    );
    // Intermediate links are still followed.
    fx.mkdir("/d", 0o755);
    fx.touch("/d/inner", 0o644);
    fx.symlink("d", "/dl");
    assert!(fx
        .dispatcher
        .open(&fx.task, "/dl/inner", abi::O_RDONLY | abi::O_NOFOLLOW, 0)
        .is_ok());
}

#[test]
fn directory_syntax_and_type_checks() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    fx.mkdir("/d", 0o755);

    assert_eq!(
        fx.dispatcher.open(&fx.task, "/new/", CREATE, 0o644).unwrap_err(),
        FsError::NotFound
    );
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/", CREATE, 0o644).unwrap_err(),
        FsError::IsADirectory
    );
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/d", CREATE, 0o644).unwrap_err(),
        FsError::IsADirectory
    );
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/f/", abi::O_RDONLY, 0).unwrap_err(),
        FsError::NotADirectory
    );
    assert_eq!(
        fx.dispatcher
            .open(&fx.task, "/f", abi::O_RDONLY | abi::O_DIRECTORY, 0)
            .unwrap_err(),
        FsError::NotADirectory
    );
    for flags in [abi::O_WRONLY, abi::O_RDWR, abi::O_RDONLY | abi::O_TRUNC] {
        assert_eq!(
            fx.dispatcher.open(&fx.task, "/d", flags, 0).unwrap_err(),
            FsError::IsADirectory
        );
    }
    assert!(fx.dispatcher.open(&fx.task, "/d/", abi::O_RDONLY, 0).is_ok());
}

#[test]
fn permission_denials() {
    let fx = Fixture::new();
    fx.touch("/secret", 0o600);
    fx.mkdir("/ro", 0o755);
    fx.mkdir("/private", 0o700);

    fx.become_user(1000, 1000);
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/secret", abi::O_RDONLY, 0).unwrap_err(),
        FsError::PermissionDenied
    );
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/secret", CREATE, 0o644).unwrap_err(),
        FsError::PermissionDenied
    );
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/ro/new", CREATE, 0o644).unwrap_err(),
        FsError::PermissionDenied
    );
    assert_eq!(fx.lookup("/ro/new").unwrap_err(), FsError::NotFound);
    // Type checks come first.
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/private", abi::O_WRONLY, 0).unwrap_err(),
        FsError::IsADirectory
    );
}

#[test]
fn trunc_resets_regular_files_only() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    fx.dispatcher.truncate(&fx.task, "/f", 100).unwrap();
    fx.dispatcher.mknod(&fx.task, "/p", abi::S_IFIFO | 0o644, 0).unwrap();

    fx.dispatcher
        .open(&fx.task, "/f", abi::O_RDWR | abi::O_TRUNC, 0)
        .unwrap();
    assert_eq!(fx.attr("/f").size, 0);

    assert!(fx
        .dispatcher
        .open(&fx.task, "/p", abi::O_WRONLY | abi::O_TRUNC, 0)
        .is_ok());
    assert!(fx
        .dispatcher
        .open(&fx.task, "/p", CREATE | abi::O_TRUNC, 0o644)
        .is_ok());
}

#[cfg(feature = "events")]
#[test]
fn trunc_reports_modification_then_open() {
    use crate::types::{FsEvent, MockEventSink};

    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    let id = fx.lookup("/f").unwrap().id();

    let mut sink = MockEventSink::new();
    sink.expect_on_event()
        .withf(move |evt| matches!(evt, FsEvent::Modified { inode, name } if *inode == id && name == "f"))
        .times(1)
        .return_const(());
    sink.expect_on_event()
        .withf(move |evt| matches!(evt, FsEvent::Opened { inode, .. } if *inode == id))
        .times(1)
        .return_const(());
    let sub = fx.dispatcher.subscribe_events(Arc::new(sink)).unwrap();

    fx.dispatcher
        .open(&fx.task, "/f", abi::O_WRONLY | abi::O_TRUNC, 0)
        .unwrap();
    fx.dispatcher.unsubscribe_events(sub).unwrap();
    assert_eq!(fx.dispatcher.unsubscribe_events(sub), Err(FsError::NotFound));
}

#[test]
fn creat_truncates_existing_file() {
    let fx = Fixture::new();
    let fd = fx.dispatcher.creat(&fx.task, "/c", 0o640).unwrap();
    let flags = fx.file(fd).flags();
    assert!(flags.write && !flags.read && flags.truncate);
    assert_eq!(fx.attr("/c").perms, FilePerms(0o640));

    fx.dispatcher.truncate(&fx.task, "/c", 5).unwrap();
    fx.dispatcher.creat(&fx.task, "/c", 0o600).unwrap();
    let attr = fx.attr("/c");
    assert_eq!(attr.size, 0);
    // Mode only applies when the file is created.
    assert_eq!(attr.perms, FilePerms(0o640));
}

#[test]
fn open_at_resolves_from_directory_descriptor() {
    let fx = Fixture::new();
    fx.mkdir("/d", 0o755);
    let dir = fx
        .dispatcher
        .open(&fx.task, "/d", abi::O_RDONLY | abi::O_DIRECTORY, 0)
        .unwrap();

    fx.dispatcher
        .open_at(&fx.task, DirFd::Fd(dir), "new", CREATE, 0o644)
        .unwrap();
    assert!(fx.lookup("/d/new").is_ok());
    assert!(fx
        .dispatcher
        .open_at(&fx.task, DirFd::Fd(dir), "new", abi::O_RDONLY, 0)
        .is_ok());
}

#[test]
fn create_through_symlink_loop_fails() {
    let fx = Fixture::new();
    fx.symlink("loop", "/loop");
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/loop", CREATE, 0o644).unwrap_err(),
        FsError::TooManySymlinks
    );
}

#[test]
fn create_through_direct_link_opens_target_as_found() {
    let config = DispatchConfig {
        max_symlink_traversals: 0,
        ..DispatchConfig::default()
    };
    let fx = Fixture::with_dispatcher(FsDispatcher::new(config));
    fx.touch("/real", 0o644);
    fx.symlink("real", "/soft");
    let root = fx.task.fs().root_directory();
    let real = fx.lookup("/real").unwrap();
    let soft = fx.lookup("/soft").unwrap();
    fx.fs.add_direct_link(&root, "magic", "nowhere", &real).unwrap();
    fx.fs.add_direct_link(&root, "to-soft", "nowhere", &soft).unwrap();

    // Direct hops take nothing from the budget.
    let fd = fx.dispatcher.open(&fx.task, "/magic", CREATE, 0o644).unwrap();
    assert!(fx.file(fd).dirent().same_node(&real));
    assert_eq!(fx.lookup("/nowhere").unwrap_err(), FsError::NotFound);

    // A symlink reached directly is not followed again.
    assert_eq!(
        fx.dispatcher.open(&fx.task, "/to-soft", CREATE, 0o644).unwrap_err(),
        FsError::TooManySymlinks
    );
}

#[test]
fn full_descriptor_table() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    let task = Task::new(
        Credentials::root(),
        fx.fs.root_dirent(),
        Arc::new(TestFdTable::with_limit(1)),
    );

    assert_eq!(fx.dispatcher.open(&task, "/f", abi::O_RDONLY, 0).unwrap(), 0);
    assert_eq!(
        fx.dispatcher.open(&task, "/f", abi::O_RDONLY, 0).unwrap_err(),
        FsError::TooManyOpenFiles
    );
}

#[test]
fn backend_failure_surfaces_unchanged() {
    let fx = Fixture::new();
    fx.fs.faults().set_policy(FaultPolicy {
        enabled: true,
        rules: vec![FaultRule {
            op: FaultOp::Create,
            errno: FaultErrno::Eio,
            start_after: 0,
            max_faults: Some(1),
        }],
    });

    assert_eq!(
        fx.dispatcher.open(&fx.task, "/f", CREATE, 0o644).unwrap_err(),
        FsError::Io
    );
    assert_eq!(fx.lookup("/f").unwrap_err(), FsError::NotFound);
    assert_eq!(fx.fds.len(), 0);
    assert!(fx.dispatcher.open(&fx.task, "/f", CREATE, 0o644).is_ok());
}
