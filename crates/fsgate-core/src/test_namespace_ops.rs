// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use crate::abi;
use crate::error::FsError;
use crate::resolve::DirFd;
use crate::testing::Fixture;
use crate::types::{FilePerms, NodeKind};

/// World-writable `/pub` for unprivileged callers.
fn with_public_dir(fx: &Fixture) {
    fx.dispatcher.umask(&fx.task, 0);
    fx.mkdir("/pub", 0o777);
}

#[test]
fn mkdir_creates_once() {
    let fx = Fixture::new();
    fx.mkdir("/d", 0o777);
    assert_eq!(fx.attr("/d").perms, FilePerms(0o755));
    assert_eq!(fx.attr("/").links, 3);

    assert_eq!(
        fx.dispatcher.mkdir(&fx.task, "/d", 0o755).unwrap_err(),
        FsError::AlreadyExists
    );
    assert_eq!(
        fx.dispatcher.mkdir(&fx.task, "/", 0o755).unwrap_err(),
        FsError::AlreadyExists
    );
    fx.mkdir("/e/", 0o755);
    assert!(fx.lookup("/e").unwrap().is_dir());
}

#[test]
fn mkdir_errors() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    fx.mkdir("/private", 0o700);

    assert_eq!(
        fx.dispatcher.mkdir(&fx.task, "/f/x", 0o755).unwrap_err(),
        FsError::NotADirectory
    );
    assert_eq!(
        fx.dispatcher.mkdir(&fx.task, "/missing/x", 0o755).unwrap_err(),
        FsError::NotFound
    );
    let long = format!("/{}", "n".repeat(abi::NAME_MAX + 1));
    assert_eq!(
        fx.dispatcher.mkdir(&fx.task, &long, 0o755).unwrap_err(),
        FsError::NameTooLong
    );

    fx.become_user(1000, 1000);
    assert_eq!(
        fx.dispatcher.mkdir(&fx.task, "/private/x", 0o755).unwrap_err(),
        FsError::PermissionDenied
    );
    assert_eq!(
        fx.dispatcher.mkdir(&fx.task, "/x", 0o755).unwrap_err(),
        FsError::PermissionDenied
    );
}

#[test]
fn rmdir_rules() {
    let fx = Fixture::new();
    fx.mkdir("/d", 0o755);
    fx.touch("/d/f", 0o644);
    fx.mkdir("/empty", 0o755);

    assert_eq!(fx.dispatcher.rmdir(&fx.task, "/").unwrap_err(), FsError::Busy);
    assert_eq!(fx.dispatcher.rmdir(&fx.task, "//").unwrap_err(), FsError::Busy);
    assert_eq!(
        fx.dispatcher.rmdir(&fx.task, "/d/.").unwrap_err(),
        FsError::InvalidArgument
    );
    assert_eq!(fx.dispatcher.rmdir(&fx.task, "/d/..").unwrap_err(), FsError::NotEmpty);
    assert_eq!(fx.dispatcher.rmdir(&fx.task, "/d").unwrap_err(), FsError::NotEmpty);
    assert_eq!(
        fx.dispatcher.rmdir(&fx.task, "/d/f").unwrap_err(),
        FsError::NotADirectory
    );

    fx.dispatcher.rmdir(&fx.task, "/empty/").unwrap();
    assert_eq!(fx.lookup("/empty").unwrap_err(), FsError::NotFound);
}

#[test]
fn unlink_rules() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    fx.touch("/g", 0o644);
    fx.mkdir("/d", 0o755);
    fx.symlink("g", "/l");

    assert_eq!(fx.dispatcher.unlink(&fx.task, "/d").unwrap_err(), FsError::IsADirectory);
    assert_eq!(fx.dispatcher.unlink(&fx.task, "/").unwrap_err(), FsError::IsADirectory);
    assert_eq!(
        fx.dispatcher.unlink(&fx.task, "/f/").unwrap_err(),
        FsError::NotADirectory
    );
    assert_eq!(fx.dispatcher.unlink(&fx.task, "/nope").unwrap_err(), FsError::NotFound);

    fx.dispatcher.unlink(&fx.task, "/l").unwrap();
    assert_eq!(fx.lookup("/l").unwrap_err(), FsError::NotFound);
    assert!(fx.lookup("/g").is_ok());

    fx.dispatcher.unlink(&fx.task, "/f").unwrap();
    assert_eq!(fx.lookup("/f").unwrap_err(), FsError::NotFound);
}

#[test]
fn unlink_at_flags() {
    let fx = Fixture::new();
    fx.mkdir("/d", 0o755);

    assert_eq!(
        fx.dispatcher.unlink_at(&fx.task, DirFd::Cwd, "/d", 0x1).unwrap_err(),
        FsError::InvalidArgument
    );
    fx.dispatcher
        .unlink_at(&fx.task, DirFd::Cwd, "/d", abi::AT_REMOVEDIR)
        .unwrap();
    assert_eq!(fx.lookup("/d").unwrap_err(), FsError::NotFound);
}

#[test]
fn sticky_directory_protects_other_users_entries() {
    let fx = Fixture::new();
    fx.dispatcher.umask(&fx.task, 0);
    fx.mkdir("/tmp", 0o1777);
    assert_eq!(fx.attr("/tmp").perms, FilePerms(0o1777));

    fx.become_user(1000, 1000);
    fx.touch("/tmp/mine", 0o644);
    fx.touch("/tmp/other", 0o644);

    fx.become_user(2000, 2000);
    assert_eq!(
        fx.dispatcher.unlink(&fx.task, "/tmp/mine").unwrap_err(),
        FsError::OperationNotPermitted
    );
    assert_eq!(
        fx.dispatcher.rename(&fx.task, "/tmp/mine", "/tmp/taken").unwrap_err(),
        FsError::OperationNotPermitted
    );

    fx.become_user(1000, 1000);
    fx.dispatcher.unlink(&fx.task, "/tmp/mine").unwrap();

    fx.become_root();
    fx.dispatcher.unlink(&fx.task, "/tmp/other").unwrap();
}

#[test]
fn symlink_and_readlink() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    fx.symlink("some/target", "/l");

    assert_eq!(fx.dispatcher.readlink(&fx.task, "/l", 64).unwrap(), b"some/target");
    assert_eq!(fx.dispatcher.readlink(&fx.task, "/l", 4).unwrap(), b"some");
    assert_eq!(fx.attr("/l").size, "some/target".len() as u64);
    assert_eq!(
        fx.dispatcher.readlink(&fx.task, "/l", 0).unwrap_err(),
        FsError::InvalidArgument
    );
    assert_eq!(
        fx.dispatcher.readlink(&fx.task, "/f", 64).unwrap_err(),
        FsError::InvalidArgument
    );
    assert_eq!(
        fx.dispatcher.readlink(&fx.task, "/l/", 64).unwrap_err(),
        FsError::NotFound
    );

    assert_eq!(
        fx.dispatcher.symlink(&fx.task, "", "/empty").unwrap_err(),
        FsError::NotFound
    );
    assert_eq!(
        fx.dispatcher.symlink(&fx.task, "x", "/dir/").unwrap_err(),
        FsError::NotFound
    );
    assert_eq!(
        fx.dispatcher.symlink(&fx.task, "x", "/l").unwrap_err(),
        FsError::AlreadyExists
    );
}

#[test]
fn hard_links_share_the_inode() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    fx.mkdir("/d", 0o755);

    fx.dispatcher.link(&fx.task, "/f", "/g").unwrap();
    assert!(fx.lookup("/g").unwrap().same_node(&fx.lookup("/f").unwrap()));
    assert_eq!(fx.attr("/f").links, 2);

    assert_eq!(
        fx.dispatcher.link(&fx.task, "/d", "/d2").unwrap_err(),
        FsError::OperationNotPermitted
    );
    assert_eq!(
        fx.dispatcher.link(&fx.task, "/f", "/g").unwrap_err(),
        FsError::AlreadyExists
    );
    assert_eq!(
        fx.dispatcher.link(&fx.task, "/f", "/h/").unwrap_err(),
        FsError::NotFound
    );

    fx.dispatcher.unlink(&fx.task, "/f").unwrap();
    assert_eq!(fx.attr("/g").links, 1);
}

#[test]
fn non_owners_link_only_files_they_can_read_and_write() {
    let fx = Fixture::new();
    with_public_dir(&fx);
    fx.touch("/readonly", 0o644);
    fx.touch("/shared", 0o666);

    fx.become_user(1000, 1000);
    assert_eq!(
        fx.dispatcher.link(&fx.task, "/readonly", "/pub/a").unwrap_err(),
        FsError::OperationNotPermitted
    );
    fx.dispatcher.link(&fx.task, "/shared", "/pub/b").unwrap();
}

#[test]
fn link_at_symlink_handling() {
    let fx = Fixture::new();
    fx.touch("/t", 0o644);
    fx.symlink("t", "/s");

    fx.dispatcher
        .link_at(&fx.task, DirFd::Cwd, "/s", DirFd::Cwd, "/nofollow", 0)
        .unwrap();
    assert!(fx.lookup("/nofollow").unwrap().is_symlink());

    fx.dispatcher
        .link_at(&fx.task, DirFd::Cwd, "/s", DirFd::Cwd, "/follow", abi::AT_SYMLINK_FOLLOW)
        .unwrap();
    assert!(fx.lookup("/follow").unwrap().same_node(&fx.lookup("/t").unwrap()));

    assert_eq!(
        fx.dispatcher
            .link_at(&fx.task, DirFd::Cwd, "/t", DirFd::Cwd, "/x", 0x1)
            .unwrap_err(),
        FsError::InvalidArgument
    );
}

#[test]
fn link_at_empty_path() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    let fd = fx.dispatcher.open(&fx.task, "/f", abi::O_RDONLY, 0).unwrap();

    fx.dispatcher
        .link_at(&fx.task, DirFd::Fd(fd), "", DirFd::Cwd, "/viafd", abi::AT_EMPTY_PATH)
        .unwrap();
    assert!(fx.lookup("/viafd").unwrap().same_node(&fx.lookup("/f").unwrap()));
    assert_eq!(
        fx.dispatcher
            .link_at(&fx.task, DirFd::Cwd, "", DirFd::Cwd, "/x", abi::AT_EMPTY_PATH)
            .unwrap_err(),
        FsError::BadFileDescriptor
    );
    assert_eq!(
        fx.dispatcher
            .link_at(&fx.task, DirFd::Fd(fd), "", DirFd::Cwd, "/y", 0)
            .unwrap_err(),
        FsError::NotFound
    );

    fx.become_user(1000, 1000);
    assert_eq!(
        fx.dispatcher
            .link_at(&fx.task, DirFd::Fd(fd), "", DirFd::Cwd, "/z", abi::AT_EMPTY_PATH)
            .unwrap_err(),
        FsError::NotFound
    );
}

#[test]
fn rename_moves_entries() {
    let fx = Fixture::new();
    fx.mkdir("/a", 0o755);
    fx.mkdir("/b", 0o755);
    fx.touch("/a/f", 0o644);
    let f = fx.lookup("/a/f").unwrap();

    fx.dispatcher.rename(&fx.task, "/a/f", "/b/g").unwrap();
    assert_eq!(fx.lookup("/a/f").unwrap_err(), FsError::NotFound);
    assert!(fx.lookup("/b/g").unwrap().same_node(&f));

    fx.dispatcher.rename(&fx.task, "/a", "/b/a").unwrap();
    assert!(fx.lookup("/b/a").unwrap().is_dir());
    assert_eq!(fx.attr("/b").links, 3);
}

#[test]
fn rename_rejections() {
    let fx = Fixture::new();
    fx.mkdir("/a", 0o755);
    fx.mkdir("/a/b", 0o755);
    fx.touch("/f", 0o644);
    fx.mkdir("/y", 0o755);
    fx.mkdir("/y/z", 0o755);

    assert_eq!(fx.dispatcher.rename(&fx.task, "/", "/x").unwrap_err(), FsError::Busy);
    assert_eq!(fx.dispatcher.rename(&fx.task, "/f", "/").unwrap_err(), FsError::Busy);
    assert_eq!(fx.dispatcher.rename(&fx.task, "/a/.", "/x").unwrap_err(), FsError::Busy);
    assert_eq!(
        fx.dispatcher.rename(&fx.task, "/a", "/a/b/c").unwrap_err(),
        FsError::InvalidArgument
    );
    assert_eq!(
        fx.dispatcher.rename(&fx.task, "/a", "/f").unwrap_err(),
        FsError::NotADirectory
    );
    assert_eq!(
        fx.dispatcher.rename(&fx.task, "/f", "/a").unwrap_err(),
        FsError::IsADirectory
    );
    assert_eq!(fx.dispatcher.rename(&fx.task, "/a", "/y").unwrap_err(), FsError::NotEmpty);
    assert_eq!(
        fx.dispatcher.rename(&fx.task, "/y/z", "/y").unwrap_err(),
        FsError::NotEmpty
    );
    assert_eq!(
        fx.dispatcher.rename(&fx.task, "/missing", "/x").unwrap_err(),
        FsError::NotFound
    );
}

#[test]
fn rename_onto_same_inode_is_a_noop() {
    let fx = Fixture::new();
    fx.touch("/f", 0o644);
    fx.dispatcher.link(&fx.task, "/f", "/g").unwrap();

    fx.dispatcher.rename(&fx.task, "/f", "/g").unwrap();
    assert!(fx.lookup("/f").is_ok());
    assert!(fx.lookup("/g").is_ok());
    assert_eq!(fx.attr("/f").links, 2);
}

#[test]
fn rename_into_own_subtree_through_moved_cwd() {
    let fx = Fixture::new();
    fx.mkdir("/a", 0o755);
    fx.mkdir("/b", 0o755);
    fx.dispatcher.chdir(&fx.task, "/b").unwrap();
    fx.dispatcher.rename(&fx.task, "/b", "/a/b").unwrap();

    // The working directory now lies under /a.
    assert_eq!(
        fx.dispatcher.rename(&fx.task, "/a", "sub").unwrap_err(),
        FsError::InvalidArgument
    );
    assert!(fx.lookup("/a").is_ok());
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 4096).unwrap(), "/a/b");
}

#[test]
fn rename_into_own_subtree_through_descriptor() {
    let fx = Fixture::new();
    fx.mkdir("/a", 0o755);
    fx.mkdir("/x", 0o755);
    let anchor = fx
        .dispatcher
        .open(&fx.task, "/x", abi::O_RDONLY | abi::O_DIRECTORY, 0)
        .unwrap();
    fx.dispatcher.rename(&fx.task, "/x", "/a/x").unwrap();

    assert_eq!(
        fx.dispatcher
            .rename_at(&fx.task, DirFd::Cwd, "/a", DirFd::Fd(anchor), "sub")
            .unwrap_err(),
        FsError::InvalidArgument
    );
    assert!(fx.lookup("/a/x").is_ok());
}

#[test]
fn getcwd_follows_renamed_ancestors() {
    let fx = Fixture::new();
    fx.mkdir("/a", 0o755);
    fx.mkdir("/a/c", 0o755);
    fx.mkdir("/b", 0o755);
    fx.dispatcher.chdir(&fx.task, "/a/c").unwrap();

    fx.dispatcher.rename(&fx.task, "/a/c", "/b/c").unwrap();
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 4096).unwrap(), "/b/c");

    fx.dispatcher.rename(&fx.task, "/b", "/z").unwrap();
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 4096).unwrap(), "/z/c");
}

#[test]
fn dotdot_follows_renamed_directory() {
    let fx = Fixture::new();
    fx.mkdir("/a", 0o755);
    fx.mkdir("/a/c", 0o755);
    fx.mkdir("/b", 0o755);
    fx.touch("/b/marker", 0o644);
    fx.dispatcher.chdir(&fx.task, "/a/c").unwrap();
    fx.dispatcher.rename(&fx.task, "/a/c", "/b/c").unwrap();

    let up = fx.dispatcher.resolve(&fx.task, DirFd::Cwd, "..", true).unwrap();
    assert!(up.node.same_node(&fx.lookup("/b").unwrap()));
    assert!(fx
        .dispatcher
        .resolve(&fx.task, DirFd::Cwd, "../marker", true)
        .is_ok());

    fx.dispatcher.chdir(&fx.task, "..").unwrap();
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 4096).unwrap(), "/b");
}

#[test]
fn moving_a_directory_needs_write_on_it() {
    let fx = Fixture::new();
    with_public_dir(&fx);
    fx.mkdir("/pub/p1", 0o777);
    fx.mkdir("/pub/p2", 0o777);
    fx.mkdir("/pub/p1/ro", 0o555);

    fx.become_user(1000, 1000);
    assert_eq!(
        fx.dispatcher.rename(&fx.task, "/pub/p1/ro", "/pub/p2/ro").unwrap_err(),
        FsError::PermissionDenied
    );
    fx.dispatcher.rename(&fx.task, "/pub/p1/ro", "/pub/p1/ro2").unwrap();
}

#[test]
fn mknod_node_types() {
    let fx = Fixture::new();
    fx.dispatcher.mknod(&fx.task, "/fifo", abi::S_IFIFO | 0o644, 0).unwrap();
    fx.dispatcher.mknod(&fx.task, "/plain", 0o600, 0).unwrap();
    fx.dispatcher.mknod(&fx.task, "/reg", abi::S_IFREG | 0o600, 0).unwrap();

    assert_eq!(fx.lookup("/fifo").unwrap().kind(), NodeKind::Fifo);
    assert_eq!(fx.attr("/fifo").perms, FilePerms(0o644));
    assert_eq!(fx.lookup("/plain").unwrap().kind(), NodeKind::Regular);
    assert_eq!(fx.lookup("/reg").unwrap().kind(), NodeKind::Regular);

    let cases = [
        (abi::S_IFSOCK, FsError::NotSupported),
        (abi::S_IFCHR, FsError::OperationNotPermitted),
        (abi::S_IFBLK, FsError::OperationNotPermitted),
        (abi::S_IFDIR, FsError::InvalidArgument),
    ];
    for (kind, expected) in cases {
        assert_eq!(
            fx.dispatcher.mknod(&fx.task, "/node", kind | 0o600, 0).unwrap_err(),
            expected
        );
    }
    assert_eq!(
        fx.dispatcher.mknod(&fx.task, "/fifo", abi::S_IFIFO | 0o644, 0).unwrap_err(),
        FsError::AlreadyExists
    );
    assert_eq!(
        fx.dispatcher.mknod(&fx.task, "/x/", 0o644, 0).unwrap_err(),
        FsError::NotFound
    );
}

#[test]
fn working_directory() {
    let fx = Fixture::new();
    fx.mkdir("/a", 0o755);
    fx.mkdir("/a/b", 0o755);
    fx.touch("/f", 0o644);
    fx.mkdir("/locked", 0o700);

    assert_eq!(fx.dispatcher.getcwd(&fx.task, 4096).unwrap(), "/");
    fx.dispatcher.chdir(&fx.task, "/a/b").unwrap();
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 4096).unwrap(), "/a/b");
    fx.dispatcher.chdir(&fx.task, "..").unwrap();
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 3).unwrap(), "/a");
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 2).unwrap_err(), FsError::OutOfRange);

    assert_eq!(fx.dispatcher.chdir(&fx.task, "/f").unwrap_err(), FsError::NotADirectory);
    fx.become_user(1000, 1000);
    assert_eq!(
        fx.dispatcher.chdir(&fx.task, "/locked").unwrap_err(),
        FsError::PermissionDenied
    );
}

#[test]
fn fchdir_uses_the_open_directory() {
    let fx = Fixture::new();
    fx.mkdir("/a", 0o755);
    fx.touch("/f", 0o644);
    let dir = fx
        .dispatcher
        .open(&fx.task, "/a", abi::O_RDONLY | abi::O_DIRECTORY, 0)
        .unwrap();
    let file = fx.dispatcher.open(&fx.task, "/f", abi::O_RDONLY, 0).unwrap();

    fx.dispatcher.fchdir(&fx.task, dir).unwrap();
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 4096).unwrap(), "/a");
    assert_eq!(fx.dispatcher.fchdir(&fx.task, file).unwrap_err(), FsError::NotADirectory);
    assert_eq!(fx.dispatcher.fchdir(&fx.task, 42).unwrap_err(), FsError::BadFileDescriptor);
}

#[test]
fn chroot_moves_the_root() {
    let fx = Fixture::new();
    fx.mkdir("/a", 0o755);
    fx.mkdir("/a/b", 0o755);

    fx.become_user(1000, 1000);
    assert_eq!(
        fx.dispatcher.chroot(&fx.task, "/a").unwrap_err(),
        FsError::OperationNotPermitted
    );

    fx.become_root();
    fx.dispatcher.chroot(&fx.task, "/a").unwrap();
    // The old working directory now lies outside the root.
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 4096).unwrap(), "(unreachable)/");

    fx.dispatcher.chdir(&fx.task, "/").unwrap();
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 4096).unwrap(), "/");
    fx.dispatcher.chdir(&fx.task, "/b").unwrap();
    assert_eq!(fx.dispatcher.getcwd(&fx.task, 4096).unwrap(), "/b");
}

#[test]
fn umask_swaps_and_masks() {
    let fx = Fixture::new();
    assert_eq!(fx.dispatcher.umask(&fx.task, 0o077), 0o022);
    assert_eq!(fx.dispatcher.umask(&fx.task, 0o1777), 0o077);
    assert_eq!(fx.task.fs().umask(), 0o777);

    fx.dispatcher.umask(&fx.task, 0o027);
    fx.mkdir("/d", 0o777);
    assert_eq!(fx.attr("/d").perms, FilePerms(0o750));
}
