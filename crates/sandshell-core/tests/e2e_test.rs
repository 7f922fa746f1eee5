//! End-to-end integration tests across sandshell-core modules.
//!
//! These tests exercise the flows a shell script would chain together:
//! 1. Create an anonymous file, fill it, pass it over a socketpair
//! 2. Launch children through the clone handshake
//! 3. Compose mount trees (root only; skipped otherwise)

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;

use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Uid, Whence};
use sandshell_core::namespace::{CloneRequest, NamespaceSet};
use sandshell_core::socket::Kind;
use sandshell_core::{fdops, mount, namespace, parse, socket};

// ── Fd creation and passing ──────────────────────────────────────────

#[test]
fn memfd_travels_across_a_socketpair_with_its_contents() {
    let (tx, rx) = socket::socketpair(Kind::Stream, true).expect("socketpair");

    let memfd = fdops::memfd_create("e2e-payload", true).expect("memfd");
    let mut file = std::fs::File::from(memfd);
    file.write_all(b"carried across").unwrap();

    socket::send_fds(tx.as_raw_fd(), &[file.as_raw_fd()], false).expect("send");
    let received = socket::recv_fds(rx.as_raw_fd(), 8, true).expect("recv");
    assert_eq!(received.len(), 1);

    // The received descriptor shares the file description, offset included.
    let pos = fdops::seek(received[0].as_raw_fd(), 0, Whence::SeekCur).expect("seek");
    assert_eq!(pos, i64::try_from("carried across".len()).unwrap());

    let mut copy = std::fs::File::from(received.into_iter().next().unwrap());
    copy.seek(SeekFrom::Start(0)).unwrap();
    let mut text = String::new();
    copy.read_to_string(&mut text).unwrap();
    assert_eq!(text, "carried across");
}

#[test]
fn several_descriptors_arrive_in_order() {
    let (tx, rx) = socket::socketpair(Kind::Stream, true).expect("socketpair");

    let files: Vec<std::fs::File> = (0..3)
        .map(|i| {
            let fd = fdops::memfd_create(&format!("ordered-{i}"), true).unwrap();
            let mut f = std::fs::File::from(fd);
            write!(f, "{i}").unwrap();
            f
        })
        .collect();
    let raw: Vec<i32> = files.iter().map(AsRawFd::as_raw_fd).collect();

    socket::send_fds(tx.as_raw_fd(), &raw, false).expect("send");
    let received = socket::recv_fds(rx.as_raw_fd(), 16, true).expect("recv");
    assert_eq!(received.len(), 3);

    for (i, fd) in received.into_iter().enumerate() {
        let mut f = std::fs::File::from(fd);
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut text = String::new();
        f.read_to_string(&mut text).unwrap();
        assert_eq!(text, i.to_string());
    }
}

// ── Launcher ─────────────────────────────────────────────────────────

#[test]
fn launcher_exit_codes_flow_back_through_wait() {
    let argv = vec!["sh".to_owned(), "-c".to_owned(), "exit 7".to_owned()];
    let request = CloneRequest {
        namespaces: NamespaceSet::default(),
        share_parent: false,
        wait_for_exec: true,
        argv: &argv,
    };
    let pid = namespace::clone_child(&request).expect("clone");
    match waitpid(pid, None).unwrap() {
        WaitStatus::Exited(_, code) => assert_eq!(code, 7),
        other => panic!("unexpected status: {other:?}"),
    }
}

#[test]
fn decoded_fd_numbers_are_usable_in_launcher_flows() {
    let memfd = fdops::memfd_create("decode-roundtrip", true).unwrap();
    let raw = memfd.as_raw_fd();
    let decoded = parse::fd(&raw.to_string()).expect("fd within rlimit");
    assert_eq!(decoded, raw);
}

// ── Mount composition (root only) ────────────────────────────────────

#[test]
fn composed_tree_exposes_exactly_the_sources() {
    if !Uid::effective().is_root() {
        return;
    }
    let dest = tempfile::tempdir().unwrap();
    let src_a = tempfile::tempdir().unwrap();
    let src_b = tempfile::tempdir().unwrap();
    std::fs::write(src_a.path().join("a"), b"a").unwrap();
    std::fs::write(src_b.path().join("b"), b"b").unwrap();

    let sources = vec![src_a.path().to_path_buf(), src_b.path().to_path_buf()];
    match mount::make_accessible_under(
        dest.path(),
        &sources,
        false,
        nix::mount::MsFlags::empty(),
        None,
    ) {
        Ok(()) => {
            let mut names: Vec<String> = std::fs::read_dir(dest.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            assert_eq!(names.len(), 2);
            let _ = nix::mount::umount2(dest.path(), nix::mount::MntFlags::MNT_DETACH);
        }
        Err(_) => {
            // MS_MOVE is refused under shared propagation; all-or-nothing
            // means the destination must be empty.
            assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
        }
    }
}
