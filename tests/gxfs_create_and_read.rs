//! Scenario: create a small file on GXFS, write to it, close it, reopen
//! read-only, and read the bytes back (SPEC_FULL.md §8 scenario 1).

mod common;

use gxvfs::file::OpenFlags;
use gxvfs::inode::{FileType, Mode};

use common::{open_path, Harness};

#[test]
fn create_write_close_reopen_read() {
    let h = Harness::new(64);
    let ctx = h.ctx(0, 0, true);

    let root = h.fs.root_inode().expect("root inode");
    let file = h
        .driver
        .create_entry(&h.fs, &root, "hello", FileType::RegularFile, Mode::masked(0o644), 0, 0)
        .expect("create hello");
    assert_eq!(file.mode(), Mode::masked(0o644));
    assert_eq!(file.ftype, FileType::RegularFile);

    let fd = open_path(&ctx, "/hello", OpenFlags::RDWR, 1).expect("open for write");
    let n = fd.write(b"hi\n").expect("write");
    assert_eq!(n, 3);
    fd.close().expect("close writer");
    drop(fd);

    assert_eq!(file.size(), 3);

    let fd = open_path(&ctx, "/hello", OpenFlags::RDONLY, 2).expect("reopen for read");
    let mut buf = [0u8; 16];
    let n = fd.read(&mut buf).expect("read");
    assert_eq!(&buf[..n], b"hi\n");
    fd.close().expect("close reader");
}

#[test]
fn writes_past_eof_read_back_as_zero_fill() {
    let h = Harness::new(64);
    let ctx = h.ctx(0, 0, true);
    let root = h.fs.root_inode().expect("root inode");
    h.driver
        .create_entry(&h.fs, &root, "sparse", FileType::RegularFile, Mode::masked(0o644), 0, 0)
        .expect("create sparse");

    let fd = open_path(&ctx, "/sparse", OpenFlags::RDWR, 1).expect("open");
    fd.seek(4096 + 10, gxvfs::file::Whence::Start).expect("seek");
    fd.write(b"tail").expect("write at offset");
    fd.close().expect("close");

    let fd = open_path(&ctx, "/sparse", OpenFlags::RDONLY, 2).expect("reopen");
    let mut buf = [0u8; 8];
    let n = fd.pread(&mut buf, 0).expect("pread hole");
    assert_eq!(n, 8);
    assert_eq!(buf, [0u8; 8]);
    let mut tail = [0u8; 4];
    fd.pread(&mut tail, 4096 + 10).expect("pread tail");
    assert_eq!(&tail, b"tail");
    fd.close().expect("close");
}

#[test]
fn truncate_then_read_past_end_returns_zero() {
    let h = Harness::new(64);
    let ctx = h.ctx(0, 0, true);
    let root = h.fs.root_inode().expect("root inode");
    h.driver
        .create_entry(&h.fs, &root, "shrink", FileType::RegularFile, Mode::masked(0o644), 0, 0)
        .expect("create shrink");

    let fd = open_path(&ctx, "/shrink", OpenFlags::RDWR, 1).expect("open");
    fd.write(b"0123456789").expect("write");
    fd.inode().file_tree.lock().as_ref().unwrap().truncate(4).expect("truncate");
    fd.close().expect("close");

    let fd = open_path(&ctx, "/shrink", OpenFlags::RDONLY, 2).expect("reopen");
    assert_eq!(fd.inode().size(), 4);
    let n = fd.pread(&mut [0u8; 16], 0).expect("pread");
    assert_eq!(n, 4);
    let n = fd.pread(&mut [0u8; 16], 4).expect("pread past end");
    assert_eq!(n, 0);
    fd.close().expect("close");
}
