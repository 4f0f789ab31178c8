//! Scenario: directory iteration keys are stable, strictly increasing, and
//! survive arbitrary removals without being reused or reordered
//! (SPEC_FULL.md §8 scenario 6, §3 Dentry invariants).

mod common;

use std::collections::HashSet;

use gxvfs::inode::{FileType, Mode};
use gxvfs::resolver::{read_dir, DirEntryResult};

use common::Harness;

fn collect_dir(dir: &std::sync::Arc<gxvfs::inode::Inode>, parent: &std::sync::Arc<gxvfs::inode::Inode>) -> Vec<(String, u64, u64)> {
    let mut out = Vec::new();
    let mut key = 0;
    loop {
        match read_dir(dir, parent, key) {
            DirEntryResult::Entry { name, ino, key: k } => {
                out.push((name, ino, k));
                key = k + 1;
            }
            DirEntryResult::NoMore => break,
        }
    }
    out
}

#[test]
fn keys_are_monotonic_and_unlink_leaves_survivors_intact() {
    let h = Harness::new(256);
    let root = h.fs.root_inode().expect("root inode");

    let dir = h
        .driver
        .create_entry(&h.fs, &root, "d", FileType::Directory, Mode::masked(0o755), 0, 0)
        .expect("mkdir /d");

    let names: Vec<String> = (0..100).map(|i| format!("f{i}")).collect();
    for name in &names {
        h.driver
            .create_entry(&h.fs, &dir, name, FileType::RegularFile, Mode::masked(0o644), 0, 0)
            .unwrap_or_else(|_| panic!("create {name}"));
    }

    let entries = collect_dir(&dir, &root);
    assert_eq!(entries[0].0, ".");
    assert_eq!(entries[0].2, 0);
    assert_eq!(entries[1].0, "..");
    assert_eq!(entries[1].2, 1);

    let real: Vec<&(String, u64, u64)> = entries.iter().skip(2).collect();
    assert_eq!(real.len(), 100);
    for w in real.windows(2) {
        assert!(w[0].2 < w[1].2, "keys must strictly increase");
    }
    let seen_names: HashSet<&str> = real.iter().map(|e| e.0.as_str()).collect();
    for name in &names {
        assert!(seen_names.contains(name.as_str()));
    }

    let keys_before: std::collections::HashMap<String, u64> =
        real.iter().map(|(n, _, k)| (n.clone(), *k)).collect();

    // Unlink every even-indexed name.
    let removed: Vec<&String> = names.iter().enumerate().filter(|(i, _)| i % 2 == 0).map(|(_, n)| n).collect();
    for name in &removed {
        h.driver
            .remove_entry(&dir, name, gxvfs::dentry::UnlinkFlags::empty(), 0, true)
            .unwrap_or_else(|_| panic!("remove {name}"));
    }

    let entries_after = collect_dir(&dir, &root);
    let real_after: Vec<&(String, u64, u64)> = entries_after.iter().skip(2).collect();
    assert_eq!(real_after.len(), 50);
    for w in real_after.windows(2) {
        assert!(w[0].2 < w[1].2, "keys must strictly increase after removal");
    }
    for (name, _, key) in &real_after {
        assert!(!removed.iter().any(|r| *r == name), "removed name {name} must not reappear");
        assert_eq!(keys_before[name], *key, "surviving entries keep their original key");
    }
}
