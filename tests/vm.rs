//! Demand paging scenarios: stack growth, eviction through swap, and
//! file-backed pages, driven through the fault entry point.

mod common;

use common::*;
use silt_os::config::{PAGE_SIZE, USER_TOP};
use silt_os::fs::dir::Dir;
use silt_os::fs::file::FsObject;
use silt_os::mm::FaultFlags;

#[test]
fn stack_growth_installs_a_zeroed_page() {
    let h = Harness::boot(8, 1024);
    let esp = USER_TOP - 3 * PAGE_SIZE;

    // user code touches just below its stack pointer
    assert!(h.kernel.page_fault(
        h.pid,
        esp - 4,
        FaultFlags::WRITE | FaultFlags::USER,
        esp
    ));
    let word = h.kernel.read_user(h.pid, esp - 4, 4).unwrap();
    assert_eq!(word, [0, 0, 0, 0]);
}

#[test]
fn faults_far_below_the_stack_kill() {
    let h = Harness::boot(8, 1024);
    let esp = USER_TOP - 16;
    assert!(!h.kernel.page_fault(
        h.pid,
        USER_TOP - 1024 * PAGE_SIZE,
        FaultFlags::USER,
        esp
    ));
    assert_eq!(h.kernel.exit_status(h.pid), Some(-1));
}

#[test]
fn eviction_round_trips_every_page() {
    // 4 frames, 9 resident pages: five must sit in swap at any moment
    let h = Harness::boot(4, 1024);
    let low = USER_TOP - 12 * PAGE_SIZE;
    h.set_esp(low);

    let page_at = |i: usize| USER_TOP - (2 + i) * PAGE_SIZE;
    for i in 0..8 {
        h.put(page_at(i), &vec![i as u8 + 1; PAGE_SIZE]);
    }
    assert_eq!(h.kernel.free_frames(), 0);
    assert_eq!(h.kernel.swap_in_use(), 5);

    // touch every page in original order; each returns its pattern
    for i in 0..8 {
        let back = h.kernel.read_user(h.pid, page_at(i), PAGE_SIZE).unwrap();
        assert!(
            back.iter().all(|&b| b == i as u8 + 1),
            "page {} lost its contents",
            i
        );
    }
    // each fault-in freed a slot, each forced eviction claimed one
    assert_eq!(h.kernel.swap_in_use(), 5);
}

#[test]
fn clean_file_backed_pages_evict_without_swap() {
    let h = Harness::boot(3, 1024);
    let fs = h.kernel.fs();

    // build a file with a known pattern
    let payload: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
    let file = {
        let _guard = fs.lock();
        let root = Dir::open_root(fs);
        assert!(fs.create(&root, "blob", 0));
        let Some(FsObject::File(file)) = fs.open_path(&root, "blob") else {
            panic!("expected a file");
        };
        file.write(fs, &payload);
        root.close(fs);
        file
    };

    let map_at = USER_TOP - 200 * PAGE_SIZE;
    assert!(h
        .kernel
        .map_segment(h.pid, &file, 0, PAGE_SIZE, map_at, false));

    // fault it in by reading, then force it out with stack pressure
    assert_eq!(h.kernel.read_user(h.pid, map_at, PAGE_SIZE).unwrap(), payload);
    let low = USER_TOP - 8 * PAGE_SIZE;
    h.set_esp(low);
    for i in 0..4 {
        h.put(USER_TOP - (2 + i) * PAGE_SIZE, &[7u8; 64]);
    }

    // three evictions happened; only the two dirty victims took swap
    // slots, the clean file page went back to the filesystem
    assert_eq!(h.kernel.swap_in_use(), 2);

    // re-faulting it reads byte-identical contents
    assert_eq!(h.kernel.read_user(h.pid, map_at, PAGE_SIZE).unwrap(), payload);

    // read-only mapping refuses user stores
    assert!(!h.kernel.write_user(h.pid, map_at, &[1]));
}

#[test]
fn exit_returns_frames_and_swap_slots() {
    let h = Harness::boot(4, 1024);
    let low = USER_TOP - 12 * PAGE_SIZE;
    h.set_esp(low);
    for i in 0..8 {
        h.put(USER_TOP - (2 + i) * PAGE_SIZE, &[i as u8; 128]);
    }
    assert!(h.kernel.swap_in_use() > 0);

    h.kernel.exit(h.pid, 0);
    assert_eq!(h.kernel.free_frames(), 4);
    assert_eq!(h.kernel.swap_in_use(), 0);
    assert_eq!(h.kernel.fs().open_inode_count(), 0);
}

#[test]
fn writes_to_read_only_pages_kill() {
    let h = Harness::boot(8, 1024);
    // a protection fault arrives with the present bit set
    let addr = USER_TOP - PAGE_SIZE;
    assert!(!h.kernel.page_fault(
        h.pid,
        addr,
        FaultFlags::PRESENT | FaultFlags::WRITE | FaultFlags::USER,
        USER_TOP - 16
    ));
    assert_eq!(h.kernel.exit_status(h.pid), Some(-1));
}

#[test]
fn fault_counter_advances() {
    let h = Harness::boot(8, 1024);
    let before = h.kernel.fault_count();
    let esp = USER_TOP - 4 * PAGE_SIZE;
    assert!(h.kernel.page_fault(h.pid, esp, FaultFlags::WRITE | FaultFlags::USER, esp));
    assert!(h.kernel.fault_count() > before);
}
