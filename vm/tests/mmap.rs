mod common;

use common::{assert_consistent, fixture, page, pattern};
use kidneyos_shared::mem::PAGE_FRAME_SIZE;
use kidneyos_vm::fs::tempfs::TempFile;
use kidneyos_vm::mem::PageState;

#[test]
fn test_writes_reach_the_file_at_the_right_offsets() {
    let fx = fixture(4, 4);
    let space = fx.vm.create_address_space();
    let file = TempFile::with_contents(&vec![b'.'; 2 * PAGE_FRAME_SIZE + 100]);
    let id = space.mmap(&file, page(0)).unwrap();

    space.write_user(page(0) + 10, b"first").unwrap();
    // Straddles the boundary between the second and third pages.
    space.write_user(page(2) - 3, b"across").unwrap();
    space.munmap(id);

    let contents = file.contents();
    assert_eq!(contents.len(), 2 * PAGE_FRAME_SIZE + 100);
    assert_eq!(&contents[10..15], b"first");
    assert_eq!(&contents[2 * PAGE_FRAME_SIZE - 3..2 * PAGE_FRAME_SIZE + 3], b"across");
    assert_eq!(contents[15], b'.');
    assert_eq!(contents[2 * PAGE_FRAME_SIZE + 3], b'.');
}

#[test]
fn test_write_back_never_grows_the_file() {
    let fx = fixture(4, 4);
    let space = fx.vm.create_address_space();
    let file = TempFile::with_contents(b"short");
    let id = space.mmap(&file, page(0)).unwrap();

    // Past the end of the file but inside the mapped page.
    space.write_user(page(0) + 100, b"tail").unwrap();
    space.munmap(id);
    assert_eq!(file.contents(), b"short");
}

#[test]
fn test_untouched_pages_do_no_io() {
    let fx = fixture(4, 4);
    let space = fx.vm.create_address_space();
    let file = TempFile::with_contents(&vec![1; 8 * PAGE_FRAME_SIZE]);
    let id = space.mmap(&file, page(0)).unwrap();

    let mut byte = [0];
    space.read_user(page(5), &mut byte).unwrap();
    assert_eq!(byte, [1]);
    assert_eq!(file.reads(), 1);

    space.munmap(id);
    assert_eq!(file.reads(), 1);
    assert_eq!(file.writes(), 0);
    assert_eq!(fx.vm.stats().frames_allocated, 0);
}

#[test]
fn test_evicted_mapped_pages_go_back_to_their_file() {
    let fx = fixture(2, 1);
    let space = fx.vm.create_address_space();
    let file = TempFile::with_contents(&vec![0; 4 * PAGE_FRAME_SIZE]);
    let id = space.mmap(&file, page(0)).unwrap();

    for n in 0..4 {
        space.write_user(page(n), &pattern(n as u8)).unwrap();
        assert_consistent(&fx, &[&space]);
    }
    assert_eq!(fx.vm.stats().swap_slots_used, 0);
    assert!(file.writes() >= 2);
    assert!(matches!(space.page_state(page(0)), Some(PageState::FileBacked(_))));
    assert_eq!(&file.contents()[..PAGE_FRAME_SIZE], &pattern(0)[..]);

    // Read back from the file.
    let mut buf = vec![0; PAGE_FRAME_SIZE];
    space.read_user(page(0), &mut buf).unwrap();
    assert_eq!(buf, pattern(0));
    space.read_user(page(1), &mut buf).unwrap();
    space.read_user(page(2), &mut buf).unwrap();
    assert_eq!(buf, pattern(2));

    space.munmap(id);
    for n in 0..4 {
        let range = n * PAGE_FRAME_SIZE..(n + 1) * PAGE_FRAME_SIZE;
        assert_eq!(&file.contents()[range], &pattern(n as u8)[..], "page {}", n);
    }
    assert_eq!(fx.vm.stats().swap_slots_used, 0);
}

#[test]
fn test_mapping_outlives_the_callers_handle() {
    let fx = fixture(2, 2);
    let space = fx.vm.create_address_space();
    let file = TempFile::with_contents(b"kept open");
    let id = {
        let handle = file.handle();
        space.mmap(&handle, page(0)).unwrap()
    };
    assert_eq!(file.open_handles(), 2);

    let mut buf = [0; 9];
    space.read_user(page(0), &mut buf).unwrap();
    assert_eq!(&buf, b"kept open");

    space.munmap(id);
    assert_eq!(file.open_handles(), 1);
}

#[test]
fn test_exit_unmaps_everything() {
    let fx = fixture(2, 2);
    let space = fx.vm.create_address_space();
    let first = TempFile::with_contents(&[0; 64]);
    let second = TempFile::with_contents(&[0; 64]);
    space.mmap(&first, page(0)).unwrap();
    space.mmap(&second, page(1)).unwrap();
    space.write_user(page(0), b"one").unwrap();
    space.write_user(page(1), b"two").unwrap();

    space.exit();
    assert_eq!(space.mapping_count(), 0);
    assert_eq!(&first.contents()[..3], b"one");
    assert_eq!(&second.contents()[..3], b"two");
    assert_eq!(first.open_handles(), 1);
    assert_eq!(second.open_handles(), 1);
    assert!(space.mmap(&first, page(0)).is_err());
}
