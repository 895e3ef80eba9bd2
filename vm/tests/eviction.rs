mod common;

use common::{assert_consistent, assert_unique_slots, fixture, page, pattern};
use kidneyos_shared::mem::PAGE_FRAME_SIZE;
use kidneyos_vm::mem::PageState;
use kidneyos_vm::user_program::syscall::page_fault;
use kidneyos_vm::VmError;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

#[test]
fn test_contents_survive_swap_round_trip() {
    let fx = fixture(2, 8);
    let space = fx.vm.create_address_space();
    for n in 0..6 {
        space.add_zero_page(page(n), true).unwrap();
        space.write_user(page(n), &pattern(n as u8)).unwrap();
    }
    assert_eq!(fx.vm.stats().swap_slots_used, 4);
    assert!(fx.vm.stats().evictions >= 4);
    assert_unique_slots(&[&space], 6);

    for n in (0..6).rev() {
        let mut buf = vec![0; PAGE_FRAME_SIZE];
        space.read_user(page(n), &mut buf).unwrap();
        assert_eq!(buf, pattern(n as u8), "page {}", n);
        assert_consistent(&fx, &[&space]);
    }

    let (reads, writes) = fx.vm.swap_block_counts();
    assert!(reads > 0 && writes > 0);
}

#[test]
fn test_untouched_zero_pages_never_reach_swap() {
    let fx = fixture(1, 2);
    let space = fx.vm.create_address_space();
    for n in 0..4 {
        space.add_zero_page(page(n), true).unwrap();
    }
    space.handle_fault(page(0), false).unwrap();
    assert_eq!(fx.vm.stats().swap_slots_used, 0);
    space.handle_fault(page(1), false).unwrap();
    // A resident zero page still gets a slot when evicted.
    assert!(matches!(space.page_state(page(0)), Some(PageState::Swapped(_))));
    assert!(matches!(space.page_state(page(2)), Some(PageState::ZeroFill)));
    assert!(matches!(space.page_state(page(3)), Some(PageState::ZeroFill)));
}

#[test]
fn test_read_only_page_rejects_writes() {
    let fx = fixture(2, 2);
    let space = fx.vm.create_address_space();
    space.add_zero_page(page(0), false).unwrap();
    assert_eq!(space.write_user(page(0), b"x"), Err(VmError::InvalidAccess));
    let mut buf = [0xAA; 4];
    space.read_user(page(0), &mut buf).unwrap();
    assert_eq!(buf, [0; 4]);
    assert_eq!(space.write_user(page(0), b"x"), Err(VmError::InvalidAccess));
}

#[test]
fn test_exit_releases_frames_and_slots() {
    let fx = fixture(2, 4);
    let space = fx.vm.create_address_space();
    for n in 0..5 {
        space.add_zero_page(page(n), true).unwrap();
        space.write_user(page(n), &[n as u8]).unwrap();
    }
    assert_eq!(fx.vm.stats().frames_allocated, 2);
    assert_eq!(fx.vm.stats().swap_slots_used, 3);

    space.exit();
    let stats = fx.vm.stats();
    assert_eq!(stats.frames_allocated, 0);
    assert_eq!(stats.swap_slots_used, 0);
    assert_eq!(space.page_count(), 0);
    assert!(fx.mmu.mappings(space.pid()).is_empty());
    assert_eq!(space.handle_fault(page(0), false), Err(VmError::InvalidAccess));

    // The freed frames go to the next process without evicting anything.
    let next = fx.vm.create_address_space();
    let evictions = fx.vm.stats().evictions;
    next.add_zero_page(page(0), true).unwrap();
    next.add_zero_page(page(1), true).unwrap();
    next.handle_fault(page(0), false).unwrap();
    next.handle_fault(page(1), false).unwrap();
    assert_eq!(fx.vm.stats().evictions, evictions);
}

#[test]
fn test_dropping_a_space_tears_it_down() {
    let fx = fixture(2, 4);
    {
        let space = fx.vm.create_address_space();
        for n in 0..3 {
            space.add_zero_page(page(n), true).unwrap();
            space.write_user(page(n), b"gone").unwrap();
        }
    }
    assert_eq!(fx.vm.stats().frames_allocated, 0);
    assert_eq!(fx.vm.stats().swap_slots_used, 0);
}

#[test]
fn test_concurrent_faults_keep_every_page_intact() {
    const PROCESSES: usize = 4;
    const PAGES: usize = 6;
    let fx = fixture(5, PROCESSES * PAGES);
    let spaces: Vec<_> = (0..PROCESSES)
        .map(|_| Arc::new(fx.vm.create_address_space()))
        .collect();
    for space in &spaces {
        for n in 0..PAGES {
            space.add_zero_page(page(n), true).unwrap();
        }
    }

    let workers: Vec<_> = spaces
        .iter()
        .enumerate()
        .map(|(p, space)| {
            let space = Arc::clone(space);
            thread::spawn(move || {
                for round in 0..4 {
                    for n in 0..PAGES {
                        let seed = (p * PAGES + n) as u8;
                        if round == 0 {
                            space.write_user(page(n), &pattern(seed)).unwrap();
                        } else {
                            let mut buf = vec![0; PAGE_FRAME_SIZE];
                            space.read_user(page(n), &mut buf).unwrap();
                            assert_eq!(buf, pattern(seed), "pid {} page {}", space.pid(), n);
                        }
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let refs: Vec<&_> = spaces.iter().map(|s| &**s).collect();
    assert_consistent(&fx, &refs);
    assert_unique_slots(&refs, PAGES);
    assert_eq!(fx.vm.stats().frames_allocated, 5);
}

#[test]
fn test_threads_of_one_process_fault_the_same_pages() {
    const PAGES: usize = 4;
    let fx = fixture(PAGES, 4);
    let space = Arc::new(fx.vm.create_address_space());
    for n in 0..PAGES {
        space.add_zero_page(page(n), true).unwrap();
    }

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let space = Arc::clone(&space);
            thread::spawn(move || {
                (0..PAGES)
                    .map(|n| page_fault(&space, page(n) + t, t % 2 == 1))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    for worker in workers {
        assert_eq!(worker.join().unwrap(), vec![None; PAGES]);
    }

    assert!(!space.has_exited());
    assert_eq!(space.resident_pages(), PAGES);
    assert_eq!(fx.vm.stats().frames_allocated, PAGES);
    assert_consistent(&fx, &[&space]);
}

#[derive(Debug, Clone)]
enum Step {
    Write { space: usize, page: usize, seed: u8 },
    Read { space: usize, page: usize },
    Fault { space: usize, page: usize, write: bool },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..3usize, 0..5usize, any::<u8>()).prop_map(|(space, page, seed)| Step::Write {
            space,
            page,
            seed
        }),
        (0..3usize, 0..5usize).prop_map(|(space, page)| Step::Read { space, page }),
        (0..3usize, 0..5usize, any::<bool>()).prop_map(|(space, page, write)| Step::Fault {
            space,
            page,
            write
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_random_access_preserves_contents(
        frames in 1..5usize,
        steps in prop::collection::vec(step(), 1..60),
    ) {
        let fx = fixture(frames, 3 * 5);
        let spaces: Vec<_> = (0..3).map(|_| fx.vm.create_address_space()).collect();
        for space in &spaces {
            for n in 0..5 {
                space.add_zero_page(page(n), true).unwrap();
            }
        }
        // What each page should hold: the seed of its last write, if any.
        let mut expected = [[None::<u8>; 5]; 3];

        for step in steps {
            match step {
                Step::Write { space, page: n, seed } => {
                    spaces[space].write_user(page(n), &pattern(seed)).unwrap();
                    expected[space][n] = Some(seed);
                }
                Step::Read { space, page: n } => {
                    let mut buf = vec![0xFF; PAGE_FRAME_SIZE];
                    spaces[space].read_user(page(n), &mut buf).unwrap();
                    let want = expected[space][n].map_or_else(|| vec![0; PAGE_FRAME_SIZE], pattern);
                    prop_assert_eq!(buf, want);
                }
                Step::Fault { space, page: n, write } => {
                    // Faulting again on a page that is already resident is harmless.
                    prop_assert_eq!(spaces[space].handle_fault(page(n), write), Ok(()));
                    prop_assert!(matches!(
                        spaces[space].page_state(page(n)),
                        Some(PageState::Resident(_))
                    ));
                }
            }
            let refs: Vec<&_> = spaces.iter().collect();
            assert_consistent(&fx, &refs);
            assert_unique_slots(&refs, 5);
            prop_assert!(fx.vm.stats().frames_allocated <= frames);
        }
    }
}
