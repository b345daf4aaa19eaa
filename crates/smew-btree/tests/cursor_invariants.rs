//! Property tests over random operation sequences: the cursor/page
//! membership invariants hold after every step, and uncouple/recouple on an
//! unchanging tree is position-preserving.

use proptest::prelude::*;

use smew_btree::cursor::{
    self, CursorId, CursorPool, CursorState, UncoupleMode, uncouple_all_cursors,
};
use smew_btree::{BufferPool, MemTree, TreeOps};
use smew_error::SmewError;
use smew_types::{InsertFlags, MoveFlags};

#[derive(Debug, Clone)]
enum Op {
    First,
    Last,
    Next,
    Prev,
    Insert(u8),
    InsertDuplicate(u8),
    Find(u8),
    Erase,
    Uncouple,
    SetToNil,
    ReadCurrent,
    BulkUncouple(u16),
    Evict,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::First),
        Just(Op::Last),
        Just(Op::Next),
        Just(Op::Prev),
        (0u8..24).prop_map(Op::Insert),
        (0u8..24).prop_map(Op::InsertDuplicate),
        (0u8..24).prop_map(Op::Find),
        Just(Op::Erase),
        Just(Op::Uncouple),
        Just(Op::SetToNil),
        Just(Op::ReadCurrent),
        (0u16..6).prop_map(Op::BulkUncouple),
        Just(Op::Evict),
    ]
}

struct World {
    backend: MemTree,
    pool: BufferPool,
    cursors: CursorPool,
    handles: Vec<CursorId>,
}

impl World {
    fn new(cursor_count: usize) -> Self {
        let mut cursors = CursorPool::new();
        let handles = (0..cursor_count).map(|_| cursors.create()).collect();
        Self {
            backend: MemTree::with_leaf_capacity(4),
            pool: BufferPool::new(),
            cursors,
            handles,
        }
    }

    fn apply(&mut self, cursor: CursorId, op: &Op) {
        let backend = &mut self.backend;
        let pool = &mut self.pool;
        let cursors = &mut self.cursors;
        // Errors (KeyNotFound at the edges, CursorIsNil, DuplicateKey) are
        // part of normal operation here; invariants must hold regardless.
        let result = match op {
            Op::First => {
                cursor::move_cursor(backend, pool, cursors, cursor, None, None, MoveFlags::FIRST)
            }
            Op::Last => {
                cursor::move_cursor(backend, pool, cursors, cursor, None, None, MoveFlags::LAST)
            }
            Op::Next => {
                cursor::move_cursor(backend, pool, cursors, cursor, None, None, MoveFlags::NEXT)
            }
            Op::Prev => cursor::move_cursor(
                backend,
                pool,
                cursors,
                cursor,
                None,
                None,
                MoveFlags::PREVIOUS,
            ),
            Op::Insert(k) => cursor::insert(
                backend,
                pool,
                cursors,
                cursor,
                &[*k],
                &[*k, *k],
                InsertFlags::empty(),
            ),
            Op::InsertDuplicate(k) => cursor::insert(
                backend,
                pool,
                cursors,
                cursor,
                &[*k],
                &[*k],
                InsertFlags::DUPLICATE,
            ),
            Op::Find(k) => cursor::find(
                backend,
                pool,
                cursors,
                cursor,
                &[*k],
                None,
                MoveFlags::empty(),
            ),
            Op::Erase => cursor::erase(backend, pool, cursors, cursor),
            Op::Uncouple => {
                cursor::uncouple(backend, pool, cursors, cursor, UncoupleMode::Remove)
            }
            Op::SetToNil => cursor::set_to_nil(pool, cursors, cursor),
            Op::ReadCurrent => {
                let mut key = Vec::new();
                let mut record = Vec::new();
                cursor::move_cursor(
                    backend,
                    pool,
                    cursors,
                    cursor,
                    Some(&mut key),
                    Some(&mut record),
                    MoveFlags::empty(),
                )
            }
            Op::BulkUncouple(start) => {
                match *cursors.get(cursor).expect("live handle").state() {
                    CursorState::Coupled { page, .. } => {
                        uncouple_all_cursors(backend, pool, cursors, page, *start)
                    }
                    _ => Ok(()),
                }
            }
            Op::Evict => match *cursors.get(cursor).expect("live handle").state() {
                CursorState::Coupled { page, .. } => {
                    uncouple_all_cursors(backend, pool, cursors, page, 0)
                        .and_then(|()| pool.evict(backend, page).map(|_| ()))
                }
                _ => Ok(()),
            },
        };

        if let Err(e) = result {
            assert!(
                matches!(
                    e,
                    SmewError::KeyNotFound | SmewError::CursorIsNil | SmewError::DuplicateKey
                ),
                "unexpected failure from {op:?}: {e}"
            );
        }
    }

    /// Invariants 1–3: a cursor is in exactly one state (by construction of
    /// the state enum), coupled cursors appear in exactly their page's list,
    /// and coupled positions address a valid leaf slot.
    fn check_invariants(&self) {
        for id in self.cursors.ids() {
            let cursor = self.cursors.get(id).expect("listed id is live");
            match *cursor.state() {
                CursorState::Coupled { page, slot, .. } => {
                    let resident = self
                        .pool
                        .get(page)
                        .expect("coupled cursor's page must be resident");
                    assert!(
                        resident.has_cursor(id),
                        "coupled cursor missing from its page's list"
                    );
                    assert!(resident.node().is_leaf(), "coupled to an internal node");
                    assert!(
                        slot < resident.node().count(),
                        "coupled slot out of range"
                    );
                }
                CursorState::Uncoupled { .. } | CursorState::Nil => {
                    for page in self.pool.pages() {
                        assert!(
                            !page.has_cursor(id),
                            "detached cursor still listed on page {}",
                            page.id()
                        );
                    }
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(192))]

    #[test]
    fn membership_invariants_hold_under_random_ops(
        ops in proptest::collection::vec((0usize..3, op_strategy()), 1..48)
    ) {
        let mut world = World::new(3);
        for (which, op) in &ops {
            let cursor = world.handles[*which];
            world.apply(cursor, op);
            world.check_invariants();
        }
    }

    #[test]
    fn uncouple_recouple_preserves_the_position(
        keys in proptest::collection::btree_set(0u8..32, 1..20),
        steps in 0usize..24,
        dup_extra in 0u8..3,
    ) {
        let mut world = World::new(1);
        let c = world.handles[0];
        let keys: Vec<u8> = keys.into_iter().collect();
        for k in &keys {
            world.apply(c, &Op::Insert(*k));
        }
        // Give one key a duplicate chain so dup positions are exercised.
        for _ in 0..dup_extra {
            world.apply(c, &Op::InsertDuplicate(keys[0]));
        }

        // Walk to an arbitrary position.
        world.apply(c, &Op::First);
        for _ in 0..steps {
            world.apply(c, &Op::Next);
        }

        let mut before_key = Vec::new();
        let mut before_record = Vec::new();
        cursor::move_cursor(
            &mut world.backend,
            &mut world.pool,
            &mut world.cursors,
            c,
            Some(&mut before_key),
            Some(&mut before_record),
            MoveFlags::empty(),
        )
        .unwrap();
        let before_dup = world.cursors.get(c).unwrap().dup_index();

        cursor::uncouple(
            &mut world.backend,
            &mut world.pool,
            &mut world.cursors,
            c,
            UncoupleMode::Remove,
        )
        .unwrap();
        prop_assert!(world.cursors.get(c).unwrap().is_uncoupled());

        let mut after_key = Vec::new();
        let mut after_record = Vec::new();
        cursor::move_cursor(
            &mut world.backend,
            &mut world.pool,
            &mut world.cursors,
            c,
            Some(&mut after_key),
            Some(&mut after_record),
            MoveFlags::empty(),
        )
        .unwrap();

        prop_assert_eq!(before_key, after_key);
        prop_assert_eq!(before_record, after_record);
        prop_assert_eq!(before_dup, world.cursors.get(c).unwrap().dup_index());
    }
}

#[test]
fn root_page_appears_after_the_first_insert() {
    let mut world = World::new(1);
    assert!(world.backend.root_page().is_none());
    let c = world.handles[0];
    world.apply(c, &Op::Insert(7));
    assert!(world.backend.root_page().is_some());
    world.check_invariants();
}
