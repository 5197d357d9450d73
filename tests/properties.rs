use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ownership_tree::{ObjectTree, ObjectTreeAction};
use proptest::prelude::*;

const POOL: usize = 8;

#[derive(Debug, Clone)]
enum Op {
    Register(usize, usize),
    Execute { target: usize, dispose_tree: bool },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..POOL, 0..POOL).prop_map(|(p, c)| Op::Register(p, c)),
        1 => (0..POOL, any::<bool>()).prop_map(|(target, dispose_tree)| Op::Execute {
            target,
            dispose_tree
        }),
    ]
}

#[derive(Debug)]
struct Slot(#[allow(dead_code)] usize);

#[derive(Default)]
struct Counter(AtomicUsize);

impl ObjectTreeAction<Slot> for Counter {
    fn execute(&self, _object: &Arc<Slot>) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Structural invariants that must hold after any operation.
fn check_invariants(tree: &ObjectTree<Slot>, pool: &[Arc<Slot>]) -> Result<(), TestCaseError> {
    let registered: Vec<&Arc<Slot>> = pool.iter().filter(|s| tree.contains_key(s)).collect();
    prop_assert_eq!(tree.size(), registered.len());

    let roots = tree.root_objects();
    for &slot in &registered {
        // Walking up always ends at a root within POOL steps (no cycles).
        let mut current = Arc::clone(slot);
        let mut steps = 0;
        while let Some(parent) = tree.parent_of(&current) {
            prop_assert!(tree.contains_key(&parent));
            prop_assert!(tree.children_of(&parent).iter().any(|c| Arc::ptr_eq(c, &current)));
            current = parent;
            steps += 1;
            prop_assert!(steps <= POOL, "parent chain longer than the pool");
        }
        prop_assert!(roots.iter().any(|r| Arc::ptr_eq(r, &current)));
    }
    for root in &roots {
        prop_assert!(tree.parent_of(root).is_none());
    }
    prop_assert_eq!(tree.is_empty(), registered.is_empty());
    Ok(())
}

proptest! {
    #[test]
    fn arbitrary_operation_sequences_keep_the_forest_sound(ops in prop::collection::vec(arb_op(), 1..60)) {
        let tree = ObjectTree::default();
        let pool: Vec<Arc<Slot>> = (0..POOL).map(|i| Arc::new(Slot(i))).collect();

        for op in ops {
            match op {
                Op::Register(p, c) => tree.register(&pool[p], &pool[c]),
                Op::Execute { target, dispose_tree } => {
                    let before = tree.size();
                    let counter = Counter::default();
                    let known = tree.execute_all(&pool[target], dispose_tree, &counter, false);
                    let removed = before - tree.size();
                    prop_assert_eq!(counter.0.load(Ordering::SeqCst), removed);
                    prop_assert!(!tree.contains_key(&pool[target]));
                    if !dispose_tree && known {
                        prop_assert_eq!(removed, 1);
                    }
                }
            }
            check_invariants(&tree, &pool)?;
        }
    }

    #[test]
    fn modification_stamps_strictly_increase(pairs in prop::collection::vec((0..POOL, 0..POOL), 1..40)) {
        let tree = ObjectTree::default();
        let pool: Vec<Arc<Slot>> = (0..POOL).map(|i| Arc::new(Slot(i))).collect();
        let mut last = tree.modification();
        for (p, c) in pairs {
            tree.register(&pool[p], &pool[c]);
            let now = tree.modification();
            prop_assert!(now >= last);
            last = now;
        }
        let mut stamps: Vec<u64> = pool.iter().filter_map(|s| tree.stamp_of(s)).collect();
        let len = stamps.len();
        stamps.sort_unstable();
        stamps.dedup();
        prop_assert_eq!(stamps.len(), len);
        prop_assert!(stamps.iter().all(|&s| s <= last));
    }
}
