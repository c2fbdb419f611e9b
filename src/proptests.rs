use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use proptest_derive::Arbitrary;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::arena::{NodeId, RowId};
use crate::config::{OrderPolicy, TreeConfig};
use crate::error::TreeWarning;
use crate::model::TreeRowModel;
use crate::row::RowKind;
use crate::transaction::RowTransaction;

fn validate_tree<D>(model: &TreeRowModel<D>) {
    let t = model.tree();
    let root = t.root();
    assert!(!t.is_invalidated(), "commit must leave nothing queued");

    let mut stack: Vec<NodeId> = vec![root];
    let mut reachable = 0usize;
    while let Some(id) = stack.pop() {
        reachable += 1;
        let n = t.node(id).expect("reachable node must be live");
        assert!(!n.queued, "node {id:?} still queued after commit");
        assert!(n.invalidated.is_empty(), "worklist of {id:?} not drained");

        if id != root {
            assert!(!n.is_empty(), "empty node {id:?} survived the commit");
            let parent = n.parent.and_then(|p| t.node(p)).expect("parent must be live");
            assert_eq!(parent.child(n.key()), Some(id), "parent key map must point back");
            assert_eq!(n.level, parent.level + 1);
        }

        // Sibling list and key map describe the same children.
        let linked: Vec<NodeId> = t.children(id).collect();
        assert_eq!(linked.len(), n.children.len(), "key map and sibling list disagree");
        let mut prev = None;
        for &child in &linked {
            let c = &t.nodes[child];
            assert_eq!(c.parent, Some(id));
            assert_eq!(c.prev_sibling, prev, "broken back link at {child:?}");
            prev = Some(child);
        }
        assert_eq!(n.last_child, prev);

        if let Some(row) = n.row {
            assert_eq!(t.rows[row].tree_node, Some(id), "row must point back to its node");
            assert_eq!(t.rows[row].kind, RowKind::Data);
        }
        for &dup in &n.duplicate_rows {
            assert_eq!(t.rows[dup].tree_node, Some(id), "duplicate must point back");
            let primary = n.row.expect("duplicates imply a primary");
            assert!(
                t.rows[primary].source_row_index <= t.rows[dup].source_row_index,
                "primary must have the smallest source index"
            );
        }
        match n.filler_row {
            Some(filler) => {
                assert!(n.row.is_none() && n.has_children(), "stale group row on {id:?}");
                assert_eq!(t.rows[filler].tree_node, Some(id));
            }
            None => assert!(id == root || n.row.is_some(), "filler {id:?} lacks a group row"),
        }

        if id == root || model.tree_data() {
            let expected: Vec<RowId> = linked.iter().filter_map(|&c| t.nodes[c].display_row()).collect();
            assert_eq!(n.children_after_group(), &expected[..]);
        } else {
            assert!(n.children_after_group().is_empty());
        }

        if model.order_policy() == OrderPolicy::TrustSource {
            let keys: Vec<usize> = linked
                .iter()
                .map(|&c| match t.nodes[c].row {
                    Some(row) => t.rows[row].source_row_index,
                    None => t.nodes[c].source_idx.unwrap_or(usize::MAX),
                })
                .collect();
            assert!(keys.windows(2).all(|w| w[0] <= w[1]), "children out of order: {keys:?}");
        }

        let mut leaves = Vec::new();
        for &row in n.children_after_group() {
            let child = t.rows[row].tree_node.and_then(|c| t.node(c)).expect("shown row must be attached");
            if child.children_after_group().is_empty() {
                leaves.push(row);
            } else {
                leaves.extend_from_slice(child.all_leaf_children());
            }
        }
        assert_eq!(n.all_leaf_children(), &leaves[..]);

        stack.extend(linked);
    }
    assert_eq!(reachable, t.node_count(), "unreachable nodes left in the arena");

    for (row, r) in t.rows.iter() {
        match r.tree_node {
            Some(node) => {
                let n = &t.nodes[node];
                assert!(
                    n.row == Some(row) || n.duplicate_rows.contains(&row) || n.filler_row == Some(row),
                    "row {row:?} points at a node that does not hold it"
                );
            }
            None => assert_eq!(r.kind, RowKind::Data, "detached group row {row:?}"),
        }
    }
}

/// Data of the top-level rows in committed source order.
fn current_data<D>(model: &TreeRowModel<D>) -> Vec<Arc<D>> {
    let mut rows: Vec<(usize, Arc<D>)> = model
        .tree()
        .rows
        .iter()
        .filter(|(_, r)| r.kind == RowKind::Data && r.top_level)
        .filter_map(|(_, r)| r.data.clone().map(|d| (r.source_row_index, d)))
        .collect();
    rows.sort_by_key(|(index, _)| *index);
    rows.into_iter().map(|(_, d)| d).collect()
}

/// Committed child order of every node.
fn committed_order<D>(model: &TreeRowModel<D>) -> HashMap<NodeId, Vec<NodeId>> {
    let t = model.tree();
    t.nodes.keys().map(|id| (id, t.children(id).collect::<Vec<_>>())).collect()
}

/// Siblings present both before and after kept their relative order.
fn assert_order_kept(before: &HashMap<NodeId, Vec<NodeId>>, after: &HashMap<NodeId, Vec<NodeId>>) {
    for (parent, old) in before {
        let Some(new) = after.get(parent) else { continue };
        let old_kept: Vec<NodeId> = old.iter().copied().filter(|c| new.contains(c)).collect();
        let new_kept: Vec<NodeId> = new.iter().copied().filter(|c| old.contains(c)).collect();
        assert_eq!(old_kept, new_kept, "committed order under {parent:?} changed");
    }
}

/// A second commit must not touch anything.
fn assert_commit_is_noop<D>(model: &mut TreeRowModel<D>) {
    let before = model.all_leaf_children().as_ptr();
    assert!(!model.commit().structure_changed);
    assert_eq!(model.all_leaf_children().as_ptr(), before);
}

#[derive(Debug)]
struct Item {
    id: u8,
    groups: Vec<u8>,
}

fn item(id: u8, groups: Vec<u8>) -> Arc<Item> {
    Arc::new(Item { id, groups })
}

fn path_config() -> TreeConfig<Item> {
    TreeConfig::path(|item: &Item| {
        item.groups
            .iter()
            .map(|g| format!("g{g}"))
            .chain(std::iter::once(item.id.to_string()))
            .collect()
    })
    .with_row_id(|item: &Item| item.id.to_string())
}

fn group_path() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..3, 0..3)
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 4)]
    Add {
        #[proptest(strategy = "0u8..24")]
        id: u8,
        #[proptest(strategy = "group_path()")]
        groups: Vec<u8>,
    },
    #[proptest(weight = 3)]
    Update {
        #[proptest(strategy = "0u8..24")]
        id: u8,
        #[proptest(strategy = "group_path()")]
        groups: Vec<u8>,
    },
    #[proptest(weight = 3)]
    Remove {
        #[proptest(strategy = "0u8..24")]
        id: u8,
    },
    Reload {
        seed: u64,
    },
    Batch {
        #[proptest(strategy = "0u8..24")]
        remove: u8,
        #[proptest(strategy = "0u8..24")]
        add: u8,
        #[proptest(strategy = "group_path()")]
        groups: Vec<u8>,
    },
}

/// Apply `op` to `model` and mirror it in `reference` (id to groups).
fn apply_op(model: &mut TreeRowModel<Item>, reference: &mut BTreeMap<u8, Vec<u8>>, op: Op) -> Result<(), TestCaseError> {
    match op {
        Op::Add { id, groups } => {
            let existed = reference.contains_key(&id);
            let result = model.apply_transaction(RowTransaction::new().add([item(id, groups.clone())]));
            if existed {
                prop_assert!(result.add.is_empty());
                let warnings = model.take_warnings();
                prop_assert_eq!(warnings, vec![TreeWarning::DuplicateAdd { id: id.to_string() }]);
            } else {
                prop_assert_eq!(result.add.len(), 1);
                reference.insert(id, groups);
            }
        }
        Op::Update { id, groups } => {
            model.apply_transaction(RowTransaction::new().update([item(id, groups.clone())]));
            reference.insert(id, groups);
        }
        Op::Remove { id } => {
            let result = model.apply_transaction(RowTransaction::new().remove([item(id, vec![])]));
            prop_assert_eq!(result.remove.len(), usize::from(reference.remove(&id).is_some()));
        }
        Op::Reload { seed } => {
            let mut rows = current_data(model);
            rows.shuffle(&mut StdRng::seed_from_u64(seed));
            let outcome = model.set_row_data(&rows);
            prop_assert!(!outcome.changed_path.is_active());
        }
        Op::Batch { remove, add, groups } => {
            model.queue_transaction(RowTransaction::new().remove([item(remove, vec![])]));
            model.queue_transaction(RowTransaction::new().update([item(add, groups.clone())]));
            prop_assert_eq!(model.flush_transactions().len(), 2);
            reference.remove(&remove);
            reference.insert(add, groups);
        }
    }
    prop_assert!(model.take_warnings().is_empty());
    prop_assert_eq!(model.len(), reference.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_incremental_matches_rebuild(ops in prop::collection::vec(any::<Op>(), 0..120)) {
        let mut model = TreeRowModel::new(path_config()).unwrap();
        let mut reference: BTreeMap<u8, Vec<u8>> = BTreeMap::new();

        for op in ops {
            apply_op(&mut model, &mut reference, op)?;
            validate_tree(&model);
        }

        // Every row sits on the path its data asks for.
        for (id, groups) in &reference {
            let row = model.row_by_id(&id.to_string()).unwrap();
            let node = model.node_id_of(row).unwrap();
            let expected: Vec<String> = groups
                .iter()
                .map(|g| format!("g{g}"))
                .chain(std::iter::once(id.to_string()))
                .collect();
            prop_assert_eq!(model.tree().key_path(node).to_vec(), expected);
        }

        // Same output as building the tree from scratch in source order.
        let mut fresh = TreeRowModel::new(path_config()).unwrap();
        fresh.set_row_data(&current_data(&model));
        validate_tree(&fresh);
        prop_assert_eq!(model.ids(model.all_leaf_children()), fresh.ids(fresh.all_leaf_children()));
        prop_assert_eq!(model.ids(model.root_children()), fresh.ids(fresh.root_children()));

        // Idempotent commit keeps the same allocation.
        assert_commit_is_noop(&mut model);
    }

    #[test]
    fn prop_maintain_order_grouped(ops in prop::collection::vec(any::<Op>(), 0..120)) {
        let mut model = TreeRowModel::new(path_config().with_maintain_order(true)).unwrap();
        let mut reference: BTreeMap<u8, Vec<u8>> = BTreeMap::new();

        for op in ops {
            let reload = matches!(op, Op::Reload { .. });
            let before = committed_order(&model);
            let leaves: Vec<RowId> = model.all_leaf_children().to_vec();

            apply_op(&mut model, &mut reference, op)?;
            validate_tree(&model);
            assert_commit_is_noop(&mut model);

            let after = committed_order(&model);
            if reload {
                // Same rows on the same paths: nothing may move.
                prop_assert_eq!(&after, &before);
                prop_assert_eq!(model.all_leaf_children(), &leaves[..]);
            } else {
                assert_order_kept(&before, &after);
            }
        }

        for (id, groups) in &reference {
            let row = model.row_by_id(&id.to_string()).unwrap();
            let node = model.node_id_of(row).unwrap();
            prop_assert_eq!(model.tree().key_path(node).len(), groups.len() + 1);
        }
    }

    #[test]
    fn prop_duplicate_paths(groups in prop::collection::vec(0u8..4, 1..40), removals in prop::collection::vec(0u8..40, 0..20)) {
        let config = TreeConfig::path(|item: &Item| vec![format!("g{}", item.groups[0])])
            .with_row_id(|item: &Item| item.id.to_string());
        let mut model = TreeRowModel::new(config).unwrap();
        let rows: Vec<Arc<Item>> = groups.iter().enumerate().map(|(i, &g)| item(i as u8, vec![g])).collect();
        model.set_row_data(&rows);
        validate_tree(&model);

        let mut alive: BTreeMap<u8, u8> = groups.iter().enumerate().map(|(i, &g)| (i as u8, g)).collect();
        for id in removals {
            model.apply_transaction(RowTransaction::new().remove([item(id, vec![0])]));
            alive.remove(&id);
            validate_tree(&model);
        }

        // One primary per distinct group, the rest are duplicates.
        let root = model.tree().root();
        let mut per_group: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        for (&id, &g) in &alive {
            per_group.entry(g).or_default().push(id);
        }
        prop_assert_eq!(model.tree().node(root).unwrap().child_count(), per_group.len());
        for (g, ids) in &per_group {
            let node = model.tree().node(root).unwrap().child(&format!("g{g}")).unwrap();
            let node = model.tree().node(node).unwrap();
            prop_assert_eq!(node.duplicate_rows().len() + 1, ids.len());
            let primary = model.row(node.row().unwrap()).unwrap();
            prop_assert_eq!(primary.id(), ids[0].to_string());
        }
        // Groups are ordered by their primary's source index, which is the id.
        let mut primaries: Vec<u8> = per_group.values().map(|ids| ids[0]).collect();
        primaries.sort_unstable();
        let expected: Vec<String> = primaries.iter().map(u8::to_string).collect();
        prop_assert_eq!(model.ids(model.all_leaf_children()), expected);
    }

    #[test]
    fn prop_maintain_order_ignores_reshuffles(n in 1usize..24, seeds in prop::collection::vec(any::<u64>(), 1..6)) {
        let config = TreeConfig::<Item>::flat()
            .with_row_id(|item: &Item| item.id.to_string())
            .with_maintain_order(true);
        let mut model = TreeRowModel::new(config).unwrap();
        let rows: Vec<Arc<Item>> = (0..n as u8).map(|id| item(id, vec![])).collect();
        model.set_row_data(&rows);
        let committed: Vec<String> = model.ids(model.root_children()).into_iter().map(String::from).collect();

        for seed in seeds {
            let mut shuffled = rows.clone();
            shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
            model.set_row_data(&shuffled);
            validate_tree(&model);
            prop_assert_eq!(model.ids(model.root_children()), committed.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[derive(Debug)]
struct Nested {
    id: u32,
    children: Vec<Arc<Nested>>,
}

fn nested(id: u32, children: Vec<Arc<Nested>>) -> Arc<Nested> {
    Arc::new(Nested { id, children })
}

fn nested_model() -> TreeRowModel<Nested> {
    let config = TreeConfig::<Nested>::children(|n| Some(n.children.as_slice()))
        .with_row_id(|n: &Nested| n.id.to_string());
    TreeRowModel::new(config).unwrap()
}

/// Leaves of `rows` in reading order.
fn preorder_leaves(rows: &[Arc<Nested>], out: &mut Vec<String>) {
    for row in rows {
        if row.children.is_empty() {
            out.push(row.id.to_string());
        } else {
            preorder_leaves(&row.children, out);
        }
    }
}

/// Nested rows from a child map keyed by parent id, 0 being the top level.
fn build_forest(kids: &BTreeMap<u32, Vec<u32>>, parent: u32) -> Vec<Arc<Nested>> {
    kids.get(&parent)
        .map(|ids| ids.iter().map(|&id| nested(id, build_forest(kids, id))).collect())
        .unwrap_or_default()
}

/// Child ids of every node that has children, keyed by the node's id ("" for
/// the root).
fn sibling_ids(model: &TreeRowModel<Nested>) -> BTreeMap<String, Vec<String>> {
    let t = model.tree();
    t.nodes
        .keys()
        .filter(|&id| t.nodes[id].has_children())
        .map(|id| {
            let kids: Vec<String> = t.children(id).map(|c| t.nodes[c].key().to_string()).collect();
            (t.nodes[id].key().to_string(), kids)
        })
        .collect()
}

fn expected_sibling_ids(kids: &BTreeMap<u32, Vec<u32>>) -> BTreeMap<String, Vec<String>> {
    kids.iter()
        .map(|(&parent, ids)| {
            let key = if parent == 0 { String::new() } else { parent.to_string() };
            let ids: Vec<String> = ids.iter().map(u32::to_string).collect();
            (key, ids)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_maintain_order_nested_inversions(
        parents in prop::collection::vec(any::<prop::sample::Index>(), 1..40),
        seeds in prop::collection::vec(any::<u64>(), 1..5),
    ) {
        // Row `k + 1` hangs under an earlier row, or at the top level for 0.
        let mut kids: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for (k, parent) in parents.iter().enumerate() {
            let id = k as u32 + 1;
            kids.entry(parent.index(id as usize) as u32).or_default().push(id);
        }
        let config = TreeConfig::<Nested>::children(|n| Some(n.children.as_slice()))
            .with_row_id(|n: &Nested| n.id.to_string())
            .with_maintain_order(true);
        let mut model = TreeRowModel::new(config).unwrap();
        model.set_row_data(&build_forest(&kids, 0));
        validate_tree(&model);
        let committed = sibling_ids(&model);
        prop_assert_eq!(&committed, &expected_sibling_ids(&kids));

        for seed in seeds {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut shuffled = kids.clone();
            for ids in shuffled.values_mut() {
                ids.shuffle(&mut rng);
            }
            let inverted = kids.iter().filter(|(parent, ids)| shuffled[*parent] != **ids).count();

            // Incoming order matches the committed one again.
            let outcome = model.set_row_data(&build_forest(&kids, 0));
            prop_assert_eq!(outcome.suppressed_reorders, 0);

            let outcome = model.set_row_data(&build_forest(&shuffled, 0));
            prop_assert_eq!(outcome.suppressed_reorders, inverted);
            validate_tree(&model);
            assert_commit_is_noop(&mut model);
            prop_assert_eq!(&sibling_ids(&model), &committed);
        }
        prop_assert!(model.take_warnings().is_empty());

        // Dropping the preserved order follows the last incoming data.
        let mut rng = StdRng::seed_from_u64(0);
        let mut shuffled = kids.clone();
        for ids in shuffled.values_mut() {
            ids.shuffle(&mut rng);
        }
        model.set_row_data(&build_forest(&shuffled, 0));
        model.set_maintain_order(false);
        validate_tree(&model);
        prop_assert_eq!(sibling_ids(&model), expected_sibling_ids(&shuffled));
    }
}

#[test]
fn exhaustive_nested_reload_order() {
    let forest = vec![
        nested(1, vec![nested(2, vec![]), nested(3, vec![nested(4, vec![])])]),
        nested(5, vec![]),
        nested(6, vec![nested(7, vec![])]),
        nested(8, vec![nested(9, vec![]), nested(10, vec![])]),
    ];

    let mut model = nested_model();
    for_each_permutation(&forest, |perm| {
        model.set_row_data(&perm);
        validate_tree(&model);

        let mut expected = Vec::new();
        preorder_leaves(&perm, &mut expected);
        assert_eq!(model.ids(model.all_leaf_children()), expected);
        assert_eq!(model.len(), 10);
    });
    assert!(model.take_warnings().is_empty());
}

#[test]
fn exhaustive_nested_removal_order() {
    let forest = vec![
        nested(1, vec![nested(2, vec![]), nested(3, vec![nested(4, vec![])])]),
        nested(5, vec![]),
        nested(6, vec![nested(7, vec![])]),
    ];

    for_each_permutation(&forest, |perm| {
        let mut model = nested_model();
        model.set_row_data(&forest);
        let mut remaining = model.len();

        for top in perm {
            let mut subtree = Vec::new();
            preorder_leaves(std::slice::from_ref(&top), &mut subtree);
            let result = model.apply_transaction(RowTransaction::new().remove([top]));
            assert!(result.remove.len() >= subtree.len());
            remaining -= result.remove.len();
            assert_eq!(model.len(), remaining);
            validate_tree(&model);
        }
        assert!(model.is_empty());
        assert_eq!(model.tree().node_count(), 1);
        assert_eq!(model.tree().row_count(), 0);
    });
}
