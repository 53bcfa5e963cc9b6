// Container property tests.
//
// Property 1: membership and reference counts follow a model.
//  - Model: multiset of linked object ids (order ignored), plus the
//    external references held by the test.
//  - Invariant: count() == model length; every object's ref_count() ==
//    1 (owner) + external references + memberships.
//  - Operations: link, unlink, find, remove, unlink-matching, release
//    external references, iterate.
//
// Property 2: iteration order under append and prepend.
//  - Model: link order per bucket.
//  - Invariant: iter() yields buckets in index order, each bucket in link
//    order (append) or reverse link order (prepend); descending yields
//    the exact reverse.
use proptest::prelude::*;
use rc_container::{
    Container, ContainerOptions, InsertOrder, IterOptions, Obj, Search, Traversal,
};

fn ids(buckets: usize, options: ContainerOptions) -> Container<usize> {
    Container::with_options(
        buckets,
        |s: Search<'_, usize>| match s {
            Search::Object(v) | Search::Key(v) => *v as u64,
        },
        |a: &usize, s: Search<'_, usize>| match s {
            Search::Object(b) | Search::Key(b) => a == b,
        },
        options,
    )
}

proptest! {
    #[test]
    fn prop_membership_matches_model(
        buckets in 1usize..8,
        ops in proptest::collection::vec((0u8..=6u8, 0usize..12usize), 1..120),
    ) {
        let c = ids(buckets, ContainerOptions::default());
        let objs: Vec<Obj<usize>> = (0..12).map(Obj::new).collect();
        let mut linked: Vec<usize> = Vec::new();
        let mut external: Vec<Obj<usize>> = Vec::new();

        for (op, id) in ops {
            match op {
                // Link; duplicates are allowed.
                0 | 1 => {
                    c.link(&objs[id]).unwrap();
                    linked.push(id);
                }
                // Unlink one membership of this exact object.
                2 => {
                    let was = linked.iter().position(|&x| x == id);
                    prop_assert_eq!(c.unlink(&objs[id]), was.is_some());
                    if let Some(i) = was {
                        linked.swap_remove(i);
                    }
                }
                // Find hands out an extra reference.
                3 => {
                    let found = c.find(Search::Key(&id));
                    prop_assert_eq!(found.is_some(), linked.contains(&id));
                    external.extend(found);
                }
                // Remove hands back the container's reference.
                4 => {
                    let removed = c.remove(Search::Key(&id));
                    prop_assert_eq!(removed.is_some(), linked.contains(&id));
                    if let Some(r) = removed {
                        let i = linked.iter().position(|&x| x == id).unwrap();
                        linked.swap_remove(i);
                        external.push(r);
                    }
                }
                // Unlink every member with an id below `id`.
                5 => {
                    let out = c.callback(Traversal::unlink().multiple().nodata(), |v: &usize| *v < id);
                    let before = linked.len();
                    linked.retain(|&x| x >= id);
                    prop_assert_eq!(out.matched, before - linked.len());
                }
                // Release external references.
                _ => external.clear(),
            }

            prop_assert_eq!(c.count(), linked.len());
            for (i, o) in objs.iter().enumerate() {
                let memberships = linked.iter().filter(|&&x| x == i).count();
                let held = external.iter().filter(|r| Obj::ptr_eq(r, o)).count();
                prop_assert_eq!(o.ref_count(), 1 + memberships + held);
            }
        }

        prop_assert!(c.check().is_ok());
        let mut seen: Vec<usize> = c.iter().map(|o| *o).collect();
        seen.sort_unstable();
        linked.sort_unstable();
        prop_assert_eq!(seen, linked);
    }

    #[test]
    fn prop_iteration_order(
        buckets in 1usize..6,
        prepend in any::<bool>(),
        values in proptest::collection::vec(0usize..40, 0..60),
    ) {
        let order = if prepend { InsertOrder::Prepend } else { InsertOrder::Append };
        let c = ids(buckets, ContainerOptions::default().order(order));
        let mut model: Vec<Vec<usize>> = vec![Vec::new(); buckets];
        for &v in &values {
            c.link(&Obj::new(v)).unwrap();
            let b = &mut model[v % buckets];
            if prepend {
                b.insert(0, v);
            } else {
                b.push(v);
            }
        }
        let expected: Vec<usize> = model.concat();
        let forward: Vec<usize> = c.iter().map(|o| *o).collect();
        prop_assert_eq!(&forward, &expected);

        let mut backward: Vec<usize> = c
            .iter_with(IterOptions::default().descending())
            .map(|o| *o)
            .collect();
        backward.reverse();
        prop_assert_eq!(&backward, &expected);
        prop_assert!(c.check().is_ok());
    }
}
