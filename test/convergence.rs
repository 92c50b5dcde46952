use quickcheck::{Arbitrary, Gen};
use rand::Rng;
use ydoc::*;

fn doc(client: ClientID) -> Doc {
    Doc::with_options(Options::with_client_id(client))
}

fn insert(doc: &Doc, index: u32, s: &str) {
    doc.transact(None, |txn| {
        let text = txn.get_or_insert_root("text", TypeRef::Text);
        txn.insert(&text, index, ItemContent::String(s.to_string()))
            .unwrap();
    });
}

fn text(doc: &Doc) -> String {
    doc.transact(None, |txn| {
        let text = txn.get_or_insert_root("text", TypeRef::Text);
        txn.get_string(&text)
    })
}

fn send(from: &Doc, to: &Doc) {
    let update = from.encode_state_as_update_v1(&to.state_vector());
    to.apply_update_v1(&update, None).unwrap();
}

fn full_state(doc: &Doc) -> Vec<u8> {
    doc.encode_state_as_update_v1(&StateVector::new())
}

#[test]
fn test_concurrent_inserts_at_head_lower_client_first() {
    let values = |doc: &Doc| {
        doc.transact(None, |txn| {
            let list = txn.get_or_insert_root("list", TypeRef::Array);
            txn.values(&list)
        })
    };
    for &flip in &[false, true] {
        let a = doc(1);
        let b = doc(2);
        a.transact(None, |txn| {
            let list = txn.get_or_insert_root("list", TypeRef::Array);
            txn.insert(&list, 0, ItemContent::Any(vec![Any::from("X")]))
                .unwrap();
        });
        b.transact(None, |txn| {
            let list = txn.get_or_insert_root("list", TypeRef::Array);
            txn.insert(&list, 0, ItemContent::Any(vec![Any::from("Y")]))
                .unwrap();
        });
        if flip {
            send(&b, &a);
            send(&a, &b);
        } else {
            send(&a, &b);
            send(&b, &a);
        }
        let expected = vec![Out::Any(Any::from("X")), Out::Any(Any::from("Y"))];
        assert_eq!(values(&a), expected);
        assert_eq!(values(&b), expected);
    }
}

#[test]
fn test_exchange_yields_identical_encodings() {
    let a = doc(1);
    let b = doc(2);
    insert(&a, 0, "hello");
    send(&a, &b);

    insert(&a, 5, " world");
    insert(&b, 0, ">> ");
    b.transact(None, |txn| {
        let text = txn.get_or_insert_root("text", TypeRef::Text);
        txn.remove_range(&text, 4, 2).unwrap();
    });
    send(&b, &a);
    send(&a, &b);

    assert_eq!(text(&a), ">> hlo world");
    assert_eq!(text(&a), text(&b));
    assert_eq!(full_state(&a), full_state(&b));
    assert_eq!(
        a.encode_state_as_update_v2(&StateVector::new()),
        b.encode_state_as_update_v2(&StateVector::new())
    );
}

#[test]
fn test_concurrent_map_writes_converge() {
    let a = doc(1);
    let b = doc(2);
    for (doc, value) in &[(&a, "a"), (&b, "b")] {
        doc.transact(None, |txn| {
            let map = txn.get_or_insert_root("map", TypeRef::Map);
            txn.insert_at_key(&map, "key", ItemContent::Any(vec![Any::from(*value)]))
                .unwrap();
        });
    }
    send(&a, &b);
    send(&b, &a);
    let get = |doc: &Doc| {
        doc.transact(None, |txn| {
            let map = txn.get_or_insert_root("map", TypeRef::Map);
            txn.get(&map, "key")
        })
    };
    assert_eq!(get(&a), get(&b));
    assert_eq!(get(&a), Some(Out::Any(Any::from("b"))));
    assert_eq!(full_state(&a), full_state(&b));
}

#[derive(Debug, Clone)]
enum Op {
    Insert { site: usize, index: u32, text: String },
    Delete { site: usize, index: u32, len: u32 },
    Sync { from: usize, to: usize },
}

const SITES: usize = 3;

impl Arbitrary for Op {
    fn arbitrary<G: Gen>(g: &mut G) -> Self {
        let site = g.gen_range(0, SITES);
        match g.gen_range(0, 3) {
            0 => {
                let len = g.gen_range(1, 4);
                let text = (0..len)
                    .map(|_| (b'a' + g.gen_range(0, 26) as u8) as char)
                    .collect();
                Op::Insert {
                    site,
                    index: g.gen_range(0, 64),
                    text,
                }
            }
            1 => Op::Delete {
                site,
                index: g.gen_range(0, 64),
                len: g.gen_range(1, 4),
            },
            _ => Op::Sync {
                from: site,
                to: g.gen_range(0, SITES),
            },
        }
    }
}

fn apply_op(sites: &[Doc], op: &Op) {
    match op {
        Op::Insert { site, index, text } => {
            sites[*site].transact(None, |txn| {
                let root = txn.get_or_insert_root("text", TypeRef::Text);
                let index = index % (txn.len(&root) + 1);
                txn.insert(&root, index, ItemContent::String(text.clone()))
                    .unwrap();
            });
        }
        Op::Delete { site, index, len } => {
            sites[*site].transact(None, |txn| {
                let root = txn.get_or_insert_root("text", TypeRef::Text);
                let total = txn.len(&root);
                if total > 0 {
                    let index = index % total;
                    let len = (*len).min(total - index);
                    txn.remove_range(&root, index, len).unwrap();
                }
            });
        }
        Op::Sync { from, to } => {
            if from != to {
                send(&sites[*from], &sites[*to]);
            }
        }
    }
}

quickcheck! {
    fn prop_random_edits_converge(ops: Vec<Op>) -> bool {
        let sites: Vec<Doc> = (1..=SITES as u64).map(doc).collect();
        for op in ops.iter() {
            apply_op(&sites, op);
        }
        for _ in 0..2 {
            for from in 0..SITES {
                for to in 0..SITES {
                    if from != to {
                        send(&sites[from], &sites[to]);
                    }
                }
            }
        }
        let expected_text = text(&sites[0]);
        let expected_state = full_state(&sites[0]);
        sites.iter().all(|site| text(site) == expected_text && full_state(site) == expected_state)
    }
}
