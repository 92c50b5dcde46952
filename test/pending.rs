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

fn has_pending(doc: &Doc) -> (bool, bool) {
    doc.transact(None, |txn| {
        (
            txn.store().pending().is_some(),
            txn.store().pending_ds().is_some(),
        )
    })
}

#[test]
fn test_update_applied_before_its_dependency() {
    let a = doc(1);
    insert(&a, 0, "abc");
    let u1 = a.encode_state_as_update_v1(&StateVector::new());
    let sv = a.state_vector();
    insert(&a, 3, "d");
    let u2 = a.encode_state_as_update_v1(&sv);

    let b = doc(2);
    b.apply_update_v1(&u2, None).unwrap();
    assert_eq!(text(&b), "");
    assert!(b.state_vector().is_empty());
    assert_eq!(has_pending(&b), (true, false));

    b.apply_update_v1(&u1, None).unwrap();
    assert_eq!(text(&b), "abcd");
    assert_eq!(has_pending(&b), (false, false));
    assert_eq!(b.state_vector(), a.state_vector());
}

#[test]
fn test_dependency_on_another_client() {
    let a = doc(1);
    let b = doc(2);
    insert(&a, 0, "ac");
    let u1 = a.encode_state_as_update_v1(&StateVector::new());
    b.apply_update_v1(&u1, None).unwrap();
    insert(&b, 1, "b");
    let u2 = b.encode_state_as_update_v1(&a.state_vector());

    let c = doc(3);
    c.apply_update_v1(&u2, None).unwrap();
    assert_eq!(text(&c), "");
    c.apply_update_v1(&u1, None).unwrap();
    assert_eq!(text(&c), "abc");
}

#[test]
fn test_deletion_of_unknown_range_waits() {
    let a = doc(1);
    insert(&a, 0, "hello");
    let inserted = a.encode_state_as_update_v1(&StateVector::new());
    let mut ds = DeleteSet::new();
    ds.insert(ID::new(1, 1), 3);
    let deletion = Update::from(ds).encode_v1();

    let b = doc(2);
    b.apply_update_v1(&deletion, None).unwrap();
    assert_eq!(has_pending(&b), (false, true));
    b.apply_update_v1(&inserted, None).unwrap();
    assert_eq!(text(&b), "ho");
    assert_eq!(has_pending(&b), (false, false));
}

#[test]
fn test_pending_structures_are_forwarded() {
    let a = doc(1);
    insert(&a, 0, "abc");
    let u1 = a.encode_state_as_update_v1(&StateVector::new());
    let sv = a.state_vector();
    insert(&a, 3, "d");
    let u2 = a.encode_state_as_update_v1(&sv);

    let b = doc(2);
    b.apply_update_v1(&u2, None).unwrap();
    let c = doc(3);
    c.apply_update_v1(&u1, None).unwrap();
    c.apply_update_v1(&b.encode_state_as_update_v1(&c.state_vector()), None)
        .unwrap();
    assert_eq!(text(&c), "abcd");
}
