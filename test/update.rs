use std::sync::{Arc, Mutex};

use ydoc::update::*;
use ydoc::*;

fn doc(client: ClientID) -> Doc {
    Doc::with_options(Options::with_client_id(client))
}

fn text(doc: &Doc) -> String {
    doc.transact(None, |txn| {
        let text = txn.get_or_insert_root("text", TypeRef::Text);
        txn.get_string(&text)
    })
}

/// A document mixing text, map entries and a nested array.
fn sample() -> Doc {
    let doc = doc(7);
    doc.transact(None, |txn| {
        let text = txn.get_or_insert_root("text", TypeRef::Text);
        txn.insert(&text, 0, ItemContent::String("sample text".into()))
            .unwrap();
        txn.remove_range(&text, 2, 4).unwrap();
        let map = txn.get_or_insert_root("map", TypeRef::Map);
        txn.insert_at_key(&map, "n", ItemContent::Any(vec![Any::from(42)]))
            .unwrap();
        txn.insert_at_key(&map, "s", ItemContent::Any(vec![Any::from("str")]))
            .unwrap();
        let list = txn
            .insert_at_key(
                &map,
                "list",
                ItemContent::Type(Box::new(Branch::new(TypeRef::Array))),
            )
            .unwrap();
        txn.insert(
            &TypePtr::ID(list),
            0,
            ItemContent::Any(vec![Any::from(true), Any::from(1.5)]),
        )
        .unwrap();
    });
    doc
}

#[test]
fn test_reencoding_is_byte_identical() {
    let doc = sample();
    let v1 = doc.encode_state_as_update_v1(&StateVector::new());
    let v2 = doc.encode_state_as_update_v2(&StateVector::new());
    assert_eq!(Update::decode_v1(&v1).unwrap().encode_v1(), v1);
    assert_eq!(Update::decode_v2(&v2).unwrap().encode_v2(), v2);
    assert_eq!(convert_update_v1_to_v2(&v1).unwrap(), v2);
    assert_eq!(convert_update_v2_to_v1(&v2).unwrap(), v1);
}

#[test]
fn test_v2_update_applies_to_fresh_doc() {
    let source = sample();
    let v2 = source.encode_state_as_update_v2(&StateVector::new());
    let target = doc(8);
    target.apply_update_v2(&v2, None).unwrap();
    assert_eq!(text(&target), "sa text");
    let n = target.transact(None, |txn| {
        let map = txn.get_or_insert_root("map", TypeRef::Map);
        txn.get(&map, "n")
    });
    assert_eq!(n, Some(Out::Any(Any::from(42))));
    assert_eq!(
        target.encode_state_as_update_v1(&StateVector::new()),
        source.encode_state_as_update_v1(&StateVector::new())
    );
}

#[test]
fn test_merge_transaction_updates() {
    let source = doc(1);
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    source.observe_update_v1(move |event| sink.lock().unwrap().push(event.update.clone()));
    for (index, s) in [(0, "ab"), (2, "cd"), (1, "_")].iter() {
        source.transact(None, |txn| {
            let text = txn.get_or_insert_root("text", TypeRef::Text);
            txn.insert(&text, *index, ItemContent::String(s.to_string()))
                .unwrap();
        });
    }
    source.transact(None, |txn| {
        let text = txn.get_or_insert_root("text", TypeRef::Text);
        txn.remove_range(&text, 3, 1).unwrap();
    });

    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 4);
    let refs: Vec<&[u8]> = updates.iter().map(|u| u.as_slice()).collect();
    let merged = merge_updates_v1(&refs).unwrap();

    let target = doc(2);
    target.apply_update_v1(&merged, None).unwrap();
    assert_eq!(text(&target), "a_bd");
    assert_eq!(text(&source), "a_bd");
    assert_eq!(
        encode_state_vector_from_update_v1(&merged).unwrap(),
        source.encode_state_vector()
    );
}

#[test]
fn test_diff_update_against_state_vector() {
    let source = doc(1);
    source.transact(None, |txn| {
        let text = txn.get_or_insert_root("text", TypeRef::Text);
        txn.insert(&text, 0, ItemContent::String("abc".into())).unwrap();
    });
    let target = doc(2);
    target
        .apply_update_v1(&source.encode_state_as_update_v1(&StateVector::new()), None)
        .unwrap();
    source.transact(None, |txn| {
        let text = txn.get_or_insert_root("text", TypeRef::Text);
        txn.insert(&text, 3, ItemContent::String("def".into())).unwrap();
    });

    let full = source.encode_state_as_update_v1(&StateVector::new());
    let diff = diff_update_v1(&full, &target.encode_state_vector()).unwrap();
    let decoded = Update::decode_v1(&diff).unwrap();
    assert_eq!(decoded.blocks(&1).map(|b| b.len()), Some(1));
    assert_eq!(decoded.iter().next().map(|b| *b.id()), Some(ID::new(1, 3)));
    target.apply_update_v1(&diff, None).unwrap();
    assert_eq!(text(&target), "abcdef");
}

#[test]
fn test_truncated_update_is_rejected() {
    let v1 = sample().encode_state_as_update_v1(&StateVector::new());
    let target = doc(2);
    assert!(target.apply_update_v1(&v1[..v1.len() / 2], None).is_err());
    assert!(target.state_vector().is_empty());
}

/// One any-content item under root "t", followed by an empty delete set.
fn any_item_update(value: &[u8]) -> Vec<u8> {
    let mut update = vec![1, 1, 1, 0, 8, 1, 1, b't', 1];
    update.extend_from_slice(value);
    update.push(0);
    update
}

#[test]
fn test_malformed_updates_are_rejected() {
    let target = doc(2);

    // delete range whose end overflows the clock
    let overflow = [0, 1, 1, 1, 1, 0xff, 0xff, 0xff, 0xff, 0x0f];
    assert!(matches!(
        target.apply_update_v1(&overflow, None),
        Err(Error::VarIntOverflow)
    ));

    // deeply nested arrays
    let mut nested = Vec::new();
    for _ in 0..200_000 {
        nested.extend_from_slice(&[117, 1]);
    }
    nested.push(126);
    assert!(matches!(
        target.apply_update_v1(&any_item_update(&nested), None),
        Err(Error::UnexpectedValue(_))
    ));

    // root name that is not UTF-8
    let bad_name = [1, 1, 1, 0, 4, 1, 1, 0xff, 1, b'a', 0];
    assert!(matches!(
        target.apply_update_v1(&bad_name, None),
        Err(Error::InvalidString)
    ));

    // unknown content ref
    let bad_content = [1, 1, 1, 0, 31, 1, 1, b't', 0];
    assert!(target.apply_update_v1(&bad_content, None).is_err());

    assert!(target.state_vector().is_empty());
    assert_eq!(text(&target), "");

    // the document still accepts well-formed input
    target
        .apply_update_v1(&any_item_update(&[126]), None)
        .unwrap();
    assert_eq!(target.state_vector().get(&1), 1);
}
