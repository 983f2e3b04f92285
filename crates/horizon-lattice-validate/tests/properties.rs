//! Integration tests for the observable guarantees of field and group nodes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use horizon_lattice_validate::prelude::*;
use horizon_lattice_validate::REQUIRED;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;

const REQUIRED_MESSAGE: &str = "is required";

fn setup() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
    install_library(StandardLibrary::new().with_message(REQUIRED, REQUIRED_MESSAGE));
}

fn counting_spec(calls: &Arc<AtomicUsize>) -> Spec {
    let calls = calls.clone();
    Spec::check(move |v| {
        calls.fetch_add(1, Ordering::SeqCst);
        Verdict::check(v.is_some_and(|v| v != "bad"), "bad value")
    })
}

/// A predicate that answers from a queue of channels, one per invocation.
fn queued_spec(queue: &Arc<Mutex<VecDeque<oneshot::Receiver<Verdict>>>>) -> Spec {
    let queue = queue.clone();
    Spec::leaf(move |_, _| {
        let rx = queue.lock().pop_front();
        Outcome::pending(async move {
            match rx {
                Some(rx) => rx.await.unwrap_or(Verdict::Valid),
                None => Verdict::Valid,
            }
        })
    })
}

fn ids(group: &GroupNode) -> Vec<String> {
    group
        .children()
        .into_iter()
        .map(|(_, node)| node.id().to_string())
        .collect()
}

fn which(state: &NodeState) -> Vec<String> {
    state.errors().into_iter().map(|record| record.which).collect()
}

#[test]
fn test_deep_equal_set_notifies_once() {
    setup();
    let node = FieldNode::build(json!({"a": [1, 2]}), NodeConfig::new()).unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    let _sub = node.subscribe(move |_| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(count.load(Ordering::SeqCst), 1);

    node.set(json!({"a": [1, 3]}));
    node.set(json!({"a": [1, 3]}));
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_deep_equal_group_set_is_silent() {
    setup();
    let form = GroupNode::build(json!({"a": 1, "b": {"c": true}}), NodeConfig::new()).unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    let _sub = form.subscribe(move |_| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });

    form.set(json!({"a": 1, "b": {"c": true}}));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reset_clears_changed_and_active() {
    setup();
    let form = Node::build(json!({"a": 1, "b": [1, 2]}), NodeConfig::new()).unwrap();
    form.activate(true).await;
    form.set(json!({"a": 2, "b": [1]}));
    assert!(form.state().changed);

    form.reset();
    let state = form.state();
    assert!(!state.changed);
    assert_eq!(state.active, Some(false));
    assert_eq!(state.value, Some(json!({"a": 1, "b": [1, 2]})));
}

#[tokio::test]
async fn test_required_field_rejects_empty_values() {
    setup();
    for empty in [None, Some(Value::Null), Some(json!(""))] {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = FieldNode::build(
            empty.clone(),
            NodeConfig::new()
                .with_spec(counting_spec(&calls))
                .with_required(true),
        )
        .unwrap();

        assert!(!node.activate(true).await, "{empty:?} should be invalid");
        assert_eq!(node.state().error, Some(json!(REQUIRED_MESSAGE)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_required_field_runs_predicate_on_present_value() {
    setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let node = FieldNode::build(
        json!("bad"),
        NodeConfig::new()
            .with_spec(counting_spec(&calls))
            .with_required(true),
    )
    .unwrap();

    assert!(!node.activate(true).await);
    assert_eq!(node.state().error, Some(json!("bad value")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_optional_undefined_field_is_valid() {
    setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let node = FieldNode::build(None::<Value>, NodeConfig::new().with_spec(counting_spec(&calls))).unwrap();

    assert!(node.activate(true).await);
    assert!(node.state().valid);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_async_race_settles_on_latest_value() {
    setup();
    let queue = Arc::new(Mutex::new(VecDeque::new()));
    let (tx_initial, rx) = oneshot::channel();
    queue.lock().push_back(rx);
    let (tx_a, rx) = oneshot::channel();
    queue.lock().push_back(rx);
    let (tx_b, rx) = oneshot::channel();
    queue.lock().push_back(rx);

    let node = FieldNode::build(json!(0), NodeConfig::new().with_spec(queued_spec(&queue))).unwrap();
    let _ = node.activate(true);
    node.set(json!("a"));
    let promise_a = node.state().promise;
    node.set(json!("b"));
    let promise_b = node.state().promise;
    assert!(node.state().validating);

    let _ = tx_b.send(Verdict::Valid);
    assert!(promise_b.await.is_valid());
    let settled = node.state();
    assert!(settled.valid);
    assert!(!settled.validating);

    let _ = tx_a.send(Verdict::invalid("stale"));
    let _ = tx_initial.send(Verdict::invalid("stale"));
    assert!(!promise_a.await.is_valid());
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    let state = node.state();
    assert!(state.valid);
    assert_eq!(state.value, Some(json!("b")));
    assert_eq!(state.error, None);
}

#[test]
fn test_add_then_remove_restores_children() {
    setup();
    let config = NodeConfig::new()
        .with_spec(Spec::spread(Spec::empty()))
        .with_child_ids(|v, _| {
            NodeId::from(v.and_then(|v| v["id"].as_str()).unwrap_or_default())
        });
    let list = GroupNode::build(json!([{"id": "1", "x": 5}]), config).unwrap();
    let before = ids(&list);

    list.add(json!([{"id": "x", "x": 1}]));
    assert_eq!(ids(&list), vec!["1", "x"]);
    let added = list.child(&[Key::Index(1)]).unwrap();

    list.remove(&[NodeId::from("x")]);
    assert_eq!(ids(&list), before);
    assert_eq!(list.value(), Some(json!([{"id": "1", "x": 5}])));

    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    let _sub = list.subscribe(move |_| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    added.set(json!({"id": "x", "x": 99}));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(list.value(), Some(json!([{"id": "1", "x": 5}])));
}

#[test]
fn test_partial_set_keeps_structure() {
    setup();
    let form = GroupNode::build(json!({"a": 1, "b": 2}), NodeConfig::new()).unwrap();
    let before = ids(&form);

    form.set_with(json!({"a": 5, "c": 9}), SetOptions::partial());
    assert_eq!(ids(&form), before);
    assert_eq!(form.value(), Some(json!({"a": 5, "b": 2})));

    form.set_with(None::<Value>, SetOptions::partial());
    assert_eq!(ids(&form), before);
    assert_eq!(form.value(), Some(json!({"a": 5, "b": 2})));
}

#[tokio::test]
async fn test_error_paths_follow_ids() {
    setup();
    let spec = Spec::fields([
        (
            "user",
            Spec::fields([
                (
                    "name",
                    Spec::check(|v| Verdict::check(v.is_some_and(|v| v != ""), "empty")),
                ),
                (
                    "email",
                    Spec::check(|v| {
                        let ok = v.and_then(Value::as_str).is_some_and(|s| s.contains('@'));
                        Verdict::check(ok, "bad email")
                    }),
                ),
            ])
            .with_pred(|_, _| Outcome::invalid("user bad")),
        ),
        (
            "age",
            Spec::check(|v| Verdict::check(v.and_then(Value::as_u64) >= Some(18), "too young")),
        ),
    ]);
    let form = Node::build(
        json!({"user": {"name": "", "email": "x"}, "age": 3}),
        NodeConfig::new().with_spec(spec).with_id("form"),
    )
    .unwrap();

    assert!(!form.activate(true).await);
    let state = form.state();
    assert_eq!(which(&state), vec!["user", "user.name", "user.email", "age"]);
    let coll: Vec<_> = state.coll_errors().iter().map(|r| r.which.clone()).collect();
    assert_eq!(coll, vec!["user"]);
    assert_eq!(
        state.errors()[1].path,
        vec![NodeId::from("user"), NodeId::from("name")]
    );
}

#[tokio::test]
async fn test_end_to_end_form() {
    setup();
    let spec = Spec::fields([
        (
            "name",
            Spec::check(|v| Verdict::check(v.is_some_and(|v| v != "" && !v.is_null()), "required")),
        ),
        (
            "age",
            Spec::check(|v| Verdict::check(v.and_then(Value::as_u64) >= Some(18), "too young")),
        ),
    ]);
    let form = Node::build(
        json!({"name": "", "age": 10}),
        NodeConfig::new()
            .with_spec(spec)
            .with_required(Outline::flags(["name"])),
    )
    .unwrap();

    assert!(!form.activate(true).await);
    let state = form.state();
    assert!(!state.valid);
    assert_eq!(which(&state), vec!["name", "age"]);
    assert!(state.coll_errors().is_empty());
    assert_eq!(state.detail("age").and_then(|s| s.error.clone()), Some(json!("too young")));
}

#[tokio::test]
async fn test_end_to_end_spread_list() {
    setup();
    let item = Spec::fields([("x", Spec::empty())]).with_pred(|v, _| {
        let x = v.and_then(|v| v["x"].as_i64()).unwrap_or_default();
        Verdict::check(x < 10, "too big").into()
    });
    let list = Node::build(
        json!([{"id": "1", "x": 5}]),
        NodeConfig::new()
            .with_spec(Spec::spread(item))
            .with_child_ids(|v, _| {
                NodeId::from(v.and_then(|v| v["id"].as_str()).unwrap_or_default())
            }),
    )
    .unwrap();

    let group = list.as_group().unwrap();
    group.add(json!([{"id": "2", "x": 20}]));
    assert!(!list.activate(true).await);

    let errors = list.state().errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].which, "2");
    assert_eq!(errors[0].error, json!("too big"));
    assert!(errors[0].is_coll);
}

#[tokio::test]
async fn test_group_activation_awaits_every_child() {
    setup();
    let queue = Arc::new(Mutex::new(VecDeque::new()));
    let (tx_first, rx) = oneshot::channel();
    queue.lock().push_back(rx);
    let (tx_second, rx) = oneshot::channel();
    queue.lock().push_back(rx);

    let list = GroupNode::build(
        json!([1, 2]),
        NodeConfig::new().with_spec(Spec::spread(queued_spec(&queue))),
    )
    .unwrap();
    let activation = tokio::spawn(list.activate(true));
    assert!(list.state().validating);

    let _ = tx_first.send(Verdict::invalid("first"));
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert!(!activation.is_finished());

    let _ = tx_second.send(Verdict::Valid);
    assert!(!activation.await.unwrap());
    let state = list.state();
    assert!(!state.validating);
    assert_eq!(which(&state).len(), 1);
}

#[test]
fn test_list_rekeys_positionally() {
    setup();
    let list = GroupNode::build(
        json!(["a", "b", "c"]),
        NodeConfig::new().with_child_ids(|v, _| NodeId::from(v.and_then(Value::as_str).unwrap_or_default())),
    )
    .unwrap();

    list.remove(&[NodeId::from("a")]);
    let keys: Vec<_> = list.children().into_iter().map(|(key, node)| (key, node.id())).collect();
    assert_eq!(
        keys,
        vec![(Key::Index(0), NodeId::from("b")), (Key::Index(1), NodeId::from("c"))]
    );
    assert_eq!(list.child(&[Key::Index(0)]).map(|n| n.value()), Some(Some(json!("b"))));
}

#[test]
fn test_field_set_with_activate_validates_new_value() {
    setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let field = FieldNode::build(json!("ok"), NodeConfig::new().with_spec(counting_spec(&calls))).unwrap();
    assert_eq!(field.state().active, Some(false));

    field.set_with(json!("bad"), SetOptions::activate());
    let state = field.state();
    assert_eq!(state.active, Some(true));
    assert!(!state.valid);
    assert_eq!(state.error, Some(json!("bad value")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_group_set_with_activate_reaches_every_child() {
    setup();
    let form = GroupNode::build(
        json!({"name": "ada", "email": ""}),
        NodeConfig::new().with_required(Outline::flags(["name", "email"])),
    )
    .unwrap();
    assert!(form.state().valid);

    form.set_with(json!({"name": ""}), SetOptions::partial().and_activate());
    let state = form.state();
    assert_eq!(state.active, Some(true));
    assert!(!state.valid);
    assert_eq!(which(&state), vec!["name", "email"]);
    assert_eq!(form.value(), Some(json!({"name": "", "email": ""})));
}

#[test]
fn test_index_declarations_apply_to_object_groups() {
    setup();
    let positive = Spec::check(|v| {
        Verdict::check(v.and_then(Value::as_i64).is_some_and(|n| n > 0), "not positive")
    });
    let form = GroupNode::build(
        json!({"0": -5}),
        NodeConfig::new().with_spec(Spec::fields([(0usize, positive)])),
    )
    .unwrap();

    let _ = form.activate(true);
    let state = form.state();
    assert!(!state.valid);
    assert_eq!(state.errors().len(), 1);
    assert_eq!(state.errors()[0].error, json!("not positive"));
}
