use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use sinew::{
    Collection, CollectionConfig, CollectionEvent, Comparator, Changes, Model, SetModelsOptions,
};

fn collection(ids: &[i64]) -> Collection {
    let _ = env_logger::builder().is_test(true).try_init();
    let inputs = ids.iter().map(|id| json!({ "id": id }).into()).collect();
    Collection::with_models(inputs, CollectionConfig::default())
}

type Log = Arc<Mutex<Vec<String>>>;

fn record(col: &Collection) -> Log {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    for event in ["add", "remove", "update", "sort", "reset"] {
        let log = Arc::clone(&log);
        col.on(event, move |payload: &CollectionEvent| {
            let line = match payload {
                CollectionEvent::Add { model, index, .. } => format!(
                    "add {} @{}",
                    model.get("id").unwrap_or(Value::Null),
                    index.map_or("-".to_string(), |i| i.to_string())
                ),
                CollectionEvent::Remove { model, index, .. } => format!(
                    "remove {} @{}",
                    model.get("id").unwrap_or(Value::Null),
                    index
                ),
                CollectionEvent::Update { changes, .. } => format!(
                    "update +{} -{} ~{}",
                    changes.added.len(),
                    changes.removed.len(),
                    changes.merged.len()
                ),
                CollectionEvent::Sort { .. } => "sort".to_string(),
                CollectionEvent::Reset { .. } => "reset".to_string(),
            };
            log.lock().unwrap().push(line);
        });
    }
    log
}

fn lines(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn last_changes(col: &Collection) -> Arc<Mutex<Option<Changes>>> {
    let slot: Arc<Mutex<Option<Changes>>> = Arc::new(Mutex::new(None));
    {
        let slot = Arc::clone(&slot);
        col.on("update", move |payload: &CollectionEvent| {
            if let CollectionEvent::Update { changes, .. } = payload {
                *slot.lock().unwrap() = Some(changes.clone());
            }
        });
    }
    slot
}

#[test]
fn set_preserves_target_order() {
    let col = Collection::new(CollectionConfig::default());
    col.set(
        Some(vec![
            json!({ "id": "a" }).into(),
            json!({ "id": "b" }).into(),
            json!({ "id": "c" }).into(),
        ]),
        &SetModelsOptions::default(),
    );
    assert_eq!(col.pluck("id"), vec![json!("a"), json!("b"), json!("c")]);
}

#[test]
fn set_on_empty_fires_one_update_with_two_added() {
    let col = Collection::new(CollectionConfig::default());
    let changes = last_changes(&col);
    let updates = Arc::new(Mutex::new(0));
    {
        let updates = Arc::clone(&updates);
        col.on("update", move |_| *updates.lock().unwrap() += 1);
    }

    col.set(
        Some(vec![json!({ "id": 1 }).into(), json!({ "id": 2 }).into()]),
        &SetModelsOptions::default(),
    );

    assert_eq!(*updates.lock().unwrap(), 1);
    let changes = changes.lock().unwrap().clone().unwrap();
    assert_eq!(changes.added.len(), 2);
    assert_eq!(changes.removed.len(), 0);
    assert_eq!(changes.merged.len(), 0);
}

#[test]
fn set_empty_removes_everything() {
    let col = collection(&[1]);
    let changes = last_changes(&col);

    col.set(Some(vec![]), &SetModelsOptions::default());

    assert!(col.is_empty());
    let changes = changes.lock().unwrap().clone().unwrap();
    assert_eq!(changes.removed.len(), 1);
    assert!(changes.added.is_empty());
}

#[test]
fn resetting_the_same_members_fires_nothing() {
    let col = collection(&[1, 2, 3]);
    let members = col.models();
    let log = record(&col);

    col.set(
        Some(members.iter().map(Into::into).collect()),
        &SetModelsOptions::default(),
    );

    assert_eq!(col.models(), members);
    assert!(lines(&log).is_empty());
}

#[test]
fn same_instance_unchanged_fires_no_events() {
    let col = Collection::new(CollectionConfig::default());
    let member = col.add(json!({ "id": 1 }), &sinew::AddOptions::default());
    let log = record(&col);
    let model_changes = Arc::new(Mutex::new(0));
    {
        let model_changes = Arc::clone(&model_changes);
        member.on("change", move |_| *model_changes.lock().unwrap() += 1);
    }

    col.set(Some(vec![(&member).into()]), &SetModelsOptions::default());

    assert!(lines(&log).is_empty());
    assert_eq!(*model_changes.lock().unwrap(), 0);
}

#[test]
fn mixed_set_partitions_the_update() {
    let col = collection(&[1, 2, 3]);
    let log = record(&col);
    let changes = last_changes(&col);

    col.set(
        Some(vec![
            json!({ "id": 2, "a": 1 }).into(),
            json!({ "id": 4 }).into(),
        ]),
        &SetModelsOptions::default(),
    );

    assert_eq!(col.pluck("id"), vec![json!(2), json!(4)]);
    let changes = changes.lock().unwrap().clone().unwrap();
    assert_eq!(changes.added.len(), 1);
    assert_eq!(changes.removed.len(), 2);
    assert_eq!(changes.merged.len(), 1);

    // the three sets are disjoint
    let mut all: Vec<&Model> = Vec::new();
    all.extend(&changes.added);
    all.extend(&changes.removed);
    all.extend(&changes.merged);
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            assert_ne!(a, b);
        }
    }

    // removals first, then adds, then the reorder, then the aggregate
    assert_eq!(
        lines(&log),
        vec![
            "remove 1 @0",
            "remove 3 @1",
            "add 4 @-",
            "sort",
            "update +1 -2 ~1"
        ]
    );
}

#[test]
fn merge_false_leaves_attributes_alone() {
    let col = collection(&[1]);
    let member = col.at(0).unwrap();

    col.set(
        Some(vec![json!({ "id": 1, "a": 9 }).into()]),
        &SetModelsOptions {
            merge: false,
            ..SetModelsOptions::default()
        },
    );

    assert_eq!(member.get("a"), None);
    assert_eq!(col.len(), 1);
}

#[test]
fn remove_false_keeps_unmatched_members_in_prior_order() {
    let col = collection(&[1, 2, 3]);
    let log = record(&col);

    col.set(
        Some(vec![json!({ "id": 2 }).into(), json!({ "id": 4 }).into()]),
        &SetModelsOptions {
            remove: false,
            ..SetModelsOptions::default()
        },
    );

    assert_eq!(
        col.pluck("id"),
        vec![json!(1), json!(2), json!(3), json!(4)]
    );
    assert_eq!(lines(&log), vec!["add 4 @-", "update +1 -0 ~0"]);
}

#[test]
fn set_reorders_to_target_order_and_announces_it() {
    let col = collection(&[1, 2, 3]);
    let log = record(&col);

    col.set(
        Some(vec![
            json!({ "id": 3 }).into(),
            json!({ "id": 2 }).into(),
            json!({ "id": 1 }).into(),
        ]),
        &SetModelsOptions::default(),
    );

    assert_eq!(col.pluck("id"), vec![json!(3), json!(2), json!(1)]);
    assert_eq!(lines(&log), vec!["sort"]);
}

#[test]
fn set_with_at_splices_new_models_in_place() {
    let col = collection(&[1, 2, 3]);
    let log = record(&col);

    col.set(
        Some(vec![json!({ "id": 8 }).into(), json!({ "id": 9 }).into()]),
        &SetModelsOptions {
            remove: false,
            at: Some(1),
            ..SetModelsOptions::default()
        },
    );

    assert_eq!(
        col.pluck("id"),
        vec![json!(1), json!(8), json!(9), json!(2), json!(3)]
    );
    assert_eq!(
        lines(&log),
        vec!["add 8 @1", "add 9 @2", "update +2 -0 ~0"]
    );
}

#[test]
fn comparator_orders_the_final_membership() {
    let config = CollectionConfig::with_comparator(Comparator::attribute("id"));
    let col = Collection::new(config);
    let log = record(&col);

    col.set(
        Some(vec![json!({ "id": 2 }).into(), json!({ "id": 1 }).into()]),
        &SetModelsOptions::default(),
    );

    assert_eq!(col.pluck("id"), vec![json!(1), json!(2)]);
    let logged = lines(&log);
    assert_eq!(logged.iter().filter(|l| *l == "sort").count(), 1);
    assert_eq!(logged.last().unwrap(), "update +2 -0 ~0");
}

#[test]
fn merge_that_moves_a_member_resorts() {
    let config = CollectionConfig::with_comparator(Comparator::attribute("rank"));
    let col = Collection::with_models(
        vec![
            json!({ "id": "a", "rank": 1 }).into(),
            json!({ "id": "b", "rank": 2 }).into(),
        ],
        config,
    );
    let log = record(&col);

    col.set(
        Some(vec![json!({ "id": "a", "rank": 3 }).into()]),
        &SetModelsOptions {
            remove: false,
            ..SetModelsOptions::default()
        },
    );

    assert_eq!(col.pluck("id"), vec![json!("b"), json!("a")]);
    let logged = lines(&log);
    assert_eq!(logged.iter().filter(|l| *l == "sort").count(), 1);
    assert_eq!(logged.last().unwrap(), "update +0 -0 ~1");
}

#[test]
fn merge_that_reorders_keeps_the_event_sequence() {
    let config = CollectionConfig::with_comparator(Comparator::attribute("rank"));
    let col = Collection::with_models(
        vec![
            json!({ "id": 1, "rank": 1 }).into(),
            json!({ "id": 2, "rank": 2 }).into(),
        ],
        config,
    );
    let log = record(&col);

    col.set(
        Some(vec![
            json!({ "id": 1, "rank": 9 }).into(),
            json!({ "id": 3, "rank": 5 }).into(),
        ]),
        &SetModelsOptions::default(),
    );

    assert_eq!(col.pluck("id"), vec![json!(3), json!(1)]);
    // removes, then adds, then exactly one sort, then the aggregate,
    // even though the merge itself moved a member
    assert_eq!(
        lines(&log),
        vec!["remove 2 @1", "add 3 @0", "sort", "update +1 -1 ~1"]
    );
}

#[test]
fn merge_that_moves_nothing_stays_quiet_about_order() {
    let config = CollectionConfig::with_comparator(Comparator::attribute("rank"));
    let col = Collection::with_models(
        vec![
            json!({ "id": "a", "rank": 1, "label": "x" }).into(),
            json!({ "id": "b", "rank": 2 }).into(),
        ],
        config,
    );
    let log = record(&col);

    col.set(
        Some(vec![json!({ "id": "a", "label": "y" }).into()]),
        &SetModelsOptions {
            remove: false,
            ..SetModelsOptions::default()
        },
    );

    assert_eq!(col.pluck("id"), vec![json!("a"), json!("b")]);
    assert_eq!(lines(&log), vec!["update +0 -0 ~1"]);
}

#[test]
fn silent_set_fires_nothing_but_still_mutates() {
    let col = collection(&[1]);
    let log = record(&col);

    col.set(
        Some(vec![json!({ "id": 2 }).into()]),
        &SetModelsOptions {
            silent: true,
            ..SetModelsOptions::default()
        },
    );

    assert_eq!(col.pluck("id"), vec![json!(2)]);
    assert!(lines(&log).is_empty());
}

#[test]
fn merged_models_come_back_in_target_order() {
    let col = collection(&[1, 2]);
    let resolved = col.set(
        Some(vec![
            json!({ "id": 2 }).into(),
            json!({ "id": 1 }).into(),
            json!({ "id": 3 }).into(),
        ]),
        &SetModelsOptions::default(),
    );
    let ids: Vec<Value> = resolved.iter().map(|m| m.id().unwrap()).collect();
    assert_eq!(ids, vec![json!(2), json!(1), json!(3)]);
}
