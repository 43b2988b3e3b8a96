//! Conformance suite for [`Repository`] implementations.
//!
//! Each check takes a factory producing an empty repository and panics on the first
//! violated expectation, so backends can wire the suite into their own `#[test]`s:
//!
//! ```ignore
//! #[test]
//! fn passes_repository_lint() {
//!     eventline_infra::event_store::lint::run_all(|| MyRepository::connect_fresh());
//! }
//! ```
//!
//! Available outside this crate with the `lint` feature.

use std::sync::Barrier;
use std::thread;

use serde_json::json;

use eventline_core::{EventId, EventRecord, EventStoreError, ExpectedVersion, Stream};

use super::repository::Repository;
use crate::specification::Specification;

fn record(event_type: &str) -> EventRecord {
    EventRecord::new(event_type, json!({ "test": true }))
}

fn records(n: usize) -> Vec<EventRecord> {
    (0..n).map(|_| record("TestEvent")).collect()
}

fn ids(records: &[EventRecord]) -> Vec<EventId> {
    records.iter().map(EventRecord::event_id).collect()
}

fn stream(name: &str) -> Stream {
    Stream::new(name).expect("valid test stream name")
}

fn read_ids<R: Repository>(repo: &R, spec: &Specification) -> Vec<EventId> {
    ids(&repo.read(spec).expect("read succeeds"))
}

fn stream_spec(name: &str) -> Specification {
    Specification::new().in_stream(stream(name))
}

/// Run every check against fresh repositories from `factory`.
pub fn run_all<R, F>(factory: F)
where
    R: Repository,
    F: Fn() -> R,
{
    auto_appends_to_fresh_stream_are_dense(&factory());
    exact_version_must_match_last_position(&factory());
    none_requires_an_empty_stream(&factory());
    failed_appends_write_nothing(&factory());
    duplicate_in_stream_is_not_a_version_error(&factory());
    duplicate_within_batch_is_rejected(&factory());
    appending_an_existing_event_elsewhere_is_rejected(&factory());
    any_never_checks_versions(&factory());
    none_after_any_is_rejected(&factory());
    checked_versions_count_unpositioned_links(&factory());
    global_stream_only_accepts_any(&factory());
    linking_unknown_events_fails(&factory());
    linking_shares_events_between_streams(&factory());
    linking_into_global_stream_is_a_duplicate(&factory());
    delete_stream_keeps_events(&factory());
    forward_and_backward_reads_are_reversed(&factory());
    cursor_pagination(&factory());
    cursor_outside_scope_is_not_found(&factory());
    reads_filter_by_event_type(&factory());
    count_ignores_limit(&factory());
    empty_reads_are_not_errors(&factory());
    point_reads(&factory());
    global_positions_follow_append_order(&factory());
    global_positions_stay_ordered_after_failed_appends(&factory());
    streams_of_lists_named_streams(&factory());
    concurrent_none_appends_have_one_winner(&factory());
    concurrent_any_appends_all_succeed(&factory());
    scenario_order_lifecycle(&factory());
}

pub fn auto_appends_to_fresh_stream_are_dense<R: Repository>(repo: &R) {
    let batch = records(3);
    let expected = ids(&batch);
    repo.append_to_stream(batch, &stream("dense"), ExpectedVersion::Auto)
        .expect("auto append to fresh stream");
    let more = records(2);
    let more_ids = ids(&more);
    repo.append_to_stream(more, &stream("dense"), ExpectedVersion::Auto)
        .expect("second auto append");

    for (position, id) in expected.iter().chain(&more_ids).enumerate() {
        assert_eq!(
            repo.position_in_stream(*id, &stream("dense")).unwrap(),
            Some(position as u64)
        );
    }
    assert_eq!(
        repo.last_stream_event(&stream("dense")).unwrap().map(|r| r.event_id()),
        more_ids.last().copied()
    );
}

pub fn exact_version_must_match_last_position<R: Repository>(repo: &R) {
    let s = stream("exact");
    repo.append_to_stream(records(2), &s, ExpectedVersion::NoStream).unwrap();

    for wrong in [0, 2, 7] {
        assert!(matches!(
            repo.append_to_stream(records(1), &s, ExpectedVersion::Exact(wrong)),
            Err(EventStoreError::WrongExpectedVersion(_))
        ));
    }
    repo.append_to_stream(records(1), &s, ExpectedVersion::Exact(1))
        .expect("exact(1) after two events");
    assert_eq!(repo.count(&stream_spec("exact")).unwrap(), 3);
}

pub fn none_requires_an_empty_stream<R: Repository>(repo: &R) {
    let s = stream("none");
    repo.append_to_stream(records(1), &s, ExpectedVersion::NoStream).unwrap();
    assert!(matches!(
        repo.append_to_stream(records(1), &s, ExpectedVersion::NoStream),
        Err(EventStoreError::WrongExpectedVersion(_))
    ));
}

pub fn failed_appends_write_nothing<R: Repository>(repo: &R) {
    let s = stream("atomic");
    repo.append_to_stream(records(1), &s, ExpectedVersion::NoStream).unwrap();

    let rejected = records(3);
    let rejected_ids = ids(&rejected);
    assert!(
        repo.append_to_stream(rejected, &s, ExpectedVersion::Exact(5))
            .is_err()
    );
    for id in rejected_ids {
        assert!(!repo.has_event(id).unwrap());
    }
    assert_eq!(repo.count(&Specification::new()).unwrap(), 1);
}

pub fn duplicate_in_stream_is_not_a_version_error<R: Repository>(repo: &R) {
    let s = stream("dup");
    let event = record("TestEvent");
    repo.append_to_stream(vec![event.clone()], &s, ExpectedVersion::Any)
        .unwrap();

    let err = repo
        .append_to_stream(vec![event.clone()], &s, ExpectedVersion::Any)
        .unwrap_err();
    assert!(matches!(err, EventStoreError::EventDuplicatedInStream { .. }));

    let err = repo
        .link_to_stream(&[event.event_id()], &s, ExpectedVersion::Any)
        .unwrap_err();
    assert!(matches!(err, EventStoreError::EventDuplicatedInStream { .. }));

    // The global stream still holds exactly one copy.
    assert_eq!(read_ids(repo, &Specification::new()), vec![event.event_id()]);
}

pub fn duplicate_within_batch_is_rejected<R: Repository>(repo: &R) {
    let event = record("TestEvent");
    let err = repo
        .append_to_stream(
            vec![event.clone(), event.clone()],
            &stream("batch"),
            ExpectedVersion::Any,
        )
        .unwrap_err();
    assert!(matches!(err, EventStoreError::EventDuplicatedInStream { .. }));
    assert!(!repo.has_event(event.event_id()).unwrap());
}

pub fn appending_an_existing_event_elsewhere_is_rejected<R: Repository>(repo: &R) {
    let event = record("TestEvent");
    repo.append_to_stream(vec![event.clone()], &stream("first"), ExpectedVersion::Any)
        .unwrap();
    let err = repo
        .append_to_stream(vec![event], &stream("second"), ExpectedVersion::Any)
        .unwrap_err();
    assert!(matches!(err, EventStoreError::EventDuplicatedInStream { .. }));
}

pub fn any_never_checks_versions<R: Repository>(repo: &R) {
    let s = stream("any");
    for _ in 0..3 {
        repo.append_to_stream(records(2), &s, ExpectedVersion::Any).unwrap();
    }
    assert_eq!(repo.count(&stream_spec("any")).unwrap(), 6);
}

pub fn none_after_any_is_rejected<R: Repository>(repo: &R) {
    let s = stream("loose");
    repo.append_to_stream(records(1), &s, ExpectedVersion::Any).unwrap();

    let err = repo
        .append_to_stream(records(1), &s, ExpectedVersion::NoStream)
        .unwrap_err();
    assert!(matches!(err, EventStoreError::WrongExpectedVersion(_)));
    assert_eq!(repo.count(&stream_spec("loose")).unwrap(), 1);
}

pub fn checked_versions_count_unpositioned_links<R: Repository>(repo: &R) {
    let s = stream("mixed");
    repo.append_to_stream(records(2), &s, ExpectedVersion::Any).unwrap();

    let next = record("TestEvent");
    repo.append_to_stream(vec![next.clone()], &s, ExpectedVersion::Auto)
        .expect("auto after any");
    assert_eq!(repo.position_in_stream(next.event_id(), &s).unwrap(), Some(2));

    let err = repo
        .append_to_stream(records(1), &s, ExpectedVersion::Exact(1))
        .unwrap_err();
    assert!(matches!(err, EventStoreError::WrongExpectedVersion(_)));
    repo.append_to_stream(records(1), &s, ExpectedVersion::Exact(2))
        .expect("exact(2) after three links");
    assert_eq!(repo.count(&stream_spec("mixed")).unwrap(), 4);
}

pub fn global_stream_only_accepts_any<R: Repository>(repo: &R) {
    let batch = records(2);
    let expected = ids(&batch);
    repo.append_to_stream(batch, &Stream::Global, ExpectedVersion::Any)
        .unwrap();
    assert_eq!(read_ids(repo, &Specification::new()), expected);

    for version in [ExpectedVersion::Auto, ExpectedVersion::NoStream, ExpectedVersion::Exact(1)] {
        assert!(matches!(
            repo.append_to_stream(records(1), &Stream::Global, version),
            Err(EventStoreError::InvalidExpectedVersion(_))
        ));
    }
}

pub fn linking_unknown_events_fails<R: Repository>(repo: &R) {
    let missing = EventId::new();
    assert_eq!(
        repo.link_to_stream(&[missing], &stream("link"), ExpectedVersion::Any),
        Err(EventStoreError::EventNotFound(missing))
    );
}

pub fn linking_shares_events_between_streams<R: Repository>(repo: &R) {
    let batch = records(2);
    let linked = ids(&batch);
    repo.append_to_stream(batch, &stream("source"), ExpectedVersion::NoStream)
        .unwrap();
    repo.link_to_stream(&linked, &stream("target"), ExpectedVersion::NoStream)
        .unwrap();

    assert_eq!(read_ids(repo, &stream_spec("target")), linked);
    assert_eq!(read_ids(repo, &Specification::new()), linked);
    assert!(matches!(
        repo.link_to_stream(&linked[..1], &stream("target"), ExpectedVersion::NoStream),
        Err(EventStoreError::WrongExpectedVersion(_))
    ));
    repo.link_to_stream(&linked[..1], &stream("other"), ExpectedVersion::Auto)
        .unwrap();
    assert_eq!(
        repo.position_in_stream(linked[0], &stream("other")).unwrap(),
        Some(0)
    );
}

pub fn linking_into_global_stream_is_a_duplicate<R: Repository>(repo: &R) {
    let event = record("TestEvent");
    repo.append_to_stream(vec![event.clone()], &stream("s"), ExpectedVersion::Any)
        .unwrap();
    assert!(matches!(
        repo.link_to_stream(&[event.event_id()], &Stream::Global, ExpectedVersion::Any),
        Err(EventStoreError::EventDuplicatedInStream { .. })
    ));
}

pub fn delete_stream_keeps_events<R: Repository>(repo: &R) {
    let batch = records(2);
    let expected = ids(&batch);
    let s = stream("doomed");
    repo.append_to_stream(batch, &s, ExpectedVersion::NoStream).unwrap();
    repo.delete_stream(&s).unwrap();

    assert!(read_ids(repo, &stream_spec("doomed")).is_empty());
    assert_eq!(read_ids(repo, &Specification::new()), expected);
    assert!(repo.streams_of(expected[0]).unwrap().is_empty());
    repo.append_to_stream(records(1), &s, ExpectedVersion::NoStream)
        .expect("a deleted stream no longer exists");
}

pub fn forward_and_backward_reads_are_reversed<R: Repository>(repo: &R) {
    let batch = records(5);
    let expected = ids(&batch);
    repo.append_to_stream(batch, &stream("dir"), ExpectedVersion::Auto)
        .unwrap();

    let forward = read_ids(repo, &stream_spec("dir").forward());
    let mut backward = read_ids(repo, &stream_spec("dir").backward());
    assert_eq!(forward, expected);
    backward.reverse();
    assert_eq!(backward, expected);

    let mut global_backward = read_ids(repo, &Specification::new().backward());
    global_backward.reverse();
    assert_eq!(global_backward, read_ids(repo, &Specification::new()));
}

pub fn cursor_pagination<R: Repository>(repo: &R) {
    let batch = records(5);
    let all = ids(&batch);
    repo.append_to_stream(batch, &stream("pages"), ExpectedVersion::Auto)
        .unwrap();

    let page = |spec: Specification| read_ids(repo, &spec.limit(2).expect("non-zero limit"));

    assert_eq!(page(stream_spec("pages")), all[0..2]);
    assert_eq!(page(stream_spec("pages").from(all[1])), all[2..4]);
    assert_eq!(page(stream_spec("pages").from(all[3])), all[4..]);
    assert!(page(stream_spec("pages").from(all[4])).is_empty());

    assert_eq!(page(stream_spec("pages").backward()), vec![all[4], all[3]]);
    assert_eq!(
        page(stream_spec("pages").backward().from(all[3])),
        vec![all[2], all[1]]
    );
    assert_eq!(
        page(Specification::new().backward().from(all[1])),
        vec![all[0]]
    );
}

pub fn cursor_outside_scope_is_not_found<R: Repository>(repo: &R) {
    let outside = record("TestEvent");
    repo.append_to_stream(vec![outside.clone()], &stream("elsewhere"), ExpectedVersion::Any)
        .unwrap();
    repo.append_to_stream(records(1), &stream("scope"), ExpectedVersion::Any)
        .unwrap();

    assert_eq!(
        repo.read(&stream_spec("scope").from(outside.event_id())),
        Err(EventStoreError::EventNotFound(outside.event_id()))
    );
    let unknown = EventId::new();
    assert_eq!(
        repo.read(&Specification::new().from(unknown)),
        Err(EventStoreError::EventNotFound(unknown))
    );
}

pub fn reads_filter_by_event_type<R: Repository>(repo: &R) {
    let created = record("OrderCreated");
    let expired = record("OrderExpired");
    let paid = record("OrderPaid");
    repo.append_to_stream(
        vec![created.clone(), expired.clone(), paid.clone()],
        &stream("typed"),
        ExpectedVersion::Auto,
    )
    .unwrap();

    let spec = stream_spec("typed").of_type(["OrderCreated", "OrderPaid"]);
    assert_eq!(read_ids(repo, &spec), vec![created.event_id(), paid.event_id()]);
    assert_eq!(
        read_ids(repo, &spec.clone().limit(1).unwrap().backward()),
        vec![paid.event_id()]
    );
    assert_eq!(repo.count(&spec).unwrap(), 2);

    // The cursor only has to be in the stream, not pass the filter.
    let after_expired = spec.clone().from(expired.event_id());
    assert_eq!(read_ids(repo, &after_expired), vec![paid.event_id()]);
}

pub fn count_ignores_limit<R: Repository>(repo: &R) {
    repo.append_to_stream(records(4), &stream("counted"), ExpectedVersion::Auto)
        .unwrap();
    let spec = stream_spec("counted").limit(1).unwrap();
    assert_eq!(repo.count(&spec).unwrap(), 4);
    assert_eq!(repo.read(&spec).unwrap().len(), 1);
}

pub fn empty_reads_are_not_errors<R: Repository>(repo: &R) {
    assert!(repo.read(&Specification::new()).unwrap().is_empty());
    assert!(repo.read(&stream_spec("nothing").backward()).unwrap().is_empty());
    assert_eq!(repo.count(&stream_spec("nothing")).unwrap(), 0);
    assert_eq!(repo.last_stream_event(&stream("nothing")).unwrap(), None);
}

pub fn point_reads<R: Repository>(repo: &R) {
    let event = record("OrderCreated");
    repo.append_to_stream(vec![event.clone()], &stream("points"), ExpectedVersion::Any)
        .unwrap();

    assert!(repo.has_event(event.event_id()).unwrap());
    let read = repo.read_event(event.event_id()).unwrap();
    assert_eq!(read, event);
    assert_eq!(read.data(), event.data());

    let missing = EventId::new();
    assert!(!repo.has_event(missing).unwrap());
    assert_eq!(repo.read_event(missing), Err(EventStoreError::EventNotFound(missing)));
    assert_eq!(
        repo.global_position(missing),
        Err(EventStoreError::EventNotFound(missing))
    );
    assert_eq!(
        repo.position_in_stream(event.event_id(), &stream("elsewhere")),
        Err(EventStoreError::EventNotFound(event.event_id()))
    );
}

pub fn global_positions_follow_append_order<R: Repository>(repo: &R) {
    let first = records(2);
    let second = records(1);
    let order: Vec<EventId> = ids(&first).into_iter().chain(ids(&second)).collect();
    repo.append_to_stream(first, &stream("a"), ExpectedVersion::Any).unwrap();
    repo.append_to_stream(second, &stream("b"), ExpectedVersion::Any).unwrap();

    let positions: Vec<u64> = order
        .iter()
        .map(|id| repo.global_position(*id).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(read_ids(repo, &Specification::new()), order);
}

pub fn global_positions_stay_ordered_after_failed_appends<R: Repository>(repo: &R) {
    let s = stream("gapped");
    let before = record("TestEvent");
    repo.append_to_stream(vec![before.clone()], &s, ExpectedVersion::NoStream)
        .unwrap();
    repo.append_to_stream(records(2), &s, ExpectedVersion::NoStream)
        .unwrap_err();
    let after = record("TestEvent");
    repo.append_to_stream(vec![after.clone()], &s, ExpectedVersion::Auto)
        .unwrap();

    assert!(
        repo.global_position(before.event_id()).unwrap()
            < repo.global_position(after.event_id()).unwrap()
    );
    assert_eq!(
        read_ids(repo, &Specification::new()),
        vec![before.event_id(), after.event_id()]
    );
}

pub fn streams_of_lists_named_streams<R: Repository>(repo: &R) {
    let event = record("TestEvent");
    repo.append_to_stream(vec![event.clone()], &stream("alpha"), ExpectedVersion::Any)
        .unwrap();
    repo.link_to_stream(&[event.event_id()], &stream("beta"), ExpectedVersion::Any)
        .unwrap();

    let mut names: Vec<String> = repo
        .streams_of(event.event_id())
        .unwrap()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
}

pub fn concurrent_none_appends_have_one_winner<R: Repository>(repo: &R) {
    let workers = 4;
    let barrier = Barrier::new(workers);
    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    repo.append_to_stream(records(1), &stream("race"), ExpectedVersion::NoStream)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("writer thread"))
            .collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EventStoreError::WrongExpectedVersion(_)))
    );
    assert_eq!(repo.count(&stream_spec("race")).unwrap(), 1);
}

pub fn concurrent_any_appends_all_succeed<R: Repository>(repo: &R) {
    let workers = 4;
    let barrier = Barrier::new(workers);
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                barrier.wait();
                repo.append_to_stream(records(2), &stream("crowd"), ExpectedVersion::Any)
                    .expect("any never conflicts");
            });
        }
    });
    assert_eq!(repo.count(&stream_spec("crowd")).unwrap(), workers * 2);
}

pub fn scenario_order_lifecycle<R: Repository>(repo: &R) {
    let order = stream("Order-1");
    let created = record("OrderCreated");
    let expired = record("OrderExpired");
    repo.append_to_stream(vec![created.clone()], &order, ExpectedVersion::Auto)
        .unwrap();
    repo.append_to_stream(vec![expired.clone()], &order, ExpectedVersion::Auto)
        .unwrap();

    let expected = vec![created.event_id(), expired.event_id()];
    assert_eq!(read_ids(repo, &stream_spec("Order-1").forward()), expected);
    assert_eq!(read_ids(repo, &Specification::new()), expected);
}
