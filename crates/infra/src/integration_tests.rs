//! Integration tests for the full pipeline.
//!
//! Tests: Client → Repository → Broker → Subscriber, and Subscriber → Outbox → Queue
//!
//! Verifies:
//! - Published events are readable in every stream they belong to and reach their subscribers
//! - Concurrent writers with checked versions get exactly one winner
//! - Context subscriptions stay on their context
//! - Correlated events are linked into their own stream and can be projected from it
//! - The outbox relays committed payloads exactly once and isolates bad rows

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;

    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use eventline_core::{
        Event, EventId, EventRecord, EventStoreError, ExpectedVersion, Metadata, Stream,
    };
    use eventline_events::{Handler, SubscriptionContext};

    use crate::client::Client;
    use crate::clock::TickingClock;
    use crate::event_store::InMemoryRepository;
    use crate::outbox::{
        Consumer, ConsumerConfig, InMemoryOutboxStore, InMemoryQueue, SIDEKIQ5_FORMAT,
    };
    use crate::link_by_metadata::LinkByMetadata;
    use crate::page::{PageLink, PagePosition};
    use crate::projection::Projection;
    use crate::specification::Direction;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct OrderPlaced {
        order_id: String,
        amount: u64,
    }

    impl Event for OrderPlaced {
        fn event_type(&self) -> &'static str {
            "OrderPlaced"
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct OrderPaid {
        order_id: String,
    }

    impl Event for OrderPaid {
        fn event_type(&self) -> &'static str {
            "OrderPaid"
        }
    }

    fn client() -> Client<Arc<InMemoryRepository>> {
        let start = Utc.with_ymd_and_hms(2019, 9, 30, 0, 0, 0).unwrap();
        Client::new(Arc::new(InMemoryRepository::new()))
            .with_clock(TickingClock::new(start, chrono::Duration::seconds(1)))
    }

    fn stream(name: &str) -> Stream {
        Stream::new(name).unwrap()
    }

    fn placed(order_id: &str, amount: u64) -> EventRecord {
        EventRecord::from_typed(&OrderPlaced {
            order_id: order_id.to_string(),
            amount,
        })
        .unwrap()
    }

    fn paid(order_id: &str) -> EventRecord {
        EventRecord::from_typed(&OrderPaid {
            order_id: order_id.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn order_lifecycle_is_projected_and_readable() {
        let client = client();

        // Read model: outstanding amount per order.
        let outstanding: Arc<Mutex<HashMap<String, u64>>> = Arc::default();
        let model = Arc::clone(&outstanding);
        client
            .subscribe(
                Handler::from_fn(move |record| {
                    let mut model = model.lock().unwrap();
                    match record.event_type() {
                        "OrderPlaced" => {
                            let event: OrderPlaced = record.decode()?;
                            model.insert(event.order_id, event.amount);
                        }
                        "OrderPaid" => {
                            let event: OrderPaid = record.decode()?;
                            model.insert(event.order_id, 0);
                        }
                        _ => {}
                    }
                    Ok(())
                }),
                ["OrderPlaced", "OrderPaid"],
            )
            .unwrap();

        let order = stream("Order-1");
        let first = placed("Order-1", 250);
        let second = paid("Order-1");

        client
            .publish(vec![first.clone()], &order, ExpectedVersion::NoStream)
            .unwrap();
        assert_eq!(outstanding.lock().unwrap()["Order-1"], 250);

        client
            .publish(vec![second.clone()], &order, ExpectedVersion::Exact(0))
            .unwrap();
        assert_eq!(outstanding.lock().unwrap()["Order-1"], 0);

        // Stale writer.
        let err = client
            .publish(vec![paid("Order-1")], &order, ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::WrongExpectedVersion(_)));

        let forward = client.read().in_stream(order.clone()).to_vec().unwrap();
        assert_eq!(forward, vec![first.clone(), second.clone()]);
        let backward = client
            .read()
            .in_stream(order.clone())
            .backward()
            .to_vec()
            .unwrap();
        assert_eq!(backward, vec![second.clone(), first.clone()]);

        assert_eq!(client.position_in_stream(second.event_id(), &order).unwrap(), Some(1));
        assert_eq!(client.global_position(second.event_id()).unwrap(), 1);

        // Timestamps come from the injected clock, one tick per stored event.
        let stored = client.read_event(second.event_id()).unwrap();
        assert_eq!(
            stored.metadata().timestamp(),
            Some(Utc.with_ymd_and_hms(2019, 9, 30, 0, 0, 1).unwrap())
        );
    }

    #[test]
    fn linking_builds_secondary_streams() {
        let client = client();
        let order = stream("Order-1");
        let customer = stream("Customer-7");
        let events = vec![placed("Order-1", 10), paid("Order-1")];
        let ids: Vec<EventId> = events.iter().map(EventRecord::event_id).collect();

        client
            .publish(events.clone(), &order, ExpectedVersion::Auto)
            .unwrap();
        client
            .link(&ids, &customer, ExpectedVersion::NoStream)
            .unwrap();

        assert_eq!(
            client.read().in_stream(customer.clone()).to_vec().unwrap(),
            events
        );
        assert_eq!(
            client.streams_of(ids[0]).unwrap(),
            vec![customer.clone(), order.clone()]
        );

        client.delete_stream(&order).unwrap();
        assert!(client.read().in_stream(order.clone()).to_vec().unwrap().is_empty());
        assert_eq!(client.read().count().unwrap(), 2);
        assert_eq!(client.streams_of(ids[0]).unwrap(), vec![customer]);
    }

    #[test]
    fn correlated_events_are_projected_from_their_link_stream() {
        let client = client();
        let linker = LinkByMetadata::correlation_id(Arc::clone(client.repository()));
        let _ = client.subscribe_to_all_events(Handler::new(linker)).unwrap();

        let first = placed("Order-1", 40);
        client
            .publish(vec![first.clone()], &stream("Order-1"), ExpectedVersion::Auto)
            .unwrap();

        let mut metadata = Metadata::new();
        metadata.correlate_with(&first);
        let follow_up = placed("Order-1", 2).with_metadata(metadata);
        client
            .publish(
                vec![follow_up.clone(), placed("Order-2", 1000)],
                &stream("Order-1"),
                ExpectedVersion::Auto,
            )
            .unwrap();

        let by_correlation = format!("$by_correlation_id_{}", first.event_id());
        let total = Projection::from_stream([by_correlation.as_str()])
            .unwrap()
            .init(|| 0_u64)
            .when("OrderPlaced", |total, e| {
                *total += e.decode::<OrderPlaced>().unwrap().amount
            })
            .run(client.repository())
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(
            client.streams_of(follow_up.event_id()).unwrap(),
            vec![stream(&by_correlation), stream("Order-1")]
        );
    }

    #[test]
    fn concurrent_publishers_have_one_winner() {
        let client = Arc::new(client());
        let notified: Arc<Mutex<Vec<EventId>>> = Arc::default();
        let sink = Arc::clone(&notified);
        client
            .subscribe_to_all_events(Handler::from_fn(move |record| {
                sink.lock().unwrap().push(record.event_id());
                Ok(())
            }))
            .unwrap();

        let writers = 8;
        let barrier = Arc::new(Barrier::new(writers));
        let outcomes: Vec<(EventId, bool)> = (0..writers)
            .map(|n| {
                let client = Arc::clone(&client);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let event = placed("Order-1", n as u64);
                    let id = event.event_id();
                    barrier.wait();
                    let ok = client
                        .publish(vec![event], &stream("Order-1"), ExpectedVersion::NoStream)
                        .is_ok();
                    (id, ok)
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        let winners: Vec<EventId> = outcomes
            .iter()
            .filter(|(_, ok)| *ok)
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(*notified.lock().unwrap(), winners);
        assert_eq!(client.read().stream("Order-1").unwrap().count().unwrap(), 1);
    }

    #[test]
    fn context_subscribers_only_see_their_own_publications() {
        let client = Arc::new(client());
        let context = SubscriptionContext::new();
        let seen: Arc<Mutex<Vec<EventId>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let revocation = context
            .subscribe_to_all_events(Handler::from_fn(move |record| {
                sink.lock().unwrap().push(record.event_id());
                Ok(())
            }))
            .unwrap();

        // Another thread publishing without the context.
        let other = {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                client
                    .publish(vec![placed("Order-2", 5)], &stream("Order-2"), ExpectedVersion::Any)
                    .unwrap();
            })
        };
        other.join().unwrap();
        assert!(seen.lock().unwrap().is_empty());

        // The context travels to the worker explicitly.
        let mine = placed("Order-1", 5);
        let id = mine.event_id();
        let worker = {
            let client = Arc::clone(&client);
            let context = context.clone();
            thread::spawn(move || {
                client
                    .publish_in(&context, vec![mine], &stream("Order-1"), ExpectedVersion::Any)
                    .unwrap();
            })
        };
        worker.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![id]);

        revocation.revoke();
        client
            .publish_in(&context, vec![placed("Order-1", 6)], &stream("Order-1"), ExpectedVersion::Any)
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn temporary_subscriptions_end_with_their_block() {
        let client = client();
        let context = SubscriptionContext::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&seen);

        let count = client
            .within(&context)
            .subscribe(
                Handler::from_fn(move |record| {
                    sink.lock().unwrap().push(record.event_type().to_string());
                    Ok(())
                }),
                ["OrderPaid"],
            )
            .call(|| {
                client
                    .publish_in(&context, vec![placed("Order-1", 1), paid("Order-1")], &stream("Order-1"), ExpectedVersion::Auto)
                    .unwrap();
                client.read().count().unwrap()
            })
            .unwrap();
        assert_eq!(count, 2);

        client
            .publish_in(&context, vec![paid("Order-1")], &stream("Order-1"), ExpectedVersion::Auto)
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["OrderPaid"]);
    }

    #[test]
    fn browsing_a_stream_page_by_page() {
        let client = client();
        let order = stream("Order-1");
        let events: Vec<EventRecord> = (0..5).map(|n| placed("Order-1", n)).collect();
        client
            .publish(events.clone(), &order, ExpectedVersion::Auto)
            .unwrap();

        // Newest first, two per page.
        let head = PageLink::new(order.clone(), PagePosition::Head, Direction::Backward, 2);
        let page = client.page(&head).unwrap();
        assert_eq!(page.events, vec![events[4].clone(), events[3].clone()]);
        assert!(page.links.prev.is_none());

        let next = page.links.next.clone().unwrap();
        let page = client.page(&next).unwrap();
        assert_eq!(page.events, vec![events[2].clone(), events[1].clone()]);
        assert!(page.links.prev.is_some());

        let last = page.links.last.clone().unwrap();
        let page = client.page(&last).unwrap();
        assert_eq!(page.events.last(), Some(&events[0]));
        assert!(page.links.next.is_none());
    }

    #[test]
    fn subscriber_writes_outbox_rows_that_the_consumer_relays() {
        let client = client();
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let queue = Arc::new(InMemoryQueue::new());

        // Payment confirmation jobs are scheduled through the outbox.
        let writer = Arc::clone(&outbox);
        client
            .subscribe(
                Handler::from_fn(move |record| {
                    let event: OrderPaid = record.decode()?;
                    let job = json!({
                        "class": "SendReceipt",
                        "queue": "mailers",
                        "args": [event.order_id],
                        "jid": record.event_id().to_string(),
                    });
                    writer.insert(Some("mailers"), SIDEKIQ5_FORMAT, job.to_string())?;
                    Ok(())
                }),
                ["OrderPaid"],
            )
            .unwrap();

        client
            .publish(vec![placed("Order-1", 10), paid("Order-1")], &stream("Order-1"), ExpectedVersion::Auto)
            .unwrap();
        client
            .publish(vec![placed("Order-2", 20), paid("Order-2")], &stream("Order-2"), ExpectedVersion::Auto)
            .unwrap();

        let consumer = Consumer::new(
            ConsumerConfig::default().with_split_keys(["mailers"]),
            Arc::clone(&outbox),
            Arc::clone(&queue),
        )
        .unwrap();
        consumer.init().unwrap();
        assert!(consumer.one_loop().unwrap());
        assert!(!consumer.one_loop().unwrap());

        let jobs: Vec<serde_json::Value> = queue
            .messages("queue:mailers")
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0]["args"], json!(["Order-1"]));
        assert_eq!(jobs[1]["args"], json!(["Order-2"]));
        assert!(jobs.iter().all(|job| job["enqueued_at"].is_f64()));
        assert_eq!(queue.known_queues(), vec!["mailers"]);
    }

    #[test]
    fn outbox_relays_valid_rows_once_and_keeps_bad_ones() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let valid = 5;
        let invalid = 3;

        for n in 0..valid {
            let job = json!({"class": "Job", "queue": "default", "args": [n]});
            outbox
                .insert(Some("default"), SIDEKIQ5_FORMAT, job.to_string())
                .unwrap();
        }
        let broken: Vec<i64> = (0..invalid)
            .map(|_| outbox.insert(Some("default"), SIDEKIQ5_FORMAT, "<<<").unwrap())
            .collect();

        let consumer = Consumer::new(ConsumerConfig::default(), Arc::clone(&outbox), Arc::clone(&queue))
            .unwrap()
            .with_clock(Arc::new(TickingClock::frozen(
                Utc.with_ymd_and_hms(2019, 9, 30, 0, 0, 0).unwrap(),
            )));

        assert!(consumer.one_loop().unwrap());
        let after_first = queue.snapshot();
        assert_eq!(after_first["queue:default"].len(), valid);

        // A second cycle finds only the broken rows and relays nothing new.
        assert!(!consumer.one_loop().unwrap());
        assert_eq!(queue.snapshot(), after_first);

        for id in broken {
            assert!(!outbox.get(id).unwrap().unwrap().is_enqueued());
        }
        let relayed = outbox
            .records()
            .unwrap()
            .into_iter()
            .filter(|record| record.is_enqueued())
            .count();
        assert_eq!(relayed, valid);
    }

    #[test]
    fn competing_consumers_never_relay_a_row_twice() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        for n in 0..50 {
            let job = json!({"class": "Job", "queue": "default", "args": [n]});
            outbox
                .insert(Some("default"), SIDEKIQ5_FORMAT, job.to_string())
                .unwrap();
        }

        let consumers: Vec<_> = (0..4)
            .map(|n| {
                Consumer::new(
                    ConsumerConfig::default()
                        .with_batch_size(5)
                        .with_name(format!("consumer-{n}")),
                    Arc::clone(&outbox),
                    Arc::clone(&queue),
                )
                .unwrap()
            })
            .collect();

        thread::scope(|scope| {
            for consumer in &consumers {
                scope.spawn(move || {
                    for _ in 0..100 {
                        consumer.one_loop().unwrap();
                    }
                });
            }
        });

        let mut args: Vec<i64> = queue
            .messages("queue:default")
            .iter()
            .map(|raw| {
                let job: serde_json::Value = serde_json::from_str(raw).unwrap();
                job["args"][0].as_i64().unwrap()
            })
            .collect();
        args.sort_unstable();
        assert_eq!(args, (0..50).collect::<Vec<i64>>());
    }

    #[test]
    fn metadata_survives_the_round_trip() {
        let client = client();
        let cause = placed("Order-1", 1);
        let mut metadata = Metadata::new().with("request_ip", "127.0.0.1");
        metadata.correlate_with(&cause);
        let effect = paid("Order-1").with_metadata(metadata);

        client
            .publish(vec![cause.clone(), effect.clone()], &stream("Order-1"), ExpectedVersion::Any)
            .unwrap();

        let stored = client.read_event(effect.event_id()).unwrap();
        assert_eq!(stored.metadata().get("request_ip"), Some(&json!("127.0.0.1")));
        assert_eq!(
            stored.metadata().causation_id(),
            Some(cause.event_id().to_string().as_str())
        );
    }

    proptest! {
        #[test]
        fn backward_reads_mirror_forward_reads(count in 0usize..40, batch in 1usize..8) {
            let client = client();
            let events: Vec<EventRecord> = (0..count).map(|n| placed("Order-1", n as u64)).collect();
            if !events.is_empty() {
                client
                    .publish(events.clone(), &stream("Order-1"), ExpectedVersion::Auto)
                    .unwrap();
            }

            let forward = client.read().stream("Order-1").unwrap().to_vec().unwrap();
            let mut backward = client.read().stream("Order-1").unwrap().backward().to_vec().unwrap();
            backward.reverse();
            prop_assert_eq!(&forward, &backward);
            prop_assert_eq!(&forward, &events);

            let batched: Vec<EventRecord> = client
                .read()
                .stream("Order-1")
                .unwrap()
                .in_batches(batch)
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap()
                .into_iter()
                .flatten()
                .collect();
            prop_assert_eq!(batched, events);
        }
    }
}
