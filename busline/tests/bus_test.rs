//! End-to-end exercises of the event bus: fan-out isolation, request/reply,
//! recipient failures, timeouts, and codec selection.

use busline::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test]
async fn test_publish_fans_out_three_isolated_copies() {
    let bus = EventBus::new();
    let mut one = bus.consumer("news.tech");
    let mut two = bus.consumer("news.tech");
    let mut three = bus.consumer("news.tech");

    bus.publish("news.tech", Body::new("hello".to_string()))
        .unwrap();

    let mut a = one.next().await.unwrap();
    let mut b = two.next().await.unwrap();
    let c = three.next().await.unwrap();

    for envelope in [&a, &b, &c] {
        assert_eq!(envelope.address(), "news.tech");
        assert_eq!(envelope.body_as::<String>().unwrap(), "hello");
        assert!(envelope.reply_address().is_none());
    }

    // Adding a header to one copy is invisible in the other two.
    a.headers().add("seen-by", "one");
    assert!(!b.headers().contains_key("seen-by"));
    assert!(c.headers_ref().is_none());
    assert_eq!(a.headers().len(), 1);
}

#[tokio::test]
async fn test_request_reply_round_trip() {
    let bus = EventBus::new();
    let mut consumer = bus.consumer("math.double");
    tokio::spawn(async move {
        while let Some(envelope) = consumer.next().await {
            let caller = envelope
                .headers_ref()
                .and_then(|headers| headers.get("x-caller"))
                .map(str::to_string);
            assert_eq!(caller.as_deref(), Some("round-trip"));
            let n = *envelope.body_as::<u32>().unwrap();
            envelope.reply(Some(Body::new(n * 2))).unwrap();
        }
    });

    let reply = bus
        .request_with(
            "math.double",
            Some(Body::new(21u32)),
            DeliveryOptions::new().with_header("x-caller", "round-trip"),
        )
        .await
        .unwrap();
    assert_eq!(reply.body_as::<u32>(), Some(&42));
}

#[tokio::test]
async fn test_recipient_failure_reaches_the_requester() {
    let bus = EventBus::new();
    let mut consumer = bus.consumer("inventory.lookup");
    tokio::spawn(async move {
        while let Some(envelope) = consumer.next().await {
            envelope.fail(404, "missing");
        }
    });

    let err = bus
        .request("inventory.lookup", Body::new("sku-1".to_string()))
        .await
        .unwrap_err();
    match err {
        SendError::Failure(failure) => {
            assert_eq!(failure.kind, ReplyFailureKind::RecipientFailure);
            assert_eq!(failure.code, 404);
            assert_eq!(failure.message, "missing");
        }
        other => panic!("expected a reply failure, got: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_without_a_reply() {
    let bus = EventBus::new();
    // Registered but never polled: the request is delivered, nobody replies.
    let _consumer = bus.consumer("slow.service");

    let err = bus
        .request_with(
            "slow.service",
            Some(Body::new(1u8)),
            DeliveryOptions::new().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    match err {
        SendError::Failure(failure) => {
            assert_eq!(failure.kind, ReplyFailureKind::Timeout);
            assert!(failure.message.contains("100ms"));
        }
        other => panic!("expected a timeout, got: {other}"),
    }
}

#[tokio::test]
async fn test_request_without_consumers_fails_with_no_handlers() {
    let bus = EventBus::new();
    let err = bus
        .request("missing.address", Body::new(1u8))
        .await
        .unwrap_err();
    match err {
        SendError::Failure(failure) => {
            assert_eq!(failure.kind, ReplyFailureKind::NoHandlers);
            assert!(failure.message.contains("missing.address"));
        }
        other => panic!("expected no-handlers, got: {other}"),
    }
}

#[tokio::test]
async fn test_reply_callback_observes_the_counter_acknowledgment() {
    let bus = EventBus::new();
    let mut consumer = bus.consumer("session.open");
    let handler = tokio::spawn(async move {
        let envelope = consumer.next().await.unwrap();
        let (tx, rx) = oneshot::channel();
        envelope
            .reply_with(
                Some(Body::new("opened".to_string())),
                DeliveryOptions::default(),
                Some(tx),
            )
            .unwrap();
        rx.await.unwrap()
    });

    let reply = bus
        .request("session.open", Body::new("open".to_string()))
        .await
        .unwrap();
    assert_eq!(reply.body_as::<String>().unwrap(), "opened");
    // The reply carries its own reply channel, so the requester can
    // acknowledge it in turn.
    assert!(reply.reply_address().is_some());
    reply.reply(Some(Body::new("ack".to_string()))).unwrap();

    let ack = handler.await.unwrap().unwrap();
    assert_eq!(ack.body_as::<String>().unwrap(), "ack");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    id: u32,
    label: String,
}

#[tokio::test]
async fn test_json_codec_delivers_equal_but_distinct_bodies() {
    let bus = EventBus::new();
    bus.register_codec(Arc::new(JsonCodec::<Event>::new("event")))
        .unwrap();
    let mut first = bus.consumer("events");
    let mut second = bus.consumer("events");

    let sent = Body::new(Event {
        id: 7,
        label: "deploy".into(),
    });
    bus.publish_with(
        "events",
        Some(sent.clone()),
        DeliveryOptions::new().with_codec_name("event"),
    )
    .unwrap();

    let a = first.next().await.unwrap();
    let b = second.next().await.unwrap();
    for envelope in [&a, &b] {
        assert_eq!(
            envelope.body_as::<Event>(),
            Some(&Event {
                id: 7,
                label: "deploy".into()
            })
        );
        assert!(!Body::ptr_eq(envelope.body().unwrap(), &sent));
    }
    assert!(!Body::ptr_eq(a.body().unwrap(), b.body().unwrap()));
}

#[tokio::test]
async fn test_reply_reuses_the_request_codec_by_default() {
    let bus = EventBus::new();
    bus.register_codec(Arc::new(JsonCodec::<Event>::new("event")))
        .unwrap();
    let mut consumer = bus.consumer("events.ack");
    tokio::spawn(async move {
        while let Some(envelope) = consumer.next().await {
            let event = envelope.body_as::<Event>().unwrap().clone();
            envelope.reply(Some(Body::new(event))).unwrap();
        }
    });

    let reply = bus
        .request_with(
            "events.ack",
            Some(Body::new(Event {
                id: 1,
                label: "ping".into(),
            })),
            DeliveryOptions::new().with_codec_name("event"),
        )
        .await
        .unwrap();
    assert_eq!(reply.codec().name(), "event");
    assert_eq!(reply.body_as::<Event>().map(|e| e.id), Some(1));
}
