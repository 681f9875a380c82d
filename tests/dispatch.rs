mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{command_event, Recorder};
use gatebot::commands::{ping, CommandContext, CommandRegistry, Responder};
use gatebot::gateway::dispatcher::Dispatcher;
use gatebot::gateway::events::InboundEvent;
use gatebot::models::outbound::OutboundPayload;
use gatebot::ratelimit::{RateLimitConfig, RateLimiter};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

fn dispatcher(registry: CommandRegistry) -> (Dispatcher, Arc<Recorder>) {
    let recorder = Recorder::new();
    let outbound = RateLimiter::new(RateLimitConfig::default(), recorder.clone());
    (Dispatcher::new(Arc::new(registry), outbound), recorder)
}

#[tokio::test(start_paused = true)]
async fn test_ping_replies_with_pong_and_mention() {
    let mut registry = CommandRegistry::new();
    ping::register(&mut registry).unwrap();
    let (dispatcher, recorder) = dispatcher(registry);

    dispatcher.dispatch(command_event("i1", "U1", "ping", 1));
    assert!(dispatcher.shutdown(Duration::from_secs(5)).await);

    let sent = recorder.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target.as_deref(), Some("channel:C1"));
    match &sent[0].payload {
        OutboundPayload::InteractionResponse {
            interaction_id,
            token,
            content,
        } => {
            assert_eq!(interaction_id, "i1");
            assert_eq!(token, "tok-i1");
            assert!(content.contains("pong"), "got {content:?}");
            assert!(content.contains("<@U1>"), "got {content:?}");
        }
        other => panic!("expected an interaction response, got {other:?}"),
    }
    assert_eq!(dispatcher.stats().failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_every_event_handled_exactly_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (mut dispatcher, _) = dispatcher(CommandRegistry::new());
    dispatcher.register("message.create", {
        let seen = seen.clone();
        move |event: Arc<InboundEvent>| {
            let seen = seen.clone();
            async move {
                seen.lock().push(event.sequence);
                Ok::<(), anyhow::Error>(())
            }
        }
    });

    let (tx, rx) = mpsc::channel(8);
    let dispatcher = Arc::new(dispatcher);
    let run = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.run(rx).await }
    });
    for seq in 1..=50 {
        tx.send(InboundEvent::new("message.create", seq, json!({})))
            .await
            .unwrap();
    }
    drop(tx);
    run.await.unwrap();
    assert!(dispatcher.shutdown(Duration::from_secs(1)).await);

    let mut seen = seen.lock().clone();
    seen.sort_unstable();
    assert_eq!(seen, (1..=50).collect::<Vec<u64>>());
    assert_eq!(dispatcher.stats().dispatched, 50);
}

#[tokio::test(start_paused = true)]
async fn test_failing_and_panicking_handlers_are_isolated() {
    let ok_runs = Arc::new(Mutex::new(0u32));
    let (mut dispatcher, _) = dispatcher(CommandRegistry::new());
    dispatcher.register("message.create", |event: Arc<InboundEvent>| async move {
        if event.sequence == 1 {
            anyhow::bail!("cannot handle event {}", event.sequence);
        }
        if event.sequence == 2 {
            panic!("handler exploded");
        }
        Ok(())
    });
    dispatcher.register("message.create", {
        let ok_runs = ok_runs.clone();
        move |_event: Arc<InboundEvent>| {
            let ok_runs = ok_runs.clone();
            async move {
                *ok_runs.lock() += 1;
                Ok::<(), anyhow::Error>(())
            }
        }
    });

    for seq in 1..=3 {
        dispatcher.dispatch(InboundEvent::new("message.create", seq, json!({})));
    }
    assert!(dispatcher.shutdown(Duration::from_secs(1)).await);

    assert_eq!(*ok_runs.lock(), 3);
    let stats = dispatcher.stats();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.dispatched, 3);
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_events_are_counted() {
    let mut registry = CommandRegistry::new();
    ping::register(&mut registry).unwrap();
    let (dispatcher, recorder) = dispatcher(registry);

    dispatcher.dispatch(InboundEvent::new("typing.start", 1, json!({})));
    dispatcher.dispatch(command_event("i2", "U1", "unknown", 2));
    assert!(dispatcher.shutdown(Duration::from_secs(1)).await);

    assert_eq!(dispatcher.stats().unhandled, 2);
    assert_eq!(dispatcher.stats().dispatched, 0);
    assert!(recorder.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_does_not_block_others() {
    let fast_at = Arc::new(Mutex::new(None));
    let (mut dispatcher, _) = dispatcher(CommandRegistry::new());
    dispatcher.register("slow", |_event: Arc<InboundEvent>| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<(), anyhow::Error>(())
    });
    dispatcher.register("fast", {
        let fast_at = fast_at.clone();
        move |_event: Arc<InboundEvent>| {
            let fast_at = fast_at.clone();
            async move {
                *fast_at.lock() = Some(tokio::time::Instant::now());
                Ok::<(), anyhow::Error>(())
            }
        }
    });

    let start = tokio::time::Instant::now();
    dispatcher.dispatch(InboundEvent::new("slow", 1, json!({})));
    dispatcher.dispatch(InboundEvent::new("fast", 2, json!({})));
    assert_eq!(dispatcher.in_flight(), 2);

    assert!(!dispatcher.shutdown(Duration::from_secs(1)).await);
    let fast_at = fast_at.lock().expect("fast handler ran");
    assert!(fast_at - start < Duration::from_millis(10));
    assert_eq!(dispatcher.in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_command_and_event_handlers_both_run() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = CommandRegistry::new();
    registry
        .register("echo", "echoes", {
            let calls = calls.clone();
            move |ctx: CommandContext, _responder: Responder| {
                let calls = calls.clone();
                async move {
                    calls.lock().push(format!("command:{}", ctx.name));
                    Ok::<(), anyhow::Error>(())
                }
            }
        })
        .unwrap();
    let (mut dispatcher, _) = dispatcher(registry);
    dispatcher.register("interaction.create", {
        let calls = calls.clone();
        move |event: Arc<InboundEvent>| {
            let calls = calls.clone();
            async move {
                calls.lock().push(format!("event:{}", event.sequence));
                Ok::<(), anyhow::Error>(())
            }
        }
    });

    dispatcher.dispatch(command_event("i3", "U9", "echo", 4));
    assert!(dispatcher.shutdown(Duration::from_secs(1)).await);

    let mut calls = calls.lock().clone();
    calls.sort();
    assert_eq!(calls, vec!["command:echo", "event:4"]);
    assert_eq!(dispatcher.stats().dispatched, 1);
}

#[tokio::test(start_paused = true)]
async fn test_responder_mentions_the_invoking_user() {
    let mentions = Arc::new(Mutex::new(Vec::new()));
    let mut registry = CommandRegistry::new();
    registry
        .register("whoami", "mentions you", {
            let mentions = mentions.clone();
            move |ctx: CommandContext, responder: Responder| {
                let mentions = mentions.clone();
                async move {
                    mentions
                        .lock()
                        .push((ctx.mention(), responder.mention().to_string()));
                    Ok::<(), anyhow::Error>(())
                }
            }
        })
        .unwrap();
    let (dispatcher, _) = dispatcher(registry);

    dispatcher.dispatch(command_event("i4", "U7", "whoami", 5));
    assert!(dispatcher.shutdown(Duration::from_secs(1)).await);

    let mentions = mentions.lock().clone();
    assert_eq!(mentions, vec![("<@U7>".to_string(), "<@U7>".to_string())]);
}
