//! Connection supervisor tests against the scripted mock transport.
//!
//! All tests run on a paused clock, so backoff schedules complete instantly
//! while the recorded open times still reflect the configured delays.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::sync::Arc;
use std::time::Duration;

use common::protocol::{ClientMessage, ServerMessage};
use common::types::ConnectionId;
use room_client::transport::TransportStatus;
use room_client::{
    ChannelState, ClientError, ConnectionSupervisor, ReconnectPolicy, SupervisorEvent,
};
use room_test_utils::{MockSignalingTransport, OpenOutcome};
use tokio::sync::broadcast;
use tokio::time::Instant;

// ============================================================================
// Helpers
// ============================================================================

fn supervisor(
    transport: &Arc<MockSignalingTransport>,
) -> (ConnectionSupervisor, tokio::sync::mpsc::Receiver<ServerMessage>) {
    ConnectionSupervisor::new(
        Arc::clone(transport) as Arc<dyn room_client::transport::SignalingTransport>,
        ReconnectPolicy::default(),
    )
}

/// Wait for the first event matching `predicate`, collecting everything seen.
async fn wait_for_event(
    events: &mut broadcast::Receiver<SupervisorEvent>,
    predicate: impl Fn(&SupervisorEvent) -> bool,
) -> Vec<SupervisorEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            let done = predicate(&event);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("event never arrived");
    seen
}

/// Gaps between consecutive opens, in whole seconds.
fn gaps_secs(times: &[Instant]) -> Vec<u64> {
    times
        .windows(2)
        .map(|pair| pair[1].duration_since(pair[0]).as_secs())
        .collect()
}

// ============================================================================
// Connect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_opens_channel_and_forwards_both_ways() {
    let transport = Arc::new(MockSignalingTransport::accepting());
    let (supervisor, mut inbound) = supervisor(&transport);
    assert_eq!(supervisor.state(), ChannelState::Disconnected);

    supervisor.connect().await.unwrap();
    assert_eq!(supervisor.state(), ChannelState::Connected);
    assert_eq!(transport.open_count(), 1);

    let mut end = transport.next_server_end().await;
    supervisor.send(ClientMessage::Ping).await.unwrap();
    assert_eq!(end.recv().await, ClientMessage::Ping);

    end.welcome("c1").await;
    assert_eq!(
        inbound.recv().await.unwrap(),
        ServerMessage::Welcome {
            connection_id: ConnectionId::from("c1")
        }
    );

    // Already connected: no second open.
    supervisor.connect().await.unwrap();
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_without_channel_is_not_connected() {
    let transport = Arc::new(MockSignalingTransport::accepting());
    let (supervisor, _inbound) = supervisor(&transport);

    assert!(matches!(
        supervisor.send(ClientMessage::Ping).await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_manual_retry_exhaustion_fails_with_doubling_backoff() {
    let transport = Arc::new(MockSignalingTransport::refusing());
    let (supervisor, _inbound) = supervisor(&transport);
    let mut events = supervisor.subscribe();

    let started = Instant::now();
    let result = supervisor.connect().await;
    let elapsed = started.elapsed();

    assert!(matches!(
        result,
        Err(ClientError::SignalingConnectionFailed { attempts: 5 })
    ));
    assert_eq!(supervisor.state(), ChannelState::Failed);
    assert_eq!(transport.open_count(), 5);
    assert_eq!(gaps_secs(&transport.open_times()), vec![2, 4, 8, 16]);
    // No wait after the final attempt.
    assert!(elapsed < Duration::from_secs(31), "elapsed {elapsed:?}");

    let seen = wait_for_event(&mut events, |e| {
        matches!(e, SupervisorEvent::SignalingConnectionFailed { .. })
    })
    .await;
    assert!(seen.contains(&SupervisorEvent::StateChanged(ChannelState::Reconnecting)));
    assert_eq!(
        seen.last(),
        Some(&SupervisorEvent::SignalingConnectionFailed { attempts: 5 })
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_failure_starts_fresh_cycle() {
    let transport = Arc::new(
        MockSignalingTransport::builder()
            .refuse(5)
            .otherwise(OpenOutcome::Accept)
            .build(),
    );
    let (supervisor, _inbound) = supervisor(&transport);

    assert!(supervisor.connect().await.is_err());
    assert_eq!(supervisor.state(), ChannelState::Failed);

    supervisor.connect().await.unwrap();
    assert_eq!(supervisor.state(), ChannelState::Connected);
    assert_eq!(transport.open_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connect_waits_for_attempt_in_flight() {
    let transport = Arc::new(MockSignalingTransport::builder().refuse(2).accept().build());
    let (supervisor, _inbound) = supervisor(&transport);

    let (first, second) = tokio::join!(supervisor.connect(), supervisor.connect());

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(transport.open_count(), 3);
    assert_eq!(supervisor.state(), ChannelState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_transitional_status_is_repolled_not_reopened() {
    let transport = Arc::new(MockSignalingTransport::accepting());
    transport.force_status(Some(TransportStatus::Opening));
    let (supervisor, _inbound) = supervisor(&transport);

    let releaser = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            transport.force_status(None);
        })
    };

    let started = Instant::now();
    supervisor.connect().await.unwrap();
    releaser.await.unwrap();

    assert_eq!(transport.open_count(), 1);
    assert!(started.elapsed() >= Duration::from_millis(1200));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_transitional_polls_consume_attempts() {
    let transport = Arc::new(MockSignalingTransport::accepting());
    transport.force_status(Some(TransportStatus::Opening));
    let (supervisor, _inbound) = supervisor(&transport);

    assert!(matches!(
        supervisor.connect().await,
        Err(ClientError::SignalingConnectionFailed { attempts: 5 })
    ));
    assert_eq!(transport.open_count(), 0);
    assert_eq!(supervisor.state(), ChannelState::Failed);
}

// ============================================================================
// Recovery after an unexpected drop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_drop_recovers_through_automatic_then_manual_schedule() {
    // Initial connect succeeds, six opens fail, the eighth succeeds.
    let transport = Arc::new(
        MockSignalingTransport::builder()
            .accept()
            .refuse(6)
            .accept()
            .build(),
    );
    let (supervisor, mut inbound) = supervisor(&transport);
    supervisor.connect().await.unwrap();
    let mut events = supervisor.subscribe();

    let first_end = transport.next_server_end().await;
    drop(first_end);

    let seen = wait_for_event(&mut events, |e| *e == SupervisorEvent::Reconnected).await;
    assert!(seen.contains(&SupervisorEvent::StateChanged(ChannelState::Reconnecting)));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SupervisorEvent::SignalingConnectionFailed { .. })));

    assert_eq!(supervisor.state(), ChannelState::Connected);
    assert_eq!(transport.open_count(), 8);

    // Automatic delays 0, 2, 10, 30; then manual attempt 1 immediately,
    // followed by 2 s and 4 s backoffs.
    let opens = transport.open_times();
    assert_eq!(gaps_secs(&opens[1..]), vec![2, 10, 30, 0, 2, 4]);

    // The inbound queue outlives the replaced channel.
    let end = transport.next_server_end().await;
    end.welcome("c1-again").await;
    assert_eq!(
        inbound.recv().await.unwrap(),
        ServerMessage::Welcome {
            connection_id: ConnectionId::from("c1-again")
        }
    );
    supervisor.send(ClientMessage::Ping).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_first_automatic_attempt_is_immediate() {
    let transport = Arc::new(MockSignalingTransport::accepting());
    let (supervisor, _inbound) = supervisor(&transport);
    supervisor.connect().await.unwrap();
    let mut events = supervisor.subscribe();

    drop(transport.next_server_end().await);
    wait_for_event(&mut events, |e| *e == SupervisorEvent::Reconnected).await;

    let opens = transport.open_times();
    assert_eq!(opens.len(), 2);
    assert_eq!(gaps_secs(&opens), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn test_channel_closed_on_arrival_is_recovered() {
    let transport = Arc::new(MockSignalingTransport::builder().accept_closed().accept().build());
    let (supervisor, _inbound) = supervisor(&transport);
    let mut events = supervisor.subscribe();

    supervisor.connect().await.unwrap();
    wait_for_event(&mut events, |e| *e == SupervisorEvent::Reconnected).await;

    assert_eq!(supervisor.state(), ChannelState::Connected);
    assert_eq!(transport.open_count(), 2);
    let mut end = transport.next_server_end().await;
    supervisor.send(ClientMessage::Ping).await.unwrap();
    assert_eq!(end.recv().await, ClientMessage::Ping);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_closure_racing_the_installing_attempt_is_recovered() {
    // The dead channel's reader can run on another worker while the attempt
    // that installed it still holds the attempt lock.
    for _ in 0..25 {
        let transport =
            Arc::new(MockSignalingTransport::builder().accept_closed().accept().build());
        let (supervisor, _inbound) = supervisor(&transport);
        let mut events = supervisor.subscribe();

        supervisor.connect().await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_event(&mut events, |e| *e == SupervisorEvent::Reconnected),
        )
        .await
        .expect("closed channel was never replaced");

        assert_eq!(supervisor.state(), ChannelState::Connected);
        assert_eq!(transport.open_count(), 2);
        supervisor.send(ClientMessage::Ping).await.unwrap();
        supervisor.shutdown();
    }
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_does_not_trigger_reconnect() {
    let transport = Arc::new(MockSignalingTransport::accepting());
    let (supervisor, _inbound) = supervisor(&transport);
    supervisor.connect().await.unwrap();
    let end = transport.next_server_end().await;

    supervisor.disconnect();
    assert_eq!(supervisor.state(), ChannelState::Disconnected);
    drop(end);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(supervisor.state(), ChannelState::Disconnected);
    assert!(matches!(
        supervisor.send(ClientMessage::Ping).await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_reconnect_in_progress() {
    let transport = Arc::new(
        MockSignalingTransport::builder()
            .accept()
            .otherwise(OpenOutcome::Refuse)
            .build(),
    );
    let (supervisor, _inbound) = supervisor(&transport);
    supervisor.connect().await.unwrap();

    drop(transport.next_server_end().await);
    // Automatic attempts at +0 s and +2 s have run; the next is at +12 s.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.open_count(), 3);

    supervisor.shutdown();
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(transport.open_count(), 3);
    assert!(supervisor.is_shut_down());
    assert!(matches!(supervisor.connect().await, Err(ClientError::Closed)));
}

// ============================================================================
// Foreground recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_visibility_reconnects_once_when_disconnected() {
    let transport = Arc::new(MockSignalingTransport::accepting());
    let (supervisor, _inbound) = supervisor(&transport);
    let mut events = supervisor.subscribe();

    assert!(!supervisor.on_visibility_change(false).await);
    assert_eq!(transport.open_count(), 0);

    assert!(supervisor.on_visibility_change(true).await);
    assert_eq!(supervisor.state(), ChannelState::Connected);
    assert_eq!(transport.open_count(), 1);
    wait_for_event(&mut events, |e| *e == SupervisorEvent::Reconnected).await;

    // Already connected: nothing to do.
    assert!(!supervisor.on_visibility_change(true).await);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_visibility_failure_makes_single_attempt() {
    let transport = Arc::new(MockSignalingTransport::refusing());
    let (supervisor, _inbound) = supervisor(&transport);

    assert!(!supervisor.on_visibility_change(true).await);
    assert_eq!(transport.open_count(), 1);
    assert_eq!(supervisor.state(), ChannelState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_visibility_during_reconnect_does_not_start_another() {
    let transport = Arc::new(
        MockSignalingTransport::builder()
            .accept()
            .otherwise(OpenOutcome::Refuse)
            .build(),
    );
    let (supervisor, _inbound) = supervisor(&transport);
    supervisor.connect().await.unwrap();

    drop(transport.next_server_end().await);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(supervisor.state(), ChannelState::Reconnecting);
    let before = transport.open_count();

    assert!(!supervisor.on_visibility_change(true).await);
    assert_eq!(transport.open_count(), before);

    supervisor.shutdown();
}
