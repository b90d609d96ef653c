use super::*;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::domain::Entity;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct PushServer {
    pulls: Arc<Mutex<Vec<String>>>,
    sessions: Arc<Mutex<u32>>,
}

async fn handle_upgrade(ws: WebSocketUpgrade, State(state): State<PushServer>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_session(socket, state))
}

async fn serve_session(mut socket: WebSocket, state: PushServer) {
    *state.sessions.lock().await += 1;
    if let Some(Ok(WsMessage::Text(pull))) = socket.recv().await {
        state.pulls.lock().await.push(pull);
    }
    let frames = [
        r#"{"event":"initial_timeline_data","data":[{"name":"Coronation","date":"0500-01-01","description":""}]}"#,
        r#"{"event":"no_such_event","data":1}"#,
        r#"{"event":"update_cheat_sheet","data":{"name":"Arthur","type":"Character","description":"King."}}"#,
    ];
    for frame in frames {
        if socket.send(WsMessage::Text(frame.to_string())).await.is_err() {
            return;
        }
    }
    let _ = socket.send(WsMessage::Close(None)).await;
}

async fn spawn_push_server() -> (String, PushServer) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = PushServer::default();
    let app = Router::new()
        .route("/events", get(handle_upgrade))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(80),
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("channel event in time")
        .expect("channel open")
}

#[test]
fn derives_websocket_url_from_control_base() {
    let channel =
        EventChannel::for_control_base("http://127.0.0.1:5000/", "/events", fast_policy())
            .expect("channel");
    assert_eq!(channel.url().as_str(), "ws://127.0.0.1:5000/events");

    let channel = EventChannel::for_control_base("https://worker.local", "events", fast_policy())
        .expect("channel");
    assert_eq!(channel.url().scheme(), "wss");

    assert!(EventChannel::for_control_base("ftp://127.0.0.1", "/events", fast_policy()).is_err());
    assert!(EventChannel::new("http://127.0.0.1:5000/events", fast_policy()).is_err());
}

#[test]
fn backoff_doubles_up_to_cap() {
    let policy = ReconnectPolicy {
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(3),
    };
    let mut delay = policy.initial_delay;
    let mut seen = Vec::new();
    for _ in 0..4 {
        delay = policy.next_delay(delay);
        seen.push(delay.as_millis());
    }
    assert_eq!(seen, vec![1000, 2000, 3000, 3000]);
}

#[test]
fn zero_delays_are_raised_to_the_floor() {
    let zero = ReconnectPolicy {
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };
    assert_eq!(zero.next_delay(Duration::ZERO), ReconnectPolicy::MIN_DELAY);

    let channel = EventChannel::new("ws://127.0.0.1:5000/events", zero).expect("channel");
    assert_eq!(channel.policy.initial_delay, ReconnectPolicy::MIN_DELAY);
    assert_eq!(channel.policy.max_delay, ReconnectPolicy::MIN_DELAY);

    let policy = ReconnectPolicy {
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_millis(100),
    }
    .normalized();
    assert_eq!(policy.max_delay, Duration::from_millis(500));
}

#[tokio::test]
async fn forwards_events_in_order_and_replays_pull_on_reconnect() {
    let (base_url, server) = spawn_push_server().await;
    let channel =
        EventChannel::for_control_base(&base_url, "/events", fast_policy()).expect("channel");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = channel.spawn(tx);

    assert_eq!(next_event(&mut rx).await, ChannelEvent::Connected);
    match next_event(&mut rx).await {
        ChannelEvent::Event(WorkerEvent::InitialTimelineData(events)) => {
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].date.as_deref(), Some("0500-01-01"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next_event(&mut rx).await {
        ChannelEvent::Malformed { frame, .. } => assert!(frame.contains("no_such_event")),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::Event(WorkerEvent::UpdateCheatSheet(Entity::new(
            "Arthur",
            "Character",
            "King."
        )))
    );
    assert!(matches!(
        next_event(&mut rx).await,
        ChannelEvent::Disconnected { .. }
    ));

    // the server hangs up after each session; the channel must come back
    assert_eq!(next_event(&mut rx).await, ChannelEvent::Connected);
    assert!(matches!(
        next_event(&mut rx).await,
        ChannelEvent::Event(WorkerEvent::InitialTimelineData(_))
    ));
    handle.close();

    assert!(*server.sessions.lock().await >= 2);
    let pulls = server.pulls.lock().await;
    assert!(pulls.len() >= 2, "expected a pull per connect, got {pulls:?}");
    assert!(pulls
        .iter()
        .all(|pull| pull == r#"{"event":"request_timeline_data"}"#));
}

#[tokio::test]
async fn keeps_retrying_while_worker_is_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let channel =
        EventChannel::for_control_base(&format!("http://{addr}"), "/events", fast_policy())
            .expect("channel");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = channel.spawn(tx);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err(), "no notifications before a connect");
    assert!(!handle.is_finished());
    handle.close();
}
