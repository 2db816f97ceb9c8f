// Push-channel client for live auction updates.
//
// An explicitly owned service (constructor-injected, not a process-global):
// `connect()` spawns the read/reconnect task, `disconnect()` tears it down,
// and each `subscribe()` returns a disposer that deregisters only itself.
// Creation stays lazy: the first `set_buyer_id` or `subscribe` call brings
// the connection up, matching how view code actually uses it.
//
// Connection errors are logged, never surfaced: the channel carries advisory
// UI updates and the REST layer remains the source of truth on reload.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::auction::status::{
    AuctionEvent, EndtimeUpdatePayload, StatusPayload, WinnerUpdatePayload,
};
use crate::config::SocketConfig;

// ---------------------------------------------------------------------------
// Event kinds and wire framing
// ---------------------------------------------------------------------------

/// The four inbound event kinds the backend pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    IsWinning,
    IsLosing,
    WinnerUpdate,
    EndtimeUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::IsWinning,
        EventKind::IsLosing,
        EventKind::WinnerUpdate,
        EventKind::EndtimeUpdate,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            EventKind::IsWinning => "isWinning",
            EventKind::IsLosing => "isLosing",
            EventKind::WinnerUpdate => "vehicle:winner:update",
            EventKind::EndtimeUpdate => "vehicle:endtime:update",
        }
    }

    fn of(event: &AuctionEvent) -> EventKind {
        match event {
            AuctionEvent::IsWinning(_) => EventKind::IsWinning,
            AuctionEvent::IsLosing(_) => EventKind::IsLosing,
            AuctionEvent::WinnerUpdate(_) => EventKind::WinnerUpdate,
            AuctionEvent::EndtimeUpdate(_) => EventKind::EndtimeUpdate,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decode one inbound text frame. Unknown event names and malformed payloads
/// yield `None`; the caller logs and drops them.
pub(crate) fn parse_frame(text: &str) -> Option<AuctionEvent> {
    let frame: Frame = serde_json::from_str(text).ok()?;
    let kind = EventKind::ALL
        .into_iter()
        .find(|k| k.wire_name() == frame.event)?;
    match kind {
        EventKind::IsWinning => serde_json::from_value::<StatusPayload>(frame.data)
            .ok()
            .map(AuctionEvent::IsWinning),
        EventKind::IsLosing => serde_json::from_value::<StatusPayload>(frame.data)
            .ok()
            .map(AuctionEvent::IsLosing),
        EventKind::WinnerUpdate => serde_json::from_value::<WinnerUpdatePayload>(frame.data)
            .ok()
            .map(AuctionEvent::WinnerUpdate),
        EventKind::EndtimeUpdate => serde_json::from_value::<EndtimeUpdatePayload>(frame.data)
            .ok()
            .map(AuctionEvent::EndtimeUpdate),
    }
}

/// The room-join frames announced on (re)connect. Both spellings are emitted
/// for compatibility with differing backend conventions.
pub(crate) fn join_frames(buyer_id: u64) -> Vec<String> {
    vec![
        serde_json::json!({ "event": "joinBuyerRoom", "data": { "buyerId": buyer_id } })
            .to_string(),
        serde_json::json!({ "event": "join", "data": { "buyerId": buyer_id } }).to_string(),
    ]
}

// ---------------------------------------------------------------------------
// PushChannel
// ---------------------------------------------------------------------------

enum Command {
    AnnounceJoin(u64),
    Shutdown,
}

type SubscriberMap = HashMap<EventKind, HashMap<u64, mpsc::UnboundedSender<AuctionEvent>>>;

struct ChannelInner {
    config: SocketConfig,
    subscribers: Mutex<SubscriberMap>,
    buyer_id: Mutex<Option<u64>>,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    connected: AtomicBool,
    next_sub_id: AtomicU64,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

/// Handle to the push channel. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct PushChannel {
    inner: Arc<ChannelInner>,
}

impl PushChannel {
    pub fn new(config: SocketConfig) -> Self {
        PushChannel {
            inner: Arc::new(ChannelInner {
                config,
                subscribers: Mutex::new(HashMap::new()),
                buyer_id: Mutex::new(None),
                cmd_tx: Mutex::new(None),
                task: Mutex::new(None),
                connected: AtomicBool::new(false),
                next_sub_id: AtomicU64::new(0),
            }),
        }
    }

    /// Record the buyer identity, lazily bringing the connection up, and
    /// re-announce room membership if the channel is already live.
    /// Idempotent; the last caller wins.
    pub fn set_buyer_id(&self, buyer_id: u64) {
        *self.inner.buyer_id.lock().expect("push channel mutex poisoned") = Some(buyer_id);
        self.connect();
        if self.inner.connected.load(Ordering::SeqCst) {
            self.send_command(Command::AnnounceJoin(buyer_id));
        }
    }

    /// Subscribe to one event kind. The returned [`Subscription`] receives
    /// every matching event until it is dropped or disposed; other
    /// subscribers for the same kind are unaffected by its removal.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.connect();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .lock()
            .expect("push channel mutex poisoned")
            .entry(kind)
            .or_default()
            .insert(id, tx);
        Subscription {
            rx,
            inner: Arc::clone(&self.inner),
            kind,
            id,
        }
    }

    /// Establish the connection task if it isn't already running.
    pub fn connect(&self) {
        let mut task = self.inner.task.lock().expect("push channel mutex poisoned");
        if task.is_some() {
            return;
        }
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.inner.cmd_tx.lock().expect("push channel mutex poisoned") = Some(cmd_tx);
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(run_loop(inner, cmd_rx)));
    }

    /// Tear the connection down. A later `connect()` (or lazy trigger)
    /// starts fresh.
    pub fn disconnect(&self) {
        self.send_command(Command::Shutdown);
        let task = self.inner.task.lock().expect("push channel mutex poisoned").take();
        if let Some(task) = task {
            task.abort();
        }
        *self.inner.cmd_tx.lock().expect("push channel mutex poisoned") = None;
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn send_command(&self, cmd: Command) {
        if let Some(tx) = self
            .inner
            .cmd_tx
            .lock()
            .expect("push channel mutex poisoned")
            .as_ref()
        {
            let _ = tx.send(cmd);
        }
    }
}

/// A registered handler for one event kind. Dropping it deregisters only
/// this handler.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<AuctionEvent>,
    inner: Arc<ChannelInner>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Receive the next event of this kind. Returns `None` once the channel
    /// is gone.
    pub async fn recv(&mut self) -> Option<AuctionEvent> {
        self.rx.recv().await
    }

    /// Explicitly deregister (equivalent to dropping).
    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subs) = self.inner.subscribers.lock() {
            if let Some(for_kind) = subs.get_mut(&self.kind) {
                for_kind.remove(&self.id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

async fn run_loop(inner: Arc<ChannelInner>, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    let initial = Duration::from_millis(inner.config.reconnect_initial_ms);
    let max = Duration::from_millis(inner.config.reconnect_max_ms);
    let mut backoff = initial;

    loop {
        match tokio_tungstenite::connect_async(inner.config.url.as_str()).await {
            Ok((ws, _)) => {
                info!("push channel connected to {}", inner.config.url);
                backoff = initial;
                inner.connected.store(true, Ordering::SeqCst);

                let (mut write, mut read) = ws.split();

                // Announce identity on every (re)connect.
                let buyer_id = *inner.buyer_id.lock().expect("push channel mutex poisoned");
                if let Some(id) = buyer_id {
                    for frame in join_frames(id) {
                        if let Err(e) = write.send(Message::Text(frame.into())).await {
                            warn!("failed to announce buyer room: {e}");
                        }
                    }
                }

                loop {
                    tokio::select! {
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => dispatch(&inner, &text),
                            Some(Ok(Message::Close(_))) | None => {
                                info!("push channel closed by server");
                                break;
                            }
                            Some(Ok(_)) => {
                                // Ignore Binary, Ping, Pong, Frame variants.
                            }
                            Some(Err(e)) => {
                                warn!("push channel read error: {e}");
                                break;
                            }
                        },
                        cmd = cmd_rx.recv() => match cmd {
                            Some(Command::AnnounceJoin(id)) => {
                                for frame in join_frames(id) {
                                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                                        warn!("failed to announce buyer room: {e}");
                                    }
                                }
                            }
                            Some(Command::Shutdown) | None => {
                                inner.connected.store(false, Ordering::SeqCst);
                                let _ = write.send(Message::Close(None)).await;
                                return;
                            }
                        }
                    }
                }

                inner.connected.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                warn!("push channel connect failed: {e}");
            }
        }

        // Disconnected: wait out the backoff, staying responsive to Shutdown.
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Shutdown) | None => return,
                Some(Command::AnnounceJoin(_)) => {
                    // Not connected; the next successful connect announces
                    // from the stored identity anyway.
                }
            }
        }
        backoff = (backoff * 2).min(max);
    }
}

/// Decode one frame and fan it out to subscribers of its kind. Senders whose
/// receivers are gone are pruned on the way.
fn dispatch(inner: &ChannelInner, text: &str) {
    let Some(event) = parse_frame(text) else {
        debug!("dropping unrecognized push frame: {text}");
        return;
    };
    let kind = EventKind::of(&event);
    let mut subs = inner.subscribers.lock().expect("push channel mutex poisoned");
    if let Some(for_kind) = subs.get_mut(&kind) {
        for_kind.retain(|_, tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;
    use tokio_tungstenite::WebSocketStream;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_socket_config(url: &str) -> SocketConfig {
        SocketConfig {
            url: url.to_string(),
            reconnect_initial_ms: 10,
            reconnect_max_ms: 100,
        }
    }

    async fn bind_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept_one(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    async fn expect_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match timeout(WAIT, ws.next()).await.unwrap() {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("expected a text frame, got: {other:?}"),
            }
        }
    }

    // -- Pure frame handling --

    #[test]
    fn parse_known_event_frames() {
        let event = parse_frame(r#"{"event":"isWinning","data":{"vehicleId":123}}"#).unwrap();
        assert_eq!(
            event,
            AuctionEvent::IsWinning(StatusPayload { vehicle_id: 123 })
        );

        let event = parse_frame(
            r#"{"event":"vehicle:winner:update",
                "data":{"vehicleId":123,"winnerBuyerId":7,"loserBuyerId":9}}"#,
        )
        .unwrap();
        match event {
            AuctionEvent::WinnerUpdate(p) => {
                assert_eq!(p.winner_buyer_id, 7);
                assert_eq!(p.loser_buyer_id, Some(9));
            }
            other => panic!("expected WinnerUpdate, got: {other:?}"),
        }

        let event = parse_frame(
            r#"{"event":"vehicle:endtime:update",
                "data":{"vehicleId":5,"auctionEndDttm":"2025-10-14 04:05:45"}}"#,
        )
        .unwrap();
        assert_eq!(EventKind::of(&event), EventKind::EndtimeUpdate);
    }

    #[test]
    fn parse_rejects_unknown_and_malformed_frames() {
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"event":"somethingElse","data":{}}"#).is_none());
        assert!(parse_frame(r#"{"event":"isWinning","data":{}}"#).is_none());
    }

    #[test]
    fn join_frames_cover_both_backend_conventions() {
        let frames = join_frames(7);
        assert_eq!(frames.len(), 2);
        let first: Value = serde_json::from_str(&frames[0]).unwrap();
        let second: Value = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(first["event"], "joinBuyerRoom");
        assert_eq!(first["data"]["buyerId"], 7);
        assert_eq!(second["event"], "join");
        assert_eq!(second["data"]["buyerId"], 7);
    }

    // -- Connection lifecycle --

    #[tokio::test]
    async fn set_buyer_id_lazily_connects_and_announces() {
        let (listener, url) = bind_server().await;
        let channel = PushChannel::new(test_socket_config(&url));

        channel.set_buyer_id(7);

        let mut server = accept_one(&listener).await;
        let f1: Value = serde_json::from_str(&expect_text(&mut server).await).unwrap();
        let f2: Value = serde_json::from_str(&expect_text(&mut server).await).unwrap();
        assert_eq!(f1["event"], "joinBuyerRoom");
        assert_eq!(f1["data"]["buyerId"], 7);
        assert_eq!(f2["event"], "join");
        assert_eq!(f2["data"]["buyerId"], 7);

        channel.disconnect();
    }

    #[tokio::test]
    async fn set_buyer_id_while_connected_reannounces() {
        let (listener, url) = bind_server().await;
        let channel = PushChannel::new(test_socket_config(&url));

        channel.set_buyer_id(7);
        let mut server = accept_one(&listener).await;
        let _ = expect_text(&mut server).await;
        let _ = expect_text(&mut server).await;

        // Last caller wins: a new identity is announced immediately.
        channel.set_buyer_id(42);
        let f1: Value = serde_json::from_str(&expect_text(&mut server).await).unwrap();
        let f2: Value = serde_json::from_str(&expect_text(&mut server).await).unwrap();
        assert_eq!(f1["data"]["buyerId"], 42);
        assert_eq!(f2["data"]["buyerId"], 42);

        channel.disconnect();
    }

    #[tokio::test]
    async fn reconnect_reannounces_identity() {
        let (listener, url) = bind_server().await;
        let channel = PushChannel::new(test_socket_config(&url));
        channel.set_buyer_id(7);

        let mut server = accept_one(&listener).await;
        let _ = expect_text(&mut server).await;
        let _ = expect_text(&mut server).await;

        // Server drops the connection; the channel reconnects with backoff
        // and announces again.
        drop(server);

        let mut server = accept_one(&listener).await;
        let f1: Value = serde_json::from_str(&expect_text(&mut server).await).unwrap();
        assert_eq!(f1["event"], "joinBuyerRoom");
        assert_eq!(f1["data"]["buyerId"], 7);

        channel.disconnect();
    }

    // -- Event dispatch and disposers --

    #[tokio::test]
    async fn events_fan_out_to_matching_subscribers_only() {
        let (listener, url) = bind_server().await;
        let channel = PushChannel::new(test_socket_config(&url));

        let mut winning_a = channel.subscribe(EventKind::IsWinning);
        let mut winning_b = channel.subscribe(EventKind::IsWinning);
        let mut losing = channel.subscribe(EventKind::IsLosing);

        let mut server = accept_one(&listener).await;
        server
            .send(Message::Text(
                r#"{"event":"isWinning","data":{"vehicleId":123}}"#.into(),
            ))
            .await
            .unwrap();

        let expected = AuctionEvent::IsWinning(StatusPayload { vehicle_id: 123 });
        assert_eq!(
            timeout(WAIT, winning_a.recv()).await.unwrap().unwrap(),
            expected
        );
        assert_eq!(
            timeout(WAIT, winning_b.recv()).await.unwrap().unwrap(),
            expected
        );

        // The isLosing subscriber saw nothing.
        server
            .send(Message::Text(
                r#"{"event":"isLosing","data":{"vehicleId":123}}"#.into(),
            ))
            .await
            .unwrap();
        let losing_event = timeout(WAIT, losing.recv()).await.unwrap().unwrap();
        assert_eq!(
            losing_event,
            AuctionEvent::IsLosing(StatusPayload { vehicle_id: 123 })
        );

        channel.disconnect();
    }

    #[tokio::test]
    async fn disposing_one_subscription_leaves_others_registered() {
        let (listener, url) = bind_server().await;
        let channel = PushChannel::new(test_socket_config(&url));

        let winning_a = channel.subscribe(EventKind::IsWinning);
        let mut winning_b = channel.subscribe(EventKind::IsWinning);

        let mut server = accept_one(&listener).await;

        winning_a.dispose();

        server
            .send(Message::Text(
                r#"{"event":"isWinning","data":{"vehicleId":9}}"#.into(),
            ))
            .await
            .unwrap();

        assert_eq!(
            timeout(WAIT, winning_b.recv()).await.unwrap().unwrap(),
            AuctionEvent::IsWinning(StatusPayload { vehicle_id: 9 })
        );

        channel.disconnect();
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_without_killing_the_stream() {
        let (listener, url) = bind_server().await;
        let channel = PushChannel::new(test_socket_config(&url));
        let mut winning = channel.subscribe(EventKind::IsWinning);

        let mut server = accept_one(&listener).await;
        server
            .send(Message::Text("garbage{{{".into()))
            .await
            .unwrap();
        server
            .send(Message::Text(
                r#"{"event":"isWinning","data":{"vehicleId":55}}"#.into(),
            ))
            .await
            .unwrap();

        assert_eq!(
            timeout(WAIT, winning.recv()).await.unwrap().unwrap(),
            AuctionEvent::IsWinning(StatusPayload { vehicle_id: 55 })
        );

        channel.disconnect();
    }

    #[tokio::test]
    async fn disconnect_then_connect_starts_fresh() {
        let (listener, url) = bind_server().await;
        let channel = PushChannel::new(test_socket_config(&url));

        channel.set_buyer_id(7);
        let server = accept_one(&listener).await;
        channel.disconnect();
        drop(server);
        assert!(!channel.is_connected());

        // A fresh connect announces the retained identity again.
        channel.connect();
        let mut server = accept_one(&listener).await;
        let f1: Value = serde_json::from_str(&expect_text(&mut server).await).unwrap();
        assert_eq!(f1["data"]["buyerId"], 7);

        channel.disconnect();
    }
}
