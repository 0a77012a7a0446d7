use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;

use print_agent::core::{AgentDeps, AgentState, Config};
use print_agent::sync::ChannelStatus;
use print_agent::sync::channel::wait_closed;
use print_agent::usb::{UsbDeviceInfo, UsbEnumerator};
use shared::SyncEnvelope;
use shared::models::{ConnectionType, DiscoveryMethod, PrinterRecord};

struct NoUsb;

#[async_trait]
impl UsbEnumerator for NoUsb {
    async fn enumerate(&self) -> std::io::Result<Vec<UsbDeviceInfo>> {
        Ok(Vec::new())
    }
}

/// One accepted WebSocket session as the backend saw it
#[derive(Debug)]
struct Session {
    uri: String,
    branch_header: Option<String>,
    frames: Vec<SyncEnvelope>,
}

/// Fake backend: records the first `expected` frames of each session and
/// hangs up on the first session only
async fn backend(listener: TcpListener, expected: usize, sessions: mpsc::Sender<Session>) {
    let mut accepted = 0usize;
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let seen = Arc::new(Mutex::new((String::new(), None::<String>)));
        let capture = seen.clone();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let branch = req
                .headers()
                .get("x-branch-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            *capture.lock() = (req.uri().to_string(), branch);
            Ok(resp)
        };
        // REST calls to the same port fail the upgrade and are ignored
        let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
            continue;
        };
        accepted += 1;

        let mut frames = Vec::new();
        while frames.len() < expected {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    frames.push(serde_json::from_str::<SyncEnvelope>(text.as_str()).unwrap());
                }
                Some(Ok(_)) => continue,
                _ => break,
            }
        }
        let (uri, branch_header) = seen.lock().clone();
        let _ = sessions
            .send(Session {
                uri,
                branch_header,
                frames,
            })
            .await;

        if accepted == 1 {
            let _ = ws.close(None).await;
        } else {
            tokio::spawn(async move { while ws.next().await.is_some() {} });
        }
    }
}

fn printer(name: &str, host: &str) -> PrinterRecord {
    PrinterRecord::new(name, ConnectionType::Network, DiscoveryMethod::Network).with_network(host, 9100)
}

#[tokio::test]
async fn test_reconnect_reannounces_same_printer_set() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (session_tx, mut session_rx) = mpsc::channel(4);
    // join + agent:online + one frame per printer
    tokio::spawn(backend(listener, 4, session_tx));

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::for_data_root(dir.path());
    config.sync.backend_url = Some(format!("http://127.0.0.1:{}", port));
    config.sync.license_key = "LK-1".into();
    config.sync.branch_id = "12".into();
    config.sync.device_id = "agent-7".into();
    config.sync.reconnect_initial = Duration::from_millis(50);
    config.sync.request_timeout = Duration::from_secs(1);
    let deps = AgentDeps {
        enumerator: Arc::new(NoUsb),
        ..AgentDeps::system(&config)
    }
    .with_scanners(Vec::new());

    let boot = AgentState::initialize(config, deps).unwrap();
    boot.state.registry.replace(vec![
        printer("Kitchen", "192.168.1.50"),
        printer("Bar", "192.168.1.51"),
    ]);
    let sync = boot.state.sync.clone();
    let token = CancellationToken::new();
    let channel = tokio::spawn(boot.sync_channel.run(token.clone()));

    let first = tokio::time::timeout(Duration::from_secs(5), session_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), session_rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(first.uri.contains("licenseKey=LK-1"), "{}", first.uri);
    assert!(first.uri.contains("deviceId=agent-7"));
    assert_eq!(first.branch_header.as_deref(), Some("12"));

    for session in [&first, &second] {
        let events: Vec<&str> = session.frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(
            events,
            vec!["join", "agent:online", "printer:discovered", "printer:discovered"]
        );
        assert_eq!(session.frames[0].data["room"], "branch:12");
    }

    let ids = |s: &Session| {
        let mut ids: Vec<String> = s.frames[2..]
            .iter()
            .map(|f| f.data["id"].as_str().unwrap().to_string())
            .collect();
        ids.sort();
        ids
    };
    let first_ids = ids(&first);
    assert_eq!(first_ids, ids(&second));
    assert_eq!(first_ids, vec!["net-192.168.1.50-9100", "net-192.168.1.51-9100"]);

    assert!(sync.stats().connects >= 2);
    token.cancel();
    assert!(wait_closed(sync.status_rx(), Duration::from_secs(3)).await);
    assert_eq!(sync.status(), ChannelStatus::Disconnected);
    channel.await.unwrap();
}
