//! 入站流量场景：响应计数、文本转发与工作线程命名。

mod support;

use std::{
    io::{Read, Write},
    net::TcpStream,
    sync::{Arc, mpsc},
    time::Duration,
};

use parking_lot::Mutex;
use support::{ScriptedPeer, drain_to_eof, loopback_config, wait_until};
use tinytcp_client::{HandlerState, TinyTcpClient};

/// 监听器记录的一次回调：载荷与执行线程名。
type Seen = Arc<Mutex<Vec<(String, String)>>>;

fn recording_client(port: u16, seen: &Seen, ack: mpsc::Sender<()>) -> TinyTcpClient {
    let sink = Arc::clone(seen);
    TinyTcpClient::builder()
        .config(loopback_config(port))
        .listener(move |_: &str, payload: &str| {
            let worker = std::thread::current().name().unwrap_or_default().to_owned();
            sink.lock().push((payload.to_owned(), worker));
            let _ = ack.send(());
        })
        .build()
        .expect("构造客户端")
}

#[test]
fn three_server_messages_are_counted_and_forwarded() {
    let (ack_tx, ack_rx) = mpsc::channel::<()>();
    let ack_rx = Mutex::new(ack_rx);
    let peer = ScriptedPeer::spawn(1, move |mut stream: TcpStream| {
        // 每条消息等客户端处理完再发下一条，保证三次独立的读事件。
        for message in ["one", "two", "three"] {
            stream.write_all(message.as_bytes()).expect("对端写入");
            ack_rx
                .lock()
                .recv_timeout(Duration::from_secs(10))
                .expect("等待客户端确认");
        }
        drain_to_eof(stream)
    });

    let seen: Seen = Arc::default();
    let client = recording_client(peer.port(), &seen, ack_tx);
    client.start().expect("启动客户端");

    wait_until("收到三条响应", || client.traffic().responses_received == 3);
    let payloads: Vec<String> = seen.lock().iter().map(|(payload, _)| payload.clone()).collect();
    assert_eq!(payloads, ["one", "two", "three"]);
    assert_eq!(client.traffic().requests_sent, 0);
    assert_eq!(client.status().inbound, Some(HandlerState::Active));

    client.stop().expect("停止客户端");
    assert_eq!(peer.finish(), "");
}

#[test]
fn echoed_request_is_received_on_a_named_worker() {
    let peer = ScriptedPeer::spawn(1, |mut stream: TcpStream| {
        let mut buf = [0_u8; 5];
        stream.read_exact(&mut buf).expect("读取请求");
        stream.write_all(&buf).expect("回显");
        drain_to_eof(stream)
    });

    let (ack_tx, ack_rx) = mpsc::channel();
    let seen: Seen = Arc::default();
    let client = recording_client(peer.port(), &seen, ack_tx);
    client.start().expect("启动客户端");
    assert!(client.send_to_server("hello"));
    ack_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("等待回显");

    let traffic = client.traffic();
    assert_eq!(traffic.requests_sent, 1);
    assert_eq!(traffic.responses_received, 1);
    let (payload, worker) = seen.lock()[0].clone();
    assert_eq!(payload, "hello");
    assert!(worker.starts_with("client-"), "worker thread name: {worker}");

    let status = client.status();
    assert!(status.running);
    assert_eq!(status.host, "127.0.0.1");
    assert_eq!(status.traffic, traffic);

    client.stop().expect("停止客户端");
    peer.finish();
}

#[test]
fn status_serializes_to_json() {
    let peer = ScriptedPeer::spawn(1, drain_to_eof);
    let client = TinyTcpClient::new(loopback_config(peer.port())).expect("构造客户端");
    client.start().expect("启动客户端");
    wait_until("入站处理器激活", || {
        client.status().inbound == Some(HandlerState::Active)
    });

    let json = serde_json::to_value(client.status()).expect("序列化状态");
    assert_eq!(json["id"], client.id());
    assert_eq!(json["running"], true);
    assert_eq!(json["port"], peer.port());
    assert_eq!(json["inbound"], "active");
    assert_eq!(json["traffic"]["requests_sent"], 0);

    client.stop().expect("停止客户端");
    peer.finish();
}
