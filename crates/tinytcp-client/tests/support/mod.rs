//! 集成测试共用的环回对端。
//!
//! 对端运行在普通线程上，使用标准库阻塞 IO；客户端的同步入口不能在 Tokio 运行时内调用，
//! 因此所有集成测试都是普通 `#[test]`。
#![allow(dead_code)]

use std::{
    io::Read,
    net::{TcpListener, TcpStream},
    thread::{self, JoinHandle},
    time::Duration,
};

use tinytcp_client::{ClientConfig, TinyTcpClient};

/// 绑定在 `127.0.0.1` 临时端口上的脚本化对端。
pub struct ScriptedPeer<T> {
    port: u16,
    worker: JoinHandle<T>,
}

impl<T: Send + 'static> ScriptedPeer<T> {
    /// 依次接受 `connections` 条连接，每条连接交给 `script` 处理。
    pub fn spawn<F>(connections: usize, script: F) -> Self
    where
        F: Fn(TcpStream) -> T + Send + 'static,
        T: Default,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("绑定环回端口");
        let port = listener.local_addr().expect("读取本地地址").port();
        let worker = thread::spawn(move || {
            let mut last = T::default();
            for _ in 0..connections {
                let (stream, _) = listener.accept().expect("接受连接");
                stream
                    .set_read_timeout(Some(Duration::from_secs(10)))
                    .expect("设置读超时");
                last = script(stream);
            }
            last
        });
        Self { port, worker }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 等待脚本执行完毕并取回最后一条连接的结果。
    pub fn finish(self) -> T {
        self.worker.join().expect("对端线程不应 panic")
    }
}

/// 读到对端 FIN 为止，返回收到的文本。
pub fn drain_to_eof(mut stream: TcpStream) -> String {
    let mut received = Vec::new();
    stream.read_to_end(&mut received).expect("读取到 EOF");
    String::from_utf8(received).expect("UTF-8 文本")
}

/// 返回一个当前没有监听者的本地端口。
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("绑定环回端口");
    listener.local_addr().expect("读取本地地址").port()
}

pub fn loopback_config(port: u16) -> ClientConfig {
    ClientConfig::new()
        .with_host("127.0.0.1")
        .with_port(port)
        .with_connect_timeout(Duration::from_secs(2))
}

pub fn client_for(port: u16) -> TinyTcpClient {
    TinyTcpClient::new(loopback_config(port)).expect("构造客户端")
}

/// 轮询直到条件成立，超时则 panic。
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("等待超时: {what}");
}
