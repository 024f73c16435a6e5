use crate::{
    client::ClientCore,
    connection::{InboundFault, InboundHandler, TcpConnection},
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tracing::{error, info};

/// 入站处理器的状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HandlerState {
    Inactive = 0,
    Active = 1,
    Closed = 2,
}

impl HandlerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HandlerState::Inactive,
            1 => HandlerState::Active,
            _ => HandlerState::Closed,
        }
    }
}

/// 客户端绑定在连接上的入站处理器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把连接层的原始事件翻译为客户端语义：计数、解码、转发给响应监听器。
///
/// ## 逻辑 (How)
/// - `Inactive --active--> Active --read--> Active --fault/inactive--> Closed`；
/// - 读事件先递增响应计数，再按 UTF-8 有损解码并交给 [`ClientCore`] 转发；
/// - 故障只记录日志并请求关闭连接，不向上抛出。
///
/// ## 契约 (What)
/// - 所有方法都在工作线程上执行；
/// - 每个读事件恰好递增一次响应计数，即使监听器随后 panic。
pub(crate) struct ClientInboundHandler {
    core: Arc<ClientCore>,
    state: AtomicU8,
}

impl ClientInboundHandler {
    pub(crate) fn new(core: Arc<ClientCore>) -> Self {
        Self {
            core,
            state: AtomicU8::new(HandlerState::Inactive as u8),
        }
    }

    pub(crate) fn state(&self) -> HandlerState {
        HandlerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn close(&self) {
        self.state.store(HandlerState::Closed as u8, Ordering::SeqCst);
    }

    /// 先计数再转发：监听器 panic 时本次读事件也已计入。
    fn handle_read(&self, payload: &[u8]) {
        self.core.counters().record_response();
        let text = String::from_utf8_lossy(payload);
        self.core.receive_from_server(&text);
    }
}

impl InboundHandler for ClientInboundHandler {
    fn on_channel_active(&self, connection: &TcpConnection) {
        let activated = self
            .state
            .compare_exchange(
                HandlerState::Inactive as u8,
                HandlerState::Active as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if activated {
            info!(
                client_id = self.core.id(),
                peer_addr = %connection.peer_addr(),
                "client is active"
            );
        }
    }

    fn on_channel_read(&self, _connection: &TcpConnection, payload: Bytes) {
        self.handle_read(&payload);
    }

    fn on_exception(&self, connection: &TcpConnection, fault: &InboundFault) {
        error!(
            client_id = self.core.id(),
            peer_addr = %connection.peer_addr(),
            fault = %fault,
            "inbound fault, closing connection"
        );
        self.close();
        connection.request_close();
    }

    fn on_channel_inactive(&self, _connection: &TcpConnection) {
        self.close();
        info!(client_id = self.core.id(), "client connection inactive");
    }
}
