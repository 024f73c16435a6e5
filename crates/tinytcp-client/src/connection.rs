use crate::{
    config::SocketOptions,
    error::{
        CONFIGURE, CONNECT, ConnectionError, READ, RESOLVE, SHUTDOWN, WRITE, closed_error,
        map_io_error, no_address_error, rejected_error,
    },
    pool::PoolHandle,
    util::{panic_message, run_until_deadline},
};
use bytes::{Bytes, BytesMut};
use std::{
    fmt, io,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread,
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream as TokioTcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex as AsyncMutex, oneshot, watch},
    time::Instant,
};
use tracing::{debug, warn};

const READ_BUFFER_CAPACITY: usize = 8 * 1024;
const RESOLVER_THREAD_NAME: &str = "tinytcp-resolver";

/// 连接句柄的生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Unconnected = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Unconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// 入站事件中的故障。
#[derive(Debug)]
pub enum InboundFault {
    /// 读路径上的 IO 错误。
    Io(ConnectionError),
    /// 事件回调自身 panic。
    Panicked {
        event: &'static str,
        message: String,
    },
}

impl fmt::Display for InboundFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundFault::Io(err) => write!(f, "{err}"),
            InboundFault::Panicked { event, message } => {
                write!(f, "{event} callback panicked: {message}")
            }
        }
    }
}

/// 绑定在连接上的入站事件回调。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 将“连接就绪”“收到数据”“出现故障”“连接失效”四类事件从读循环中解耦，
///   连接句柄只负责 IO，事件语义由上层（计数、日志、转发）决定。
///
/// ## 契约 (What)
/// - 全部回调都在工作线程上同步执行，调用方线程不会进入这些方法；
/// - `on_channel_active` 在建连成功后恰好触发一次；
/// - `on_channel_read` 每次套接字读取触发一次，载荷为本次读到的原始字节，
///   不做任何分帧；
/// - `on_exception` 接收读错误或回调 panic，实现方通常记录日志并调用
///   [`TcpConnection::request_close`]；
/// - `on_channel_inactive` 在读循环退出、连接关闭之后触发。
///
/// ## 注意事项 (Trade-offs)
/// - 回调阻塞会占住一个 worker，长耗时逻辑应转交其他执行器。
pub trait InboundHandler: Send + Sync + 'static {
    fn on_channel_active(&self, connection: &TcpConnection);

    fn on_channel_read(&self, connection: &TcpConnection, payload: Bytes);

    fn on_exception(&self, connection: &TcpConnection, fault: &InboundFault);

    fn on_channel_inactive(&self, _connection: &TcpConnection) {}
}

/// 建连参数：整体超时与套接字选项。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    pub timeout: Duration,
    pub socket: SocketOptions,
}

#[derive(Debug)]
struct TcpConnectionInner {
    state: AtomicU8,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    closing: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl TcpConnectionInner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// 单条出站 TCP 连接的句柄。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 客户端只持有一条连接；句柄把“建连 → 读循环 → 写入 → 关闭”封装为可克隆的
///   共享对象，写入方与读循环各自持有引用，互不阻塞。
///
/// ## 逻辑 (How)
/// - 建连成功后把 `TcpStream` 拆为读/写半部：读半部交给池内的读循环任务，
///   写半部放入 `tokio::sync::Mutex`，多个并发写入在锁上排队，字节不会交错；
/// - `closing`/`closed` 两个 `watch` 通道分别表达“请求关闭”与“关闭完成”，
///   同步代码（事件回调）也能发出关闭请求；
/// - 状态机：`Connecting → Open → Closing → Closed`，只有第一个把状态从
///   `Open` 推进到 `Closing` 的调用者负责释放写半部。
///
/// ## 契约 (What)
/// - `connect`：在超时内解析并连接目标，成功后立即启动读循环；
/// - `write`：写满整个缓冲区，返回写入字节数；连接已关闭或写入期间收到关闭请求时
///   返回关闭类错误；
/// - `close`：发送 FIN 并标记关闭完成，可重复调用，后续调用等待首次关闭结束；
/// - `closed`：等待关闭完成信号。
///
/// ## 注意事项 (Trade-offs)
/// - 写锁在整个 `write_all` 期间持有；对端停止读取时写入会一直挂起，
///   直到关闭请求到达，届时已写出的部分字节不会回滚。
#[derive(Clone, Debug)]
pub struct TcpConnection {
    inner: Arc<TcpConnectionInner>,
}

impl TcpConnection {
    /// 在超时内建立到 `host:port` 的连接，并把读循环提交到 `pool`。
    pub async fn connect(
        host: &str,
        port: u16,
        options: ConnectOptions,
        handler: Arc<dyn InboundHandler>,
        pool: &PoolHandle,
    ) -> Result<Self, ConnectionError> {
        let deadline = Instant::now() + options.timeout;
        let addrs =
            run_until_deadline(RESOLVE, deadline, options.timeout, resolve(host, port)).await?;
        if addrs.is_empty() {
            return Err(no_address_error(host, port));
        }

        let stream =
            run_until_deadline(CONNECT, deadline, options.timeout, connect_first(&addrs)).await?;
        options
            .socket
            .apply(&stream)
            .map_err(|err| map_io_error(CONFIGURE, err))?;
        let local_addr = stream
            .local_addr()
            .map_err(|err| map_io_error(CONNECT, err))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|err| map_io_error(CONNECT, err))?;

        let (reader, writer) = stream.into_split();
        let connection = Self {
            inner: Arc::new(TcpConnectionInner {
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                writer: AsyncMutex::new(Some(writer)),
                closing: watch::Sender::new(false),
                closed: watch::Sender::new(false),
                local_addr,
                peer_addr,
            }),
        };

        let task = format!("tcp-read-{peer_addr}");
        if let Err(err) = pool.spawn(task, read_loop(connection.clone(), reader, handler)) {
            connection.inner.state.store(ConnectionState::Closed as u8, Ordering::SeqCst);
            connection.inner.closed.send_replace(true);
            return Err(rejected_error(CONNECT, &err));
        }
        connection.inner.transition(ConnectionState::Connecting, ConnectionState::Open);
        debug!(%local_addr, %peer_addr, "tcp connection established");
        Ok(connection)
    }

    /// 将整个缓冲区写入套接字；等锁与写入过程都会被关闭请求打断。
    pub async fn write(&self, payload: Bytes) -> Result<usize, ConnectionError> {
        if payload.is_empty() {
            return Ok(0);
        }
        let mut closing = self.inner.closing.subscribe();
        let mut guard = tokio::select! {
            biased;
            _ = close_requested(&mut closing) => return Err(closed_error(WRITE)),
            guard = self.inner.writer.lock() => guard,
        };
        let Some(writer) = guard.as_mut() else {
            return Err(closed_error(WRITE));
        };
        tokio::select! {
            biased;
            _ = close_requested(&mut closing) => Err(closed_error(WRITE)),
            result = writer.write_all(&payload) => result
                .map(|()| payload.len())
                .map_err(|err| map_io_error(WRITE, err)),
        }
    }

    /// 关闭连接并等待关闭完成。
    pub async fn close(&self) -> Result<(), ConnectionError> {
        self.inner.closing.send_replace(true);
        let owner = self
            .inner
            .transition(ConnectionState::Open, ConnectionState::Closing)
            || self
                .inner
                .transition(ConnectionState::Connecting, ConnectionState::Closing);
        if !owner {
            self.closed().await;
            return Ok(());
        }

        let writer = self.inner.writer.lock().await.take();
        let result = match writer {
            Some(mut writer) => match writer.shutdown().await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(map_io_error(SHUTDOWN, err)),
            },
            None => Ok(()),
        };
        self.inner
            .state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);
        self.inner.closed.send_replace(true);
        debug!(peer_addr = %self.inner.peer_addr, "tcp connection closed");
        result
    }

    /// 从同步上下文发出关闭请求，读循环会在下一轮检查时执行实际关闭。
    pub fn request_close(&self) {
        self.inner.closing.send_replace(true);
    }

    /// 等待关闭完成信号。
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// 句柄尚未进入 `Closed`。
    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing
        )
    }

    /// 句柄处于 `Open` 且未收到关闭请求。
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Open && !*self.inner.closing.borrow()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }
}

/// 关闭请求到达（或发送端已释放）时返回。
async fn close_requested(closing: &mut watch::Receiver<bool>) {
    while !*closing.borrow_and_update() {
        if closing.changed().await.is_err() {
            return;
        }
    }
}

/// 解析目标地址：IP 字面量直接使用，主机名交给独立的解析线程，
/// 工作线程池只保留配置数量的具名 worker。
async fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    let (tx, rx) = oneshot::channel::<io::Result<Vec<SocketAddr>>>();
    let target = (host.to_owned(), port);
    thread::Builder::new()
        .name(RESOLVER_THREAD_NAME.to_owned())
        .spawn(move || {
            let _ = tx.send(target.to_socket_addrs().map(Iterator::collect));
        })?;
    rx.await
        .unwrap_or_else(|_| Err(io::Error::other("address resolver exited without a result")))
}

async fn connect_first(addrs: &[SocketAddr]) -> io::Result<TokioTcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TokioTcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, error = %err, "tcp connect attempt failed");
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)))
}

/// 以 panic 隔离的方式执行一次事件回调；回调 panic 时转为 `on_exception` 并请求关闭。
fn dispatch(
    connection: &TcpConnection,
    handler: &dyn InboundHandler,
    event: &'static str,
    callback: impl FnOnce(),
) -> bool {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            let fault = InboundFault::Panicked {
                event,
                message: panic_message(payload.as_ref()),
            };
            report_fault(connection, handler, &fault);
            false
        }
    }
}

fn report_fault(connection: &TcpConnection, handler: &dyn InboundHandler, fault: &InboundFault) {
    if catch_unwind(AssertUnwindSafe(|| handler.on_exception(connection, fault))).is_err() {
        warn!(peer_addr = %connection.peer_addr(), "exception callback panicked");
    }
    connection.request_close();
}

async fn read_loop(
    connection: TcpConnection,
    mut reader: OwnedReadHalf,
    handler: Arc<dyn InboundHandler>,
) {
    let handler = handler.as_ref();
    let mut closing = connection.inner.closing.subscribe();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);

    dispatch(&connection, handler, "active", || {
        handler.on_channel_active(&connection);
    });

    loop {
        if *closing.borrow_and_update() {
            break;
        }
        tokio::select! {
            biased;
            _ = closing.changed() => continue,
            result = reader.read_buf(&mut buf) => match result {
                Ok(0) => {
                    debug!(peer_addr = %connection.peer_addr(), "peer closed the connection");
                    break;
                }
                Ok(_) => {
                    let payload = buf.split().freeze();
                    buf.reserve(READ_BUFFER_CAPACITY);
                    dispatch(&connection, handler, "read", || {
                        handler.on_channel_read(&connection, payload);
                    });
                }
                Err(err) => {
                    let fault = InboundFault::Io(map_io_error(READ, err));
                    report_fault(&connection, handler, &fault);
                    break;
                }
            }
        }
    }

    drop(reader);
    if let Err(err) = connection.close().await {
        warn!(code = err.code(), error = %err, "failed to close connection after read loop exit");
    }
    dispatch(&connection, handler, "inactive", || {
        handler.on_channel_inactive(&connection);
    });
}
