use crate::{
    config::ClientConfig,
    connection::{ConnectOptions, InboundHandler, TcpConnection},
    counters::{TrafficCounters, TrafficSnapshot},
    error::{ClientError, ConnectionError, PoolError, inactive_error},
    handler::{ClientInboundHandler, HandlerState},
    pool::{PoolConfig, PoolHandle, WorkerPool},
    receiver::{LoggingListener, ServerResponseListener},
    util::elapsed_millis,
};
use arc_swap::ArcSwapOption;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 客户端与入站处理器共享的不可变核心：标识、计数与响应监听器。
pub(crate) struct ClientCore {
    id: String,
    counters: TrafficCounters,
    listener: Arc<dyn ServerResponseListener>,
}

impl ClientCore {
    pub(crate) fn new(
        id: String,
        counters: TrafficCounters,
        listener: Arc<dyn ServerResponseListener>,
    ) -> Self {
        Self {
            id,
            counters,
            listener,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn counters(&self) -> &TrafficCounters {
        &self.counters
    }

    pub(crate) fn receive_from_server(&self, payload: &str) {
        self.listener.receive_from_server(&self.id, payload);
    }
}

/// 一次 `start` 成功后持有的运行期资源。
struct Session {
    connection: TcpConnection,
    pool: PoolHandle,
    handler: Arc<ClientInboundHandler>,
}

/// 客户端运行状态快照。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClientStatus {
    pub id: String,
    pub running: bool,
    pub host: String,
    pub port: u16,
    pub inbound: Option<HandlerState>,
    pub traffic: TrafficSnapshot,
}

/// 受管 TCP 客户端：一条出站连接、一个 IO 工作线程池、两组流量计数。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 对调用方暴露同步的 `start`/`stop`/`send_to_server`，把异步 IO 全部收敛到
///   内部工作线程池；调用方无需持有运行时即可使用。
///
/// ## 逻辑 (How)
/// - `start`/`stop` 在同一把 `parking_lot::Mutex` 下串行执行，互斥范围限于单个实例；
/// - 运行期资源（连接句柄 + 池句柄）放在 `ArcSwapOption` 中，发送路径无锁读取，
///   多个发送线程共享同一连接，写入的串行化由连接句柄负责；
/// - `is_running` 同时检查运行标志与连接是否仍处于活跃状态，连接因故障或对端关闭
///   失效后立即返回 `false`。
///
/// ## 契约 (What)
/// - `id`：构造时生成的 UUID，生命周期内（包括多次启停）不变；
/// - `start`：建连失败统一返回 [`ClientError::Connect`]，客户端保持未运行且不残留线程；
///   已在运行时重复调用为记录告警的空操作；
/// - `stop`：未运行时记录提示但仍执行完整的释放流程；关闭失败时向上返回错误；
/// - `send_to_server`：返回“写操作已结束”，不区分成功与失败；
///   `send_to_server_checked` 返回实际写入结果；
/// - **前置条件**：所有同步入口都会阻塞当前线程，不能在 Tokio 运行时上下文中调用。
///
/// ## 注意事项 (Trade-offs)
/// - `stop` 内部的等待没有超时；发送路径的等待同样没有超时，
///   若底层写入永不完成，调用线程会一直阻塞。
pub struct TinyTcpClient {
    core: Arc<ClientCore>,
    config: ClientConfig,
    running: AtomicBool,
    session: ArcSwapOption<Session>,
    lifecycle: Mutex<Option<WorkerPool>>,
}

impl TinyTcpClient {
    /// 以默认监听器构造客户端。
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// 客户端标识。
    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 客户端是否处于运行状态且连接仍然活跃。
    pub fn is_running(&self) -> bool {
        self.active_session().is_some()
    }

    /// 启动客户端：创建线程池、建立连接并标记为运行中。
    pub fn start(&self) -> Result<(), ClientError> {
        let mut pool_slot = self.lifecycle.lock();
        if self.is_running() {
            warn!(client_id = self.id(), "client is already running, start ignored");
            return Ok(());
        }
        if pool_slot.is_some() {
            debug!(client_id = self.id(), "releasing resources of a dead connection before restart");
            self.teardown(&mut pool_slot)?;
            self.running.store(false, Ordering::SeqCst);
        }

        let started = Instant::now();
        info!(client_id = self.id(), "starting tinytcp client");
        let pool = WorkerPool::new(&PoolConfig::from(&self.config))?;
        let handler = Arc::new(ClientInboundHandler::new(Arc::clone(&self.core)));

        let connected = {
            let handle = pool.handle().clone();
            let host = self.config.host().to_owned();
            let port = self.config.port();
            let options = ConnectOptions {
                timeout: self.config.connect_timeout(),
                socket: self.config.socket_options(),
            };
            let inbound: Arc<dyn InboundHandler> = handler.clone();
            pool.handle().block_on_task("connect", async move {
                TcpConnection::connect(&host, port, options, inbound, &handle).await
            })
        };

        let connection = match connected {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => {
                self.abort_start(pool, None, started, &err);
                return Err(ClientError::Connect(err));
            }
            Err(err) => {
                pool.shutdown();
                return Err(err.into());
            }
        };

        if !(connection.is_open() && connection.is_active()) {
            let err = inactive_error();
            self.abort_start(pool, Some(connection), started, &err);
            return Err(ClientError::Connect(err));
        }

        self.session.store(Some(Arc::new(Session {
            connection,
            pool: pool.handle().clone(),
            handler,
        })));
        *pool_slot = Some(pool);
        self.running.store(true, Ordering::SeqCst);
        info!(
            client_id = self.id(),
            elapsed_ms = elapsed_millis(started),
            "started tinytcp client"
        );
        Ok(())
    }

    /// 停止客户端：关闭连接、优雅关闭线程池并清除运行标志。
    pub fn stop(&self) -> Result<(), ClientError> {
        let mut pool_slot = self.lifecycle.lock();
        let started = Instant::now();
        if !self.is_running() {
            info!(client_id = self.id(), "cannot stop an already stopped client");
        }
        let traffic = self.core.counters().snapshot();
        info!(
            client_id = self.id(),
            requests_sent = traffic.requests_sent,
            responses_received = traffic.responses_received,
            "stopping tinytcp client"
        );
        self.teardown(&mut pool_slot)?;
        self.running.store(false, Ordering::SeqCst);
        info!(
            client_id = self.id(),
            elapsed_ms = elapsed_millis(started),
            "stopped tinytcp client"
        );
        Ok(())
    }

    /// 同步发送文本载荷，返回写操作是否已结束（不代表写入成功）。
    pub fn send_to_server(&self, payload: &str) -> bool {
        match self.write_blocking(payload) {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                warn!(
                    client_id = self.id(),
                    code = err.code(),
                    error = %err,
                    "write completed with failure"
                );
                true
            }
            Err(ClientError::Pool(
                PoolError::TaskPanicked { .. } | PoolError::TaskCancelled { .. },
            )) => true,
            Err(_) => false,
        }
    }

    /// 同步发送文本载荷，返回实际写入的字节数或失败原因。
    pub fn send_to_server_checked(&self, payload: &str) -> Result<usize, ClientError> {
        self.write_blocking(payload)?.map_err(ClientError::Write)
    }

    /// 入站文本的转发入口，委托给构造时配置的 [`ServerResponseListener`]。
    pub fn receive_from_server(&self, payload: &str) {
        self.core.receive_from_server(payload);
    }

    pub fn traffic(&self) -> TrafficSnapshot {
        self.core.counters().snapshot()
    }

    pub fn status(&self) -> ClientStatus {
        let session = self.session.load_full();
        ClientStatus {
            id: self.id().to_owned(),
            running: self.is_running(),
            host: self.config.host().to_owned(),
            port: self.config.port(),
            inbound: session.map(|session| session.handler.state()),
            traffic: self.traffic(),
        }
    }

    fn active_session(&self) -> Option<Arc<Session>> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        self.session
            .load_full()
            .filter(|session| session.connection.is_active())
    }

    /// 外层错误表示写操作未能进入终态，内层为写操作本身的结果。
    fn write_blocking(
        &self,
        payload: &str,
    ) -> Result<Result<usize, ConnectionError>, ClientError> {
        let Some(session) = self.active_session() else {
            error!(client_id = self.id(), "cannot pipe a request down a stopped client");
            return Err(ClientError::NotRunning {
                client_id: self.id().to_owned(),
            });
        };
        self.core.counters().record_request();
        info!(client_id = self.id(), payload, "client sending to server");
        let connection = session.connection.clone();
        let bytes = Bytes::copy_from_slice(payload.as_bytes());
        let outcome = session
            .pool
            .block_on_task("write", async move { connection.write(bytes).await })?;
        Ok(outcome)
    }

    /// 按“关闭连接 → 关闭线程池 → 再次等待关闭完成”的顺序释放运行期资源。
    fn teardown(&self, pool_slot: &mut Option<WorkerPool>) -> Result<(), ClientError> {
        let session = self.session.swap(None);
        let pool = pool_slot.take();
        if let (Some(session), Some(pool)) = (&session, &pool) {
            let connection = session.connection.clone();
            pool.handle()
                .block_on_task("close", async move { connection.close().await })?
                .map_err(ClientError::Close)?;
        }
        if let Some(pool) = pool {
            pool.shutdown();
        }
        if let Some(session) = session {
            futures::executor::block_on(session.connection.closed());
        }
        Ok(())
    }

    fn abort_start(
        &self,
        pool: WorkerPool,
        connection: Option<TcpConnection>,
        started: Instant,
        err: &ConnectionError,
    ) {
        info!(
            client_id = self.id(),
            elapsed_ms = elapsed_millis(started),
            code = err.code(),
            error = %err,
            "failed to start tinytcp client"
        );
        if let Some(connection) = connection {
            let closing = connection.clone();
            if let Ok(Err(close_err)) = pool
                .handle()
                .block_on_task("close", async move { closing.close().await })
            {
                debug!(client_id = self.id(), error = %close_err, "close after failed start");
            }
        }
        pool.shutdown();
    }
}

impl fmt::Debug for TinyTcpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TinyTcpClient")
            .field("id", &self.core.id)
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for TinyTcpClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.swap(None) {
            debug!(client_id = self.id(), "client dropped while running, closing in background");
            session.connection.request_close();
        }
    }
}

/// [`TinyTcpClient`] 的构造器。
pub struct ClientBuilder {
    config: ClientConfig,
    listener: Arc<dyn ServerResponseListener>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            listener: Arc::new(LoggingListener),
        }
    }
}

impl ClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config = self.config.with_host(host);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config = self.config.with_port(port);
        self
    }

    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.config = self.config.with_worker_threads(worker_threads);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_connect_timeout(timeout);
        self
    }

    /// 替换默认的日志监听器。
    pub fn listener(mut self, listener: impl ServerResponseListener) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    /// 校验配置并生成带新标识的客户端。
    pub fn build(self) -> Result<TinyTcpClient, ClientError> {
        self.config.validate()?;
        let id = Uuid::new_v4().to_string();
        debug!(client_id = %id, host = self.config.host(), port = self.config.port(), "client created");
        Ok(TinyTcpClient {
            core: Arc::new(ClientCore::new(id, TrafficCounters::new(), self.listener)),
            config: self.config,
            running: AtomicBool::new(false),
            session: ArcSwapOption::empty(),
            lifecycle: Mutex::new(None),
        })
    }
}
