#![doc = r#"
# tinytcp-client

## 设计动机（Why）
- **定位**：受管 TCP 客户端，对外暴露同步的 `start`/`stop`/`send_to_server`，
  把全部异步 IO 收敛到自有的 Tokio 工作线程池。
- **架构角色**：连接层（[`TcpConnection`]）负责单条出站连接的读写与关闭；
  线程池（[`WorkerPool`]）负责任务调度与故障隔离；客户端（[`TinyTcpClient`]）
  负责生命周期、计数与入站文本的转发。
- **扩展点**：入站文本交给 [`ServerResponseListener`]，默认实现只记录日志。

## 核心契约（What）
- 每个客户端持有一个构造时生成的 UUID 标识，启停多次保持不变；
- 请求计数在进入写阶段时递增，响应计数在每次入站读事件时递增；
- 建连失败返回带稳定错误码的 [`ClientError::Connect`]，客户端保持未运行；
- 工作线程中的 panic 以 ERROR 级别记录，不会终止线程池或进程。

## 实现策略（How）
- 线程池基于 `tokio::runtime::Builder::new_multi_thread`，线程名为 `<prefix>-<n>`；
- 连接基于 `TcpStream::into_split`：写半部受异步互斥保护，读半部由独立任务循环读取；
- 同步入口通过 `Handle::block_on` 等待池内任务结束，因此不能在运行时上下文中调用。

## 风险与考量（Trade-offs）
- 入站数据按每次读取的字节块直接解码，不做消息分帧；
- 同步等待没有超时，底层写入阻塞时调用线程随之阻塞。
"#]

mod client;
mod config;
mod connection;
mod counters;
mod error;
mod handler;
pub mod observability;
mod pool;
mod receiver;
mod util;

pub use client::{ClientBuilder, ClientStatus, TinyTcpClient};
pub use config::{
    ClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_THREAD_NAME_PREFIX,
    DEFAULT_WORKER_THREADS, SocketOptions,
};
pub use connection::{ConnectOptions, ConnectionState, InboundFault, InboundHandler, TcpConnection};
pub use counters::{TrafficCounters, TrafficSnapshot};
pub use error::{ClientError, ConfigError, ConnectionError, ErrorCategory, PoolError};
pub use handler::HandlerState;
pub use pool::{PoolConfig, PoolHandle, TaskHandle, WorkerPool};
pub use receiver::{LoggingListener, ServerResponseListener};
