use std::borrow::Cow;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: "tinytcp.connection.resolve_failed",
    message: "tcp resolve",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "tinytcp.connection.connect_failed",
    message: "tcp connect",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "tinytcp.connection.configure_failed",
    message: "tcp configure",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "tinytcp.connection.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "tinytcp.connection.write_failed",
    message: "tcp write",
};
pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: "tinytcp.connection.shutdown_failed",
    message: "tcp shutdown",
};

const TIMEOUT_CODE: &str = "tinytcp.connection.timeout";
const CLOSED_CODE: &str = "tinytcp.connection.closed";
const INACTIVE_CODE: &str = "tinytcp.connection.inactive";
const REJECTED_CODE: &str = "tinytcp.connection.rejected";

/// 错误分类，供调用方决定是否重试或直接放弃。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 连接阶段的失败既可能是对端暂未监听（可重试），也可能是参数错误（不可重试）；
///   统一分类后，调用方无需解析 `io::ErrorKind` 即可决定后续策略。
///
/// ## 契约 (What)
/// - `Retryable { after }`：建议在 `after` 之后重试；
/// - `NonRetryable`：重试不会改变结果；
/// - `Timeout`：操作超过截止时间；
/// - `Closed`：连接已关闭或写半部已释放。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Retryable { after: Duration },
    NonRetryable,
    Timeout,
    Closed,
}

/// 连接句柄层面的结构化错误：稳定错误码 + 分类 + 可选底层 IO 原因。
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConnectionError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    #[source]
    source: Option<io::Error>,
}

impl ConnectionError {
    pub(crate) fn new(
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            category,
            source: None,
        }
    }

    fn with_source(mut self, source: io::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 稳定错误码，形如 `tinytcp.connection.<reason>`。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 面向排障人员的描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn is_timeout(&self) -> bool {
        self.category == ErrorCategory::Timeout
    }

    /// 底层 IO 错误类型（若有）。
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        self.source.as_ref().map(io::Error::kind)
    }
}

/// 将 IO 错误映射为连接错误，并附带错误分类。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> ConnectionError {
    let category = categorize_io_error(&error);
    ConnectionError::new(kind.code, format!("{}: {}", kind.message, error), category)
        .with_source(error)
}

/// 构造超时错误。
pub(crate) fn timeout_error(kind: OperationKind, after: Duration) -> ConnectionError {
    let message = format!("{} timed out after {} ms", kind.message, after.as_millis());
    ConnectionError::new(TIMEOUT_CODE, message, ErrorCategory::Timeout)
}

/// 构造“连接已关闭”错误。
pub(crate) fn closed_error(kind: OperationKind) -> ConnectionError {
    let message = format!("{} on a closed connection", kind.message);
    ConnectionError::new(CLOSED_CODE, message, ErrorCategory::Closed)
}

/// 建连返回后句柄并未处于 open + active 状态。
pub(crate) fn inactive_error() -> ConnectionError {
    ConnectionError::new(
        INACTIVE_CODE,
        "tcp connect completed but the connection is not active",
        ErrorCategory::Retryable {
            after: Duration::from_millis(50),
        },
    )
}

/// 工作线程池拒绝承载连接任务。
pub(crate) fn rejected_error(kind: OperationKind, error: &PoolError) -> ConnectionError {
    let message = format!("{} rejected: {}", kind.message, error);
    ConnectionError::new(REJECTED_CODE, message, ErrorCategory::Closed)
}

/// 主机名解析成功但没有任何可用地址。
pub(crate) fn no_address_error(host: &str, port: u16) -> ConnectionError {
    ConnectionError::new(
        RESOLVE.code,
        format!("{}: no address found for {host}:{port}", RESOLVE.message),
        ErrorCategory::NonRetryable,
    )
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::WouldBlock | ErrorKind::Interrupted => ErrorCategory::Retryable {
            after: Duration::from_millis(5),
        },
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable => ErrorCategory::Retryable {
            after: Duration::from_millis(50),
        },
        ErrorKind::NotConnected | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => {
            ErrorCategory::Closed
        }
        _ => ErrorCategory::NonRetryable,
    }
}

/// 工作线程池的错误。
#[derive(Debug, Error)]
pub enum PoolError {
    /// 构建底层 Tokio 运行时失败。
    #[error("failed to build worker pool runtime: {0}")]
    Build(#[source] io::Error),
    /// 池已开始关闭，不再接受新任务。
    #[error("worker pool `{prefix}` is shutting down, task `{task}` rejected")]
    ShuttingDown {
        prefix: String,
        task: Cow<'static, str>,
    },
    /// 任务在故障边界内 panic，结果不可用。
    #[error("task `{task}` panicked on the worker pool")]
    TaskPanicked { task: Cow<'static, str> },
    /// 任务在完成前随运行时一同被取消。
    #[error("task `{task}` was cancelled before completion")]
    TaskCancelled { task: Cow<'static, str> },
}

impl PoolError {
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::Build(_) => "tinytcp.pool.build_failed",
            PoolError::ShuttingDown { .. } => "tinytcp.pool.shutting_down",
            PoolError::TaskPanicked { .. } => "tinytcp.pool.task_panicked",
            PoolError::TaskCancelled { .. } => "tinytcp.pool.task_cancelled",
        }
    }
}

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
    #[error("failed to read configuration file `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 客户端对外暴露的错误。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 生命周期入口（`start`/`stop`）以及带结果的发送路径需要一个统一的返回类型，
///   让调用方自行决定“拒绝连接”“超时”等情况是否致命。
///
/// ## 契约 (What)
/// - `Connect`：建连失败，客户端保持未运行；
/// - `Write`：写入失败，仅由 `send_to_server_checked` 返回；
/// - `Close`：停机阶段关闭连接失败，客户端可能处于部分释放的状态；
/// - `NotRunning`：在未运行的客户端上发送；
/// - `Pool`/`Config`：透传下层错误。
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(#[source] ConnectionError),
    #[error("write failed: {0}")]
    Write(#[source] ConnectionError),
    #[error("close failed: {0}")]
    Close(#[source] ConnectionError),
    #[error("client `{client_id}` is not running")]
    NotRunning { client_id: String },
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// 稳定错误码；连接类错误沿用底层 [`ConnectionError::code`]。
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Connect(err) | ClientError::Write(err) | ClientError::Close(err) => {
                err.code()
            }
            ClientError::NotRunning { .. } => "tinytcp.client.not_running",
            ClientError::Pool(err) => err.code(),
            ClientError::Config(_) => "tinytcp.client.invalid_config",
        }
    }
}
