use crate::error::ConfigError;
use serde::Deserialize;
use socket2::SockRef;
use std::{io, path::Path, time::Duration};
use tokio::net::TcpStream as TokioTcpStream;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9999;
pub const DEFAULT_WORKER_THREADS: usize = 2;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "client";

/// 客户端配置：目标地址、工作线程数、建连超时与套接字选项。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 所有字段在构造客户端时固定，运行期不支持热更新，避免生命周期中途
///   出现“池大小与连接目标不一致”的状态；
/// - 同时支持 TOML 文本与代码内构造，便于测试与部署复用同一份默认值。
///
/// ## 契约 (What)
/// - 缺省值：`localhost:9999`、2 个工作线程、5000 ms 建连超时、线程名前缀 `client`；
/// - TOML 中建连超时以 `connect_timeout_ms` 表示，`SO_LINGER` 以 `linger_ms` 表示；
/// - **前置条件**：交给客户端前应通过 [`ClientConfig::validate`]，客户端构造时也会再次校验。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    host: String,
    port: u16,
    worker_threads: usize,
    connect_timeout_ms: u64,
    thread_name_prefix: String,
    nodelay: bool,
    linger_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            worker_threads: DEFAULT_WORKER_THREADS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_owned(),
            nodelay: false,
            linger_ms: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载配置。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 设置 `SO_LINGER`；毫秒精度，Linux 内核会取整到秒。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger_ms = linger.map(|value| u64::try_from(value.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions::new()
            .with_nodelay(self.nodelay)
            .with_linger(self.linger_ms.map(Duration::from_millis))
    }

    /// 校验字段取值。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                reason: "must not be empty",
            });
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "must be a concrete remote port",
            });
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: "must be at least 1",
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "connect_timeout_ms",
                reason: "must be greater than zero",
            });
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "thread_name_prefix",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// 建连后立即落地的套接字选项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将 `TCP_NODELAY` 与 `SO_LINGER` 显式配置化，避免调用方直接操作 `socket2`
///   或平台相关常量。
///
/// ## 契约说明（What）
/// - `nodelay`：关闭 Nagle 算法，小包立即发送；
/// - `linger`：`Some(dur)` 时关闭阶段最多等待 `dur`，超时后以 RST 释放；`None` 遵循内核默认；
/// - **后置条件**：`apply` 返回 `Ok(())` 时选项均已生效，失败时部分选项可能已生效。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketOptions {
    nodelay: bool,
    linger: Option<Duration>,
}

impl SocketOptions {
    pub const fn new() -> Self {
        Self {
            nodelay: false,
            linger: None,
        }
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub(crate) fn apply(&self, stream: &TokioTcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        let sock = SockRef::from(stream);
        sock.set_linger(self.linger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.host(), "localhost");
        assert_eq!(config.port(), 9999);
        assert_eq!(config.worker_threads(), 2);
        assert_eq!(config.connect_timeout(), Duration::from_millis(5000));
        assert_eq!(config.thread_name_prefix(), "client");
        assert_eq!(config.socket_options(), SocketOptions::new());
        config.validate().expect("默认配置必须合法");
    }

    #[test]
    fn toml_overrides_only_listed_fields() {
        let config = ClientConfig::from_toml_str(
            r#"
            host = "127.0.0.1"
            port = 7000
            connect_timeout_ms = 250
            linger_ms = 1000
            "#,
        )
        .expect("parse config");
        assert_eq!(config.host(), "127.0.0.1");
        assert_eq!(config.port(), 7000);
        assert_eq!(config.worker_threads(), DEFAULT_WORKER_THREADS);
        assert_eq!(config.connect_timeout(), Duration::from_millis(250));
        assert_eq!(
            config.socket_options().linger(),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ClientConfig::from_toml_str("hots = \"typo\"").expect_err("typo must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_workers_fail_validation() {
        let err = ClientConfig::from_toml_str("worker_threads = 0").expect_err("must fail");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "worker_threads",
                ..
            }
        ));
    }

    #[test]
    fn builder_methods_compose() {
        let config = ClientConfig::new()
            .with_host("example.test")
            .with_port(1)
            .with_worker_threads(4)
            .with_connect_timeout(Duration::from_millis(10))
            .with_thread_name_prefix("edge")
            .with_nodelay(true);
        assert_eq!(config.worker_threads(), 4);
        assert_eq!(config.thread_name_prefix(), "edge");
        assert!(config.socket_options().nodelay());
        assert!(config.validate().is_ok());
        assert!(config.with_port(0).validate().is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ClientConfig::load("/nonexistent/tinytcp.toml").expect_err("missing file");
        assert!(err.to_string().contains("/nonexistent/tinytcp.toml"));
    }

    #[test]
    fn load_reads_toml_file() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("tinytcp-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 8123\nnodelay = true\n")?;
        let loaded = ClientConfig::load(&path);
        std::fs::remove_file(&path)?;
        let config = loaded?;
        assert_eq!(config.port(), 8123);
        assert_eq!(config.host(), DEFAULT_HOST);
        assert!(config.socket_options().nodelay());
        Ok(())
    }
}
