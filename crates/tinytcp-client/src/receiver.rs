use tracing::info;

/// 服务端响应的扩展点。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 客户端本身不理解载荷语义；每次入站读取解码后的文本都会交给该监听器，
///   由使用方决定如何处理。
///
/// ## 契约 (What)
/// - `receive_from_server` 在工作线程上同步调用，`client_id` 为所属客户端标识；
/// - 默认实现仅记录 INFO 日志；
/// - 实现中 panic 会被视为入站故障：记录日志并关闭连接，线程池不受影响。
///
/// 任意 `Fn(&str, &str)` 闭包都可以直接作为监听器使用。
pub trait ServerResponseListener: Send + Sync + 'static {
    fn receive_from_server(&self, client_id: &str, payload: &str) {
        info!(client_id, payload, "client received from server");
    }
}

/// 只记录日志的默认监听器。
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingListener;

impl ServerResponseListener for LoggingListener {}

impl<F> ServerResponseListener for F
where
    F: Fn(&str, &str) + Send + Sync + 'static,
{
    fn receive_from_server(&self, client_id: &str, payload: &str) {
        self(client_id, payload);
    }
}
