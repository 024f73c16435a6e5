use crate::error::{ConnectionError, OperationKind, map_io_error, timeout_error};
use std::any::Any;
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};
use tokio::time::{Instant as TokioInstant, timeout_at};

/// 在截止时间前执行 IO Future，超时映射为 [`ConnectionError`] 的超时分类。
///
/// 多个阶段共享同一截止时间时，`budget` 为整体配置的时长，超时文案始终报告它，
/// 而不是某一阶段剩余的时间。
pub(crate) async fn run_until_deadline<F, T>(
    kind: OperationKind,
    deadline: TokioInstant,
    budget: Duration,
    future: F,
) -> Result<T, ConnectionError>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout_at(deadline, future).await {
        Ok(result) => result.map_err(|err| map_io_error(kind, err)),
        Err(_) => Err(timeout_error(kind, budget)),
    }
}

/// 计算给定起点到现在经过的毫秒数，用于生命周期日志。
pub(crate) fn elapsed_millis(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// 从 panic 载荷中提取可读文案。
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CONNECT;

    #[test]
    fn panic_message_handles_both_payload_shapes() {
        let static_payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(static_payload.as_ref()), "boom");
        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(owned_payload.as_ref()), "owned boom");
        let other: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn elapsed_deadline_reports_the_configured_budget() {
        let deadline = TokioInstant::now() + Duration::from_millis(20);
        let err = run_until_deadline(CONNECT, deadline, Duration::from_millis(2000), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, io::Error>(())
        })
        .await
        .expect_err("future must time out");
        assert!(err.is_timeout());
        assert!(err.message().contains("after 2000 ms"), "{}", err.message());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn io_error_before_deadline_is_mapped() {
        let deadline = TokioInstant::now() + Duration::from_secs(1);
        let err = run_until_deadline(CONNECT, deadline, Duration::from_secs(1), async {
            Err::<(), _>(io::Error::from(io::ErrorKind::ConnectionRefused))
        })
        .await
        .expect_err("io error must surface");
        assert_eq!(err.code(), CONNECT.code);
    }
}
