use crate::{config::ClientConfig, error::PoolError, util::panic_message};
use futures::FutureExt;
use std::{
    borrow::Cow,
    future::Future,
    panic::AssertUnwindSafe,
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};
use tokio::{
    runtime::{Builder as RuntimeBuilder, Handle, Runtime},
    sync::Notify,
    task::JoinHandle,
};
use tracing::{debug, error, info};

/// 工作线程池的构建参数。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub worker_threads: usize,
    pub thread_name_prefix: String,
}

impl From<&ClientConfig> for PoolConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            worker_threads: config.worker_threads(),
            thread_name_prefix: config.thread_name_prefix().to_owned(),
        }
    }
}

#[derive(Debug)]
struct PoolShared {
    prefix: String,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl PoolShared {
    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// 任务结束（含 panic 与取消）时归还在途计数。
struct InFlightGuard {
    shared: Arc<PoolShared>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.finish_one();
    }
}

/// 固定大小的 IO 工作线程池，承载连接的全部异步回调。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 建连、读循环、写入与关闭都在池内线程上完成，调用方线程只负责阻塞等待；
/// - 线程按 `<prefix>-<n>` 顺序命名，日志与线程转储中可以直接定位到具体 worker；
/// - 每个任务都包裹在故障边界中：单个任务 panic 只会被记录并结束该任务，
///   不会波及兄弟任务、线程池本身或进程。
///
/// ## 逻辑 (How)
/// - 底层为 Tokio 多线程运行时，`worker_threads` 决定线程数，
///   `thread_name_fn` 以原子计数器生成顺序线程名；
/// - [`PoolHandle::spawn`] 通过 `catch_unwind` 捕获 panic，并以 `InFlightGuard`
///   维护在途任务计数；
/// - [`WorkerPool::shutdown`] 先关闭准入，再等待在途计数归零，最后释放线程。
///
/// ## 契约 (What)
/// - **前置条件**：`new`/`shutdown`/`block_on_task` 会阻塞当前线程，必须在 Tokio
///   运行时上下文之外调用；
/// - **后置条件**：`shutdown` 返回时所有已接收的任务均已结束且线程已退出；
///   未显式关闭而被丢弃时，线程在后台释放，不阻塞丢弃方。
///
/// ## 注意事项 (Trade-offs)
/// - 关闭阶段的等待没有超时：若某个在途任务永不结束，`shutdown` 将一直阻塞，
///   调用方需要先关闭连接以结束读循环。
#[derive(Debug)]
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: PoolHandle,
}

impl WorkerPool {
    /// 按配置构建线程池并启动全部 worker。
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        let counter = Arc::new(AtomicUsize::new(0));
        let prefix = config.thread_name_prefix.clone();
        let runtime = RuntimeBuilder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name_fn(move || {
                let index = counter.fetch_add(1, Ordering::Relaxed);
                format!("{prefix}-{index}")
            })
            .on_thread_start(|| {
                debug!(worker = thread::current().name().unwrap_or("unnamed"), "worker thread started");
            })
            .enable_all()
            .build()
            .map_err(PoolError::Build)?;

        let handle = PoolHandle {
            runtime: runtime.handle().clone(),
            shared: Arc::new(PoolShared {
                prefix: config.thread_name_prefix.clone(),
                accepting: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        };
        debug!(
            prefix = %config.thread_name_prefix,
            worker_threads = config.worker_threads,
            "worker pool created"
        );
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    /// 获取可克隆的任务提交句柄。
    pub fn handle(&self) -> &PoolHandle {
        &self.handle
    }

    /// 优雅关闭：拒绝新任务，等待在途任务结束，然后释放线程。
    pub fn shutdown(mut self) {
        self.handle.shared.accepting.store(false, Ordering::SeqCst);
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        runtime.block_on(self.handle.drained());
        // 丢弃运行时会等待 worker 线程退出。
        drop(runtime);
        info!(prefix = %self.handle.shared.prefix, "worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            self.handle.shared.accepting.store(false, Ordering::SeqCst);
            runtime.shutdown_background();
        }
    }
}

/// 线程池的任务提交句柄，可在线程间克隆传递。
#[derive(Clone, Debug)]
pub struct PoolHandle {
    runtime: Handle,
    shared: Arc<PoolShared>,
}

impl PoolHandle {
    /// 在故障边界内提交任务。
    ///
    /// - **输入**：`task` 为日志中使用的任务标签，`future` 为任务体；
    /// - **返回**：成功时返回 [`TaskHandle`]；池已开始关闭时返回 [`PoolError::ShuttingDown`]；
    /// - **故障语义**：任务 panic 会以 ERROR 级别记录任务标签与 worker 名称，
    ///   等待该任务的一方得到 [`PoolError::TaskPanicked`]。
    pub fn spawn<F>(
        &self,
        task: impl Into<Cow<'static, str>>,
        future: F,
    ) -> Result<TaskHandle<F::Output>, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let task = task.into();
        // 先计数再检查准入，保证 shutdown 观察到的计数不会漏掉正在提交的任务。
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard {
            shared: Arc::clone(&self.shared),
        };
        if !self.shared.accepting.load(Ordering::SeqCst) {
            drop(guard);
            return Err(PoolError::ShuttingDown {
                prefix: self.shared.prefix.clone(),
                task,
            });
        }

        let label = task.clone();
        let join = self.runtime.spawn(async move {
            let _guard = guard;
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(output) => Some(output),
                Err(payload) => {
                    error!(
                        task = %label,
                        worker = thread::current().name().unwrap_or("unnamed"),
                        panic = %panic_message(payload.as_ref()),
                        "unhandled fault in worker task"
                    );
                    None
                }
            }
        });
        Ok(TaskHandle { task, join })
    }

    /// 提交任务并阻塞调用线程直到任务进入终态。
    pub fn block_on_task<F>(
        &self,
        task: impl Into<Cow<'static, str>>,
        future: F,
    ) -> Result<F::Output, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = self.spawn(task, future)?;
        self.runtime.block_on(handle.join())
    }

    /// 当前在途任务数。
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::SeqCst)
    }

    async fn drained(&self) {
        loop {
            let mut notified = pin!(self.shared.drained.notified());
            notified.as_mut().enable();
            if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// 已提交任务的等待句柄。
#[derive(Debug)]
pub struct TaskHandle<T> {
    task: Cow<'static, str>,
    join: JoinHandle<Option<T>>,
}

impl<T> TaskHandle<T> {
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 等待任务终态：panic 与取消分别映射为对应的 [`PoolError`]。
    pub async fn join(self) -> Result<T, PoolError> {
        match self.join.await {
            Ok(Some(output)) => Ok(output),
            Ok(None) => Err(PoolError::TaskPanicked { task: self.task }),
            Err(err) if err.is_panic() => Err(PoolError::TaskPanicked { task: self.task }),
            Err(_) => Err(PoolError::TaskCancelled { task: self.task }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::mpsc, time::Duration};

    fn pool(prefix: &str, workers: usize) -> WorkerPool {
        WorkerPool::new(&PoolConfig {
            worker_threads: workers,
            thread_name_prefix: prefix.to_owned(),
        })
        .expect("build worker pool")
    }

    #[test]
    fn tasks_run_on_sequentially_named_workers() {
        let pool = pool("client", 2);
        let name = pool
            .handle()
            .block_on_task("name-probe", async {
                thread::current().name().map(str::to_owned)
            })
            .expect("task result")
            .expect("worker must be named");
        let index = name
            .strip_prefix("client-")
            .expect("name must carry the prefix");
        assert!(index.parse::<usize>().is_ok(), "unexpected worker name {name}");
        pool.shutdown();
    }

    #[test]
    fn panicking_task_is_isolated() {
        let pool = pool("fault", 2);
        let err = pool
            .handle()
            .block_on_task("explode", async { panic!("boom") })
            .map(|_: ()| ())
            .expect_err("panic must be captured");
        assert!(matches!(err, PoolError::TaskPanicked { ref task } if task == "explode"));

        let value = pool
            .handle()
            .block_on_task("after-fault", async { 41 + 1 })
            .expect("pool keeps serving after a fault");
        assert_eq!(value, 42);
        assert_eq!(pool.handle().in_flight(), 0);
        pool.shutdown();
    }

    #[test]
    fn shutdown_drains_in_flight_work() {
        let pool = pool("drain", 1);
        let (tx, rx) = mpsc::channel();
        let handle = pool
            .handle()
            .spawn("slow", async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                tx.send("done").expect("receiver alive");
            })
            .expect("spawn slow task");
        assert_eq!(handle.task(), "slow");
        pool.shutdown();
        assert_eq!(rx.try_recv(), Ok("done"), "shutdown must wait for queued work");
    }

    #[test]
    fn spawn_after_shutdown_is_rejected() {
        let pool = pool("closed", 1);
        let handle = pool.handle().clone();
        pool.shutdown();
        assert!(!handle.is_accepting());
        let err = handle
            .spawn("late", async {})
            .expect_err("closed pool must reject work");
        assert_eq!(err.code(), "tinytcp.pool.shutting_down");
        assert_eq!(handle.in_flight(), 0);
    }
}
