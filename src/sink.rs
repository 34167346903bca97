/// 位置更新的下游消费者
///
/// 定位任务按注册顺序同步调用每个消费者。单个消费者返回错误或崩溃时
/// 只影响它自己，其他消费者照常收到更新。
/// 处理较慢的消费者用 `QueuedSink` 包装：有界队列，满时丢弃最旧的更新。

use crate::algorithms::PositionUpdate;
use crate::error::{ConfigError, SinkError};
use std::collections::VecDeque;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 位置消费者接口
pub trait PositionSink: Send {
    fn name(&self) -> &str;

    /// 收到一次位置更新
    fn on_position(&mut self, update: &PositionUpdate) -> Result<(), SinkError>;

    /// 管线关闭，之后不会再收到更新
    fn on_shutdown(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: PositionSink + ?Sized> PositionSink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn on_position(&mut self, update: &PositionUpdate) -> Result<(), SinkError> {
        (**self).on_position(update)
    }

    fn on_shutdown(&mut self) -> Result<(), SinkError> {
        (**self).on_shutdown()
    }
}

fn isolate<F>(name: &str, f: F) -> Result<(), SinkError>
where
    F: FnOnce() -> Result<(), SinkError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => Err(SinkError::Panicked(name.to_string())),
    }
}

/// 把更新交给消费者，崩溃转换为 `SinkError::Panicked`
pub fn deliver(sink: &mut dyn PositionSink, update: &PositionUpdate) -> Result<(), SinkError> {
    let name = sink.name().to_string();
    isolate(&name, || sink.on_position(update))
}

/// 通知消费者关闭，崩溃转换为 `SinkError::Panicked`
pub fn deliver_shutdown(sink: &mut dyn PositionSink) -> Result<(), SinkError> {
    let name = sink.name().to_string();
    isolate(&name, || sink.on_shutdown())
}

// ============================================================================
// 闭包消费者
// ============================================================================

/// 用闭包实现的消费者
pub struct FnSink<F> {
    name: String,
    f: F,
}

impl<F> FnSink<F>
where
    F: FnMut(&PositionUpdate) -> Result<(), SinkError> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        FnSink {
            name: name.into(),
            f,
        }
    }
}

impl<F> PositionSink for FnSink<F>
where
    F: FnMut(&PositionUpdate) -> Result<(), SinkError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_position(&mut self, update: &PositionUpdate) -> Result<(), SinkError> {
        (self.f)(update)
    }
}

// ============================================================================
// JSON 行输出
// ============================================================================

/// 每次更新输出一行 JSON
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> PositionSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "json"
    }

    fn on_position(&mut self, update: &PositionUpdate) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, update)
            .map_err(|e| SinkError::failed("json", e))?;
        self.writer
            .write_all(b"\n")
            .and_then(|_| self.writer.flush())
            .map_err(|e| SinkError::failed("json", e))
    }

    fn on_shutdown(&mut self) -> Result<(), SinkError> {
        self.writer.flush().map_err(|e| SinkError::failed("json", e))
    }
}

// ============================================================================
// 队列消费者
// ============================================================================

struct QueueShared {
    queue: Mutex<VecDeque<PositionUpdate>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl QueueShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PositionUpdate>> {
        // 锁中毒时继续使用队列
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 把慢速消费者放到独立任务中运行
///
/// 定位任务只负责入队，不会被下游阻塞。队列满时丢弃最旧的更新。
pub struct QueuedSink {
    name: String,
    shared: Arc<QueueShared>,
}

impl QueuedSink {
    /// 启动消费任务，返回入队端和任务句柄（任务结束时交还内部消费者）
    ///
    /// 必须在 tokio 运行时中调用
    pub fn spawn<S>(inner: S, capacity: usize) -> Result<(QueuedSink, JoinHandle<S>), ConfigError>
    where
        S: PositionSink + 'static,
    {
        if capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity("queued_sink"));
        }
        let shared = Arc::new(QueueShared {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });
        let name = format!("queued({})", inner.name());
        let task = tokio::spawn(drain(inner, Arc::clone(&shared)));
        Ok((QueuedSink { name, shared }, task))
    }

    /// 因队列满被丢弃的更新数量
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// 尚未处理的更新数量
    pub fn pending(&self) -> usize {
        self.shared.lock().len()
    }
}

impl PositionSink for QueuedSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_position(&mut self, update: &PositionUpdate) -> Result<(), SinkError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed(self.name.clone()));
        }
        {
            let mut queue = self.shared.lock();
            if queue.len() >= self.shared.capacity {
                if let Some(oldest) = queue.pop_front() {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(sink = %self.name, seq = oldest.seq, "队列已满，丢弃最旧的更新");
                }
            }
            queue.push_back(update.clone());
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<(), SinkError> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
        Ok(())
    }
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

async fn drain<S: PositionSink>(mut inner: S, shared: Arc<QueueShared>) -> S {
    loop {
        let next = shared.lock().pop_front();
        match next {
            Some(update) => {
                if let Err(e) = deliver(&mut inner, &update) {
                    warn!(sink = inner.name(), error = %e, "队列消费者处理失败");
                }
            }
            None if shared.closed.load(Ordering::Acquire) => break,
            None => shared.notify.notified().await,
        }
    }
    if let Err(e) = deliver_shutdown(&mut inner) {
        warn!(sink = inner.name(), error = %e, "队列消费者关闭失败");
    }
    inner
}
