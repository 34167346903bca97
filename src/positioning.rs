/// 实时定位管线
///
/// 两个并发任务：
/// - 接收任务：从 mpsc 队列取输入事件，更新对应接收器的滤波器与历史
/// - 定位任务：按固定周期读取三个通道的最新滤波值，换算距离、三边定位、
///   缩放到网格，再通知所有消费者
///
/// 状态：Idle → Warming → Ready → Stopping → Stopped

use crate::algorithms::{
    Anchor, FilterConfig, GridScaler, PositionEstimate, PositionUpdate, RECEIVER_COUNT, ReceiverSet,
    Trilaterate,
};
use crate::channel::{Channel, RawSample, SampleRecord};
use crate::config::PipelineConfig;
use crate::error::{ConfigError, Error, IngestError, Result};
use crate::ingest::{IngestEvent, MessageDecoder, validate_rssi};
use crate::sink::{PositionSink, deliver, deliver_shutdown};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 三个接收器都已上报时的掩码
const ALL_REPORTED: u8 = (1 << RECEIVER_COUNT) - 1;

/// 管线状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineState {
    /// 已构造，尚未启动
    Idle,
    /// 已启动，等待三个接收器都至少上报一次
    Warming,
    /// 正常定位
    Ready,
    /// 正在关闭
    Stopping,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PipelineState::Idle => "空闲",
            PipelineState::Warming => "预热",
            PipelineState::Ready => "定位中",
            PipelineState::Stopping => "关闭中",
            PipelineState::Stopped => "已停止",
        };
        write!(f, "{}", text)
    }
}

/// 运行统计
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// 定位周期数（含预热期间）
    pub ticks: u64,
    /// 成功定位并发出的更新
    pub emitted: u64,
    /// 求解失败后沿用上一次位置发出的更新
    pub held: u64,
    pub solver_failures: u64,
    /// 被丢弃的无效输入
    pub dropped_events: u64,
    pub samples_ingested: u64,
    pub sink_errors: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    emitted: AtomicU64,
    held: AtomicU64,
    solver_failures: AtomicU64,
    dropped_events: AtomicU64,
    samples_ingested: AtomicU64,
    sink_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            held: self.held.load(Ordering::Relaxed),
            solver_failures: self.solver_failures.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            samples_ingested: self.samples_ingested.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

/// 关闭后的运行报告
#[derive(Clone, Debug, Serialize)]
pub struct PipelineReport {
    pub stats: PipelineStats,
    /// 最后一次发出的更新
    pub last_update: Option<PositionUpdate>,
}

// ============================================================================
// 共享状态
// ============================================================================

/// 两个任务与句柄共享的状态
///
/// 每个接收器的通道单独加锁，不同接收器的样本互不阻塞
struct Shared {
    receivers: ReceiverSet,
    channels: [Mutex<Channel>; RECEIVER_COUNT],
    reported: AtomicU8,
    accepting: AtomicBool,
    state: watch::Sender<PipelineState>,
    decoder: MessageDecoder,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    fn set_state(&self, state: PipelineState) {
        self.state.send_replace(state);
    }

    /// 把样本送入对应接收器的滤波器（预测 + 更新在同一把锁内完成）
    async fn apply(&self, sample: &RawSample) -> std::result::Result<SampleRecord, IngestError> {
        let index = self
            .receivers
            .index_of(sample.receiver_id)
            .ok_or(IngestError::UnknownReceiver(sample.receiver_id))?;
        validate_rssi(sample.rssi as i64)?;

        let record = self.channels[index].lock().await.apply(sample);
        Counters::bump(&self.counters.samples_ingested);
        debug!(
            receiver = sample.receiver_id,
            raw = sample.rssi,
            filtered = record.filtered_rssi,
            "样本已处理"
        );

        let bit = 1u8 << index;
        let previous = self.reported.fetch_or(bit, Ordering::AcqRel);
        if previous != ALL_REPORTED && previous | bit == ALL_REPORTED {
            let promoted = self.state.send_if_modified(|state| {
                if *state == PipelineState::Warming {
                    *state = PipelineState::Ready;
                    true
                } else {
                    false
                }
            });
            if promoted {
                info!("三个接收器均已上报，开始定位");
            }
        }
        Ok(record)
    }

    async fn handle_event(&self, event: IngestEvent) {
        let result = match self.decoder.decode_event(event) {
            Ok(sample) => self.apply(&sample).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            Counters::bump(&self.counters.dropped_events);
            warn!(error = %e, "丢弃无效输入");
        }
    }

    /// 读取每个通道的最新滤波值；任一通道还没有样本时返回 None
    ///
    /// 逐个通道加锁，快照不是三个通道的原子视图
    async fn snapshot(&self) -> Option<[f64; RECEIVER_COUNT]> {
        if self.reported.load(Ordering::Acquire) != ALL_REPORTED {
            return None;
        }
        let mut filtered = [0.0; RECEIVER_COUNT];
        for (slot, channel) in filtered.iter_mut().zip(&self.channels) {
            *slot = channel.lock().await.latest_filtered()?;
        }
        Some(filtered)
    }
}

// ============================================================================
// 定位计算（定位任务独占）
// ============================================================================

/// 单个周期的结果
#[derive(Clone, Debug, PartialEq)]
enum TickOutcome {
    /// 还有接收器没有上报
    Warming,
    Emitted(PositionUpdate),
    /// 求解失败，重发上一次有效位置
    Held(PositionUpdate),
    /// 求解失败且还没有任何有效位置
    Skipped,
}

struct Estimator {
    receivers: ReceiverSet,
    solver: Box<dyn Trilaterate>,
    scaler: GridScaler,
    sinks: Vec<Box<dyn PositionSink>>,
    broadcast: broadcast::Sender<PositionUpdate>,
    last_good: Option<PositionUpdate>,
    last_emitted: Option<PositionUpdate>,
    seq: u64,
}

impl Estimator {
    fn tick(&mut self, filtered: Option<[f64; RECEIVER_COUNT]>, counters: &Counters) -> TickOutcome {
        Counters::bump(&counters.ticks);
        let Some(filtered) = filtered else {
            return TickOutcome::Warming;
        };

        let distances: [f64; RECEIVER_COUNT] =
            std::array::from_fn(|i| self.receivers.at(i).rssi_to_distance(filtered[i]));
        let anchors: [Anchor; RECEIVER_COUNT] = std::array::from_fn(|i| {
            let receiver = self.receivers.at(i);
            Anchor::new(receiver.x, receiver.y, distances[i])
        });

        match self.solver.solve(&anchors) {
            Ok(fix) => {
                let estimate =
                    PositionEstimate::new(fix.x, fix.y, fix.bias, fix.rms_error, self.solver.name());
                self.seq += 1;
                let update = PositionUpdate {
                    seq: self.seq,
                    grid: self.scaler.scale(fix.x, fix.y),
                    estimate,
                    distances,
                    held: false,
                };
                debug!(
                    seq = update.seq,
                    x = fix.x,
                    y = fix.y,
                    bias = fix.bias,
                    iterations = fix.iterations,
                    "定位成功"
                );
                self.last_good = Some(update.clone());
                Counters::bump(&counters.emitted);
                self.emit(&update, counters);
                TickOutcome::Emitted(update)
            }
            Err(e) => {
                Counters::bump(&counters.solver_failures);
                warn!(
                    solver = self.solver.name(),
                    error = %e,
                    distances = ?distances,
                    "定位失败，沿用上一次位置"
                );
                let Some(previous) = self.last_good.as_ref() else {
                    return TickOutcome::Skipped;
                };
                self.seq += 1;
                let update = PositionUpdate {
                    seq: self.seq,
                    held: true,
                    ..previous.clone()
                };
                Counters::bump(&counters.held);
                self.emit(&update, counters);
                TickOutcome::Held(update)
            }
        }
    }

    /// 按注册顺序通知消费者，再广播给订阅者
    fn emit(&mut self, update: &PositionUpdate, counters: &Counters) {
        for sink in self.sinks.iter_mut() {
            if let Err(e) = deliver(sink.as_mut(), update) {
                Counters::bump(&counters.sink_errors);
                warn!(sink = sink.name(), error = %e, "消费者处理失败");
            }
        }
        // 没有订阅者时发送失败，忽略
        let _ = self.broadcast.send(update.clone());
        self.last_emitted = Some(update.clone());
    }

    fn shutdown(&mut self, counters: &Counters) {
        for sink in self.sinks.iter_mut() {
            if let Err(e) = deliver_shutdown(sink.as_mut()) {
                Counters::bump(&counters.sink_errors);
                warn!(sink = sink.name(), error = %e, "消费者关闭失败");
            }
        }
    }
}

// ============================================================================
// 管线
// ============================================================================

/// 尚未启动的管线
pub struct Pipeline {
    receivers: ReceiverSet,
    scaler: GridScaler,
    decoder: MessageDecoder,
    solver: Box<dyn Trilaterate>,
    sinks: Vec<Box<dyn PositionSink>>,
    filter: FilterConfig,
    history_capacity: usize,
    tick_interval: Duration,
    ingest_queue: usize,
    broadcast_capacity: usize,
}

impl Pipeline {
    /// 根据配置构造管线，配置无效时返回错误
    pub fn new(config: PipelineConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let receivers = config.receiver_set()?;
        let scaler = config.grid_scaler(&receivers)?;
        let decoder = config.decoder()?;
        info!(
            solver = %config.solver.kind,
            tick_ms = config.tick_interval_ms,
            grid = config.grid.size,
            "定位管线已构造"
        );
        Ok(Pipeline {
            receivers,
            scaler,
            decoder,
            solver: config.solver.build(),
            sinks: Vec::new(),
            filter: config.filter,
            history_capacity: config.history_capacity,
            tick_interval: config.tick_interval(),
            ingest_queue: config.ingest_queue,
            broadcast_capacity: config.broadcast_capacity,
        })
    }

    /// 替换求解器
    pub fn with_solver(mut self, solver: impl Trilaterate + 'static) -> Self {
        self.solver = Box::new(solver);
        self
    }

    /// 注册消费者（按注册顺序调用）
    pub fn with_sink(mut self, sink: impl PositionSink + 'static) -> Self {
        self.add_sink(Box::new(sink));
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn PositionSink>) {
        self.sinks.push(sink);
    }

    pub fn receivers(&self) -> &ReceiverSet {
        &self.receivers
    }

    pub fn scaler(&self) -> &GridScaler {
        &self.scaler
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::Idle
    }

    /// 启动接收任务与定位任务，必须在 tokio 运行时中调用
    pub fn start(self) -> PipelineHandle {
        let Pipeline {
            receivers,
            scaler,
            decoder,
            solver,
            sinks,
            filter,
            history_capacity,
            tick_interval,
            ingest_queue,
            broadcast_capacity,
        } = self;

        let channels = std::array::from_fn(|i| {
            Mutex::new(Channel::new(receivers.at(i).id, &filter, history_capacity))
        });
        let (state, _) = watch::channel(PipelineState::Warming);
        let shared = Arc::new(Shared {
            receivers: receivers.clone(),
            channels,
            reported: AtomicU8::new(0),
            accepting: AtomicBool::new(true),
            state,
            decoder,
            counters: Counters::default(),
        });

        let (events_tx, events_rx) = mpsc::channel(ingest_queue);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (broadcast_tx, _) = broadcast::channel(broadcast_capacity);

        let estimator = Estimator {
            receivers,
            solver,
            scaler,
            sinks,
            broadcast: broadcast_tx.clone(),
            last_good: None,
            last_emitted: None,
            seq: 0,
        };

        info!(
            interval_ms = tick_interval.as_millis() as u64,
            solver = estimator.solver.name(),
            sinks = estimator.sinks.len(),
            "定位管线启动"
        );

        let ingest_task = tokio::spawn(ingest_loop(Arc::clone(&shared), events_rx, stop_rx.clone()));
        let tick_task = tokio::spawn(tick_loop(Arc::clone(&shared), estimator, tick_interval, stop_rx));

        PipelineHandle {
            shared,
            events: events_tx,
            stop: stop_tx,
            broadcast: broadcast_tx,
            ingest_task,
            tick_task,
        }
    }
}

/// 等待停止信号；发送端已释放时立即返回
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn ingest_loop(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<IngestEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            event = events.recv() => match event {
                Some(event) => shared.handle_event(event).await,
                None => break,
            },
        }
    }

    // 已经入队的事件仍然处理完，之后不再接收
    events.close();
    while let Ok(event) = events.try_recv() {
        shared.handle_event(event).await;
    }
    debug!("接收任务退出");
}

async fn tick_loop(
    shared: Arc<Shared>,
    mut estimator: Estimator,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> Estimator {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => {
                let snapshot = shared.snapshot().await;
                match estimator.tick(snapshot, &shared.counters) {
                    TickOutcome::Warming => debug!(state = %shared.state(), "等待全部接收器上报"),
                    TickOutcome::Emitted(update) => debug!(seq = update.seq, grid = %update.grid, "位置已发出"),
                    TickOutcome::Held(update) => debug!(seq = update.seq, "已重发上一次位置"),
                    TickOutcome::Skipped => debug!("尚无有效位置，本周期不输出"),
                }
            }
        }
    }
    debug!("定位任务退出");
    estimator
}

// ============================================================================
// 运行中的管线
// ============================================================================

/// 输入事件发送端，可以克隆后交给多个数据源
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<IngestEvent>,
    shared: Arc<Shared>,
}

impl EventSender {
    fn check_accepting(&self) -> std::result::Result<(), IngestError> {
        if self.shared.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(IngestError::Stopped)
        }
    }

    /// 入队一个事件，队列满时等待
    pub async fn send(&self, event: impl Into<IngestEvent>) -> std::result::Result<(), IngestError> {
        self.check_accepting()?;
        self.tx
            .send(event.into())
            .await
            .map_err(|_| IngestError::Stopped)
    }

    /// 入队一条主题消息
    pub async fn send_message(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> std::result::Result<(), IngestError> {
        self.send(IngestEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        })
        .await
    }

    /// 不等待的入队，队列满时丢弃该事件
    pub fn try_send(&self, event: impl Into<IngestEvent>) -> std::result::Result<(), IngestError> {
        self.check_accepting()?;
        self.tx.try_send(event.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Counters::bump(&self.shared.counters.dropped_events);
                IngestError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => IngestError::Stopped,
        })
    }
}

/// 运行中管线的句柄
pub struct PipelineHandle {
    shared: Arc<Shared>,
    events: mpsc::Sender<IngestEvent>,
    stop: watch::Sender<bool>,
    broadcast: broadcast::Sender<PositionUpdate>,
    ingest_task: JoinHandle<()>,
    tick_task: JoinHandle<Estimator>,
}

impl PipelineHandle {
    /// 直接处理一个样本（不经过队列），返回写入历史的记录
    pub async fn ingest(&self, sample: RawSample) -> std::result::Result<SampleRecord, IngestError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(IngestError::Stopped);
        }
        let result = self.shared.apply(&sample).await;
        if let Err(e) = &result {
            Counters::bump(&self.shared.counters.dropped_events);
            warn!(error = %e, "丢弃无效输入");
        }
        result
    }

    /// 获取输入队列的发送端
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.events.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// 订阅状态变化（管线关闭后仍可读取最终状态）
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.shared.state.subscribe()
    }

    /// 等待管线进入指定状态
    pub async fn wait_for_state(&self, target: PipelineState) -> PipelineState {
        let mut rx = self.shared.state.subscribe();
        match rx.wait_for(|state| *state == target).await {
            Ok(state) => *state,
            Err(_) => self.shared.state(),
        }
    }

    /// 订阅位置更新；订阅者落后超过缓冲容量时丢弃最旧的更新
    pub fn subscribe(&self) -> broadcast::Receiver<PositionUpdate> {
        self.broadcast.subscribe()
    }

    pub fn receivers(&self) -> &ReceiverSet {
        &self.shared.receivers
    }

    /// 指定接收器的历史记录（从旧到新）
    pub async fn history(&self, receiver_id: u8) -> Option<Vec<SampleRecord>> {
        let index = self.shared.receivers.index_of(receiver_id)?;
        Some(self.shared.channels[index].lock().await.history().to_vec())
    }

    /// 指定接收器的最新滤波值
    pub async fn latest_filtered(&self, receiver_id: u8) -> Option<f64> {
        let index = self.shared.receivers.index_of(receiver_id)?;
        self.shared.channels[index].lock().await.latest_filtered()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    /// 关闭管线：停止接收、等待进行中的周期和消息处理完成、通知消费者、回收任务
    pub async fn shutdown(self) -> Result<PipelineReport> {
        info!("定位管线关闭中");
        self.shared.set_state(PipelineState::Stopping);
        self.shared.accepting.store(false, Ordering::Release);
        self.stop.send_replace(true);

        let ingest = self.ingest_task.await;
        let ticks = self.tick_task.await;

        let result = match (ingest, ticks) {
            (Ok(()), Ok(mut estimator)) => {
                estimator.shutdown(&self.shared.counters);
                Ok(PipelineReport {
                    stats: self.shared.counters.snapshot(),
                    last_update: estimator.last_emitted.take(),
                })
            }
            (Err(e), _) | (_, Err(e)) => Err(Error::Task(e.to_string())),
        };

        self.shared.set_state(PipelineState::Stopped);
        let stats = self.shared.counters.snapshot();
        info!(
            ticks = stats.ticks,
            emitted = stats.emitted,
            held = stats.held,
            dropped = stats.dropped_events,
            "定位管线已停止"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{Fix, LeastSquaresSolver};
    use crate::error::{SinkError, SolverError};
    use crate::sink::FnSink;
    use std::sync::Mutex as StdMutex;

    /// 按脚本在指定调用次数上失败的求解器
    struct ScriptedSolver {
        calls: usize,
        fail_on: Vec<usize>,
        inner: LeastSquaresSolver,
    }

    impl Trilaterate for ScriptedSolver {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn solve(&mut self, anchors: &[Anchor; 3]) -> std::result::Result<Fix, SolverError> {
            self.calls += 1;
            if self.fail_on.contains(&self.calls) {
                return Err(SolverError::NotConverged { iterations: 100, cost: 1.0 });
            }
            self.inner.solve(anchors)
        }
    }

    fn estimator(fail_on: Vec<usize>, sinks: Vec<Box<dyn PositionSink>>) -> Estimator {
        let config = PipelineConfig::default();
        let receivers = config.receiver_set().unwrap();
        let scaler = config.grid_scaler(&receivers).unwrap();
        let (broadcast, _) = broadcast::channel(4);
        Estimator {
            receivers,
            solver: Box::new(ScriptedSolver {
                calls: 0,
                fail_on,
                inner: LeastSquaresSolver::default(),
            }),
            scaler,
            sinks,
            broadcast,
            last_good: None,
            last_emitted: None,
            seq: 0,
        }
    }

    /// 目标点 (1.0, 1.5) 处三个接收器的理想 RSSI
    fn filtered_at(target: (f64, f64)) -> [f64; 3] {
        let receivers = PipelineConfig::default().receiver_set().unwrap();
        std::array::from_fn(|i| {
            let r = receivers.at(i);
            r.model.distance_to_rssi(r.distance_to_point(target.0, target.1))
        })
    }

    #[test]
    fn test_warming_emits_nothing() {
        let counters = Counters::default();
        let mut est = estimator(vec![], vec![]);
        assert_eq!(est.tick(None, &counters), TickOutcome::Warming);
        assert_eq!(counters.snapshot().ticks, 1);
        assert_eq!(counters.snapshot().emitted, 0);
    }

    #[test]
    fn test_failure_holds_previous_position() {
        let counters = Counters::default();
        let mut est = estimator(vec![2], vec![]);
        let filtered = filtered_at((1.0, 1.5));

        let TickOutcome::Emitted(first) = est.tick(Some(filtered), &counters) else {
            panic!("第一个周期应当成功");
        };
        assert!((first.estimate.x - 1.0).abs() < 1e-6);
        assert!((first.estimate.y - 1.5).abs() < 1e-6);
        assert!(!first.held);

        let TickOutcome::Held(second) = est.tick(Some(filtered), &counters) else {
            panic!("第二个周期应当沿用上一次位置");
        };
        assert_eq!(second.seq, first.seq + 1);
        assert_eq!(second.estimate, first.estimate);
        assert_eq!(second.grid, first.grid);
        assert!(second.held);

        let stats = counters.snapshot();
        assert_eq!((stats.emitted, stats.held, stats.solver_failures), (1, 1, 1));
    }

    #[test]
    fn test_failure_before_success_is_skipped() {
        let counters = Counters::default();
        let mut est = estimator(vec![1], vec![]);
        let filtered = filtered_at((2.0, 2.0));
        assert_eq!(est.tick(Some(filtered), &counters), TickOutcome::Skipped);
        assert!(matches!(est.tick(Some(filtered), &counters), TickOutcome::Emitted(u) if u.seq == 1));
    }

    #[test]
    fn test_sink_failures_are_isolated() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sinks: Vec<Box<dyn PositionSink>> = vec![
            Box::new(FnSink::new("panics", |_: &PositionUpdate| -> std::result::Result<(), SinkError> {
                panic!("boom")
            })),
            Box::new(FnSink::new("fails", |_: &PositionUpdate| Err(SinkError::failed("fails", "disk full")))),
            Box::new(FnSink::new("records", move |u: &PositionUpdate| {
                seen_clone.lock().unwrap().push(u.seq);
                Ok(())
            })),
        ];
        let counters = Counters::default();
        let mut est = estimator(vec![], sinks);
        let filtered = filtered_at((1.6, 1.5));
        est.tick(Some(filtered), &counters);
        est.tick(Some(filtered), &counters);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(counters.snapshot().sink_errors, 4);
    }
}
