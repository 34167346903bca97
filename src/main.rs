/// 🎯 blutrack 实时定位
///
/// 从标准输入读取接收器上报（每行一个 JSON），在终端输出定位结果：
///
/// ```text
/// {"receiver_id": 1, "rssi": -52, "timestamp": "2026-10-19T08:00:00Z"}
/// {"topic": "receivers/2", "payload": {"time": "19/10/2026 08:00:00", "address": "a1", "rssi": -60}}
/// ```
///
/// 输入结束或 Ctrl-C 时关闭管线。

use blutrack::algorithms::{GridScaler, ReceiverSet, SolverKind};
use blutrack::config::PipelineConfig;
use blutrack::error::{Error, SinkError};
use blutrack::ingest::MessageDecoder;
use blutrack::logging::{LogLevel, init_logging};
use blutrack::positioning::{EventSender, Pipeline, PipelineHandle, PipelineState};
use blutrack::sink::{JsonLinesSink, PositionSink};
use blutrack::{PositionUpdate, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "blutrack", version, about = "三接收器蓝牙 RSSI 实时定位")]
struct Cli {
    /// JSON 配置文件（缺省字段使用默认值）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志级别，RUST_LOG 优先
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// 定位周期（毫秒）
    #[arg(long)]
    tick_ms: Option<u64>,

    /// 三边定位算法: least_squares | two_circle | linear
    #[arg(long)]
    solver: Option<SolverKind>,

    /// 以 JSON 行输出位置更新
    #[arg(long)]
    json: bool,

    /// 本机蓝牙扫描的信标名称正则（需要 ble 特性）
    #[arg(long)]
    scan: Option<String>,

    /// 本机扫描结果作为哪个接收器的样本
    #[arg(long, default_value_t = 1)]
    as_receiver: u8,
}

fn format_signal_level(rssi: f64) -> &'static str {
    match rssi {
        r if r > -50.0 => "▓▓▓▓▓ 极强",
        r if r > -60.0 => "▓▓▓▓░ 强",
        r if r > -70.0 => "▓▓▓░░ 中",
        r if r > -80.0 => "▓▓░░░ 弱",
        _ => "▓░░░░ 极弱",
    }
}

/// 终端输出
struct ConsoleSink {
    receivers: ReceiverSet,
    grid_size: u32,
    started: Instant,
}

impl PositionSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn on_position(&mut self, update: &PositionUpdate) -> std::result::Result<(), SinkError> {
        let elapsed = self.started.elapsed();
        let estimate = &update.estimate;

        println!(
            "📍 定位结果 #{} | 运行时间: {}s {}ms{}",
            update.seq,
            elapsed.as_secs(),
            elapsed.subsec_millis(),
            if update.held { " | ⚠️ 求解失败，沿用上一次位置" } else { "" }
        );
        println!("┌─ 位置坐标 (m)");
        println!("│  X: {:>8.2} m", estimate.x);
        println!("│  Y: {:>8.2} m", estimate.y);
        println!("│  网格: {} / {}", update.grid, self.grid_size);
        println!("├─ 定位质量");
        println!("│  方法: {}", estimate.method);
        println!("│  距离偏差: {:>7.2} m", estimate.bias);
        println!("│  误差: {:>7.2} m", estimate.error);
        println!("├─ 信号信息");
        for (receiver, distance) in self.receivers.iter().zip(update.distances) {
            let rssi = receiver.model.distance_to_rssi(distance);
            println!(
                "│  {} ({:.1}, {:.1}): {:>6.1} dBm {} → {:.2} m",
                receiver.name,
                receiver.x,
                receiver.y,
                rssi,
                format_signal_level(rssi),
                distance
            );
        }
        println!("└─ 时间: {}", Local::now().format("%H:%M:%S%.3f"));
        println!();
        Ok(())
    }

    fn on_shutdown(&mut self) -> std::result::Result<(), SinkError> {
        println!("🛑 定位输出结束");
        Ok(())
    }
}

fn print_banner(config: &PipelineConfig, receivers: &ReceiverSet, scaler: &GridScaler) {
    println!("\n========== 🎯 三接收器实时定位 ==========\n");
    println!("⚙️  配置信息:");
    println!("  - 定位周期: {} ms", config.tick_interval_ms);
    println!("  - 算法: {}", config.solver.kind);
    println!("  - 路径损耗指数: {}", config.path_loss_exponent);
    println!("  - 历史容量: {}", config.history_capacity);
    let (bound_x, bound_y) = scaler.bounds();
    println!(
        "  - 网格: {0}x{0}，范围 {1:.2} x {2:.2} m",
        scaler.grid_size(),
        bound_x,
        bound_y
    );
    println!("📡 接收器:");
    for (receiver, (_, cell)) in receivers.iter().zip(scaler.receiver_cells(receivers)) {
        println!(
            "  [{}] {} @ ({:.2}, {:.2}) m, 网格 {}, {}",
            receiver.id,
            receiver.name,
            receiver.x,
            receiver.y,
            cell,
            receiver.model.description()
        );
    }
    println!();
}

/// 逐行读取标准输入，返回送出的样本数
async fn read_stdin(decoder: MessageDecoder, events: EventSender) -> usize {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sent = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "读取标准输入失败");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match decoder.decode_line(&line) {
            Ok(sample) => {
                if events.send(sample).await.is_err() {
                    break;
                }
                sent += 1;
            }
            Err(e) => warn!(error = %e, "丢弃无效输入行"),
        }
    }
    sent
}

/// 输入结束后再等待一次输出，最多两个周期
async fn linger(handle: &PipelineHandle, tick: Duration) {
    if handle.state() != PipelineState::Ready {
        return;
    }
    let mut updates = handle.subscribe();
    let _ = tokio::time::timeout(tick * 2, updates.recv()).await;
}

#[cfg(feature = "ble")]
fn spawn_scanner(
    cli: &Cli,
    events: EventSender,
    stop: tokio::sync::watch::Receiver<bool>,
) -> Result<Option<tokio::task::JoinHandle<()>>> {
    use blutrack::scanner::{ScanConfig, run_scanner};

    let Some(pattern) = cli.scan.as_deref() else {
        return Ok(None);
    };
    let pattern = regex::Regex::new(pattern)
        .map_err(|e| Error::Usage(format!("扫描名称正则无效: {}", e)))?;
    let config = ScanConfig::new(pattern, cli.as_receiver);
    Ok(Some(tokio::spawn(async move {
        if let Err(e) = run_scanner(config, events, stop).await {
            error!(error = %e, "蓝牙扫描失败");
        }
    })))
}

#[cfg(not(feature = "ble"))]
fn spawn_scanner(
    cli: &Cli,
    _events: EventSender,
    _stop: tokio::sync::watch::Receiver<bool>,
) -> Result<Option<tokio::task::JoinHandle<()>>> {
    if cli.scan.is_some() {
        return Err(Error::Usage("--scan 需要启用 ble 特性重新编译".to_string()));
    }
    Ok(None)
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(ms) = cli.tick_ms {
        config.tick_interval_ms = ms;
    }
    if let Some(kind) = cli.solver {
        config.solver.kind = kind;
    }

    let decoder = config.decoder()?;
    let tick = config.tick_interval();
    let mut pipeline = Pipeline::new(config.clone())?;

    if cli.json {
        pipeline.add_sink(Box::new(JsonLinesSink::new(std::io::stdout())));
    } else {
        print_banner(&config, pipeline.receivers(), pipeline.scaler());
        pipeline.add_sink(Box::new(ConsoleSink {
            receivers: pipeline.receivers().clone(),
            grid_size: pipeline.scaler().grid_size(),
            started: Instant::now(),
        }));
    }

    let handle = pipeline.start();
    let (scan_stop, scan_stop_rx) = tokio::sync::watch::channel(false);
    let scanner = spawn_scanner(&cli, handle.sender(), scan_stop_rx)?;
    let mut stdin_task = tokio::spawn(read_stdin(decoder, handle.sender()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "无法监听 Ctrl-C");
            }
            info!("收到 Ctrl-C，准备关闭");
            stdin_task.abort();
        }
        result = &mut stdin_task => {
            match result {
                Ok(sent) => info!(samples = sent, "标准输入结束"),
                Err(e) => warn!(error = %e, "输入任务异常退出"),
            }
            // 有本机扫描时继续运行到 Ctrl-C
            if scanner.is_some() {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "无法监听 Ctrl-C");
                }
            } else {
                linger(&handle, tick).await;
            }
        }
    }

    scan_stop.send_replace(true);
    if let Some(task) = scanner {
        if let Err(e) = task.await {
            warn!(error = %e, "扫描任务异常退出");
        }
    }

    let report = handle.shutdown().await?;
    let stats = &report.stats;
    if !cli.json {
        println!("\n========== 运行统计 ==========\n");
        println!("  定位周期: {}", stats.ticks);
        println!("  输出位置: {}（沿用 {}）", stats.emitted + stats.held, stats.held);
        println!("  求解失败: {}", stats.solver_failures);
        println!("  处理样本: {}，丢弃 {}", stats.samples_ingested, stats.dropped_events);
        if let Some(last) = &report.last_update {
            println!("  最后位置: {}", last.detailed_description());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("❌ 无法创建异步运行时: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "运行失败");
            eprintln!("❌ {}", e);
            match e {
                Error::Config(_) | Error::Usage(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    };
    // 标准输入的读取占用阻塞线程，不等待它返回
    runtime.shutdown_background();
    code
}
