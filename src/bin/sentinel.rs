/// 人群态势监控 (Crowd Sentinel)
///
/// 系统架构:
/// 1. 采集线程: 读取视频源 (独立工作线程)
/// 2. 处理线程: 检测 → 跟踪 → 风险分析 → 威胁分级 (独立工作线程)
/// 3. 主线程:   定时输出指标 JSON, 处理 stdin 命令
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{never, select, tick, unbounded, Receiver};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crowd_sentinel::config::EscalationMode;
use crowd_sentinel::{
    CrowdEngine, DirectoryOpener, EngineConfig, SimulatedCrowd, SourceOpener, SyntheticOpener,
};

/// 人群监控参数
#[derive(Parser, Debug)]
#[command(author, version, about = "人群态势监控 - 实时人群风险分析", long_about = None)]
struct Args {
    /// YAML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 启动时使用的摄像头索引
    #[arg(long, default_value_t = 0)]
    camera: usize,

    /// 图片序列目录 (可重复, 索引按出现顺序); 不指定则使用合成画面
    #[arg(short, long)]
    source: Vec<PathBuf>,

    /// 视频源帧率
    #[arg(long, default_value_t = 15.0)]
    fps: f32,

    /// 模拟人数
    #[arg(long, default_value_t = 12)]
    crowd: usize,

    /// 模拟随机种子
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// 指标输出间隔 (毫秒)
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// 升级策略: instant / sustained
    #[arg(long, value_parser = ["instant", "sustained"])]
    escalation: Option<String>,
}

/// stdin 命令
#[derive(Debug, PartialEq)]
enum Command {
    Switch(usize),
    Status,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?;
    Some(match (cmd, parts.next()) {
        ("cam", Some(n)) => match n.parse() {
            Ok(index) => Command::Switch(index),
            Err(_) => Command::Unknown(line.trim().to_string()),
        },
        ("status", None) => Command::Status,
        ("quit" | "exit" | "q", None) => Command::Quit,
        _ => Command::Unknown(line.trim().to_string()),
    })
}

/// 读取 stdin 行,发送到通道; EOF 时通道关闭
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(mode) = args.escalation.as_deref() {
        config.escalation.mode = match mode {
            "sustained" => EscalationMode::Sustained,
            _ => EscalationMode::Instant,
        };
    }
    config.validate()?;
    Ok(config)
}

fn print_metrics(engine: &CrowdEngine) -> Result<()> {
    println!("{}", serde_json::to_string(&engine.metrics())?);
    Ok(())
}

fn print_status(engine: &CrowdEngine) -> Result<()> {
    let snapshot = engine.snapshot();
    let status = serde_json::json!({
        "camera": engine.camera_index(),
        "running": engine.is_running(),
        "updatedAt": snapshot.updated_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        "frameId": snapshot.frame_id,
        "processingFps": snapshot.processing_fps,
        "inferenceMs": snapshot.inference_ms,
        "density": snapshot.density,
        "conflictCells": snapshot.conflict_cells,
        "riskComponents": snapshot.risk_components,
        "metrics": snapshot.metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crowd_sentinel=info,sentinel=info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args).context("loading configuration")?;

    info!("🚀 人群态势监控启动");
    let opener: Box<dyn SourceOpener> = if args.source.is_empty() {
        info!("📹 视频源: 合成画面 {}x{}", config.frame.width, config.frame.height);
        Box::new(SyntheticOpener {
            width: config.frame.width,
            height: config.frame.height,
            fps: args.fps,
        })
    } else {
        for (i, dir) in args.source.iter().enumerate() {
            info!("📹 视频源 {}: {}", i, dir.display());
        }
        Box::new(DirectoryOpener {
            dirs: args.source.clone(),
            fps: args.fps,
        })
    };
    info!("👥 模拟人数: {} (seed {})", args.crowd, args.seed);
    info!("⚙️ 升级策略: {:?}", config.escalation.mode);

    let detector = SimulatedCrowd::new(args.crowd, args.seed);
    let mut engine = CrowdEngine::new(config, move |index: usize| opener.open(index), detector)?;
    engine.start(args.camera)?;
    info!("✅ 系统就绪 (命令: cam <n> | status | quit)");

    let ticker = tick(Duration::from_millis(args.interval_ms.max(50)));
    let commands = spawn_stdin_reader();
    let closed = never::<String>();
    let mut stdin_open = true;
    let mut quit = false;

    while !quit {
        let input = if stdin_open { &commands } else { &closed };
        select! {
            recv(ticker) -> _ => print_metrics(&engine)?,
            recv(input) -> msg => match msg {
                Ok(line) => match parse_command(&line) {
                    Some(Command::Switch(index)) => {
                        if let Err(e) = engine.switch_source(index) {
                            warn!("❌ 切换摄像头失败: {:#}", e);
                        }
                    }
                    Some(Command::Status) => print_status(&engine)?,
                    Some(Command::Quit) => quit = true,
                    Some(Command::Unknown(cmd)) => warn!("⚠️ 未知命令: {}", cmd),
                    None => {}
                },
                // stdin 关闭后只保留定时输出
                Err(_) => stdin_open = false,
            },
        }
    }

    engine.stop()?;
    info!("👋 已退出");
    Ok(())
}
