//! Burning Ship フラクタルを1枚だけ描画して PNG に保存する

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use burning_ship::common::constants::{MAX_ITERATIONS, WINDOW_HEIGHT, WINDOW_WIDTH};
use burning_ship::{BackendKind, FractalRenderer, RenderConfig};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "burning-ship-render", version, about = "Burning Ship フラクタルを PNG に描画する")]
struct Args {
    /// 画像の幅（ピクセル）
    #[arg(long, default_value_t = WINDOW_WIDTH as u32)]
    width: u32,

    /// 画像の高さ（ピクセル）
    #[arg(long, default_value_t = WINDOW_HEIGHT as u32)]
    height: u32,

    /// ズーム倍率（大きいほど拡大）
    #[arg(long, default_value_t = 1.0)]
    zoom: f64,

    /// 横方向のパン量（ピクセル）
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pan_x: f64,

    /// 縦方向のパン量（ピクセル）
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pan_y: f64,

    /// 計算バックエンド (cpu / cuda / opencl)
    #[arg(long, default_value = "cpu")]
    backend: BackendKind,

    /// 最大反復回数
    #[arg(long, default_value_t = MAX_ITERATIONS)]
    max_iterations: u32,

    /// CPU バックエンドのスレッド数（0 なら論理コア数）
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// 出力ファイル
    #[arg(short, long, default_value = "burning_ship.png")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = RenderConfig::default()
        .with_max_iterations(args.max_iterations)
        .with_cpu_threads(args.threads);
    let mut renderer = FractalRenderer::with_config(args.backend, config)
        .with_context(|| format!("{} バックエンドの初期化に失敗しました", args.backend))?;

    let start = Instant::now();
    let image = renderer.render(args.width, args.height, args.zoom, args.pan_x, args.pan_y)?;
    let elapsed = start.elapsed();
    let device_name = renderer.device_name().unwrap_or("-").to_owned();

    image
        .save(&args.output)
        .with_context(|| format!("画像の保存に失敗しました: {}", args.output.display()))?;
    renderer.release_resources();

    println!(
        "画像を保存しました: {} ({}x{}, {} [{}], {:.2?})",
        args.output.display(),
        args.width,
        args.height,
        args.backend,
        device_name,
        elapsed
    );
    Ok(())
}
