//! Burning Ship フラクタル インタラクティブビューア
//!
//! 操作方法:
//!   - マウスホイール上下: 拡大/縮小
//!   - 左クリック+ドラッグ: 移動（パン）
//!   - 1 / 2 / 3 キー: CPU / CUDA / OpenCL に切替
//!   - R キー: 初期表示にリセット
//!   - S キー: 現在の表示を画像として保存
//!   - Q / Escape キー: 終了

use anyhow::Context;
use burning_ship::common::constants::{PAN_SPEED, WINDOW_HEIGHT, WINDOW_WIDTH, ZOOM_DELTA};
use burning_ship::{BackendKind, Color, FractalRenderer};
use image::RgbImage;
use log::{error, info, warn};
use minifb::{Key, KeyRepeat, MouseButton, MouseMode, Window, WindowOptions};
use std::time::{Duration, Instant};

/// ビューアの状態
struct ViewerState {
    zoom: f64,
    pan_x: f64,
    pan_y: f64,
    width: usize,
    height: usize,
    buffer: Vec<u32>,
    image: Option<RgbImage>,
    last_drag: Option<(f32, f32)>,
    needs_redraw: bool,
    save_counter: u32,
    status: Option<String>,
}

impl ViewerState {
    fn new(width: usize, height: usize) -> Self {
        Self {
            zoom: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
            width,
            height,
            buffer: vec![0; width * height],
            image: None,
            last_drag: None,
            needs_redraw: true,
            save_counter: 0,
            status: None,
        }
    }

    fn reset(&mut self) {
        self.zoom = 1.0;
        self.pan_x = 0.0;
        self.pan_y = 0.0;
        self.needs_redraw = true;
    }

    /// ホイール1段ごとに ZOOM_DELTA だけ拡大/縮小
    fn zoom_by_wheel(&mut self, delta: f32) {
        if delta == 0.0 {
            return;
        }
        let factor = if delta > 0.0 {
            1.0 + ZOOM_DELTA
        } else {
            1.0 - ZOOM_DELTA
        };
        self.zoom *= factor;
        self.needs_redraw = true;
    }

    /// ドラッグ量をズーム倍率で割ってパン量に加える
    fn drag(&mut self, mouse_x: f32, mouse_y: f32) {
        if let Some((last_x, last_y)) = self.last_drag {
            let dx = (mouse_x - last_x) as f64;
            let dy = (mouse_y - last_y) as f64;
            if dx != 0.0 || dy != 0.0 {
                self.pan_x += dx / self.zoom * PAN_SPEED;
                self.pan_y += dy / self.zoom * PAN_SPEED;
                self.needs_redraw = true;
            }
        }
        self.last_drag = Some((mouse_x, mouse_y));
    }

    fn resize(&mut self, width: usize, height: usize) {
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.buffer = vec![0; width * height];
            self.needs_redraw = true;
        }
    }

    fn save_image(&mut self) {
        let Some(image) = &self.image else {
            warn!("保存する画像がありません");
            return;
        };

        self.save_counter += 1;
        let filename = format!("burning_ship_{:03}.png", self.save_counter);
        match image.save(&filename) {
            Ok(()) => println!("画像を保存しました: {}", filename),
            Err(e) => error!("画像の保存に失敗しました: {}", e),
        }
    }
}

fn select_backend(renderer: &mut FractalRenderer, state: &mut ViewerState, kind: BackendKind) {
    match renderer.select_backend(kind) {
        Ok(()) => {
            println!(
                "バックエンド切替: {} [{}]",
                kind,
                renderer.device_name().unwrap_or("-")
            );
            state.status = None;
            state.needs_redraw = true;
        }
        Err(e) => {
            // 直前のバックエンドのまま続行する
            warn!("{}", e);
            state.status = Some(format!("{} は利用できません", kind));
            state.needs_redraw = true;
        }
    }
}

fn render(renderer: &mut FractalRenderer, state: &mut ViewerState) -> Option<Duration> {
    let start = Instant::now();
    let result = renderer.render(
        state.width as u32,
        state.height as u32,
        state.zoom,
        state.pan_x,
        state.pan_y,
    );
    state.needs_redraw = false;

    match result {
        Ok(image) => {
            for (dst, pixel) in state.buffer.iter_mut().zip(image.pixels()) {
                let [r, g, b] = pixel.0;
                *dst = Color::new(r, g, b).to_u32();
            }
            state.image = Some(image);
            Some(start.elapsed())
        }
        Err(e) => {
            error!("描画に失敗しました: {}", e);
            state.status = Some(e.to_string());
            None
        }
    }
}

fn update_title(window: &mut Window, renderer: &FractalRenderer, state: &ViewerState, elapsed: Duration) {
    let millis = elapsed.as_secs_f64() * 1000.0;
    let fps = if millis > 0.0 { 1000.0 / millis } else { 0.0 };
    let mut title = format!(
        "Burning Ship [{}] x{:.2e} | {:.0}ms ({:.0}FPS)",
        renderer.backend_kind(),
        state.zoom,
        millis,
        fps
    );
    if let Some(status) = &state.status {
        title.push_str(" | ");
        title.push_str(status);
    }
    window.set_title(&title);
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  Burning Ship フラクタルビューア                             ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("操作方法:");
    println!("  - マウスホイール: 拡大/縮小");
    println!("  - 左クリック+ドラッグ: 移動（パン）");
    println!("  - 1 / 2 / 3 キー: CPU / CUDA / OpenCL に切替");
    println!("  - R キー: 初期表示にリセット");
    println!("  - S キー: 現在の表示を画像として保存");
    println!("  - Q / Escape キー: 終了");
    println!();

    let mut renderer =
        FractalRenderer::new(BackendKind::Cpu).context("CPU バックエンドの初期化に失敗しました")?;

    let mut window = Window::new(
        "Burning Ship",
        WINDOW_WIDTH,
        WINDOW_HEIGHT,
        WindowOptions {
            resize: true,
            ..WindowOptions::default()
        },
    )
    .context("ウィンドウの作成に失敗しました")?;

    window.set_target_fps(60);

    let mut state = ViewerState::new(WINDOW_WIDTH, WINDOW_HEIGHT);
    let mut last_elapsed = Duration::ZERO;

    while window.is_open() && !window.is_key_down(Key::Escape) && !window.is_key_down(Key::Q) {
        if window.is_key_pressed(Key::R, KeyRepeat::No) {
            state.reset();
            println!("リセット");
        }

        if window.is_key_pressed(Key::S, KeyRepeat::No) {
            state.save_image();
        }

        for (key, kind) in [
            (Key::Key1, BackendKind::Cpu),
            (Key::Key2, BackendKind::Cuda),
            (Key::Key3, BackendKind::OpenCl),
        ] {
            if window.is_key_pressed(key, KeyRepeat::No) {
                select_backend(&mut renderer, &mut state, kind);
            }
        }

        if let Some((_, scroll_y)) = window.get_scroll_wheel() {
            state.zoom_by_wheel(scroll_y);
        }

        if window.get_mouse_down(MouseButton::Left) {
            if let Some((mx, my)) = window.get_mouse_pos(MouseMode::Pass) {
                state.drag(mx, my);
            }
        } else {
            state.last_drag = None;
        }

        let (width, height) = window.get_size();
        if width > 0 && height > 0 {
            state.resize(width, height);
        }

        if state.needs_redraw && state.width > 0 && state.height > 0 {
            if let Some(elapsed) = render(&mut renderer, &mut state) {
                last_elapsed = elapsed;
                info!(
                    "再描画: {:.2?} [{}] | パン: ({:.1}, {:.1}) | ズーム: x{:.2e}",
                    elapsed,
                    renderer.backend_kind(),
                    state.pan_x,
                    state.pan_y,
                    state.zoom
                );
            }
            update_title(&mut window, &renderer, &state, last_elapsed);
        }

        window
            .update_with_buffer(&state.buffer, state.width, state.height)
            .context("バッファの更新に失敗しました")?;
    }

    renderer.release_resources();
    println!("終了しました");
    Ok(())
}
