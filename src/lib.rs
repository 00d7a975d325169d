//! Burning Ship フラクタル描画エンジン
//!
//! 各ピクセルを複素平面上の点に写像して脱出までの反復回数を求め、
//! カラーグラデーションで色付けした画像を返す。計算は CPU (Rayon) または
//! GPU (wgpu) のバックエンドで並列に実行する。
//!
//! ```no_run
//! use burning_ship::{BackendKind, FractalRenderer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut renderer = FractalRenderer::new(BackendKind::Cpu)?;
//! let image = renderer.render(800, 600, 1.0, 0.0, 0.0)?;
//! image.save("burning_ship.png")?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod common;
pub mod renderer;

pub use backend::{select_backend, Backend, BackendKind, ComputeBackend};
pub use common::colors::{Color, ColorStop, ColorZone, Gradient};
pub use common::config::RenderConfig;
pub use common::error::{Error, Result};
pub use renderer::FractalRenderer;
