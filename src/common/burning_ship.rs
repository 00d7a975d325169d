//! Burning Ship フラクタルの反復計算

use num_complex::Complex;

use super::config::RenderConfig;

/// 1回の描画でカーネルに渡すパラメータ
///
/// `pan_x` / `pan_y` は画面サイズで正規化済みの値（ピクセル単位ではない）。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelParams {
    pub width: u32,
    pub height: u32,
    pub zoom: f64,
    pub pan_x: f64,
    pub pan_y: f64,
    pub max_iterations: u32,
    pub center: Complex<f64>,
    pub view_span: f64,
    pub escape_radius_sq: f64,
}

impl KernelParams {
    /// ピクセル単位のパン量を画面サイズで正規化してパラメータを作る
    pub fn new(
        width: u32,
        height: u32,
        zoom: f64,
        pan_x: f64,
        pan_y: f64,
        config: &RenderConfig,
    ) -> Self {
        Self {
            width,
            height,
            zoom,
            pan_x: pan_x / width as f64,
            pan_y: pan_y / height as f64,
            max_iterations: config.max_iterations,
            center: config.center,
            view_span: config.view_span,
            escape_radius_sq: config.escape_radius_sq,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// ピクセル座標を複素平面上の座標に変換
    pub fn pixel_to_complex(&self, px: u32, py: u32) -> Complex<f64> {
        let width = self.width as f64;
        let height = self.height as f64;
        let re = (px as f64 - width / 2.0) * (self.view_span / width) / self.zoom
            + self.pan_x
            + self.center.re;
        let im = (py as f64 - height / 2.0) * (self.view_span / height) / self.zoom
            + self.pan_y
            + self.center.im;
        Complex::new(re, im)
    }
}

/// Burning Ship の反復回数を計算
///
/// 各ステップで実部・虚部の絶対値を取ってから二乗する（ここが Mandelbrot との違い）。
/// |z|^2 >= escape_radius_sq になるか、max_iterations に達した時点で止める。
#[inline]
pub fn escape_time(c: Complex<f64>, max_iterations: u32, escape_radius_sq: f64) -> u32 {
    let mut z = Complex::new(0.0, 0.0);
    let mut iteration = 0;

    while z.norm_sqr() < escape_radius_sq && iteration < max_iterations {
        let folded = Complex::new(z.re.abs(), z.im.abs());
        z = folded * folded + c;
        iteration += 1;
    }
    iteration
}

/// 反復回数を1バイトに変換（上限到達は 0、それ以外は 256 で折り返す）
#[inline]
pub fn pixel_value(iterations: u32, max_iterations: u32) -> u8 {
    if iterations >= max_iterations {
        0
    } else {
        (iterations % 256) as u8
    }
}

/// 1次元インデックスのピクセルを計算（ピクセル間で共有する状態はない）
#[inline]
pub fn compute_pixel(index: usize, params: &KernelParams) -> u8 {
    let width = params.width as usize;
    let px = (index % width) as u32;
    let py = (index / width) as u32;

    let c = params.pixel_to_complex(px, py);
    let iterations = escape_time(c, params.max_iterations, params.escape_radius_sq);
    pixel_value(iterations, params.max_iterations)
}
