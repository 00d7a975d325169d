//! 描画設定

use num_complex::Complex;

use super::constants::{CENTER_IM, CENTER_RE, ESCAPE_RADIUS_SQ, MAX_ITERATIONS, VIEW_SPAN};
use super::error::{Error, Result};

/// カーネルと CPU バックエンドの設定
///
/// `Default` は従来の固定値（反復上限 1000、中心 -1.76 - 0.03i、表示幅 3.0）と同じ。
/// 反復上限はズームに応じて増やさないため、深いズームではバンディングが出る。
#[derive(Clone, Debug, PartialEq)]
pub struct RenderConfig {
    pub max_iterations: u32,
    pub center: Complex<f64>,
    pub view_span: f64,
    pub escape_radius_sq: f64,
    /// CPU バックエンドのスレッド数（0 なら論理コア数）
    pub cpu_threads: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            center: Complex::new(CENTER_RE, CENTER_IM),
            view_span: VIEW_SPAN,
            escape_radius_sq: ESCAPE_RADIUS_SQ,
            cpu_threads: 0,
        }
    }
}

impl RenderConfig {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_center(mut self, center: Complex<f64>) -> Self {
        self.center = center;
        self
    }

    pub fn with_view_span(mut self, view_span: f64) -> Self {
        self.view_span = view_span;
        self
    }

    pub fn with_escape_radius_sq(mut self, escape_radius_sq: f64) -> Self {
        self.escape_radius_sq = escape_radius_sq;
        self
    }

    pub fn with_cpu_threads(mut self, cpu_threads: usize) -> Self {
        self.cpu_threads = cpu_threads;
        self
    }

    /// 設定値の妥当性を確認
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::invalid_input("max_iterations は 1 以上が必要です"));
        }
        if !self.center.re.is_finite() || !self.center.im.is_finite() {
            return Err(Error::invalid_input(format!(
                "中心座標が有限ではありません: {}",
                self.center
            )));
        }
        if !(self.view_span.is_finite() && self.view_span > 0.0) {
            return Err(Error::invalid_input(format!(
                "view_span は正の有限値が必要です: {}",
                self.view_span
            )));
        }
        if !(self.escape_radius_sq.is_finite() && self.escape_radius_sq > 0.0) {
            return Err(Error::invalid_input(format!(
                "escape_radius_sq は正の有限値が必要です: {}",
                self.escape_radius_sq
            )));
        }
        Ok(())
    }
}
