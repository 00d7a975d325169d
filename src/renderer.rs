//! Burning Ship フラクタルレンダラー
//!
//! 1回の描画の流れ:
//!   1. パン量を画面サイズで正規化する
//!   2. 現在のバックエンドで width*height 個のインデックスにカーネルを適用する
//!   3. 全ピクセルの完了を待ってホスト側バッファに結果を受け取る
//!   4. 各バイトをグラデーションで色に変換して画像を組み立てる
//!
//! 描画とバックエンド切替は呼び出し側で直列化すること（内部でロックはしない）。

use image::RgbImage;
use log::{debug, info};
use rayon::prelude::*;

use crate::backend::{select_backend, Backend, BackendKind, ComputeBackend};
use crate::common::burning_ship::KernelParams;
use crate::common::colors::Gradient;
use crate::common::config::RenderConfig;
use crate::common::error::{Error, Result};

/// 前回の描画サイズと、それに合わせて確保したホスト側バッファ
struct IterationBuffer {
    width: u32,
    height: u32,
    values: Vec<u8>,
}

impl IterationBuffer {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0; width as usize * height as usize],
        }
    }

    fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

pub struct FractalRenderer {
    config: RenderConfig,
    gradient: Gradient,
    kind: BackendKind,
    backend: Option<Backend>,
    cache: Option<IterationBuffer>,
}

impl FractalRenderer {
    /// 標準設定でレンダラーを作る
    pub fn new(kind: BackendKind) -> Result<Self> {
        Self::with_config(kind, RenderConfig::default())
    }

    pub fn with_config(kind: BackendKind, config: RenderConfig) -> Result<Self> {
        config.validate()?;
        let backend = select_backend(kind, &config)?;
        Ok(Self {
            config,
            gradient: Gradient::default(),
            kind,
            backend: Some(backend),
            cache: None,
        })
    }

    pub fn with_gradient(mut self, gradient: Gradient) -> Self {
        self.gradient = gradient;
        self
    }

    pub fn set_gradient(&mut self, gradient: Gradient) {
        self.gradient = gradient;
    }

    pub fn gradient(&self) -> &Gradient {
        &self.gradient
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// 実行中のデバイス名（解放済みなら None）
    pub fn device_name(&self) -> Option<&str> {
        self.backend.as_ref().map(|backend| backend.device_name())
    }

    /// バックエンドを切り替える
    ///
    /// 新しいバックエンドの構築に成功してから古いものを解放するので、
    /// 失敗しても直前のバックエンドはそのまま使える。
    pub fn select_backend(&mut self, kind: BackendKind) -> Result<()> {
        if kind == self.kind && self.backend.is_some() {
            debug!("{} バックエンドは選択済みです", kind);
            return Ok(());
        }

        let backend = select_backend(kind, &self.config)?;
        if let Some(mut old) = self.backend.replace(backend) {
            old.release();
        }
        info!("バックエンド切替: {} → {}", self.kind, kind);
        self.kind = kind;
        Ok(())
    }

    /// 現在のバックエンドのデバイスコンテキストとホスト側バッファを解放する
    ///
    /// 解放後に `render` を呼ぶと、同じ種類のバックエンドを取得し直す。
    pub fn release_resources(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.release();
            info!("{} バックエンドを解放しました", self.kind);
        }
        self.cache = None;
    }

    /// 各ピクセルの反復回数バイト（0 は集合の内側）を計算する
    pub fn render_iterations(
        &mut self,
        width: u32,
        height: u32,
        zoom: f64,
        pan_x: f64,
        pan_y: f64,
    ) -> Result<&[u8]> {
        self.compute(width, height, zoom, pan_x, pan_y)?;
        self.cache
            .as_ref()
            .map(|cache| cache.values.as_slice())
            .ok_or_else(|| Error::KernelDispatch("結果バッファがありません".into()))
    }

    /// 描画して RGB 画像を返す
    pub fn render(
        &mut self,
        width: u32,
        height: u32,
        zoom: f64,
        pan_x: f64,
        pan_y: f64,
    ) -> Result<RgbImage> {
        self.compute(width, height, zoom, pan_x, pan_y)?;
        let values = self
            .cache
            .as_ref()
            .map(|cache| cache.values.as_slice())
            .ok_or_else(|| Error::KernelDispatch("結果バッファがありません".into()))?;

        let gradient = &self.gradient;
        let max_iterations = self.config.max_iterations;

        // 反復回数を色に変換
        let mut image = RgbImage::new(width, height);
        image
            .par_chunks_mut(3)
            .zip(values.par_iter())
            .for_each(|(pixel, &value)| {
                let color = gradient.color_for_iteration(value, max_iterations);
                pixel.copy_from_slice(&[color.r, color.g, color.b]);
            });

        Ok(image)
    }

    fn compute(&mut self, width: u32, height: u32, zoom: f64, pan_x: f64, pan_y: f64) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        if !(zoom.is_finite() && zoom > 0.0) {
            return Err(Error::InvalidInput(format!(
                "ズーム倍率は正の有限値が必要です: {}",
                zoom
            )));
        }
        if !(pan_x.is_finite() && pan_y.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "パン量が有限ではありません: ({}, {})",
                pan_x, pan_y
            )));
        }

        if self.backend.is_none() {
            debug!("{} バックエンドを再取得します", self.kind);
            self.backend = Some(select_backend(self.kind, &self.config)?);
        }

        if !self.cache.as_ref().is_some_and(|cache| cache.matches(width, height)) {
            debug!("ホスト側バッファを確保します: {}x{}", width, height);
            self.cache = Some(IterationBuffer::new(width, height));
        }

        let params = KernelParams::new(width, height, zoom, pan_x, pan_y, &self.config);
        let (backend, cache) = match (self.backend.as_mut(), self.cache.as_mut()) {
            (Some(backend), Some(cache)) => (backend, cache),
            _ => return Err(Error::KernelDispatch("バックエンドが初期化されていません".into())),
        };

        if let Err(error) = backend.dispatch(&params, &mut cache.values) {
            // 途中まで書き込まれた結果は残さない
            self.cache = None;
            return Err(error);
        }
        Ok(())
    }
}

impl Drop for FractalRenderer {
    fn drop(&mut self) {
        self.release_resources();
    }
}
