//! CPU バックエンド（Rayon スレッドプール）

use log::{debug, info};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{BackendKind, ComputeBackend};
use crate::common::burning_ship::{compute_pixel, KernelParams};
use crate::common::error::{Error, Result};

pub struct CpuBackend {
    pool: Option<ThreadPool>,
    name: String,
}

impl CpuBackend {
    /// `threads` が 0 なら論理コア数のワーカーを起動する
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("burning-ship-{}", index))
            .build()
            .map_err(|e| Error::DeviceUnavailable {
                kind: BackendKind::Cpu,
                reason: e.to_string(),
            })?;

        let name = format!("CPU ({} threads)", pool.current_num_threads());
        info!("CPU バックエンド: {}", name);
        Ok(Self {
            pool: Some(pool),
            name,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(0, |pool| pool.current_num_threads())
    }
}

impl ComputeBackend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn dispatch(&mut self, params: &KernelParams, output: &mut [u8]) -> Result<()> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| Error::KernelDispatch("CPU バックエンドは解放済みです".into()))?;
        if output.len() != params.pixel_count() {
            return Err(Error::KernelDispatch(format!(
                "出力バッファのサイズが一致しません: {} != {}",
                output.len(),
                params.pixel_count()
            )));
        }

        if output.is_empty() {
            return Ok(());
        }

        let width = params.width as usize;
        debug!("CPU dispatch: {}x{}", params.width, params.height);

        // install は全行の計算が終わるまで戻らない
        pool.install(|| {
            output
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(row, row_data)| {
                    let offset = row * width;
                    for (col, pixel) in row_data.iter_mut().enumerate() {
                        *pixel = compute_pixel(offset + col, params);
                    }
                });
        });
        Ok(())
    }

    fn release(&mut self) {
        if self.pool.take().is_some() {
            debug!("CPU スレッドプールを解放しました");
        }
    }
}
