//! GPU バックエンド（wgpu コンピュートシェーダー）
//!
//! CUDA / OpenCL のデバイス種別は wgpu が列挙するアダプタで判定する:
//!   - CUDA: NVIDIA 製のハードウェア GPU
//!   - OpenCL: 任意のハードウェア GPU（ディスクリート → 内蔵 → 仮想の順に優先）
//!
//! ソフトウェアラスタライザ（DeviceType::Cpu）はどちらにも該当しない。
//! WGSL には移植性のある f64 がないため、GPU 上の計算は f32 で行う。

use bytemuck::{Pod, Zeroable};
use log::{debug, info, warn};

use super::{BackendKind, ComputeBackend};
use crate::common::burning_ship::KernelParams;
use crate::common::error::{Error, Result};

/// NVIDIA の PCI ベンダー ID
const NVIDIA_VENDOR_ID: u32 = 0x10DE;

/// シェーダー側の @workgroup_size と一致させること
const WORKGROUP_SIZE: u32 = 64;

/// 1ワード (u32) に詰めるピクセル数
const PIXELS_PER_WORD: usize = 4;

const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65535;

/// GPU に渡すパラメータ構造体（WGSL の Params と同じレイアウト）
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct GpuParams {
    width: u32,
    height: u32,
    max_iterations: u32,
    pixel_count: u32,
    zoom: f32,
    pan_x: f32,
    pan_y: f32,
    view_span: f32,
    center_re: f32,
    center_im: f32,
    escape_radius_sq: f32,
    _padding: f32,
}

impl TryFrom<&KernelParams> for GpuParams {
    type Error = Error;

    fn try_from(params: &KernelParams) -> Result<Self> {
        let pixel_count = u32::try_from(params.pixel_count()).map_err(|_| {
            Error::KernelDispatch(format!(
                "ピクセル数が多すぎます: {}x{}",
                params.width, params.height
            ))
        })?;
        Ok(Self {
            width: params.width,
            height: params.height,
            max_iterations: params.max_iterations,
            pixel_count,
            zoom: params.zoom as f32,
            pan_x: params.pan_x as f32,
            pan_y: params.pan_y as f32,
            view_span: params.view_span as f32,
            center_re: params.center.re as f32,
            center_im: params.center.im as f32,
            escape_radius_sq: params.escape_radius_sq as f32,
            _padding: 0.0,
        })
    }
}

/// 描画サイズごとに確保するデバイス側バッファ
struct DeviceBuffers {
    pixel_count: usize,
    size: u64,
    output_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl DeviceBuffers {
    fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        params_buffer: &wgpu::Buffer,
        pixel_count: usize,
        size: u64,
    ) -> Self {
        let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Burning Ship Output Buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Burning Ship Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Burning Ship Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output_buffer.as_entire_binding(),
                },
            ],
        });

        debug!("GPU バッファを確保しました: {} bytes", size);
        Self {
            pixel_count,
            size,
            output_buffer,
            staging_buffer,
            bind_group,
        }
    }

    fn destroy(self) {
        self.output_buffer.destroy();
        self.staging_buffer.destroy();
    }
}

/// GPU コンテキスト
struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    buffers: Option<DeviceBuffers>,
}

impl GpuContext {
    fn new(kind: BackendKind, adapter: &wgpu::Adapter) -> Result<Self> {
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Burning Ship Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| Error::DeviceUnavailable {
            kind,
            reason: e.to_string(),
        })?;

        // シェーダーのコンパイルエラーはここで拾う
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Burning Ship Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("burning_ship.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Burning Ship Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Burning Ship Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Burning Ship Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            device.destroy();
            return Err(Error::KernelDispatch(format!(
                "シェーダーのコンパイルに失敗しました: {}",
                error
            )));
        }

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Burning Ship Params Buffer"),
            size: std::mem::size_of::<GpuParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            params_buffer,
            buffers: None,
        })
    }

    /// 描画サイズが変わったときだけバッファを作り直す
    fn ensure_buffers(&mut self, pixel_count: usize, size: u64) {
        let reusable = self
            .buffers
            .as_ref()
            .is_some_and(|buffers| buffers.pixel_count == pixel_count);
        if reusable {
            return;
        }

        if let Some(old) = self.buffers.take() {
            old.destroy();
        }
        self.buffers = Some(DeviceBuffers::new(
            &self.device,
            &self.bind_group_layout,
            &self.params_buffer,
            pixel_count,
            size,
        ));
    }

    fn compute(&mut self, params: &KernelParams, output: &mut [u8]) -> Result<()> {
        let pixel_count = params.pixel_count();
        let size = output_buffer_size(pixel_count, &self.device.limits())?;
        let gpu_params = GpuParams::try_from(params)?;
        let (workgroups_x, workgroups_y) = workgroup_grid(word_count(pixel_count))?;

        // バッファ確保もスコープ内に入れ、検証エラーを既定ハンドラ（panic）に渡さない
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        self.ensure_buffers(pixel_count, size);
        let Some(buffers) = self.buffers.as_ref() else {
            let _ = pollster::block_on(self.device.pop_error_scope());
            let _ = pollster::block_on(self.device.pop_error_scope());
            return Err(Error::KernelDispatch("GPU バッファがありません".into()));
        };

        // パラメータをGPUに送信
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&gpu_params));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Burning Ship Encoder"),
            });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Burning Ship Compute Pass"),
                timestamp_writes: None,
            });

            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &buffers.bind_group, &[]);

            compute_pass.dispatch_workgroups(workgroups_x, workgroups_y, 1);
        }

        // 結果をステージングバッファにコピー
        encoder.copy_buffer_to_buffer(
            &buffers.output_buffer,
            0,
            &buffers.staging_buffer,
            0,
            buffers.size,
        );

        self.queue.submit(std::iter::once(encoder.finish()));

        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(error) = validation.or(out_of_memory) {
            return Err(Error::KernelDispatch(error.to_string()));
        }

        // 全ピクセルの計算が終わるまで待ってから読み取る
        let buffer_slice = buffers.staging_buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        let status = self.device.poll(wgpu::Maintain::Wait);
        debug!("GPU 待機完了 (キュー空: {})", status.is_queue_empty());
        receiver
            .recv()
            .map_err(|e| Error::KernelDispatch(e.to_string()))?
            .map_err(|e| Error::KernelDispatch(e.to_string()))?;

        {
            let data = buffer_slice.get_mapped_range();
            output.copy_from_slice(&data[..pixel_count]);
        }
        buffers.staging_buffer.unmap();

        Ok(())
    }

    fn destroy(mut self) {
        if let Some(buffers) = self.buffers.take() {
            buffers.destroy();
        }
        self.params_buffer.destroy();
        self.device.destroy();
    }
}

pub struct GpuBackend {
    kind: BackendKind,
    name: String,
    context: Option<GpuContext>,
}

impl GpuBackend {
    /// 条件に合うアダプタを探し、デバイスを開いてカーネルをコンパイルする
    pub fn new(kind: BackendKind) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = find_adapter(&instance, kind)?;
        let info = adapter.get_info();
        let name = format!("{} ({:?})", info.name, info.backend);

        let context = GpuContext::new(kind, &adapter)?;
        info!("{} バックエンド: {}", kind, name);

        Ok(Self {
            kind,
            name,
            context: Some(context),
        })
    }
}

impl ComputeBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn dispatch(&mut self, params: &KernelParams, output: &mut [u8]) -> Result<()> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| Error::KernelDispatch(format!("{} バックエンドは解放済みです", self.kind)))?;
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

        debug!("{} dispatch: {}x{}", self.kind, params.width, params.height);
        let result = context.compute(params, output);
        if let Err(error) = &result {
            // 壊れた可能性のあるバッファは捨て、次回の描画で作り直す
            warn!("{} の実行に失敗しました: {}", self.kind, error);
            if let Some(buffers) = context.buffers.take() {
                buffers.destroy();
            }
        }
        result
    }

    fn release(&mut self) {
        if let Some(context) = self.context.take() {
            context.destroy();
            info!("{} デバイスを解放しました: {}", self.kind, self.name);
        }
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        self.release();
    }
}

fn find_adapter(instance: &wgpu::Instance, kind: BackendKind) -> Result<wgpu::Adapter> {
    let mut candidates: Vec<(u8, wgpu::Adapter)> = instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .filter_map(|adapter| {
            let info = adapter.get_info();
            debug!(
                "アダプタ: {} (vendor 0x{:04X}, {:?}, {:?})",
                info.name, info.vendor, info.device_type, info.backend
            );
            adapter_rank(kind, &info).map(|rank| (rank, adapter))
        })
        .collect();

    candidates.sort_by_key(|(rank, _)| *rank);
    candidates
        .into_iter()
        .next()
        .map(|(_, adapter)| adapter)
        .ok_or_else(|| Error::DeviceUnavailable {
            kind,
            reason: "該当するアダプタが見つかりません".into(),
        })
}

/// アダプタが要求された種別に該当すれば優先度（小さいほど優先）を返す
fn adapter_rank(kind: BackendKind, info: &wgpu::AdapterInfo) -> Option<u8> {
    let type_rank = match info.device_type {
        wgpu::DeviceType::DiscreteGpu => 0,
        wgpu::DeviceType::IntegratedGpu => 1,
        wgpu::DeviceType::VirtualGpu => 2,
        wgpu::DeviceType::Cpu | wgpu::DeviceType::Other => return None,
    };
    match kind {
        BackendKind::Cpu => None,
        BackendKind::Cuda => (info.vendor == NVIDIA_VENDOR_ID).then_some(type_rank),
        BackendKind::OpenCl => Some(type_rank),
    }
}

fn word_count(pixel_count: usize) -> usize {
    pixel_count.div_ceil(PIXELS_PER_WORD)
}

/// 出力バッファのバイト数を求め、デバイスの上限に収まるか確認する
///
/// copy_buffer_to_buffer は 4 バイト単位なので語数で確保する。
fn output_buffer_size(pixel_count: usize, limits: &wgpu::Limits) -> Result<u64> {
    if u32::try_from(pixel_count).is_err() {
        return Err(Error::KernelDispatch(format!(
            "ピクセル数が多すぎます: {}",
            pixel_count
        )));
    }

    let size = (word_count(pixel_count).max(1) * std::mem::size_of::<u32>()) as u64;
    let limit = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
    if size > limit {
        return Err(Error::KernelDispatch(format!(
            "出力バッファがデバイスの上限を超えます: {} bytes > {} bytes",
            size, limit
        )));
    }
    Ok(size)
}

/// 1次元の語数を 2次元のワークグループ数に分割（1次元あたり 65535 まで）
fn workgroup_grid(words: usize) -> Result<(u32, u32)> {
    let groups = u32::try_from(words.div_ceil(WORKGROUP_SIZE as usize))
        .map_err(|_| Error::KernelDispatch(format!("語数が多すぎます: {}", words)))?
        .max(1);
    let x = groups.min(MAX_WORKGROUPS_PER_DIMENSION);
    let y = groups.div_ceil(x);
    if y > MAX_WORKGROUPS_PER_DIMENSION {
        return Err(Error::KernelDispatch(format!("語数が多すぎます: {}", words)));
    }
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter_info(vendor: u32, device_type: wgpu::DeviceType) -> wgpu::AdapterInfo {
        wgpu::AdapterInfo {
            name: "test adapter".into(),
            vendor,
            device: 0,
            device_type,
            driver: String::new(),
            driver_info: String::new(),
            backend: wgpu::Backend::Vulkan,
        }
    }

    #[test]
    fn params_layout_is_uniform_aligned() {
        assert_eq!(std::mem::size_of::<GpuParams>(), 48);
        assert_eq!(std::mem::size_of::<GpuParams>() % 16, 0);
    }

    #[test]
    fn cuda_requires_nvidia_hardware() {
        let nvidia = adapter_info(NVIDIA_VENDOR_ID, wgpu::DeviceType::DiscreteGpu);
        let amd = adapter_info(0x1002, wgpu::DeviceType::DiscreteGpu);
        assert_eq!(adapter_rank(BackendKind::Cuda, &nvidia), Some(0));
        assert_eq!(adapter_rank(BackendKind::Cuda, &amd), None);
    }

    #[test]
    fn opencl_accepts_any_hardware_gpu() {
        let integrated = adapter_info(0x8086, wgpu::DeviceType::IntegratedGpu);
        let discrete = adapter_info(0x1002, wgpu::DeviceType::DiscreteGpu);
        assert_eq!(adapter_rank(BackendKind::OpenCl, &integrated), Some(1));
        assert_eq!(adapter_rank(BackendKind::OpenCl, &discrete), Some(0));
    }

    #[test]
    fn software_rasterizers_never_match() {
        let llvmpipe = adapter_info(0x10005, wgpu::DeviceType::Cpu);
        let nvidia_sw = adapter_info(NVIDIA_VENDOR_ID, wgpu::DeviceType::Cpu);
        for kind in BackendKind::ALL {
            assert_eq!(adapter_rank(kind, &llvmpipe), None);
            assert_eq!(adapter_rank(kind, &nvidia_sw), None);
        }
    }

    #[test]
    fn word_count_rounds_up() {
        assert_eq!(word_count(4), 1);
        assert_eq!(word_count(5), 2);
        assert_eq!(word_count(800 * 600), 120_000);
    }

    #[test]
    fn workgroup_grid_covers_all_words() {
        assert_eq!(workgroup_grid(1).unwrap(), (1, 1));
        assert_eq!(workgroup_grid(120_000).unwrap(), (1875, 1));

        // 65535 * 64 語を超えると 2 次元に分割される
        let words = 65535 * 64 + 1;
        let (x, y) = workgroup_grid(words).unwrap();
        assert_eq!((x, y), (65535, 2));
        assert!(x as usize * y as usize * WORKGROUP_SIZE as usize >= words);
    }

    #[test]
    fn gpu_params_convert_to_f32() {
        let params = KernelParams::new(
            8,
            4,
            2.0,
            4.0,
            2.0,
            &crate::common::config::RenderConfig::default(),
        );
        let gpu = GpuParams::try_from(&params).unwrap();
        assert_eq!(gpu.pixel_count, 32);
        assert_eq!(gpu.pan_x, 0.5);
        assert_eq!(gpu.pan_y, 0.5);
        assert_eq!(gpu.center_re, -1.76f32);
        assert_eq!(gpu.max_iterations, 1000);
    }

    #[test]
    fn output_buffer_is_padded_to_whole_words() {
        let limits = wgpu::Limits::downlevel_defaults();
        assert_eq!(output_buffer_size(1, &limits).unwrap(), 4);
        assert_eq!(output_buffer_size(800 * 600, &limits).unwrap(), 480_000);
    }

    #[test]
    fn oversized_output_is_a_dispatch_error() {
        // 下位互換の上限 128 MiB を 12000x12000 は超える
        let limits = wgpu::Limits::downlevel_defaults();
        assert!(matches!(
            output_buffer_size(12_000 * 12_000, &limits),
            Err(Error::KernelDispatch(_))
        ));

        let unlimited = wgpu::Limits {
            max_storage_buffer_binding_size: u32::MAX,
            max_buffer_size: u64::MAX,
            ..wgpu::Limits::default()
        };
        assert!(output_buffer_size(12_000 * 12_000, &unlimited).is_ok());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn pixel_count_beyond_u32_is_rejected() {
        let unlimited = wgpu::Limits {
            max_storage_buffer_binding_size: u32::MAX,
            max_buffer_size: u64::MAX,
            ..wgpu::Limits::default()
        };
        assert!(matches!(
            output_buffer_size(u32::MAX as usize + 1, &unlimited),
            Err(Error::KernelDispatch(_))
        ));

        let params = KernelParams::new(
            u32::MAX,
            2,
            1.0,
            0.0,
            0.0,
            &crate::common::config::RenderConfig::default(),
        );
        assert!(matches!(
            GpuParams::try_from(&params),
            Err(Error::KernelDispatch(_))
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn workgroup_grid_rejects_too_many_words() {
        let words = 65535 * 65535 * WORKGROUP_SIZE as usize + 1;
        assert!(matches!(
            workgroup_grid(words),
            Err(Error::KernelDispatch(_))
        ));
    }
}
