//! 計算バックエンド（CPU スレッドプール / GPU デバイス）
//!
//! カーネルはバックエンド選択時に一度だけ用意し、描画ごとには選び直さない。
//! `Backend` はどのバックエンドかを表すタグ付きハンドルで、ピクセルごとの
//! ホットパスには動的ディスパッチが入らない。

mod cpu;
mod gpu;

use std::fmt;
use std::str::FromStr;

pub use cpu::CpuBackend;
pub use gpu::GpuBackend;

use crate::common::burning_ship::KernelParams;
use crate::common::config::RenderConfig;
use crate::common::error::Result;
#[cfg(test)]
use crate::common::error::Error;

/// 要求できるデバイスの種類
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Cpu,
    Cuda,
    OpenCl,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Cpu, BackendKind::Cuda, BackendKind::OpenCl];
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "CPU"),
            BackendKind::Cuda => write!(f, "CUDA"),
            BackendKind::OpenCl => write!(f, "OpenCL"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            "cuda" => Ok(BackendKind::Cuda),
            "opencl" | "cl" => Ok(BackendKind::OpenCl),
            other => Err(format!(
                "不明なバックエンド: {} (cpu / cuda / opencl)",
                other
            )),
        }
    }
}

/// 並列実行の能力を持つバックエンド
pub trait ComputeBackend {
    fn kind(&self) -> BackendKind;

    /// 実行デバイスの名前（ログ・表示用）
    fn device_name(&self) -> &str;

    /// 全ピクセルにカーネルを適用し、完了まで待ってから `output` に書き込む
    ///
    /// `output.len()` は `params.pixel_count()` と等しいこと。
    fn dispatch(&mut self, params: &KernelParams, output: &mut [u8]) -> Result<()>;

    /// デバイスコンテキストを解放する。以降の `dispatch` は失敗する。
    fn release(&mut self);
}

/// 選択済みバックエンドのハンドル
pub enum Backend {
    Cpu(CpuBackend),
    Gpu(GpuBackend),
    #[cfg(test)]
    Flaky(FlakyBackend),
}

impl ComputeBackend for Backend {
    fn kind(&self) -> BackendKind {
        match self {
            Backend::Cpu(cpu) => cpu.kind(),
            Backend::Gpu(gpu) => gpu.kind(),
            #[cfg(test)]
            Backend::Flaky(flaky) => flaky.kind(),
        }
    }

    fn device_name(&self) -> &str {
        match self {
            Backend::Cpu(cpu) => cpu.device_name(),
            Backend::Gpu(gpu) => gpu.device_name(),
            #[cfg(test)]
            Backend::Flaky(flaky) => flaky.device_name(),
        }
    }

    fn dispatch(&mut self, params: &KernelParams, output: &mut [u8]) -> Result<()> {
        match self {
            Backend::Cpu(cpu) => cpu.dispatch(params, output),
            Backend::Gpu(gpu) => gpu.dispatch(params, output),
            #[cfg(test)]
            Backend::Flaky(flaky) => flaky.dispatch(params, output),
        }
    }

    fn release(&mut self) {
        match self {
            Backend::Cpu(cpu) => cpu.release(),
            Backend::Gpu(gpu) => gpu.release(),
            #[cfg(test)]
            Backend::Flaky(flaky) => flaky.release(),
        }
    }
}

/// バックエンドを選択してカーネルを用意する
///
/// CPU は常に利用可能。CUDA / OpenCL は該当するデバイスがなければ
/// `DeviceUnavailable` を返し、CPU へ勝手に切り替えることはしない。
pub fn select_backend(kind: BackendKind, config: &RenderConfig) -> Result<Backend> {
    match kind {
        BackendKind::Cpu => CpuBackend::new(config.cpu_threads).map(Backend::Cpu),
        BackendKind::Cuda | BackendKind::OpenCl => GpuBackend::new(kind).map(Backend::Gpu),
    }
}

/// 最初の `failures` 回の dispatch で出力を途中まで書き換えてから失敗する
#[cfg(test)]
pub struct FlakyBackend {
    inner: CpuBackend,
    failures: usize,
}

#[cfg(test)]
impl FlakyBackend {
    pub fn new(failures: usize) -> Result<Self> {
        Ok(Self {
            inner: CpuBackend::new(1)?,
            failures,
        })
    }
}

#[cfg(test)]
impl ComputeBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn device_name(&self) -> &str {
        "flaky"
    }

    fn dispatch(&mut self, params: &KernelParams, output: &mut [u8]) -> Result<()> {
        if self.failures == 0 {
            return self.inner.dispatch(params, output);
        }
        self.failures -= 1;
        let half = output.len() / 2;
        output[..half].fill(0xAB);
        Err(Error::KernelDispatch("デバイスが応答しません".into()))
    }

    fn release(&mut self) {
        self.inner.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("CPU".parse::<BackendKind>().unwrap(), BackendKind::Cpu);
        assert_eq!("cuda".parse::<BackendKind>().unwrap(), BackendKind::Cuda);
        assert_eq!("OpenCL".parse::<BackendKind>().unwrap(), BackendKind::OpenCl);
        assert!("metal".parse::<BackendKind>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn cpu_is_always_available() {
        let backend = select_backend(BackendKind::Cpu, &RenderConfig::default()).unwrap();
        assert_eq!(backend.kind(), BackendKind::Cpu);
    }

    #[test]
    fn gpu_selection_fails_only_with_device_unavailable() {
        for kind in [BackendKind::Cuda, BackendKind::OpenCl] {
            match select_backend(kind, &RenderConfig::default()) {
                Ok(backend) => assert_eq!(backend.kind(), kind),
                Err(Error::DeviceUnavailable { kind: failed, .. }) => assert_eq!(failed, kind),
                Err(other) => panic!("unexpected error for {}: {}", kind, other),
            }
        }
    }

    #[test]
    fn flaky_backend_recovers_after_its_failures() {
        let config = RenderConfig::default();
        let params = KernelParams::new(2, 2, 1.0, 0.0, 0.0, &config);
        let mut backend = Backend::Flaky(FlakyBackend::new(1).unwrap());
        let mut output = [0u8; 4];

        assert!(matches!(
            backend.dispatch(&params, &mut output),
            Err(Error::KernelDispatch(_))
        ));
        backend.dispatch(&params, &mut output).unwrap();
        assert_eq!(output, [1, 1, 1, 12]);
    }
}
