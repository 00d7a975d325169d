//! エラー型

use crate::backend::BackendKind;

/// 描画エンジン全体で使うエラー
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// 呼び出し側の入力が不正（グラデーション構築、範囲外の位置、ズーム値など）
    #[error("不正な入力: {0}")]
    InvalidInput(String),

    /// 描画サイズが 0
    #[error("不正な描画サイズ: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// 要求されたデバイスが見つからない、または開けない
    #[error("{kind} デバイスが利用できません: {reason}")]
    DeviceUnavailable { kind: BackendKind, reason: String },

    /// カーネルの実行に失敗（ドライバ障害など）
    #[error("カーネルの実行に失敗しました: {0}")]
    KernelDispatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }
}
