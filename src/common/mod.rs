//! 描画エンジンとビューアで共有するモジュール

pub mod burning_ship;
pub mod colors;
pub mod config;
pub mod constants;
pub mod error;
