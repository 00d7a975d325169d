//! 共通定数

/// 最大反復回数（この回数に達した点は集合の内側とみなす）
pub const MAX_ITERATIONS: u32 = 1000;

/// 初期表示で Burning Ship 全体が収まるようにする中心オフセット（実部）
pub const CENTER_RE: f64 = -1.76;
/// 初期表示の中心オフセット（虚部）
pub const CENTER_IM: f64 = -0.03;

/// ズーム倍率 1 のときの複素平面上の表示幅
pub const VIEW_SPAN: f64 = 3.0;

/// 発散判定の閾値 |z|^2（|z| = 2 の二乗）
pub const ESCAPE_RADIUS_SQ: f64 = 4.0;

/// ビューアの初期ウィンドウサイズ
pub const WINDOW_WIDTH: usize = 800;
pub const WINDOW_HEIGHT: usize = 600;

/// マウスホイール1段あたりのズーム変化量
pub const ZOOM_DELTA: f64 = 0.1;

/// ドラッグ量をパン量へ変換する係数
pub const PAN_SPEED: f64 = 2.0;
