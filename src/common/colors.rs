//! カラーグラデーションと色変換関数

use image::Rgb;

use super::error::{Error, Result};

/// 累積幅の丸め誤差として許容する量
const ZONE_SUM_TOLERANCE: f64 = 1e-9;

/// 不透明な RGB カラー
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const RED: Color = Color::new(255, 0, 0);
    pub const ORANGE: Color = Color::new(255, 165, 0);
    pub const YELLOW: Color = Color::new(255, 255, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// minifb 用の u32 形式（0xRRGGBB）
    pub fn to_u32(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | (self.b as u32)
    }

    /// 2色の間を t (0.0〜1.0) で線形補間し、各チャンネルを最も近い整数に丸める
    pub fn lerp(self, other: Color, t: f64) -> Color {
        let channel = |a: u8, b: u8| -> u8 {
            let value = a as f64 + (b as f64 - a as f64) * t;
            value.round().clamp(0.0, 255.0) as u8
        };
        Color::new(
            channel(self.r, other.r),
            channel(self.g, other.g),
            channel(self.b, other.b),
        )
    }
}

impl From<Color> for Rgb<u8> {
    fn from(color: Color) -> Self {
        Rgb([color.r, color.g, color.b])
    }
}

/// グラデーション上の絶対位置 (0.0〜1.0) と色の組
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorStop {
    pub position: f64,
    pub color: Color,
}

impl ColorStop {
    pub const fn new(position: f64, color: Color) -> Self {
        Self { position, color }
    }
}

/// 直前の位置からの相対幅で指定する色
///
/// `percent_taken` はグラデーション全体に対する割合。累積和が絶対位置になる。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorZone {
    pub percent_taken: f64,
    pub color: Color,
}

impl ColorZone {
    pub const fn new(percent_taken: f64, color: Color) -> Self {
        Self {
            percent_taken,
            color,
        }
    }
}

/// 区分線形補間によるカラーグラデーション
///
/// 構築後は不変。ストップは位置の昇順に並び、先頭は必ず 0、末尾は必ず 1 にある
/// （指定がなければ最も近いストップの色で補われる）。同じ位置のストップが
/// 複数あっても構わない（幅 0 の区間になる）。
#[derive(Clone, Debug, PartialEq)]
pub struct Gradient {
    stops: Vec<ColorStop>,
}

impl Gradient {
    /// 絶対位置のストップからグラデーションを作る
    pub fn new(stops: impl IntoIterator<Item = ColorStop>) -> Result<Self> {
        let mut stops: Vec<ColorStop> = stops.into_iter().collect();
        if stops.is_empty() {
            return Err(Error::invalid_input("カラーストップが指定されていません"));
        }
        if let Some(stop) = stops.iter().find(|s| !(0.0..=1.0).contains(&s.position)) {
            return Err(Error::invalid_input(format!(
                "カラーストップの位置は 0〜1 の範囲が必要です: {}",
                stop.position
            )));
        }

        // 安定ソートなので同じ位置のストップは指定順を保つ
        stops.sort_by(|a, b| a.position.total_cmp(&b.position));
        Ok(Self::with_boundaries(stops))
    }

    /// 相対幅のゾーンからグラデーションを作る
    pub fn from_zones(zones: impl IntoIterator<Item = ColorZone>) -> Result<Self> {
        let zones: Vec<ColorZone> = zones.into_iter().collect();
        if zones.len() < 2 {
            return Err(Error::invalid_input(format!(
                "ゾーンは2つ以上必要です: {}",
                zones.len()
            )));
        }
        if let Some(zone) = zones
            .iter()
            .find(|z| !(z.percent_taken.is_finite() && z.percent_taken >= 0.0))
        {
            return Err(Error::invalid_input(format!(
                "ゾーンの幅は 0 以上の有限値が必要です: {}",
                zone.percent_taken
            )));
        }

        let total: f64 = zones.iter().map(|z| z.percent_taken).sum();
        if total > 1.0 + ZONE_SUM_TOLERANCE {
            return Err(Error::invalid_input(format!(
                "ゾーンの幅の合計は 1 を超えられません: {}",
                total
            )));
        }

        let mut cumulative = 0.0;
        let stops = zones
            .iter()
            .map(|zone| {
                cumulative += zone.percent_taken;
                ColorStop::new(cumulative.min(1.0), zone.color)
            })
            .collect();

        Ok(Self::with_boundaries(stops))
    }

    /// 黒 → 赤 → オレンジ → 黄 → 白 の標準グラデーション
    pub fn fire() -> Self {
        Self {
            stops: vec![
                ColorStop::new(0.0, Color::BLACK),
                ColorStop::new(0.0625, Color::RED),
                ColorStop::new(0.09375, Color::ORANGE),
                ColorStop::new(0.21875, Color::YELLOW),
                ColorStop::new(1.0, Color::WHITE),
            ],
        }
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// 位置 (0.0〜1.0) の色を計算
    pub fn evaluate(&self, position: f64) -> Result<Color> {
        if !(0.0..=1.0).contains(&position) {
            return Err(Error::invalid_input(format!(
                "位置は 0〜1 の範囲が必要です: {}",
                position
            )));
        }
        Ok(self.sample(position))
    }

    /// 反復回数のバイト値から色を計算（0 は集合の内側なので常に黒）
    pub fn color_for_iteration(&self, value: u8, max_iterations: u32) -> Color {
        if value == 0 {
            return Color::BLACK;
        }
        let position = (value as f64 / max_iterations.max(1) as f64).min(1.0);
        self.sample(position)
    }

    /// 範囲チェック済みの位置で補間する
    fn sample(&self, position: f64) -> Color {
        let (first, last) = match (self.stops.first(), self.stops.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Color::BLACK,
        };
        if position <= first.position {
            return first.color;
        }
        if position >= last.position {
            return last.color;
        }

        // position より大きい最初のストップ（first < position < last なので 1..len に収まる）
        let next_index = self.stops.partition_point(|s| s.position <= position);
        let prev = &self.stops[next_index - 1];
        let next = &self.stops[next_index];

        let width = next.position - prev.position;
        let t = if width > 0.0 {
            (position - prev.position) / width
        } else {
            0.0
        };
        prev.color.lerp(next.color, t)
    }

    fn with_boundaries(mut stops: Vec<ColorStop>) -> Self {
        if let Some(first) = stops.first().copied() {
            if first.position > 0.0 {
                stops.insert(0, ColorStop::new(0.0, first.color));
            }
        }
        if let Some(last) = stops.last().copied() {
            if last.position < 1.0 {
                stops.push(ColorStop::new(1.0, last.color));
            }
        }
        Self { stops }
    }
}

impl Default for Gradient {
    fn default() -> Self {
        Self::fire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_color() -> Gradient {
        Gradient::new([
            ColorStop::new(0.0, Color::BLACK),
            ColorStop::new(1.0, Color::WHITE),
        ])
        .unwrap()
    }

    #[test]
    fn to_u32_packs_rgb() {
        assert_eq!(Color::new(0x12, 0x34, 0x56).to_u32(), 0x123456);
        assert_eq!(Color::BLACK.to_u32(), 0);
    }

    #[test]
    fn lerp_rounds_to_nearest() {
        // 255 * 0.5 = 127.5 → 128
        assert_eq!(
            Color::BLACK.lerp(Color::WHITE, 0.5),
            Color::new(128, 128, 128)
        );
        assert_eq!(Color::RED.lerp(Color::BLACK, 0.0), Color::RED);
        assert_eq!(Color::RED.lerp(Color::BLACK, 1.0), Color::BLACK);
    }

    #[test]
    fn evaluate_interpolates_between_stops() {
        let gradient = two_color();
        assert_eq!(gradient.evaluate(0.25).unwrap(), Color::new(64, 64, 64));
        assert_eq!(gradient.evaluate(0.0).unwrap(), Color::BLACK);
        assert_eq!(gradient.evaluate(1.0).unwrap(), Color::WHITE);
    }

    #[test]
    fn evaluate_rejects_out_of_range() {
        let gradient = two_color();
        assert!(matches!(gradient.evaluate(-0.01), Err(Error::InvalidInput(_))));
        assert!(matches!(gradient.evaluate(1.01), Err(Error::InvalidInput(_))));
        assert!(matches!(gradient.evaluate(f64::NAN), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn stops_are_sorted() {
        let gradient = Gradient::new([
            ColorStop::new(1.0, Color::WHITE),
            ColorStop::new(0.5, Color::RED),
            ColorStop::new(0.0, Color::BLACK),
        ])
        .unwrap();
        let positions: Vec<f64> = gradient.stops().iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn missing_boundaries_are_synthesized() {
        let gradient = Gradient::new([
            ColorStop::new(0.25, Color::RED),
            ColorStop::new(0.75, Color::YELLOW),
        ])
        .unwrap();
        let stops = gradient.stops();
        assert_eq!(stops.len(), 4);
        assert_eq!(stops[0], ColorStop::new(0.0, Color::RED));
        assert_eq!(stops[3], ColorStop::new(1.0, Color::YELLOW));
        assert_eq!(gradient.evaluate(0.1).unwrap(), Color::RED);
        assert_eq!(gradient.evaluate(0.9).unwrap(), Color::YELLOW);
    }

    #[test]
    fn single_stop_becomes_solid_gradient() {
        let gradient = Gradient::new([ColorStop::new(0.5, Color::ORANGE)]).unwrap();
        assert_eq!(gradient.stops().len(), 3);
        assert_eq!(gradient.evaluate(0.3).unwrap(), Color::ORANGE);
    }

    #[test]
    fn empty_stops_rejected() {
        let result = Gradient::new(Vec::<ColorStop>::new());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn stop_outside_unit_interval_rejected() {
        let result = Gradient::new([ColorStop::new(1.5, Color::RED)]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn duplicate_positions_form_hard_edge() {
        let gradient = Gradient::new([
            ColorStop::new(0.0, Color::BLACK),
            ColorStop::new(0.5, Color::RED),
            ColorStop::new(0.5, Color::WHITE),
            ColorStop::new(1.0, Color::WHITE),
        ])
        .unwrap();
        // 0.5 ちょうどは後ろ側の区間（白 → 白）に入る
        assert_eq!(gradient.evaluate(0.5).unwrap(), Color::WHITE);
        assert_eq!(gradient.evaluate(0.25).unwrap(), Color::new(128, 0, 0));
    }

    #[test]
    fn zones_accumulate_positions() {
        let gradient = Gradient::from_zones([
            ColorZone::new(0.0, Color::BLACK),
            ColorZone::new(0.25, Color::RED),
            ColorZone::new(0.75, Color::WHITE),
        ])
        .unwrap();
        let positions: Vec<f64> = gradient.stops().iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0.0, 0.25, 1.0]);
    }

    #[test]
    fn zones_need_at_least_two_entries() {
        let result = Gradient::from_zones([ColorZone::new(1.0, Color::RED)]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn zones_exceeding_one_rejected() {
        let result = Gradient::from_zones([
            ColorZone::new(0.6, Color::RED),
            ColorZone::new(0.6, Color::WHITE),
        ]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn negative_zone_rejected() {
        let result = Gradient::from_zones([
            ColorZone::new(0.5, Color::RED),
            ColorZone::new(-0.1, Color::WHITE),
        ]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn iteration_zero_is_black() {
        let gradient = Gradient::new([ColorStop::new(0.0, Color::WHITE)]).unwrap();
        assert_eq!(gradient.color_for_iteration(0, 1000), Color::BLACK);
        assert_eq!(gradient.color_for_iteration(1, 1000), Color::WHITE);
    }

    #[test]
    fn fire_gradient_maps_small_counts_to_dark_red() {
        let gradient = Gradient::fire();
        // 12 / 1000 = 0.012 → 赤への区間の 19.2% → 255 * 0.192 = 48.96
        assert_eq!(gradient.color_for_iteration(12, 1000), Color::new(49, 0, 0));
        assert_eq!(gradient.color_for_iteration(1, 1000), Color::new(4, 0, 0));
    }
}
