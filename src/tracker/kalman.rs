/// 1次元カルマンフィルタのノイズパラメータ
///
/// 値はすべて非負であること。負の値を渡した場合の挙動は未定義（呼び出し側の責任）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanParams {
    /// 観測誤差。大きいほど出力が動きにくい
    pub measurement_error: f32,
    /// 推定誤差の初期値
    pub estimate_error: f32,
    /// プロセスノイズ。大きいほど速い動きに追従する
    pub process_noise: f32,
}

impl KalmanParams {
    pub const fn new(measurement_error: f32, estimate_error: f32, process_noise: f32) -> Self {
        Self {
            measurement_error,
            estimate_error,
            process_noise,
        }
    }
}

/// 位置軸のデフォルト。四肢の速い移動に追従できるようノイズを大きめに取る
pub const POSITION_DEFAULTS: KalmanParams = KalmanParams::new(0.18, 0.1, 0.014);

/// 回転軸のデフォルト。回転は位置より安定させる
pub const ORIENTATION_DEFAULTS: KalmanParams = KalmanParams::new(0.001, 0.001, 0.014);

/// 1スカラー値の再帰推定フィルタ
///
/// 最初の観測値はそのまま推定値になる。以降は再帰更新。
#[derive(Debug, Clone)]
pub struct AxisFilter {
    current_estimate: Option<f32>,
    current_estimate_error: f32,
    measurement_error: f32,
    estimate_error: f32,
    process_noise: f32,
}

impl AxisFilter {
    pub fn new(params: KalmanParams) -> Self {
        Self {
            current_estimate: None,
            current_estimate_error: params.estimate_error,
            measurement_error: params.measurement_error,
            estimate_error: params.estimate_error,
            process_noise: params.process_noise,
        }
    }

    /// 観測値を1つ取り込み、新しい推定値を返す
    pub fn update(&mut self, measurement: f32) -> f32 {
        let Some(current) = self.current_estimate else {
            self.current_estimate = Some(measurement);
            return measurement;
        };

        let predicted_error = self.current_estimate_error + self.process_noise;
        let gain = predicted_error / (predicted_error + self.measurement_error);
        let estimate = current + gain * (measurement - current);

        self.current_estimate_error =
            (1.0 - gain) * predicted_error + (current - estimate).abs() * self.process_noise;
        self.current_estimate = Some(estimate);
        estimate
    }

    pub fn set_measurement_error(&mut self, measurement_error: f32) {
        self.measurement_error = measurement_error;
    }

    /// 推定誤差を再設定する。現在の推定誤差もこの値に戻る
    pub fn set_estimate_error(&mut self, estimate_error: f32) {
        self.estimate_error = estimate_error;
        self.current_estimate_error = estimate_error;
    }

    pub fn set_process_noise(&mut self, process_noise: f32) {
        self.process_noise = process_noise;
    }

    /// まだ観測が無ければ None
    #[cfg(test)]
    pub(crate) fn estimate(&self) -> Option<f32> {
        self.current_estimate
    }

    #[cfg(test)]
    pub(crate) fn estimate_error(&self) -> f32 {
        self.current_estimate_error
    }

    #[cfg(test)]
    pub(crate) fn params(&self) -> KalmanParams {
        KalmanParams::new(self.measurement_error, self.estimate_error, self.process_noise)
    }
}

impl Default for AxisFilter {
    fn default() -> Self {
        Self::new(POSITION_DEFAULTS)
    }
}
