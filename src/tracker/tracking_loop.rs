use nalgebra::Quaternion;
use std::sync::Arc;
use std::time::Duration;

use crate::calibration::{CalibrationSnapshot, CalibrationSource};
use crate::capture::CaptureSource;
use crate::pose::Skeleton;
use crate::sink::PoseSink;

use super::auto_smooth::AutoSmoother;
use super::bone::{sensor_to_driver_orientation, sensor_to_driver_position, Bone, DeviceHandle, TrackedBoneSlot};
use super::bone_filter::BoneFilter;
use super::driver_pose::DriverPose;
use super::kalman::{KalmanParams, ORIENTATION_DEFAULTS, POSITION_DEFAULTS};

/// 速度計算に使う固定タイムステップ（秒）。実測の経過時間ではなく一定フレームレートを仮定する
pub const VELOCITY_TIMESTEP: f64 = 0.08;

/// 肘は位置が不正確なので速度だけ強調する
pub const ELBOW_VELOCITY_SCALE: f64 = 1.2;

/// トラッキングループの調整値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    /// スケルトン抽出の投入・取得それぞれのタイムアウト
    pub track_timeout: Duration,
    /// Running に入った時点で抽出ステージに設定するスムージング
    pub initial_smoothing: f32,
    pub velocity_timestep: f64,
    pub elbow_velocity_scale: f64,
    pub pose_time_offset: f64,
    /// ボーンごとのカルマンフィルタを使うか
    pub kalman: bool,
    pub position_filter: KalmanParams,
    pub orientation_filter: KalmanParams,
    pub normalize_orientation: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            track_timeout: Duration::from_millis(16),
            initial_smoothing: 0.025,
            velocity_timestep: VELOCITY_TIMESTEP,
            elbow_velocity_scale: ELBOW_VELOCITY_SCALE,
            pose_time_offset: DriverPose::DEFAULT_TIME_OFFSET,
            kalman: true,
            position_filter: POSITION_DEFAULTS,
            orientation_filter: ORIENTATION_DEFAULTS,
            normalize_orientation: false,
        }
    }
}

impl LoopSettings {
    /// バインド済みハンドルから8スロットを作る（配列の並びは Bone の送信順）
    pub fn make_slots(&self, handles: [DeviceHandle; Bone::COUNT]) -> [TrackedBoneSlot; Bone::COUNT] {
        std::array::from_fn(|i| {
            TrackedBoneSlot::new(
                Bone::ALL[i],
                handles[i],
                DriverPose::baseline(self.pose_time_offset),
                self.make_filter(),
            )
        })
    }

    pub fn make_filter(&self) -> BoneFilter {
        BoneFilter::new(self.position_filter, self.orientation_filter)
            .with_normalize(self.normalize_orientation)
    }
}

/// 1サイクルの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// フレーム取得に失敗（次のフレームで再試行）
    AcquireFailed,
    /// 抽出の投入・取得がタイムアウトまたは失敗
    TrackFailed,
    /// 人物が検出されなかった。何も送信しない
    NoBody,
    /// 先頭人物のスケルトン取得に失敗。全ボーンを無効として送信した
    SkeletonFailed,
    /// 送信したボーン数
    Published(usize),
}

/// Running 状態の1フレーム処理
///
/// ボーンごとの状態はこの構造体だけが持つ。ワーカースレッド上で動かす。
pub struct TrackingLoop<S: CaptureSource, K: PoseSink> {
    source: S,
    sink: K,
    calibration: Arc<dyn CalibrationSource>,
    slots: [TrackedBoneSlot; Bone::COUNT],
    settings: LoopSettings,
    auto_smooth: AutoSmoother,
    first_frame: bool,
    /// 前回の導出で拡張トラッカーを計算したか
    extended_active: bool,
}

impl<S: CaptureSource, K: PoseSink> TrackingLoop<S, K> {
    pub fn new(
        source: S,
        sink: K,
        calibration: Arc<dyn CalibrationSource>,
        handles: [DeviceHandle; Bone::COUNT],
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            sink,
            calibration,
            slots: settings.make_slots(handles),
            settings,
            auto_smooth: AutoSmoother::new(),
            first_frame: true,
            extended_active: false,
        }
    }

    pub fn slot(&self, bone: Bone) -> &TrackedBoneSlot {
        &self.slots[bone as usize]
    }

    /// 全スロットを接続状態にして初期ポーズを1回ずつ送る
    pub fn go_online(&mut self) {
        self.source.set_temporal_smoothing(self.settings.initial_smoothing);
        for slot in &mut self.slots {
            slot.pose.device_is_connected = true;
            self.sink.publish(slot.handle, &slot.pose);
        }
        log::info!("Tracking online: {} bones bound", Bone::COUNT);
    }

    /// 取得 → 抽出 → キャリブレーション → スムージング → 速度 → 送信
    ///
    /// 取得したフレームはどの経路でも解放する。
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let frame = match self.source.acquire_frame() {
            Ok(frame) => frame,
            Err(e) => {
                if e.is_transient() {
                    log::trace!("Capture skipped: {}", e);
                } else {
                    log::warn!("Capture failed: {}", e);
                }
                return CycleOutcome::AcquireFailed;
            }
        };
        let outcome = self.process_frame(&frame);
        self.source.release_frame(frame);
        outcome
    }

    fn process_frame(&mut self, frame: &S::Frame) -> CycleOutcome {
        let body_frame = match self.source.extract_skeleton(frame, self.settings.track_timeout) {
            Ok(body_frame) => body_frame,
            Err(e) => {
                if e.is_transient() {
                    log::debug!("Tracking skipped: {}", e);
                } else {
                    log::warn!("Tracking failed: {}", e);
                }
                return CycleOutcome::TrackFailed;
            }
        };

        // 複数人いても先頭だけ使う
        if body_frame.num_bodies() > 1 {
            log::trace!("{} bodies detected, tracking the first", body_frame.num_bodies());
        }
        let Some(first) = body_frame.first_body() else {
            return CycleOutcome::NoBody;
        };

        let snapshot = self.refresh_calibration();
        self.update_smoothing(&snapshot);

        match first {
            Some(skeleton) => {
                self.derive_poses(skeleton, &snapshot);
                CycleOutcome::Published(self.publish(&snapshot))
            }
            None => {
                self.publish_invalid();
                CycleOutcome::SkeletonFailed
            }
        }
    }

    /// 初回フレームは dirty に関係なく読み込み、自動スムージングを初期化する
    fn refresh_calibration(&mut self) -> CalibrationSnapshot {
        if self.first_frame {
            self.first_frame = false;
            self.calibration.disable_auto_smooth();
            self.auto_smooth.reset();
            let snapshot = self.calibration.take();
            self.apply_calibration(&snapshot);
            log::info!(
                "Calibration baseline: offset={:?} rotation={:?}",
                snapshot.offset,
                snapshot.rotation_offset
            );
            return snapshot;
        }

        match self.calibration.take_if_dirty() {
            Some(snapshot) => {
                self.apply_calibration(&snapshot);
                log::info!(
                    "Calibration updated: offset={:?} rotation={:?}",
                    snapshot.offset,
                    snapshot.rotation_offset
                );
                snapshot
            }
            None => self.calibration.read(),
        }
    }

    /// 同じオフセット・回転を全8スロットに適用する
    fn apply_calibration(&mut self, snapshot: &CalibrationSnapshot) {
        let [x, y, z] = snapshot.offset;
        let [qw, qx, qy, qz] = snapshot.rotation_offset;
        for slot in &mut self.slots {
            slot.pose.world_from_driver_translation = [x as f64, y as f64, z as f64];
            slot.pose.world_from_driver_rotation =
                Quaternion::new(qw as f64, qx as f64, qy as f64, qz as f64);
        }
    }

    fn update_smoothing(&mut self, snapshot: &CalibrationSnapshot) {
        if snapshot.auto_smooth {
            let factor = self.auto_smooth.advance(snapshot.smoothing);
            self.source.set_temporal_smoothing(factor);
        } else {
            self.auto_smooth.discard();
            self.source.set_temporal_smoothing(snapshot.smoothing);
        }
    }

    fn derive_poses(&mut self, skeleton: &Skeleton, snapshot: &CalibrationSnapshot) {
        let dt = self.settings.velocity_timestep;

        // 止まっていた拡張トラッカーは古い位置との差分を取らないよう作り直す
        if snapshot.extended_trackers && !self.extended_active {
            for slot in self.slots.iter_mut().filter(|slot| slot.bone.is_extended()) {
                slot.restart(self.settings.make_filter());
            }
        }
        self.extended_active = snapshot.extended_trackers;

        for slot in &mut self.slots {
            let bone = slot.bone;
            if bone.is_extended() && !snapshot.extended_trackers {
                continue;
            }

            let raw = bone.source().sample(skeleton);
            let sample = if self.settings.kalman {
                slot.filter.filter(&raw)
            } else {
                raw
            };

            let position = sensor_to_driver_position(&sample.position);
            let [qw, qx, qy, qz] = sensor_to_driver_orientation(&sample.orientation);

            let scale = if bone.is_elbow() {
                self.settings.elbow_velocity_scale
            } else {
                1.0
            };
            let velocity = if slot.has_sample {
                let prev = slot.pose.position;
                [
                    scale * (position[0] - prev[0]) / dt,
                    scale * (position[1] - prev[1]) / dt,
                    scale * (position[2] - prev[2]) / dt,
                ]
            } else {
                [0.0; 3]
            };

            slot.pose.position = position;
            slot.pose.rotation = Quaternion::new(qw, qx, qy, qz);
            slot.pose.velocity = velocity;
            slot.pose.angular_velocity = [0.0; 3];
            slot.pose.pose_is_valid = true;
            slot.has_sample = true;

            if bone.contributes_motion() {
                self.auto_smooth.accumulate(&velocity);
            }
        }
    }

    fn publish(&mut self, snapshot: &CalibrationSnapshot) -> usize {
        let mut count = 0;
        for slot in &self.slots {
            if slot.bone.is_extended() && !snapshot.extended_trackers {
                continue;
            }
            self.sink.publish(slot.handle, &slot.pose);
            count += 1;
        }
        count
    }

    fn publish_invalid(&mut self) {
        for slot in &mut self.slots {
            slot.pose.pose_is_valid = false;
            self.sink.publish(slot.handle, &slot.pose);
        }
    }

    /// 全スロットを切断・無効にして1回ずつ送り、抽出コンテキストを解放する
    pub fn shutdown(&mut self) {
        for slot in &mut self.slots {
            slot.pose.mark_offline();
            self.sink.publish(slot.handle, &slot.pose);
        }
        self.source.close();
        log::info!("Tracking offline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::SharedCalibration;
    use crate::pose::{BodyFrame, JointId, JointSample};
    use crate::tracker::testing::{bound_handles, RecordingSink, ScriptedSource, Step};

    fn skeleton_at(offset_mm: f32) -> Skeleton {
        let mut skeleton = Skeleton::default();
        for id in JointId::ALL {
            let i = id as usize as f32;
            skeleton.set(
                id,
                JointSample::new([i * 10.0 + offset_mm, i * 20.0, 2000.0 + i], [1.0, 0.0, 0.0, 0.0]),
            );
        }
        skeleton
    }

    fn body(offset_mm: f32) -> Step {
        Step::Body(BodyFrame::single(0, skeleton_at(offset_mm)))
    }

    fn raw_settings() -> LoopSettings {
        LoopSettings {
            kalman: false,
            ..LoopSettings::default()
        }
    }

    fn make_loop(
        steps: Vec<Step>,
        calibration: &SharedCalibration,
        settings: LoopSettings,
    ) -> (TrackingLoop<ScriptedSource, RecordingSink>, ScriptedSource, RecordingSink) {
        let source = ScriptedSource::new(steps);
        let sink = RecordingSink::new();
        let tl = TrackingLoop::new(
            source.clone(),
            sink.clone(),
            Arc::new(calibration.clone()),
            bound_handles(),
            settings,
        );
        (tl, source, sink)
    }

    #[test]
    fn test_zero_bodies_publishes_nothing() {
        let cal = SharedCalibration::default();
        let (mut tl, source, sink) =
            make_loop(vec![Step::Body(BodyFrame::empty(0))], &cal, raw_settings());
        assert_eq!(tl.run_cycle(), CycleOutcome::NoBody);
        assert!(sink.published().is_empty());
        assert_eq!(source.acquired(), 1);
        assert_eq!(source.released(), 1);
    }

    #[test]
    fn test_transient_failures_release_and_skip() {
        let cal = SharedCalibration::default();
        let (mut tl, source, sink) = make_loop(
            vec![Step::AcquireFail, Step::TrackTimeout, body(0.0)],
            &cal,
            raw_settings(),
        );
        assert_eq!(tl.run_cycle(), CycleOutcome::AcquireFailed);
        assert_eq!(tl.run_cycle(), CycleOutcome::TrackFailed);
        assert_eq!(tl.run_cycle(), CycleOutcome::Published(3));
        // 取得に失敗したフレームは解放対象がない
        assert_eq!(source.acquired(), 2);
        assert_eq!(source.released(), 2);
        assert_eq!(sink.published().len(), 3);
    }

    #[test]
    fn test_core_bones_only_without_extended_set() {
        let cal = SharedCalibration::default();
        let (mut tl, _source, sink) = make_loop(vec![body(0.0), body(50.0)], &cal, raw_settings());
        tl.run_cycle();
        let chest_before = tl.slot(Bone::Chest).pose;
        tl.run_cycle();

        let handles: Vec<DeviceHandle> = sink.published().iter().map(|(h, _)| *h).collect();
        let core: Vec<DeviceHandle> = Bone::CORE.iter().map(|b| bound_handles()[*b as usize]).collect();
        assert_eq!(handles.len(), 6);
        assert_eq!(&handles[..3], &core[..]);
        assert_eq!(&handles[3..], &core[..]);
        assert_eq!(tl.slot(Bone::Chest).pose, chest_before);
    }

    #[test]
    fn test_extended_set_publishes_all_in_order() {
        let cal = SharedCalibration::default();
        cal.set_extended_trackers(true);
        let (mut tl, _source, sink) = make_loop(vec![body(0.0)], &cal, raw_settings());
        assert_eq!(tl.run_cycle(), CycleOutcome::Published(8));
        let handles: Vec<DeviceHandle> = sink.published().iter().map(|(h, _)| *h).collect();
        assert_eq!(handles, bound_handles().to_vec());
        for (_, pose) in sink.published() {
            assert!(pose.pose_is_valid);
        }
    }

    #[test]
    fn test_pose_mapping_units_and_axes() {
        let cal = SharedCalibration::default();
        let (mut tl, _source, _sink) = make_loop(vec![body(0.0)], &cal, raw_settings());
        tl.run_cycle();

        let skeleton = skeleton_at(0.0);
        let pelvis = skeleton.get(JointId::Pelvis).position;
        let pose = tl.slot(Bone::Pelvis).pose;
        assert_eq!(
            pose.position,
            [pelvis[2] as f64 / 1000.0, pelvis[0] as f64 / 1000.0, pelvis[1] as f64 / 1000.0]
        );

        let ankle = skeleton.get(JointId::AnkleRight).position;
        let foot = skeleton.get(JointId::FootRight).position;
        let leg = tl.slot(Bone::RightLeg).pose;
        let expected_x = ((ankle[2] + foot[2]) / 2.0) as f64 / 1000.0;
        assert!((leg.position[0] - expected_x).abs() < 1e-9);
    }

    #[test]
    fn test_orientation_permutation() {
        let cal = SharedCalibration::default();
        let mut skeleton = skeleton_at(0.0);
        skeleton.set(JointId::Pelvis, JointSample::new([0.0; 3], [0.1, 0.2, 0.3, 0.4]));
        let (mut tl, _s, _k) = make_loop(
            vec![Step::Body(BodyFrame::single(0, skeleton))],
            &cal,
            raw_settings(),
        );
        tl.run_cycle();
        let q = tl.slot(Bone::Pelvis).pose.rotation;
        assert!((q.w - 0.1).abs() < 1e-6);
        assert!((q.i - 0.4).abs() < 1e-6);
        assert!((q.j - 0.2).abs() < 1e-6);
        assert!((q.k - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_velocity_uses_fixed_timestep() {
        let cal = SharedCalibration::default();
        cal.set_extended_trackers(true);
        // x方向に 8mm 動かす → ドライバ座標 Y に 0.008m / 0.08s = 0.1 m/s
        let (mut tl, _s, _k) = make_loop(vec![body(0.0), body(8.0)], &cal, raw_settings());
        tl.run_cycle();
        assert_eq!(tl.slot(Bone::Pelvis).pose.velocity, [0.0; 3]);
        tl.run_cycle();

        let v = tl.slot(Bone::Pelvis).pose.velocity;
        assert!(v[0].abs() < 1e-9);
        assert!((v[1] - 0.1).abs() < 1e-6, "v = {:?}", v);
        assert!(v[2].abs() < 1e-9);

        let elbow = tl.slot(Bone::RightElbow).pose.velocity;
        assert!((elbow[1] - 0.12).abs() < 1e-6, "elbow = {:?}", elbow);
        assert_eq!(tl.slot(Bone::Pelvis).pose.angular_velocity, [0.0; 3]);
    }

    #[test]
    fn test_dirty_calibration_applied_to_all_bones() {
        let cal = SharedCalibration::default();
        cal.set_extended_trackers(true);
        let (mut tl, _s, sink) = make_loop(vec![body(0.0), body(0.0), body(0.0)], &cal, raw_settings());
        tl.run_cycle();

        cal.write(|s| {
            s.offset = [0.5, 1.0, -0.25];
            s.rotation_offset = [0.0, 0.0, 1.0, 0.0];
        });
        assert!(cal.state().dirty);
        sink.clear();
        tl.run_cycle();

        let published = sink.published();
        assert_eq!(published.len(), 8);
        for (_, pose) in &published {
            assert_eq!(pose.world_from_driver_translation, [0.5, 1.0, -0.25]);
            assert_eq!(pose.world_from_driver_rotation, Quaternion::new(0.0, 0.0, 1.0, 0.0));
        }
        assert!(!cal.state().dirty);

        tl.run_cycle();
        assert!(!cal.state().dirty);
    }

    #[test]
    fn test_first_frame_bootstraps_calibration() {
        let cal = SharedCalibration::default();
        cal.write(|s| {
            s.offset = [1.0, 2.0, 3.0];
            s.auto_smooth = true;
            s.smoothing = 0.3;
        });
        cal.clear_dirty();
        let (mut tl, source, _sink) = make_loop(vec![body(0.0)], &cal, raw_settings());
        tl.run_cycle();

        // dirty でなくても初回は読み込む
        assert_eq!(tl.slot(Bone::Pelvis).pose.world_from_driver_translation, [1.0, 2.0, 3.0]);
        assert_eq!(tl.slot(Bone::LeftKnee).pose.world_from_driver_translation, [1.0, 2.0, 3.0]);
        assert!(!cal.state().auto_smooth);
        // 自動スムージングが切られたので固定値が送られる
        assert_eq!(source.smoothing_history(), vec![0.3]);
    }

    #[test]
    fn test_skeleton_failure_invalidates_all() {
        let cal = SharedCalibration::default();
        let steps = vec![
            body(0.0),
            Step::Body(BodyFrame {
                timestamp_us: 1,
                bodies: vec![None],
            }),
        ];
        let (mut tl, _s, sink) = make_loop(steps, &cal, raw_settings());
        tl.run_cycle();
        sink.clear();
        assert_eq!(tl.run_cycle(), CycleOutcome::SkeletonFailed);
        let published = sink.published();
        assert_eq!(published.len(), 8);
        assert!(published.iter().all(|(_, p)| !p.pose_is_valid));
    }

    #[test]
    fn test_auto_smoothing_feeds_ramp() {
        let cal = SharedCalibration::default();
        let (mut tl, source, _s) = make_loop(
            vec![body(0.0), body(0.0), body(0.0), body(0.0)],
            &cal,
            raw_settings(),
        );
        tl.run_cycle();
        cal.write(|s| {
            s.auto_smooth = true;
            s.smoothing = 0.5;
        });
        tl.run_cycle();
        tl.run_cycle();
        tl.run_cycle();

        let history = source.smoothing_history();
        assert_eq!(history.len(), 4);
        // 静止しているのでランプは単調増加
        assert!(history[1] > 0.0);
        assert!(history[2] > history[1]);
        assert!(history[3] > history[2]);
    }

    #[test]
    fn test_kalman_starts_at_first_sample() {
        let cal = SharedCalibration::default();
        let (mut tl, _s, _k) = make_loop(
            vec![body(0.0), body(0.0), body(40.0)],
            &cal,
            LoopSettings::default(),
        );
        let raw = sensor_to_driver_position(&skeleton_at(0.0).get(JointId::Pelvis).position);

        tl.run_cycle();
        let first = tl.slot(Bone::Pelvis).pose;
        assert!(first.pose_is_valid);
        for i in 0..3 {
            assert!((first.position[i] - raw[i]).abs() < 1e-9, "position = {:?}", first.position);
        }

        // 静止した体なら2フレーム目の速度はほぼ0
        tl.run_cycle();
        let second = tl.slot(Bone::Pelvis).pose;
        assert!(second.velocity.iter().all(|v| v.abs() < 1e-6), "velocity = {:?}", second.velocity);

        // 動いたら生の値の手前まで追従する
        tl.run_cycle();
        let moved = tl.slot(Bone::Pelvis).pose.position[1];
        assert!(moved > raw[1] && moved < raw[1] + 0.040, "moved = {}", moved);
    }

    #[test]
    fn test_reenabled_extended_bones_restart_velocity() {
        let cal = SharedCalibration::default();
        cal.set_extended_trackers(true);
        let (mut tl, _s, _k) = make_loop(
            vec![body(0.0), body(0.0), body(300.0), body(300.0)],
            &cal,
            LoopSettings::default(),
        );
        tl.run_cycle();
        cal.set_extended_trackers(false);
        tl.run_cycle();
        tl.run_cycle();
        cal.set_extended_trackers(true);
        tl.run_cycle();

        let chest = tl.slot(Bone::Chest).pose;
        assert_eq!(chest.velocity, [0.0; 3]);
        let raw = sensor_to_driver_position(&skeleton_at(300.0).get(JointId::SpineChest).position);
        for i in 0..3 {
            assert!((chest.position[i] - raw[i]).abs() < 1e-9, "position = {:?}", chest.position);
        }
        // 中核ボーンは作り直さないので、前フレームからの追従を続けている
        assert!(tl.slot(Bone::Pelvis).pose.velocity[1] > 0.0);
    }

    #[test]
    fn test_go_online_and_shutdown() {
        let cal = SharedCalibration::default();
        let (mut tl, source, sink) = make_loop(vec![], &cal, raw_settings());
        tl.go_online();
        let online = sink.published();
        assert_eq!(online.len(), 8);
        assert!(online.iter().all(|(_, p)| p.device_is_connected && !p.pose_is_valid));
        assert_eq!(source.smoothing_history(), vec![0.025]);

        sink.clear();
        tl.shutdown();
        let offline = sink.published();
        let handles: Vec<DeviceHandle> = offline.iter().map(|(h, _)| *h).collect();
        assert_eq!(handles, bound_handles().to_vec());
        assert!(offline.iter().all(|(_, p)| !p.device_is_connected && !p.pose_is_valid));
        assert!(source.closed());
    }
}
