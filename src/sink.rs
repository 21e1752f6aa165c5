use crate::tracker::{DeviceHandle, DriverPose};

/// ポーズの送り先（ホストランタイム）
///
/// 送りっぱなしで応答は扱わない。送信エラーは実装側で処理し、トラッキングループへは返さない。
pub trait PoseSink: Send {
    fn publish(&mut self, handle: DeviceHandle, pose: &DriverPose);
}

impl<T: PoseSink + ?Sized> PoseSink for Box<T> {
    fn publish(&mut self, handle: DeviceHandle, pose: &DriverPose) {
        (**self).publish(handle, pose)
    }
}
