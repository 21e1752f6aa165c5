use anyhow::Result;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use rosc::{encoder, OscMessage, OscPacket, OscType};
use std::net::UdpSocket;

use crate::sink::PoseSink;
use crate::tracker::{DeviceHandle, DriverPose};

/// VMTのデフォルトアドレス
pub const VMT_DEFAULT_ADDR: &str = "127.0.0.1:39570";

/// enable: 0=無効
pub const VMT_DISABLED: i32 = 0;

/// ルーム座標系でのトラッカーの位置と回転
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerPose {
    /// 位置 (x, y, z)
    pub position: [f32; 3],
    /// 回転 (クォータニオン: x, y, z, w)
    pub rotation: [f32; 4],
}

impl TrackerPose {
    pub fn new(position: [f32; 3], rotation: [f32; 4]) -> Self {
        Self { position, rotation }
    }

    /// ドライバ空間のポーズに world_from_driver / driver_from_head を合成してルーム座標にする
    pub fn from_driver_pose(pose: &DriverPose) -> Self {
        let world_from_driver = unit(pose.world_from_driver_rotation);
        let rotation = unit(pose.rotation);
        let driver_from_head = unit(pose.driver_from_head_rotation);

        let head_offset = rotation * Vector3::from(pose.driver_from_head_translation);
        let driver_position = Vector3::from(pose.position) + head_offset;
        let world_position = world_from_driver * driver_position
            + Vector3::from(pose.world_from_driver_translation);
        let world_rotation = world_from_driver * rotation * driver_from_head;

        let q = world_rotation.quaternion();
        Self {
            position: [
                world_position.x as f32,
                world_position.y as f32,
                world_position.z as f32,
            ],
            rotation: [q.i as f32, q.j as f32, q.k as f32, q.w as f32],
        }
    }
}

/// 正規化。ゼロクォータニオンは単位回転として扱う
fn unit(q: Quaternion<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::try_new(q, f64::EPSILON).unwrap_or_else(UnitQuaternion::identity)
}

/// VMTへ送信するOSCメッセージを構築
/// 引数: index, enable, timeoffset, x, y, z, qx, qy, qz, qw
/// enable: 0=無効, 1=トラッカー, 7=トラッカー(VIVE互換モード)
pub fn build_osc_message(index: i32, enable: i32, time_offset: f32, pose: &TrackerPose) -> OscMessage {
    OscMessage {
        addr: "/VMT/Room/Unity".to_string(),
        args: vec![
            OscType::Int(index),
            OscType::Int(enable),
            OscType::Float(time_offset),
            OscType::Float(pose.position[0]),
            OscType::Float(pose.position[1]),
            OscType::Float(pose.position[2]),
            OscType::Float(pose.rotation[0]),
            OscType::Float(pose.rotation[1]),
            OscType::Float(pose.rotation[2]),
            OscType::Float(pose.rotation[3]),
        ],
    }
}

/// OSCメッセージをバイト列にエンコード
pub fn encode_osc_message(msg: &OscMessage) -> Result<Vec<u8>> {
    let packet = OscPacket::Message(msg.clone());
    let encoded = encoder::encode(&packet)?;
    Ok(encoded)
}

/// VMTクライアント
pub struct VmtClient {
    socket: UdpSocket,
    target_addr: String,
}

impl VmtClient {
    /// 新しいVMTクライアントを作成
    pub fn new(target_addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            target_addr: target_addr.to_string(),
        })
    }

    pub fn send(&self, index: i32, enable: i32, time_offset: f32, pose: &TrackerPose) -> Result<()> {
        let msg = build_osc_message(index, enable, time_offset, pose);
        let data = encode_osc_message(&msg)?;
        self.socket.send_to(&data, &self.target_addr)?;
        Ok(())
    }
}

/// DriverPose を VMT トラッカーとして送る PoseSink
///
/// デバイスハンドルをそのまま VMT のトラッカー番号に使う。
pub struct VmtSink {
    client: VmtClient,
    enable: i32,
    send_failures: u64,
}

impl VmtSink {
    pub fn new(client: VmtClient, enable: i32) -> Self {
        Self {
            client,
            enable,
            send_failures: 0,
        }
    }

    pub fn connect(target_addr: &str, enable: i32) -> Result<Self> {
        Ok(Self::new(VmtClient::new(target_addr)?, enable))
    }

    /// 切断中・無効なポーズは enable=0 で送る
    pub fn enable_for(&self, pose: &DriverPose) -> i32 {
        if pose.device_is_connected && pose.pose_is_valid {
            self.enable
        } else {
            VMT_DISABLED
        }
    }

    fn note_failure(&mut self, reason: impl std::fmt::Display) {
        self.send_failures += 1;
        // 毎フレーム出ると読めないので間引く
        if self.send_failures == 1 || self.send_failures % 300 == 0 {
            log::warn!("VMT send failed ({} total): {}", self.send_failures, reason);
        }
    }
}

impl PoseSink for VmtSink {
    fn publish(&mut self, handle: DeviceHandle, pose: &DriverPose) {
        let Ok(index) = i32::try_from(handle.0) else {
            self.note_failure(format_args!("handle {} is not a VMT index", handle.0));
            return;
        };
        let tracker = TrackerPose::from_driver_pose(pose);
        let enable = self.enable_for(pose);
        if let Err(e) = self.client.send(index, enable, pose.pose_time_offset as f32, &tracker) {
            self.note_failure(e);
        }
    }
}
