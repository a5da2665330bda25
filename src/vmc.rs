use anyhow::Result;
use nalgebra::{UnitQuaternion, Vector3};
use rosc::{encoder, OscBundle, OscMessage, OscPacket, OscTime, OscType};
use std::net::UdpSocket;

use crate::skeleton::{BoneId, Skeleton};

/// VMC プロトコルのデフォルト送信先（受信アプリ側の既定ポート）
pub const VMC_DEFAULT_ADDR: &str = "127.0.0.1:39539";

/// バンドルの即時実行タイムタグ
const IMMEDIATELY: OscTime = OscTime {
    seconds: 0,
    fractional: 1,
};

fn pose_args(position: &Vector3<f32>, rotation: &UnitQuaternion<f32>) -> [OscType; 7] {
    [
        OscType::Float(position.x),
        OscType::Float(position.y),
        OscType::Float(position.z),
        OscType::Float(rotation.i),
        OscType::Float(rotation.j),
        OscType::Float(rotation.k),
        OscType::Float(rotation.w),
    ]
}

/// 送信状態。1 = 正常
pub fn build_ok_message() -> OscMessage {
    OscMessage {
        addr: "/VMC/Ext/OK".to_string(),
        args: vec![OscType::Int(1)],
    }
}

/// アバター全体の位置・向き
/// 引数: "root", px, py, pz, qx, qy, qz, qw
pub fn build_root_message(position: &Vector3<f32>, rotation: &UnitQuaternion<f32>) -> OscMessage {
    let mut args = vec![OscType::String("root".to_string())];
    args.extend(pose_args(position, rotation));
    OscMessage {
        addr: "/VMC/Ext/Root/Pos".to_string(),
        args,
    }
}

/// 1 ボーンのローカル位置（親からのオフセット）とローカル回転
/// 引数: name, px, py, pz, qx, qy, qz, qw
pub fn build_bone_message(skeleton: &Skeleton, id: BoneId) -> OscMessage {
    let mut args = vec![OscType::String(skeleton.name(id).to_string())];
    args.extend(pose_args(&skeleton.offset(id), &skeleton.local_rotation(id)));
    OscMessage {
        addr: "/VMC/Ext/Bone/Pos".to_string(),
        args,
    }
}

/// スケルトン 1 フレーム分: Root, 全ボーン, OK
pub fn build_skeleton_bundle(skeleton: &Skeleton) -> OscPacket {
    let mut content = Vec::with_capacity(skeleton.len() + 2);
    content.push(OscPacket::Message(build_root_message(
        &skeleton.position(),
        &skeleton.orientation(),
    )));
    content.extend(
        skeleton
            .bone_ids()
            .map(|id| OscPacket::Message(build_bone_message(skeleton, id))),
    );
    content.push(OscPacket::Message(build_ok_message()));
    OscPacket::Bundle(OscBundle {
        timetag: IMMEDIATELY,
        content,
    })
}

/// VMC 送信クライアント
pub struct VmcClient {
    socket: UdpSocket,
    target_addr: String,
}

impl VmcClient {
    pub fn new(target_addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            target_addr: target_addr.to_string(),
        })
    }

    pub fn target_addr(&self) -> &str {
        &self.target_addr
    }

    /// スケルトンの現在の姿勢をバンドル 1 つで送信
    pub fn send_skeleton(&self, skeleton: &Skeleton) -> Result<()> {
        let data = encoder::encode(&build_skeleton_bundle(skeleton))?;
        self.socket.send_to(&data, &self.target_addr)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ok_message() {
        let msg = build_ok_message();
        assert_eq!(msg.addr, "/VMC/Ext/OK");
        assert_eq!(msg.args, vec![OscType::Int(1)]);
    }

    #[test]
    fn test_root_message_args() {
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.5);
        let msg = build_root_message(&Vector3::new(1.0, 2.0, 3.0), &rotation);
        assert_eq!(msg.addr, "/VMC/Ext/Root/Pos");

        // 引数: "root", px, py, pz, qx, qy, qz, qw
        assert_eq!(msg.args.len(), 8);
        assert_eq!(msg.args[0], OscType::String("root".into()));
        assert_eq!(msg.args[1], OscType::Float(1.0));
        assert_eq!(msg.args[3], OscType::Float(3.0));
        assert_eq!(msg.args[5], OscType::Float(rotation.j));
        assert_eq!(msg.args[7], OscType::Float(rotation.w));
    }

    #[test]
    fn test_bone_message_is_local() {
        let mut skeleton = Skeleton::humanoid();
        skeleton.set_orientation(UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 1.0));
        let arm = skeleton.require("LeftForeArm").unwrap();
        let msg = build_bone_message(&skeleton, arm);
        assert_eq!(msg.addr, "/VMC/Ext/Bone/Pos");
        assert_eq!(msg.args[0], OscType::String("LeftForeArm".into()));
        // オフセットと回転はローカル。アバターの向きは Root 側
        assert_eq!(msg.args[2], OscType::Float(0.28));
        assert_eq!(msg.args[7], OscType::Float(1.0));
    }

    #[test]
    fn test_skeleton_bundle_contents() {
        let skeleton = Skeleton::humanoid();
        let OscPacket::Bundle(bundle) = build_skeleton_bundle(&skeleton) else {
            panic!("expected bundle");
        };
        assert_eq!(bundle.content.len(), skeleton.len() + 2);
        let OscPacket::Message(first) = &bundle.content[0] else {
            panic!("expected message");
        };
        assert_eq!(first.addr, "/VMC/Ext/Root/Pos");
        let Some(OscPacket::Message(last)) = bundle.content.last() else {
            panic!("expected message");
        };
        assert_eq!(last.addr, "/VMC/Ext/OK");
    }

    #[test]
    fn test_send_skeleton_roundtrip() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let addr = receiver.local_addr().unwrap().to_string();

        let client = VmcClient::new(&addr).unwrap();
        let skeleton = Skeleton::humanoid();
        client.send_skeleton(&skeleton).unwrap();

        let mut buf = [0u8; 8192];
        let (size, _) = receiver.recv_from(&mut buf).unwrap();
        let (_, packet) = rosc::decoder::decode_udp(&buf[..size]).unwrap();
        let OscPacket::Bundle(bundle) = packet else {
            panic!("expected bundle");
        };
        assert_eq!(bundle.content.len(), skeleton.len() + 2);
    }
}
