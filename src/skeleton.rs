use std::collections::HashMap;
use std::f32::consts::{FRAC_PI_2, PI};

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::Deserialize;

use crate::error::{RetargetError, Result};

/// これ未満のノルムのクォータニオンは回転とみなさない
const MIN_QUATERNION_NORM: f32 = 1e-6;

/// 設定値 (x, y, z, w) を単位クォータニオンに。ゼロ長・非有限は InvalidRotation
pub fn rotation_from_xyzw(bone: &str, [x, y, z, w]: [f32; 4]) -> Result<UnitQuaternion<f32>> {
    UnitQuaternion::try_new(Quaternion::new(w, x, y, z), MIN_QUATERNION_NORM)
        .filter(|q| q.coords.iter().all(|c| c.is_finite()))
        .ok_or_else(|| RetargetError::InvalidRotation(bone.to_string()))
}

/// スケルトン内のボーン参照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoneId(usize);

#[derive(Debug, Clone)]
struct Bone {
    name: String,
    parent: Option<BoneId>,
    /// 親ボーン空間でのバインド位置
    offset: Vector3<f32>,
    /// 親からの相対回転
    rotation: UnitQuaternion<f32>,
}

/// 設定ファイル上のボーン定義
#[derive(Debug, Clone, Deserialize)]
pub struct BoneConfig {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub offset: [f32; 3],
    /// 初期ローカル回転 (x, y, z, w)
    #[serde(default)]
    pub rotation: Option<[f32; 4]>,
}

/// ボーン階層とアバター全体の姿勢
///
/// ボーンは親→子の順に格納される（親は必ず先に追加）。
/// ワールド回転はキャッシュせず、呼ばれるたびにローカル回転の連鎖から計算する。
#[derive(Debug, Clone)]
pub struct Skeleton {
    bones: Vec<Bone>,
    index: HashMap<String, BoneId>,
    /// アバター（メッシュ）の回転
    orientation: UnitQuaternion<f32>,
    /// アバター（メッシュ）の位置
    position: Vector3<f32>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self {
            bones: Vec::new(),
            index: HashMap::new(),
            orientation: UnitQuaternion::identity(),
            position: Vector3::zeros(),
        }
    }

    /// ボーンを追加。親は追加済みである必要がある
    pub fn add_bone(
        &mut self,
        name: &str,
        parent: Option<&str>,
        offset: Vector3<f32>,
    ) -> Result<BoneId> {
        if self.index.contains_key(name) {
            return Err(RetargetError::DuplicateBone(name.to_string()));
        }
        let parent = match parent {
            Some(p) => Some(self.require(p)?),
            None => None,
        };
        let id = BoneId(self.bones.len());
        self.bones.push(Bone {
            name: name.to_string(),
            parent,
            offset,
            rotation: UnitQuaternion::identity(),
        });
        self.index.insert(name.to_string(), id);
        Ok(id)
    }

    /// 設定のボーン一覧から構築
    pub fn from_config(bones: &[BoneConfig]) -> Result<Self> {
        let mut skeleton = Self::new();
        for bone in bones {
            let id = skeleton.add_bone(
                &bone.name,
                bone.parent.as_deref(),
                Vector3::from(bone.offset),
            )?;
            if let Some(rotation) = bone.rotation {
                skeleton.set_local_rotation(id, rotation_from_xyzw(&bone.name, rotation)?);
            }
        }
        Ok(skeleton)
    }

    /// 既定のヒューマノイドリグ
    ///
    /// -Z 向き、左半身が -X 側。四肢ボーンはローカル +Y 方向に伸びる。
    /// 初期回転は腕が T ポーズ、脚が真下。
    pub fn humanoid() -> Self {
        const BONES: &[(&str, Option<&str>, [f32; 3])] = &[
            ("Hips", None, [0.0, 1.0, 0.0]),
            ("Spine2", Some("Hips"), [0.0, 0.35, 0.0]),
            ("Neck", Some("Spine2"), [0.0, 0.15, 0.0]),
            ("Head", Some("Neck"), [0.0, 0.1, 0.0]),
            ("LeftShoulder", Some("Spine2"), [-0.06, 0.1, 0.0]),
            ("LeftArm", Some("LeftShoulder"), [-0.12, 0.0, 0.0]),
            ("LeftForeArm", Some("LeftArm"), [0.0, 0.28, 0.0]),
            ("LeftHand", Some("LeftForeArm"), [0.0, 0.25, 0.0]),
            ("RightShoulder", Some("Spine2"), [0.06, 0.1, 0.0]),
            ("RightArm", Some("RightShoulder"), [0.12, 0.0, 0.0]),
            ("RightForeArm", Some("RightArm"), [0.0, 0.28, 0.0]),
            ("RightHand", Some("RightForeArm"), [0.0, 0.25, 0.0]),
            ("LeftUpLeg", Some("Hips"), [-0.09, -0.05, 0.0]),
            ("LeftLeg", Some("LeftUpLeg"), [0.0, 0.42, 0.0]),
            ("LeftFoot", Some("LeftLeg"), [0.0, 0.4, 0.0]),
            ("RightUpLeg", Some("Hips"), [0.09, -0.05, 0.0]),
            ("RightLeg", Some("RightUpLeg"), [0.0, 0.42, 0.0]),
            ("RightFoot", Some("RightLeg"), [0.0, 0.4, 0.0]),
        ];
        const REST: &[(&str, f32)] = &[
            ("LeftArm", FRAC_PI_2),
            ("RightArm", -FRAC_PI_2),
            ("LeftUpLeg", -PI),
            ("RightUpLeg", PI),
        ];

        let mut skeleton = Self::new();
        for (name, parent, offset) in BONES {
            // 定数テーブルなので重複・親欠落は起こらない
            if let Ok(id) = skeleton.add_bone(name, *parent, Vector3::from(*offset)) {
                if let Some((_, angle)) = REST.iter().find(|(n, _)| n == name) {
                    skeleton.set_local_rotation(
                        id,
                        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), *angle),
                    );
                }
            }
        }
        skeleton
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bone_id(&self, name: &str) -> Option<BoneId> {
        self.index.get(name).copied()
    }

    /// 名前からボーンを引く。無ければ構築エラー
    pub fn require(&self, name: &str) -> Result<BoneId> {
        self.bone_id(name)
            .ok_or_else(|| RetargetError::MissingBone(name.to_string()))
    }

    /// 親→子順のボーン ID
    pub fn bone_ids(&self) -> impl Iterator<Item = BoneId> + '_ {
        (0..self.bones.len()).map(BoneId)
    }

    pub fn name(&self, id: BoneId) -> &str {
        &self.bones[id.0].name
    }

    pub fn parent(&self, id: BoneId) -> Option<BoneId> {
        self.bones[id.0].parent
    }

    pub fn offset(&self, id: BoneId) -> Vector3<f32> {
        self.bones[id.0].offset
    }

    pub fn local_rotation(&self, id: BoneId) -> UnitQuaternion<f32> {
        self.bones[id.0].rotation
    }

    /// ローカル回転を設定（正規化し直して保存）
    pub fn set_local_rotation(&mut self, id: BoneId, rotation: UnitQuaternion<f32>) {
        self.bones[id.0].rotation = UnitQuaternion::new_normalize(rotation.into_inner());
    }

    pub fn orientation(&self) -> UnitQuaternion<f32> {
        self.orientation
    }

    pub fn set_orientation(&mut self, orientation: UnitQuaternion<f32>) {
        self.orientation = UnitQuaternion::new_normalize(orientation.into_inner());
    }

    pub fn position(&self) -> Vector3<f32> {
        self.position
    }

    pub fn set_position(&mut self, position: Vector3<f32>) {
        self.position = position;
    }

    /// ワールド回転 = アバター回転 × 祖先のローカル回転 × 自身のローカル回転
    pub fn world_rotation(&self, id: BoneId) -> UnitQuaternion<f32> {
        let mut rotation = self.bones[id.0].rotation;
        let mut current = self.bones[id.0].parent;
        while let Some(p) = current {
            rotation = self.bones[p.0].rotation * rotation;
            current = self.bones[p.0].parent;
        }
        self.orientation * rotation
    }

    /// ボーン原点のワールド位置
    pub fn world_position(&self, id: BoneId) -> Vector3<f32> {
        let mut chain = vec![id];
        let mut current = self.bones[id.0].parent;
        while let Some(p) = current {
            chain.push(p);
            current = self.bones[p.0].parent;
        }

        let mut position = self.position;
        let mut rotation = self.orientation;
        for bone in chain.iter().rev().map(|b| &self.bones[b.0]) {
            position += rotation * bone.offset;
            rotation *= bone.rotation;
        }
        position
    }
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::new()
    }
}
