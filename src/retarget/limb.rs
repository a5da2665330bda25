use std::f32::consts::PI;

use nalgebra::{Quaternion, Unit, UnitQuaternion, Vector3};
use serde::Deserialize;

use super::normalized;
use crate::error::{RetargetError, Result};
use crate::pose::{LandmarkIndex, PoseFrame};
use crate::skeleton::{BoneId, Skeleton};

/// 1 + dot がこれ未満なら真逆とみなす
const ANTIPARALLEL_EPSILON: f32 = 1e-5;

/// 四肢セグメントの設定
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LimbSpec {
    pub bone: String,
    pub parent: String,
    pub start: LandmarkIndex,
    pub end: LandmarkIndex,
    /// レスト姿勢補正のオイラー角 (x, y, z) ラジアン、XYZ 順
    #[serde(default)]
    pub calibration: [f32; 3],
    /// 回転なしのときのボーン方向
    pub rest_direction: [f32; 3],
    /// 下半身（呼び出しごとに有効/無効を切り替える）
    #[serde(default)]
    pub lower_body: bool,
}

impl LimbSpec {
    pub fn new(bone: &str, parent: &str, start: LandmarkIndex, end: LandmarkIndex) -> Self {
        Self {
            bone: bone.to_string(),
            parent: parent.to_string(),
            start,
            end,
            calibration: [0.0; 3],
            rest_direction: [0.0, 1.0, 0.0],
            lower_body: false,
        }
    }

    pub fn with_calibration(mut self, euler: [f32; 3]) -> Self {
        self.calibration = euler;
        self
    }

    pub fn with_rest_direction(mut self, direction: [f32; 3]) -> Self {
        self.rest_direction = direction;
        self
    }

    pub fn lower_body(mut self) -> Self {
        self.lower_body = true;
        self
    }

    /// 補正回転 (X → Y → Z の内因性回転)
    pub fn calibration_quaternion(&self) -> UnitQuaternion<f32> {
        let [x, y, z] = self.calibration;
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), x)
            * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), y)
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), z)
    }

    /// 既定ヒューマノイドの四肢テーブル（親→子順）
    ///
    /// 全ボーンのレスト方向は +Y。太ももは下向きにモデリングされているので Z 軸 180 度、
    /// 足はつま先方向 (+Z) を基準に X 軸で起こす。
    pub fn humanoid_table() -> Vec<LimbSpec> {
        use LandmarkIndex::*;
        const FOOT_PITCH: f32 = 1.035;
        vec![
            LimbSpec::new("LeftArm", "LeftShoulder", LeftShoulder, LeftElbow),
            LimbSpec::new("LeftForeArm", "LeftArm", LeftElbow, LeftWrist),
            LimbSpec::new("RightArm", "RightShoulder", RightShoulder, RightElbow),
            LimbSpec::new("RightForeArm", "RightArm", RightElbow, RightWrist),
            LimbSpec::new("LeftUpLeg", "Hips", LeftHip, LeftKnee)
                .with_calibration([0.0, 0.0, -PI])
                .with_rest_direction([0.0, -1.0, 0.0])
                .lower_body(),
            // 膝→足首（左右対称）。腰→足首にすると太ももの向きが混ざる
            LimbSpec::new("LeftLeg", "LeftUpLeg", LeftKnee, LeftAnkle).lower_body(),
            LimbSpec::new("LeftFoot", "LeftLeg", LeftAnkle, LeftFootIndex)
                .with_calibration([FOOT_PITCH, 0.0, 0.0])
                .with_rest_direction([0.0, 0.0, 1.0])
                .lower_body(),
            LimbSpec::new("RightUpLeg", "Hips", RightHip, RightKnee)
                .with_calibration([0.0, 0.0, PI])
                .with_rest_direction([0.0, -1.0, 0.0])
                .lower_body(),
            LimbSpec::new("RightLeg", "RightUpLeg", RightKnee, RightAnkle).lower_body(),
            LimbSpec::new("RightFoot", "RightLeg", RightAnkle, RightFootIndex)
                .with_calibration([FOOT_PITCH, 0.0, 0.0])
                .with_rest_direction([0.0, 0.0, 1.0])
                .lower_body(),
        ]
    }
}

/// ボーン名を解決済みの四肢
#[derive(Debug, Clone)]
struct Limb {
    bone: BoneId,
    parent: BoneId,
    start: LandmarkIndex,
    end: LandmarkIndex,
    rest_direction: Vector3<f32>,
    calibration: UnitQuaternion<f32>,
    lower_body: bool,
}

/// from を to に重ねる最小回転
///
/// 真逆のときは from に直交する任意の軸まわりに 180 度。どちらかがゼロなら None。
pub fn shortest_arc(from: &Vector3<f32>, to: &Vector3<f32>) -> Option<UnitQuaternion<f32>> {
    let from = normalized(*from)?;
    let to = normalized(*to)?;
    let d = from.dot(&to);
    if !d.is_finite() {
        return None;
    }

    if d + 1.0 < ANTIPARALLEL_EPSILON {
        let helper = if from.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
        let axis = Unit::new_normalize(from.cross(&helper));
        return Some(UnitQuaternion::from_axis_angle(&axis, PI));
    }

    let c = from.cross(&to);
    Some(UnitQuaternion::new_normalize(Quaternion::new(1.0 + d, c.x, c.y, c.z)))
}

/// 1 本の四肢のローカル回転
///
/// target を親ボーンのローカルに持ち込み、rest からの最小回転 Q_bio を求めて
/// Q_bio × Q_calibration を返す。補正が先（右側）に効く。
pub fn limb_rotation(
    start: &Vector3<f32>,
    end: &Vector3<f32>,
    parent_world: &UnitQuaternion<f32>,
    rest_direction: &Vector3<f32>,
    calibration: &UnitQuaternion<f32>,
) -> Option<UnitQuaternion<f32>> {
    let target = normalized(end - start)?;
    let target_local = parent_world.conjugate() * target;
    let bio = shortest_arc(rest_direction, &target_local)?;
    Some(UnitQuaternion::new_normalize((bio * calibration).into_inner()))
}

/// 四肢テーブルを順に解く
pub struct LimbSolver {
    limbs: Vec<Limb>,
}

impl LimbSolver {
    /// テーブルをスケルトンに対して検証して解決する
    ///
    /// - ボーン・親ボーンが存在すること
    /// - 設定上の親がスケルトン上の親と一致すること
    /// - 祖先の四肢が子より先に並んでいること
    /// - レスト方向がゼロでないこと
    pub fn new(specs: &[LimbSpec], skeleton: &Skeleton) -> Result<Self> {
        let mut limbs = Vec::with_capacity(specs.len());
        for spec in specs {
            let bone = skeleton.require(&spec.bone)?;
            let parent = skeleton.require(&spec.parent)?;
            let actual = skeleton.parent(bone);
            if actual != Some(parent) {
                return Err(RetargetError::ParentMismatch {
                    bone: spec.bone.clone(),
                    configured: spec.parent.clone(),
                    actual: actual
                        .map(|p| skeleton.name(p).to_string())
                        .unwrap_or_else(|| "<root>".to_string()),
                });
            }
            let rest_direction = normalized(Vector3::from(spec.rest_direction))
                .ok_or_else(|| RetargetError::ZeroRestDirection(spec.bone.clone()))?;

            limbs.push(Limb {
                bone,
                parent,
                start: spec.start,
                end: spec.end,
                rest_direction,
                calibration: spec.calibration_quaternion(),
                lower_body: spec.lower_body,
            });
        }

        check_order(&limbs, skeleton)?;
        Ok(Self { limbs })
    }

    pub fn len(&self) -> usize {
        self.limbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limbs.is_empty()
    }

    /// 全四肢を解いてスケルトンに書き込む。前回回転を保持したボーン数を返す
    ///
    /// lower_body が false なら下半身の四肢は触らない。
    pub fn solve(
        &self,
        frame: &PoseFrame,
        skeleton: &mut Skeleton,
        lower_body: bool,
        min_visibility: Option<f32>,
    ) -> usize {
        let mut held = 0;
        for limb in self.limbs.iter().filter(|l| lower_body || !l.lower_body) {
            if !frame.is_visible(limb.start, min_visibility)
                || !frame.is_visible(limb.end, min_visibility)
            {
                tracing::debug!("{}: landmark below visibility threshold, holding", skeleton.name(limb.bone));
                held += 1;
                continue;
            }

            // 親のワールド回転は同フレームで更新済みのものを毎回計算し直す
            let parent_world = skeleton.world_rotation(limb.parent);
            match limb_rotation(
                &frame.get(limb.start),
                &frame.get(limb.end),
                &parent_world,
                &limb.rest_direction,
                &limb.calibration,
            ) {
                Some(rotation) => skeleton.set_local_rotation(limb.bone, rotation),
                None => {
                    tracing::debug!("{}: degenerate segment, holding", skeleton.name(limb.bone));
                    held += 1;
                }
            }
        }
        held
    }
}

/// 各四肢について、後ろに並ぶ四肢が祖先になっていないか
fn check_order(limbs: &[Limb], skeleton: &Skeleton) -> Result<()> {
    for (i, limb) in limbs.iter().enumerate() {
        let mut ancestor = skeleton.parent(limb.bone);
        while let Some(a) = ancestor {
            if limbs[i + 1..].iter().any(|later| later.bone == a) {
                return Err(RetargetError::LimbOrder {
                    child: skeleton.name(limb.bone).to_string(),
                    parent: skeleton.name(a).to_string(),
                });
            }
            ancestor = skeleton.parent(a);
        }
    }
    Ok(())
}
