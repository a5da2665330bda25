use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use super::normalized;
use crate::config::TorsoConfig;
use crate::error::{RetargetError, Result};
use crate::pose::{LandmarkIndex, PoseFrame};

/// 胴体の解: どちらもメッシュローカル空間
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorsoPose {
    pub pelvis: UnitQuaternion<f32>,
    pub chest: UnitQuaternion<f32>,
}

impl TorsoPose {
    /// 胸ボーンに書き込むローカル回転（骨盤からの相対）
    pub fn chest_local(&self) -> UnitQuaternion<f32> {
        UnitQuaternion::new_normalize((self.pelvis.conjugate() * self.chest).into_inner())
    }
}

/// 肩・腰の 4 点と体幹中心から骨盤と胸の向きを求める
pub struct TorsoSolver {
    pelvis_reference: Matrix3<f32>,
    chest_reference: Matrix3<f32>,
}

impl TorsoSolver {
    /// レスト基底は正規直交であること。
    /// 胸の基底は常に左手系になるので胸のレストは鏡映 (det = -1)、骨盤は回転 (det = +1)。
    pub fn new(pelvis_reference: Matrix3<f32>, chest_reference: Matrix3<f32>) -> Result<Self> {
        check_reference("pelvis", &pelvis_reference, 1.0)?;
        check_reference("chest", &chest_reference, -1.0)?;
        Ok(Self {
            pelvis_reference,
            chest_reference,
        })
    }

    pub fn from_config(config: &TorsoConfig) -> Result<Self> {
        Self::new(
            columns(&config.pelvis_reference),
            columns(&config.chest_reference),
        )
    }

    /// フレームから胴体を解く。退化時は None
    pub fn solve(&self, frame: &PoseFrame, orientation: &UnitQuaternion<f32>) -> Option<TorsoPose> {
        self.solve_points(
            frame.get(LandmarkIndex::LeftShoulder),
            frame.get(LandmarkIndex::RightShoulder),
            frame.get(LandmarkIndex::LeftHip),
            frame.get(LandmarkIndex::RightHip),
            orientation,
        )
    }

    pub fn solve_points(
        &self,
        left_shoulder: Vector3<f32>,
        right_shoulder: Vector3<f32>,
        left_hip: Vector3<f32>,
        right_hip: Vector3<f32>,
        orientation: &UnitQuaternion<f32>,
    ) -> Option<TorsoPose> {
        // 肩中点と腰中点の中点。単一点のノイズに強い
        let shoulder_mid = (left_shoulder + right_shoulder) * 0.5;
        let hip_mid = (left_hip + right_hip) * 0.5;
        let core = (shoulder_mid + hip_mid) * 0.5;

        let chest_basis = chest_basis(&left_shoulder, &right_shoulder, &core)?;
        let pelvis_basis = pelvis_basis(&left_hip, &right_hip, &core)?;

        let mesh = orientation.to_rotation_matrix().into_inner();
        Some(TorsoPose {
            pelvis: basis_to_quaternion(&pelvis_basis, &(mesh * self.pelvis_reference)),
            chest: basis_to_quaternion(&chest_basis, &(mesh * self.chest_reference)),
        })
    }
}

fn columns(c: &[[f32; 3]; 3]) -> Matrix3<f32> {
    Matrix3::from_columns(&[Vector3::from(c[0]), Vector3::from(c[1]), Vector3::from(c[2])])
}

fn check_reference(name: &str, m: &Matrix3<f32>, det: f32) -> Result<()> {
    let orthonormal = (m.transpose() * m - Matrix3::identity()).norm() < 1e-3;
    if !orthonormal || (m.determinant() - det).abs() > 1e-3 {
        return Err(RetargetError::InvalidReference(name.to_string()));
    }
    Ok(())
}

/// X = 左肩 - 右肩, Z = X × Y', Y = X × Z
fn chest_basis(
    left_shoulder: &Vector3<f32>,
    right_shoulder: &Vector3<f32>,
    core: &Vector3<f32>,
) -> Option<Matrix3<f32>> {
    let x = normalized(left_shoulder - right_shoulder)?;
    let y_tmp = normalized(left_shoulder - core)?;
    let z = normalized(x.cross(&y_tmp))?;
    let y = normalized(x.cross(&z))?;
    Some(Matrix3::from_columns(&[x, y, z]))
}

/// X = 左腰 - 右腰, Z = X × Y', Y = Z × X
///
/// 胸と外積の順序が逆。骨盤ボーンのレスト姿勢の掌性に合わせている。
fn pelvis_basis(
    left_hip: &Vector3<f32>,
    right_hip: &Vector3<f32>,
    core: &Vector3<f32>,
) -> Option<Matrix3<f32>> {
    let x = normalized(left_hip - right_hip)?;
    let y_tmp = normalized(core - left_hip)?;
    let z = normalized(x.cross(&y_tmp))?;
    let y = normalized(z.cross(&x))?;
    Some(Matrix3::from_columns(&[x, y, z]))
}

/// target × inverse(rest)。rest は正規直交なので逆行列 = 転置
fn basis_to_quaternion(target: &Matrix3<f32>, rest: &Matrix3<f32>) -> UnitQuaternion<f32> {
    let m = target * rest.transpose();
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m));
    UnitQuaternion::new_normalize(q.into_inner())
}
