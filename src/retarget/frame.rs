use nalgebra::{UnitQuaternion, Vector3};

use crate::config::RetargetConfig;
use crate::error::{RetargetError, Result};
use crate::pose::{Landmark, LandmarkIndex, PoseFrame};

/// ランドマーク取り込み
///
/// 軸ごとのスケール（アスペクト比・軸反転の補正）の後、
/// アバターの現在の回転で各点を回してメッシュ基準の座標にする。
pub struct FrameBuffer {
    scale: Vector3<f32>,
    frame: PoseFrame,
}

impl FrameBuffer {
    pub fn new(scale: [f32; 3]) -> Self {
        Self {
            scale: Vector3::from(scale),
            frame: PoseFrame::default(),
        }
    }

    pub fn from_config(config: &RetargetConfig) -> Self {
        Self::new(config.scale)
    }

    /// 要素数が 33 でなければ呼び出し側の契約違反
    pub fn check_count(raw: &[Landmark]) -> Result<()> {
        if raw.len() != LandmarkIndex::COUNT {
            return Err(RetargetError::LandmarkCount {
                expected: LandmarkIndex::COUNT,
                actual: raw.len(),
            });
        }
        Ok(())
    }

    /// スケールのみ適用（アバター回転前）
    pub fn scale_point(&self, landmark: &Landmark) -> Vector3<f32> {
        landmark.position().component_mul(&self.scale)
    }

    /// スケール後の右肩 - 左肩
    pub fn shoulder_vector(&self, raw: &[Landmark]) -> Result<Vector3<f32>> {
        Self::check_count(raw)?;
        let left = self.scale_point(&raw[LandmarkIndex::LeftShoulder as usize]);
        let right = self.scale_point(&raw[LandmarkIndex::RightShoulder as usize]);
        Ok(right - left)
    }

    /// 生ランドマークを取り込んで PoseFrame を差し替える
    ///
    /// 要素数不一致なら何もせずエラー（前フレームはそのまま）。
    pub fn ingest(
        &mut self,
        raw: &[Landmark],
        orientation: &UnitQuaternion<f32>,
    ) -> Result<&PoseFrame> {
        Self::check_count(raw)?;

        let points = std::array::from_fn(|i| orientation * self.scale_point(&raw[i]));
        let visibility = std::array::from_fn(|i| raw[i].visibility);
        self.frame = PoseFrame::new(points, visibility);
        Ok(&self.frame)
    }

    pub fn frame(&self) -> &PoseFrame {
        &self.frame
    }
}
