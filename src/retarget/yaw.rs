use nalgebra::{Unit, UnitQuaternion, Vector3};

use super::normalized;
use crate::config::RetargetConfig;

/// 肩ベクトルからアバター全体の向きをなめらかに追従させる
///
/// 目標へのスナップではなく比例制御。閾値未満は不感帯。
pub struct YawStabilizer {
    threshold: f32,
    sensitivity: f32,
    reference: Vector3<f32>,
    up: Unit<Vector3<f32>>,
}

impl YawStabilizer {
    pub fn new(threshold: f32, sensitivity: f32) -> Self {
        Self {
            threshold,
            sensitivity,
            reference: Vector3::new(-1.0, 0.0, 0.0),
            up: Vector3::y_axis(),
        }
    }

    pub fn from_config(config: &RetargetConfig) -> Self {
        Self::new(config.rotation_threshold, config.rotation_sensitivity)
            .with_reference(Vector3::from(config.yaw_reference))
    }

    /// 肩ベクトルと比較する基準軸
    pub fn with_reference(mut self, reference: Vector3<f32>) -> Self {
        self.reference = reference;
        self
    }

    /// 今フレームの旋回量（鉛直軸まわり）。不感帯・退化時は None
    ///
    /// 符号は (基準 × 肩) の鉛直成分。基準が (-1, 0, 0) なら肩ベクトルの z の符号と同じ。
    pub fn turn(&self, shoulder: &Vector3<f32>) -> Option<UnitQuaternion<f32>> {
        let shoulder = normalized(*shoulder)?;
        let reference = normalized(self.reference)?;
        let angle = reference.angle(&shoulder);
        if !angle.is_finite() || angle <= self.threshold {
            return None;
        }

        let sign = if reference.cross(&shoulder).dot(&self.up) > 0.0 { 1.0 } else { -1.0 };
        Some(UnitQuaternion::from_axis_angle(&self.up, sign * angle * self.sensitivity))
    }

    /// 旋回を orientation に積んで、結果の向きを返す
    pub fn apply(
        &self,
        orientation: &UnitQuaternion<f32>,
        shoulder: &Vector3<f32>,
    ) -> UnitQuaternion<f32> {
        match self.turn(shoulder) {
            Some(turn) => UnitQuaternion::new_normalize((turn * orientation).into_inner()),
            None => *orientation,
        }
    }
}

impl Default for YawStabilizer {
    fn default() -> Self {
        Self::from_config(&RetargetConfig::default())
    }
}
