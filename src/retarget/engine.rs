use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, info, warn};

use super::{normalized, FrameBuffer, LimbSolver, LimbSpec, TorsoSolver, YawStabilizer};
use crate::animation::{Keyframe, LowerBodyClip};
use crate::config::{Config, RetargetConfig, TorsoConfig};
use crate::error::{RetargetError, Result};
use crate::pose::{Landmark, LandmarkIndex};
use crate::skeleton::{BoneId, Skeleton};

/// 1 フレームごとの切り替え
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetargetOptions {
    /// 脚もランドマークから解く。false なら下半身クリップ（あれば）を進める
    pub lower_body: bool,
    /// 可視性閾値。None ならゲートしない
    pub min_visibility: Option<f32>,
}

impl RetargetOptions {
    pub fn from_config(config: &RetargetConfig) -> Self {
        Self {
            lower_body: config.lower_body,
            min_visibility: config.min_visibility,
        }
    }
}

/// ランドマーク → スケルトンのリターゲット一式
///
/// 1 フレームの処理順:
/// 1. 肩ベクトルでアバターを旋回
/// 2. 新しい向きでランドマークを取り込み
/// 3. 骨盤・胸
/// 4. 四肢（親→子）
/// 5. 下半身クリップ
pub struct RetargetEngine {
    skeleton: Skeleton,
    frame: FrameBuffer,
    torso: TorsoSolver,
    limbs: LimbSolver,
    yaw: YawStabilizer,
    pelvis: BoneId,
    chest: BoneId,
    left_shoulder: BoneId,
    right_shoulder: BoneId,
    clip: Option<LowerBodyClip>,
}

impl RetargetEngine {
    pub fn new(skeleton: Skeleton, config: &Config) -> Result<Self> {
        Self::from_parts(skeleton, &config.retarget, &config.torso, &config.limbs)
    }

    /// スケルトンも設定から作る
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.skeleton.build()?, config)
    }

    pub fn from_parts(
        skeleton: Skeleton,
        retarget: &RetargetConfig,
        torso: &TorsoConfig,
        limbs: &[LimbSpec],
    ) -> Result<Self> {
        let pelvis = skeleton.require(&torso.pelvis_bone)?;
        let chest = skeleton.require(&torso.chest_bone)?;
        let left_shoulder = skeleton.require(&torso.left_shoulder_bone)?;
        let right_shoulder = skeleton.require(&torso.right_shoulder_bone)?;

        // 骨盤の解はメッシュローカルなのでルートに、胸は骨盤の直下に置く
        if let Some(parent) = skeleton.parent(pelvis) {
            return Err(RetargetError::ParentMismatch {
                bone: torso.pelvis_bone.clone(),
                configured: "<root>".to_string(),
                actual: skeleton.name(parent).to_string(),
            });
        }
        let chest_parent = skeleton.parent(chest);
        if chest_parent != Some(pelvis) {
            return Err(RetargetError::ParentMismatch {
                bone: torso.chest_bone.clone(),
                configured: torso.pelvis_bone.clone(),
                actual: chest_parent
                    .map(|p| skeleton.name(p).to_string())
                    .unwrap_or_else(|| "<root>".to_string()),
            });
        }

        if normalized(Vector3::from(retarget.yaw_reference)).is_none() {
            return Err(RetargetError::InvalidYawReference);
        }

        let torso_solver = TorsoSolver::from_config(torso)?;
        let limb_solver = LimbSolver::new(limbs, &skeleton)?;
        info!(
            "retarget engine: {} bones, {} limbs, pelvis={} chest={}",
            skeleton.len(),
            limb_solver.len(),
            torso.pelvis_bone,
            torso.chest_bone
        );

        Ok(Self {
            frame: FrameBuffer::from_config(retarget),
            torso: torso_solver,
            limbs: limb_solver,
            yaw: YawStabilizer::from_config(retarget),
            pelvis,
            chest,
            left_shoulder,
            right_shoulder,
            clip: None,
            skeleton,
        })
    }

    /// 下半身クリップを差し替える。ボーン名はこのエンジンのスケルトンで解決
    pub fn set_lower_body_clip(&mut self, keyframes: &[Keyframe]) -> Result<()> {
        let clip = LowerBodyClip::new(keyframes, &self.skeleton)?;
        info!("lower body clip: {} frames", clip.len());
        self.clip = Some(clip);
        Ok(())
    }

    pub fn with_lower_body_clip(mut self, clip: LowerBodyClip) -> Self {
        self.clip = Some(clip);
        self
    }

    pub fn clear_lower_body_clip(&mut self) {
        self.clip = None;
    }

    pub fn lower_body_clip(&self) -> Option<&LowerBodyClip> {
        self.clip.as_ref()
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn skeleton_mut(&mut self) -> &mut Skeleton {
        &mut self.skeleton
    }

    pub fn orientation(&self) -> UnitQuaternion<f32> {
        self.skeleton.orientation()
    }

    /// 1 フレーム分をまとめて処理する。戻り値は右肩 - 左肩（ワールド）
    ///
    /// 要素数が合わなければ何も変更せずにエラー。
    pub fn process(&mut self, raw: &[Landmark], options: &RetargetOptions) -> Result<Vector3<f32>> {
        let shoulder = match self.frame.shoulder_vector(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("frame rejected: {}", e);
                return Err(e);
            }
        };
        self.rotate(&shoulder);
        self.apply_pose(raw, options)
    }

    /// スケール済み肩ベクトルからアバターの向きを更新する
    pub fn rotate(&mut self, shoulder: &Vector3<f32>) -> UnitQuaternion<f32> {
        let orientation = self.yaw.apply(&self.skeleton.orientation(), shoulder);
        self.skeleton.set_orientation(orientation);
        orientation
    }

    /// 現在の向きでランドマークを取り込み、胴体・四肢・下半身を更新する
    pub fn apply_pose(
        &mut self,
        raw: &[Landmark],
        options: &RetargetOptions,
    ) -> Result<Vector3<f32>> {
        let orientation = self.skeleton.orientation();
        let frame = self.frame.ingest(raw, &orientation)?;

        let torso_visible = [
            LandmarkIndex::LeftShoulder,
            LandmarkIndex::RightShoulder,
            LandmarkIndex::LeftHip,
            LandmarkIndex::RightHip,
        ]
        .iter()
        .all(|&i| frame.is_visible(i, options.min_visibility));

        match self.torso.solve(frame, &orientation).filter(|_| torso_visible) {
            Some(pose) => {
                self.skeleton.set_local_rotation(self.pelvis, pose.pelvis);
                self.skeleton.set_local_rotation(self.chest, pose.chest_local());
            }
            None => debug!("torso: degenerate or hidden, holding"),
        }

        self.limbs.solve(
            frame,
            &mut self.skeleton,
            options.lower_body,
            options.min_visibility,
        );

        if !options.lower_body {
            if let Some(clip) = self.clip.as_mut() {
                clip.advance(&mut self.skeleton);
            }
        }

        Ok(self.shoulder_span())
    }

    /// 右肩 - 左肩（ワールド）。移動方向の算出などに使う
    pub fn shoulder_span(&self) -> Vector3<f32> {
        self.skeleton.world_position(self.right_shoulder)
            - self.skeleton.world_position(self.left_shoulder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetargetError;

    fn approx_eq_quat(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>, eps: f32) -> bool {
        (a.coords - b.coords).norm() < eps || (a.coords + b.coords).norm() < eps
    }

    /// スケール 1、基準軸 +X（T ポーズの肩ベクトルと一致するので旋回しない）
    fn test_config() -> Config {
        let mut config = Config::default();
        config.retarget.scale = [1.0, 1.0, 1.0];
        config.retarget.yaw_reference = [1.0, 0.0, 0.0];
        config
    }

    fn engine(config: &Config) -> RetargetEngine {
        RetargetEngine::new(Skeleton::humanoid(), config).unwrap()
    }

    /// 正面 T ポーズ。左半身が -X
    fn t_pose() -> Vec<Landmark> {
        use LandmarkIndex::*;
        let mut raw = vec![Landmark::default(); LandmarkIndex::COUNT];
        let mut put = |i: LandmarkIndex, x: f32, y: f32, z: f32| raw[i as usize] = Landmark::new(x, y, z);
        put(LeftShoulder, -1.0, 1.0, 0.0);
        put(RightShoulder, 1.0, 1.0, 0.0);
        put(LeftElbow, -2.0, 1.0, 0.0);
        put(RightElbow, 2.0, 1.0, 0.0);
        put(LeftWrist, -3.0, 1.0, 0.0);
        put(RightWrist, 3.0, 1.0, 0.0);
        put(LeftHip, -1.0, -1.0, 0.0);
        put(RightHip, 1.0, -1.0, 0.0);
        put(LeftKnee, -1.0, -2.0, 0.0);
        put(RightKnee, 1.0, -2.0, 0.0);
        put(LeftAnkle, -1.0, -3.0, 0.0);
        put(RightAnkle, 1.0, -3.0, 0.0);
        put(LeftFootIndex, -1.0, -3.0, -1.0);
        put(RightFootIndex, 1.0, -3.0, -1.0);
        raw
    }

    fn bone_direction(skeleton: &Skeleton, name: &str) -> Vector3<f32> {
        let id = skeleton.require(name).unwrap();
        skeleton.world_rotation(id) * Vector3::y()
    }

    #[test]
    fn test_t_pose_end_to_end() {
        let config = test_config();
        let mut engine = engine(&config);
        let span = engine.process(&t_pose(), &RetargetOptions::default()).unwrap();

        let skeleton = engine.skeleton();
        let hips = skeleton.require("Hips").unwrap();
        let chest = skeleton.require("Spine2").unwrap();
        assert!(approx_eq_quat(&skeleton.local_rotation(hips), &UnitQuaternion::identity(), 1e-4));
        assert!(approx_eq_quat(&skeleton.local_rotation(chest), &UnitQuaternion::identity(), 1e-4));
        assert!(approx_eq_quat(&engine.orientation(), &UnitQuaternion::identity(), 1e-6));

        assert!((bone_direction(skeleton, "LeftArm") - Vector3::new(-1.0, 0.0, 0.0)).norm() < 1e-4);
        assert!((bone_direction(skeleton, "LeftForeArm") - Vector3::new(-1.0, 0.0, 0.0)).norm() < 1e-4);
        assert!((bone_direction(skeleton, "RightForeArm") - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-4);

        assert!((span - Vector3::new(0.12, 0.0, 0.0)).norm() < 1e-5);
    }

    #[test]
    fn test_wrong_count_changes_nothing() {
        let config = test_config();
        let mut engine = engine(&config);
        engine.process(&t_pose(), &RetargetOptions::default()).unwrap();
        let before = engine.skeleton().clone();

        let result = engine.process(&t_pose()[..10], &RetargetOptions::default());
        assert_eq!(
            result.err(),
            Some(RetargetError::LandmarkCount { expected: 33, actual: 10 })
        );
        assert_eq!(engine.orientation(), before.orientation());
        for id in before.bone_ids() {
            assert_eq!(engine.skeleton().local_rotation(id), before.local_rotation(id));
        }
    }

    #[test]
    fn test_degenerate_segment_holds() {
        let config = test_config();
        let mut engine = engine(&config);
        engine.process(&t_pose(), &RetargetOptions::default()).unwrap();
        let arm = engine.skeleton().require("LeftArm").unwrap();
        let before = engine.skeleton().local_rotation(arm);

        let mut raw = t_pose();
        raw[LandmarkIndex::LeftElbow as usize] = raw[LandmarkIndex::LeftShoulder as usize];
        engine.process(&raw, &RetargetOptions::default()).unwrap();
        assert_eq!(engine.skeleton().local_rotation(arm), before);
    }

    #[test]
    fn test_degenerate_torso_holds() {
        let config = test_config();
        let mut engine = engine(&config);
        let hips = engine.skeleton().require("Hips").unwrap();
        let tilt = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.3);
        engine.skeleton_mut().set_local_rotation(hips, tilt);

        let mut raw = t_pose();
        raw[LandmarkIndex::RightHip as usize] = raw[LandmarkIndex::LeftHip as usize];
        engine.apply_pose(&raw, &RetargetOptions::default()).unwrap();
        assert!(approx_eq_quat(&engine.skeleton().local_rotation(hips), &tilt, 1e-6));
    }

    #[test]
    fn test_yaw_before_ingest() {
        let mut config = test_config();
        config.retarget.rotation_sensitivity = 0.5;
        let mut engine = engine(&config);

        // 肩を縦軸まわりに 0.4 ひねる
        let theta: f32 = 0.4;
        let mut raw = t_pose();
        raw[LandmarkIndex::LeftShoulder as usize] = Landmark::new(-theta.cos(), 1.0, -theta.sin());
        raw[LandmarkIndex::RightShoulder as usize] = Landmark::new(theta.cos(), 1.0, theta.sin());
        engine.process(&raw, &RetargetOptions::default()).unwrap();

        let orientation = engine.orientation();
        assert!((orientation.angle() - theta * 0.5).abs() < 1e-4);
        // 取り込み済みの点は新しい向きで回っている
        let left = engine.frame.frame().get(LandmarkIndex::LeftShoulder);
        let expected = orientation * raw[LandmarkIndex::LeftShoulder as usize].position();
        assert!((left - expected).norm() < 1e-5);
    }

    #[test]
    fn test_lower_body_toggle() {
        let config = test_config();
        let mut engine = engine(&config);
        let leg = engine.skeleton().require("LeftLeg").unwrap();
        let bent = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.7);
        let mut keyframe = Keyframe::new();
        keyframe.insert("LeftLeg".to_string(), [bent.i, bent.j, bent.k, bent.w]);
        engine.set_lower_body_clip(&[keyframe]).unwrap();

        // 下半身オフ: クリップの値
        engine.process(&t_pose(), &RetargetOptions::default()).unwrap();
        assert!(approx_eq_quat(&engine.skeleton().local_rotation(leg), &bent, 1e-5));

        // 下半身オン: ランドマークから。まっすぐな脚なので膝は単位回転
        let options = RetargetOptions { lower_body: true, min_visibility: None };
        engine.process(&t_pose(), &options).unwrap();
        assert!(approx_eq_quat(&engine.skeleton().local_rotation(leg), &UnitQuaternion::identity(), 1e-4));
        assert!((bone_direction(engine.skeleton(), "LeftLeg") - Vector3::new(0.0, -1.0, 0.0)).norm() < 1e-4);
    }

    #[test]
    fn test_hidden_torso_holds() {
        let config = test_config();
        let mut engine = engine(&config);
        let hips = engine.skeleton().require("Hips").unwrap();
        let before = engine.skeleton().local_rotation(hips);

        let mut raw: Vec<Landmark> = t_pose().into_iter().map(|l| l.with_visibility(0.9)).collect();
        raw[LandmarkIndex::LeftHip as usize] = raw[LandmarkIndex::LeftHip as usize].with_visibility(0.1);
        // 少し回した胴体でも閾値未満なら保持
        let turn = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.3);
        for l in raw.iter_mut() {
            let p = turn * l.position();
            *l = Landmark { x: p.x, y: p.y, z: p.z, ..*l };
        }
        let options = RetargetOptions { lower_body: false, min_visibility: Some(0.5) };
        engine.apply_pose(&raw, &options).unwrap();
        assert_eq!(engine.skeleton().local_rotation(hips), before);

        engine.apply_pose(&raw, &RetargetOptions::default()).unwrap();
        assert!(approx_eq_quat(&engine.skeleton().local_rotation(hips), &turn, 1e-4));
    }

    #[test]
    fn test_non_finite_landmark_does_not_stick() {
        let mut engine = RetargetEngine::from_config(&Config::default()).unwrap();
        let arm = engine.skeleton().require("LeftArm").unwrap();
        let before = engine.orientation();

        let mut raw = t_pose();
        raw[LandmarkIndex::LeftShoulder as usize] = Landmark::new(f32::NAN, 0.1, 0.0);
        engine.process(&raw, &RetargetOptions::default()).unwrap();
        // 旋回せず、肩・胴体・腕は前回値を保持
        assert_eq!(engine.orientation(), before);

        for _ in 0..5 {
            engine.process(&t_pose(), &RetargetOptions::default()).unwrap();
        }
        assert!(engine.orientation().coords.iter().all(|c| c.is_finite()));
        for id in engine.skeleton().bone_ids() {
            let q = engine.skeleton().world_rotation(id);
            assert!(q.coords.iter().all(|c| c.is_finite()), "{}", engine.skeleton().name(id));
        }
        assert!(engine.skeleton().local_rotation(arm).coords.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_invalid_yaw_reference() {
        for reference in [[0.0, 0.0, 0.0], [f32::NAN, 0.0, 0.0], [f32::INFINITY, 1.0, 0.0]] {
            let mut config = test_config();
            config.retarget.yaw_reference = reference;
            assert_eq!(
                RetargetEngine::new(Skeleton::humanoid(), &config).err(),
                Some(RetargetError::InvalidYawReference)
            );
        }
    }

    #[test]
    fn test_missing_torso_bone() {
        let mut config = test_config();
        config.torso.chest_bone = "Chest".to_string();
        assert_eq!(
            RetargetEngine::new(Skeleton::humanoid(), &config).err(),
            Some(RetargetError::MissingBone("Chest".into()))
        );
    }

    #[test]
    fn test_chest_must_hang_from_pelvis() {
        let mut config = test_config();
        config.torso.chest_bone = "Neck".to_string();
        assert_eq!(
            RetargetEngine::new(Skeleton::humanoid(), &config).err(),
            Some(RetargetError::ParentMismatch {
                bone: "Neck".into(),
                configured: "Hips".into(),
                actual: "Spine2".into(),
            })
        );
    }

    #[test]
    fn test_from_config_default_rig() {
        let engine = RetargetEngine::from_config(&Config::default()).unwrap();
        assert_eq!(engine.skeleton().len(), 18);
        assert!(engine.lower_body_clip().is_none());
    }
}
