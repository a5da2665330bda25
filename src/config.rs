use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error;
use crate::retarget::LimbSpec;
use crate::skeleton::{BoneConfig, Skeleton};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub retarget: RetargetConfig,
    #[serde(default)]
    pub torso: TorsoConfig,
    /// 四肢テーブル。親→子の順に並べること
    #[serde(default = "LimbSpec::humanoid_table")]
    pub limbs: Vec<LimbSpec>,
    #[serde(default)]
    pub skeleton: SkeletonConfig,
    #[serde(default)]
    pub vmc: VmcConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetargetConfig {
    /// ランドマークの軸ごとのスケール (x, y, z)。負値で軸反転
    #[serde(default = "default_scale")]
    pub scale: [f32; 3],
    /// 旋回を始める角度（ラジアン）
    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold: f32,
    /// [0, 1] 旋回の追従度。大きいほど速く向きが変わる
    #[serde(default = "default_rotation_sensitivity")]
    pub rotation_sensitivity: f32,
    /// 肩ベクトルと比較する基準軸
    #[serde(default = "default_yaw_reference")]
    pub yaw_reference: [f32; 3],
    /// 可視性閾値。None ならゲートしない
    #[serde(default)]
    pub min_visibility: Option<f32>,
    /// 下半身もリターゲットするか
    #[serde(default)]
    pub lower_body: bool,
}

fn default_scale() -> [f32; 3] {
    // 幅比 30、高さ比 30 * 480 / 640。Y と Z は反転
    let width_ratio = 30.0;
    let height_ratio = width_ratio * 480.0 / 640.0;
    [width_ratio, -height_ratio, -width_ratio]
}
fn default_rotation_threshold() -> f32 { 0.1 }
fn default_rotation_sensitivity() -> f32 { 0.1 }
fn default_yaw_reference() -> [f32; 3] { [-1.0, 0.0, 0.0] }

impl Default for RetargetConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            rotation_threshold: default_rotation_threshold(),
            rotation_sensitivity: default_rotation_sensitivity(),
            yaw_reference: default_yaw_reference(),
            min_visibility: None,
            lower_body: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TorsoConfig {
    #[serde(default = "default_pelvis_bone")]
    pub pelvis_bone: String,
    #[serde(default = "default_chest_bone")]
    pub chest_bone: String,
    #[serde(default = "default_left_shoulder_bone")]
    pub left_shoulder_bone: String,
    #[serde(default = "default_right_shoulder_bone")]
    pub right_shoulder_bone: String,
    /// 骨盤のレスト基底（列ベクトル X, Y, Z）
    #[serde(default = "default_pelvis_reference")]
    pub pelvis_reference: [[f32; 3]; 3],
    /// 胸のレスト基底（列ベクトル X, Y, Z）。胸の基底は左手系なので鏡映を入れる
    #[serde(default = "default_chest_reference")]
    pub chest_reference: [[f32; 3]; 3],
}

fn default_pelvis_bone() -> String { "Hips".to_string() }
fn default_chest_bone() -> String { "Spine2".to_string() }
fn default_left_shoulder_bone() -> String { "LeftShoulder".to_string() }
fn default_right_shoulder_bone() -> String { "RightShoulder".to_string() }
fn default_pelvis_reference() -> [[f32; 3]; 3] {
    [[-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]]
}
fn default_chest_reference() -> [[f32; 3]; 3] {
    [[-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]]
}

impl Default for TorsoConfig {
    fn default() -> Self {
        Self {
            pelvis_bone: default_pelvis_bone(),
            chest_bone: default_chest_bone(),
            left_shoulder_bone: default_left_shoulder_bone(),
            right_shoulder_bone: default_right_shoulder_bone(),
            pelvis_reference: default_pelvis_reference(),
            chest_reference: default_chest_reference(),
        }
    }
}

/// ボーン一覧が空なら既定のヒューマノイドを使う
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SkeletonConfig {
    #[serde(default)]
    pub bones: Vec<BoneConfig>,
}

impl SkeletonConfig {
    pub fn build(&self) -> error::Result<Skeleton> {
        if self.bones.is_empty() {
            Ok(Skeleton::humanoid())
        } else {
            Skeleton::from_config(&self.bones)
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VmcConfig {
    /// 送信先 (host:port)
    #[serde(default = "default_vmc_addr")]
    pub addr: String,
}

fn default_vmc_addr() -> String { crate::vmc::VMC_DEFAULT_ADDR.to_string() }

impl Default for VmcConfig {
    fn default() -> Self {
        Self { addr: default_vmc_addr() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplayConfig {
    /// JSON Lines 形式の記録ファイル
    #[serde(default = "default_replay_path")]
    pub path: String,
    #[serde(default = "default_replay_fps")]
    pub fps: f32,
    /// 末尾まで再生したら先頭に戻る
    #[serde(default)]
    pub looped: bool,
    /// 下半身アニメーション (JSON)。未指定なら無し
    #[serde(default)]
    pub lower_body_clip: Option<String>,
}

fn default_replay_path() -> String { "recording.jsonl".to_string() }
fn default_replay_fps() -> f32 { 30.0 }

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            path: default_replay_path(),
            fps: default_replay_fps(),
            looped: false,
            lower_body_clip: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retarget: RetargetConfig::default(),
            torso: TorsoConfig::default(),
            limbs: LimbSpec::humanoid_table(),
            skeleton: SkeletonConfig::default(),
            vmc: VmcConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 読めなければ既定値で続行
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("config {} not loaded ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }
}
