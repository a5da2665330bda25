use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// BlazePose の 33 ランドマークインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(usize)]
pub enum LandmarkIndex {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl LandmarkIndex {
    pub const COUNT: usize = 33;

    /// インデックス順の全ランドマーク
    pub const ALL: [LandmarkIndex; Self::COUNT] = {
        use LandmarkIndex::*;
        [
            Nose, LeftEyeInner, LeftEye, LeftEyeOuter, RightEyeInner, RightEye, RightEyeOuter,
            LeftEar, RightEar, MouthLeft, MouthRight,
            LeftShoulder, RightShoulder, LeftElbow, RightElbow, LeftWrist, RightWrist,
            LeftPinky, RightPinky, LeftIndex, RightIndex, LeftThumb, RightThumb,
            LeftHip, RightHip, LeftKnee, RightKnee, LeftAnkle, RightAnkle,
            LeftHeel, RightHeel, LeftFootIndex, RightFootIndex,
        ]
    };

    const NAMES: [&'static str; Self::COUNT] = [
        "NOSE", "LEFT_EYE_INNER", "LEFT_EYE", "LEFT_EYE_OUTER", "RIGHT_EYE_INNER", "RIGHT_EYE",
        "RIGHT_EYE_OUTER", "LEFT_EAR", "RIGHT_EAR", "MOUTH_LEFT", "MOUTH_RIGHT",
        "LEFT_SHOULDER", "RIGHT_SHOULDER", "LEFT_ELBOW", "RIGHT_ELBOW", "LEFT_WRIST",
        "RIGHT_WRIST", "LEFT_PINKY", "RIGHT_PINKY", "LEFT_INDEX", "RIGHT_INDEX", "LEFT_THUMB",
        "RIGHT_THUMB", "LEFT_HIP", "RIGHT_HIP", "LEFT_KNEE", "RIGHT_KNEE", "LEFT_ANKLE",
        "RIGHT_ANKLE", "LEFT_HEEL", "RIGHT_HEEL", "LEFT_FOOT_INDEX", "RIGHT_FOOT_INDEX",
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// "LEFT_SHOULDER" 形式の名前から引く
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .position(|n| *n == name)
            .and_then(Self::from_index)
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }
}

/// 推定器から届く単一ランドマーク（システム座標系）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// 可視性 (0.0〜1.0)。推定器が出さない場合は None
    #[serde(default)]
    pub visibility: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, visibility: None }
    }

    pub fn with_visibility(mut self, visibility: f32) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn position(&self) -> Vector3<f32> {
        Vector3::new(self.x, self.y, self.z)
    }
}

impl Default for Landmark {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// エンジン内部座標系に変換済みの 1 フレーム分の姿勢
#[derive(Debug, Clone)]
pub struct PoseFrame {
    points: [Vector3<f32>; LandmarkIndex::COUNT],
    visibility: [Option<f32>; LandmarkIndex::COUNT],
}

impl PoseFrame {
    pub fn new(
        points: [Vector3<f32>; LandmarkIndex::COUNT],
        visibility: [Option<f32>; LandmarkIndex::COUNT],
    ) -> Self {
        Self { points, visibility }
    }

    /// 全点が同じ可視性なしフレーム
    pub fn from_points(points: [Vector3<f32>; LandmarkIndex::COUNT]) -> Self {
        Self::new(points, [None; LandmarkIndex::COUNT])
    }

    pub fn get(&self, index: LandmarkIndex) -> Vector3<f32> {
        self.points[index as usize]
    }

    pub fn set(&mut self, index: LandmarkIndex, point: Vector3<f32>) {
        self.points[index as usize] = point;
    }

    pub fn visibility(&self, index: LandmarkIndex) -> Option<f32> {
        self.visibility[index as usize]
    }

    /// 閾値指定なし、または可視性が未提供なら常に true
    pub fn is_visible(&self, index: LandmarkIndex, threshold: Option<f32>) -> bool {
        match (threshold, self.visibility(index)) {
            (Some(t), Some(v)) => v >= t,
            _ => true,
        }
    }
}

impl Default for PoseFrame {
    fn default() -> Self {
        Self::from_points([Vector3::zeros(); LandmarkIndex::COUNT])
    }
}
