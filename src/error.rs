use thiserror::Error;

/// リターゲット処理のエラー
///
/// 構築時の設定ミスと、呼び出し側の契約違反（ランドマーク数不一致）のみ。
/// 退化ジオメトリはエラーにせず、ボーンの前回回転を保持する。
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetargetError {
    #[error("bone not found in skeleton: {0}")]
    MissingBone(String),

    #[error("duplicate bone name: {0}")]
    DuplicateBone(String),

    #[error("parent bone of {bone} is {actual}, but limb table says {configured}")]
    ParentMismatch {
        bone: String,
        configured: String,
        actual: String,
    },

    #[error("limb {child} is solved before its parent limb {parent}")]
    LimbOrder { child: String, parent: String },

    #[error("limb {0} has a zero-length rest direction")]
    ZeroRestDirection(String),

    #[error("rotation for {0} is zero-length or not finite")]
    InvalidRotation(String),

    #[error("yaw reference axis is zero-length or not finite")]
    InvalidYawReference,

    #[error("{0} reference basis is not orthonormal with the expected handedness")]
    InvalidReference(String),

    #[error("expected {expected} landmarks, got {actual}")]
    LandmarkCount { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, RetargetError>;
