use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nalgebra::UnitQuaternion;

use crate::error::Result;
use crate::skeleton::{rotation_from_xyzw, BoneId, Skeleton};

/// 1 キーフレーム: ボーン名 → ローカル回転 (x, y, z, w)
pub type Keyframe = BTreeMap<String, [f32; 4]>;

/// 下半身アニメーション（単一レイヤー、ループ再生）
///
/// 脚をリターゲットしないフレームでエンジンから 1 コマずつ進められる。
pub struct LowerBodyClip {
    frames: Vec<Vec<(BoneId, UnitQuaternion<f32>)>>,
    cursor: usize,
}

impl LowerBodyClip {
    /// ボーン名を解決して作る。存在しないボーン、ゼロ長・非有限の回転はエラー
    pub fn new(keyframes: &[Keyframe], skeleton: &Skeleton) -> Result<Self> {
        let mut frames = Vec::with_capacity(keyframes.len());
        for keyframe in keyframes {
            let mut bones = Vec::with_capacity(keyframe.len());
            for (name, rotation) in keyframe {
                let id = skeleton.require(name)?;
                bones.push((id, rotation_from_xyzw(name, *rotation)?));
            }
            frames.push(bones);
        }
        Ok(Self { frames, cursor: 0 })
    }

    /// JSON のキーフレーム配列を読む
    pub fn load<P: AsRef<Path>>(path: P, skeleton: &Skeleton) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let keyframes: Vec<Keyframe> = serde_json::from_str(&content)?;
        Ok(Self::new(&keyframes, skeleton)?)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 現在のコマを書き込んで次へ。末尾の次は先頭
    pub fn advance(&mut self, skeleton: &mut Skeleton) {
        let Some(frame) = self.frames.get(self.cursor) else {
            return;
        };
        for (id, rotation) in frame {
            skeleton.set_local_rotation(*id, *rotation);
        }
        self.cursor = (self.cursor + 1) % self.frames.len();
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
