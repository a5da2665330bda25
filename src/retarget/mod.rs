pub mod engine;
pub mod frame;
pub mod limb;
pub mod torso;
pub mod yaw;

pub use engine::{RetargetEngine, RetargetOptions};
pub use frame::FrameBuffer;
pub use limb::{limb_rotation, shortest_arc, LimbSolver, LimbSpec};
pub use torso::{TorsoPose, TorsoSolver};
pub use yaw::YawStabilizer;

use nalgebra::Vector3;

/// これより短いベクトルは方向なしとみなす
pub(crate) const EPSILON: f32 = 1e-6;

/// 正規化。ゼロ長・NaN・無限大は None
pub(crate) fn normalized(v: Vector3<f32>) -> Option<Vector3<f32>> {
    v.try_normalize(EPSILON)
        .filter(|n| n.iter().all(|c| c.is_finite()))
}
