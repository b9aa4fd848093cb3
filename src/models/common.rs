use glam::{DMat3, DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::scenario::TargetingConfig;

/// センサーが報告するエンティティの識別子
pub type EntityId = u64;
/// ハードウェアブロックの識別子
pub type BlockId = u64;
/// 物理的に一体となっている構造体（アセンブリ）の識別子
pub type AssemblyId = u64;

/// 重力加速度の基準値（m/s²）
pub const STANDARD_GRAVITY: f64 = 9.8;

/// アクチュエータ指令の上下限
pub const ACTUATION_LIMIT: f64 = 1000.0;

/// ブロックの姿勢（前方向と上方向）
///
/// ローカル座標系は x = 右, y = 上, z = 後方 です。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub forward: DVec3,
    pub up: DVec3,
}

impl Frame {
    pub fn new(forward: DVec3, up: DVec3) -> Self {
        Self { forward, up }
    }

    /// 正規直交化した (右, 上, 前) を返す
    fn basis(&self) -> (DVec3, DVec3, DVec3) {
        let forward = self.forward.normalize_or_zero();
        let right = forward.cross(self.up).normalize_or_zero();
        let up = right.cross(forward);
        (right, up, forward)
    }

    pub fn right(&self) -> DVec3 {
        self.basis().0
    }

    pub fn backward(&self) -> DVec3 {
        -self.basis().2
    }

    /// ローカル座標系からワールド座標系への回転を表すクォータニオン
    pub fn to_quat(&self) -> DQuat {
        let (right, up, forward) = self.basis();
        DQuat::from_mat3(&DMat3::from_cols(right, up, -forward))
    }

    /// ワールド座標のベクトルをこのフレームのローカル座標へ変換（逆クォータニオン）
    pub fn to_local(&self, world: DVec3) -> DVec3 {
        self.to_quat().inverse().mul_vec3(world)
    }

    /// ローカル座標のベクトルをワールド座標へ変換
    pub fn to_world(&self, local: DVec3) -> DVec3 {
        self.to_quat().mul_vec3(local)
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new(DVec3::NEG_Z, DVec3::Y)
    }
}

/// 1ティック分の実行コンテキスト
///
/// グローバルな時計や設定を持たず、毎ティック明示的に各処理へ渡されます。
#[derive(Debug, Clone, Copy)]
pub struct SimulationContext<'a> {
    /// 現在のタイムスタンプ（ミリ秒、センサー由来または累積推定）
    pub timestamp_ms: f64,
    /// 前回ティックからの経過時間（ミリ秒）
    pub elapsed_ms: f64,
    /// 自プラットフォームの中心位置
    pub platform_position: DVec3,
    /// 目標追跡設定（読み取り専用）
    pub targeting: &'a TargetingConfig,
}

impl SimulationContext<'_> {
    /// 経過時間（秒）
    pub fn elapsed_s(&self) -> f64 {
        self.elapsed_ms / 1000.0
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use super::ACTUATION_LIMIT;
    use glam::DVec3;

    /// ゼロベクトルを安全に扱う正規化（ゼロ・非有限の場合はゼロベクトル）
    pub fn safe_normalize(v: DVec3) -> DVec3 {
        v.try_normalize().unwrap_or(DVec3::ZERO)
    }

    /// ローカル方向ベクトルを方位角・仰角（ラジアン）に分解
    ///
    /// 方位角は前方(-Z)から左向きが正、仰角は上向きが正です。
    /// ゼロベクトルに対しては (0, 0) を返します。
    pub fn azimuth_elevation(local: DVec3) -> (f64, f64) {
        let Some(n) = local.try_normalize() else {
            return (0.0, 0.0);
        };

        let elevation = n.y.clamp(-1.0, 1.0).asin();
        let horizontal = DVec3::new(n.x, 0.0, n.z);
        let azimuth = if horizontal.length_squared() < 1e-18 {
            0.0
        } else {
            (-n.x).atan2(-n.z)
        };

        (azimuth, elevation)
    }

    /// アクチュエータ指令値を許容範囲にクランプ
    pub fn clamp_actuation(value: f64) -> f64 {
        value.clamp(-ACTUATION_LIMIT, ACTUATION_LIMIT)
    }

    /// ベクトルにNaNが含まれるか
    pub fn has_nan(v: DVec3) -> bool {
        v.x.is_nan() || v.y.is_nan() || v.z.is_nan()
    }
}
