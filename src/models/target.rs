use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::models::common::EntityId;

/// ターゲットの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetType {
    /// 固定座標（忘却されない）
    Static,
    /// センサーで追跡中の移動目標
    Tracked,
}

/// 自陣営から見たターゲットとの関係
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Owner,
    Friendly,
    Neutral,
    Hostile,
    Unowned,
}

/// 追跡中ターゲットの記録
///
/// センサーで観測されるたびに `track` で更新され、
/// 観測がないティックには `predict` で位置が外挿されます。
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub id: EntityId,
    pub target_type: TargetType,
    pub relationship: Relationship,
    /// 現在の推定位置（観測値または外挿値）
    pub position: DVec3,
    pub velocity: DVec3,
    /// 加速度推定 `(前回速度 - 今回速度) / 経過ミリ秒`、初回観測では未定義
    pub acceleration: Option<DVec3>,
    pub last_known_position: DVec3,
    pub last_known_velocity: DVec3,
    /// 最終観測時刻（ミリ秒）、未観測ならNone
    pub last_seen: Option<f64>,
}

impl TargetRecord {
    pub fn new(id: EntityId, target_type: TargetType, relationship: Relationship) -> Self {
        Self {
            id,
            target_type,
            relationship,
            position: DVec3::ZERO,
            velocity: DVec3::ZERO,
            acceleration: None,
            last_known_position: DVec3::ZERO,
            last_known_velocity: DVec3::ZERO,
            last_seen: None,
        }
    }

    /// 観測値で記録を更新
    pub fn track(&mut self, position: DVec3, velocity: DVec3, timestamp_ms: f64) {
        if let Some(last_seen) = self.last_seen {
            if timestamp_ms > last_seen {
                self.acceleration =
                    Some((self.last_known_velocity - velocity) / (timestamp_ms - last_seen));
            }
        }

        self.last_known_position = position;
        self.position = position;
        self.last_known_velocity = velocity;
        self.velocity = velocity;
        self.last_seen = Some(timestamp_ms);
    }

    /// 最終観測からの等速直線外挿（加速度項は使わない）
    pub fn predict(&mut self, timestamp_ms: f64) {
        let Some(last_seen) = self.last_seen else {
            return;
        };
        let dt_s = (timestamp_ms - last_seen) / 1000.0;
        self.position = self.last_known_position + self.last_known_velocity * dt_s;
    }

    /// 最終観測からの経過時間（ミリ秒）
    pub fn age_ms(&self, now_ms: f64) -> f64 {
        match self.last_seen {
            Some(last_seen) => now_ms - last_seen,
            None => f64::INFINITY,
        }
    }

    /// このタイムスタンプで観測されたか
    pub fn seen_at(&self, now_ms: f64) -> bool {
        self.last_seen == Some(now_ms)
    }

    /// 物理的な加速度（m/s²）
    ///
    /// 保持している推定値は減速方向が正かつミリ秒単位なので、符号と単位を戻します。
    pub fn acceleration_mps2(&self) -> DVec3 {
        self.acceleration.map_or(DVec3::ZERO, |a| -a * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_leaves_acceleration_undefined() {
        let mut record = TargetRecord::new(7, TargetType::Tracked, Relationship::Hostile);
        record.track(DVec3::new(100.0, 0.0, 0.0), DVec3::new(10.0, 0.0, 0.0), 1000.0);

        assert_eq!(record.acceleration, None);
        assert_eq!(record.last_seen, Some(1000.0));
        assert_eq!(record.position, DVec3::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn test_acceleration_uses_previous_velocity_over_elapsed() {
        let mut record = TargetRecord::new(7, TargetType::Tracked, Relationship::Hostile);
        record.track(DVec3::ZERO, DVec3::new(10.0, 0.0, 0.0), 1000.0);
        record.track(DVec3::ZERO, DVec3::new(4.0, 2.0, 0.0), 1500.0);

        let expected = (DVec3::new(10.0, 0.0, 0.0) - DVec3::new(4.0, 2.0, 0.0)) / 500.0;
        assert_eq!(record.acceleration, Some(expected));

        // 物理加速度: 0.5秒で -6 m/s → -12 m/s²
        let physical = record.acceleration_mps2();
        assert!((physical.x - -12.0).abs() < 1e-9);
        assert!((physical.y - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_same_timestamp_does_not_divide_by_zero() {
        let mut record = TargetRecord::new(1, TargetType::Tracked, Relationship::Hostile);
        record.track(DVec3::ZERO, DVec3::X, 1000.0);
        record.track(DVec3::ZERO, DVec3::Y, 1000.0);

        assert_eq!(record.acceleration, None);
        assert_eq!(record.velocity, DVec3::Y);
    }

    #[test]
    fn test_predict_extrapolates_linearly() {
        let mut record = TargetRecord::new(1, TargetType::Tracked, Relationship::Hostile);
        record.track(DVec3::new(0.0, 0.0, 0.0), DVec3::new(20.0, 0.0, -10.0), 1000.0);
        record.predict(1500.0);

        assert_eq!(record.position, DVec3::new(10.0, 0.0, -5.0));
        assert_eq!(record.last_seen, Some(1000.0));
        assert_eq!(record.last_known_position, DVec3::ZERO);
        assert!(!record.seen_at(1500.0));
        assert_eq!(record.age_ms(1500.0), 500.0);
    }
}
