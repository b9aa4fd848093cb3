//! # Fire Control モジュール
//!
//! 直射火器の射撃判定と、その判定を火器への指令に変換する処理です。
//!
//! - 連射式（ガトリング）: 判定が変化したときだけ射撃開始/停止を指令
//! - 斉射式（ロケット）: 交戦中の経過時間を積算し、`装填時間 / 門数` ごとに1門ずつ順番に射撃

use tracing::{debug, info};

use crate::models::common::BlockId;
use crate::models::target::TargetRecord;
use crate::models::traits::{ActuatorCommand, IActuatorSink};

/// 射撃判定の理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireReason {
    NoTarget,
    /// 目標が目標切替間隔より長く観測されていない
    TargetNotVisible,
    /// 照準が合っていない
    Aligning,
    OutOfRange,
    Locked,
}

impl std::fmt::Display for FireReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FireReason::NoTarget => "Don't fire: no target",
            FireReason::TargetNotVisible => "Don't fire: can't see target",
            FireReason::Aligning => "Don't fire: aligning",
            FireReason::OutOfRange => "Don't fire: out of range",
            FireReason::Locked => "Fire: Target locked",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireDecision {
    pub should_fire: bool,
    pub reason: FireReason,
}

impl FireDecision {
    fn hold(reason: FireReason) -> Self {
        Self {
            should_fire: false,
            reason,
        }
    }
}

/// 射撃判定の閾値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireControlPolicy {
    /// 照準方向と砲身方向の内積の下限
    pub engage_dot: f64,
    /// 交戦距離（m）
    pub engage_range: f64,
    /// この時間（ミリ秒）より長く観測されない目標には撃たない
    pub change_target_after_ms: f64,
}

impl FireControlPolicy {
    /// 射撃判定
    ///
    /// 目標があり、目標切替間隔内に観測され、照準の内積が閾値以上で、
    /// 距離が交戦距離以下の場合だけ射撃します。
    pub fn decide(&self, target: Option<&TargetRecord>, now_ms: f64, aim_dot: f64, distance: f64) -> FireDecision {
        let Some(target) = target else {
            return FireDecision::hold(FireReason::NoTarget);
        };
        if target.age_ms(now_ms) > self.change_target_after_ms {
            return FireDecision::hold(FireReason::TargetNotVisible);
        }
        if aim_dot < self.engage_dot {
            return FireDecision::hold(FireReason::Aligning);
        }
        if distance > self.engage_range {
            return FireDecision::hold(FireReason::OutOfRange);
        }
        FireDecision {
            should_fire: true,
            reason: FireReason::Locked,
        }
    }
}

/// 火器の作動方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeaponMode {
    /// 連射式
    Continuous,
    /// 斉射式（全門の装填時間, ミリ秒）
    Salvo { reload_ms: f64 },
}

/// 火器群への指令
#[derive(Debug, Clone)]
pub struct WeaponActuator {
    mode: WeaponMode,
    units: Vec<BlockId>,
    firing: bool,
    volley_timer_ms: f64,
    next_unit: usize,
}

impl WeaponActuator {
    pub fn new(mode: WeaponMode, units: Vec<BlockId>) -> Self {
        Self {
            mode,
            units,
            firing: false,
            volley_timer_ms: 0.0,
            next_unit: 0,
        }
    }

    pub fn is_firing(&self) -> bool {
        self.firing
    }

    /// 判定を火器へ反映
    pub fn apply(&mut self, should_fire: bool, elapsed_ms: f64, sink: &mut dyn IActuatorSink) {
        match self.mode {
            WeaponMode::Continuous => {
                if should_fire != self.firing {
                    self.set_firing(should_fire, sink);
                }
            }
            WeaponMode::Salvo { reload_ms } => {
                if !should_fire || self.units.is_empty() {
                    self.volley_timer_ms = 0.0;
                    return;
                }

                let interval = reload_ms / self.units.len() as f64;
                if interval <= 0.0 {
                    return;
                }
                self.volley_timer_ms += elapsed_ms.max(0.0);
                while self.volley_timer_ms >= interval {
                    self.volley_timer_ms -= interval;
                    let unit = self.units[self.next_unit];
                    sink.send(ActuatorCommand::FireOnce { block: unit });
                    debug!(unit, index = self.next_unit, "WEAPON_VOLLEY: 1門を射撃しました");
                    self.next_unit = (self.next_unit + 1) % self.units.len();
                }
            }
        }
    }

    /// 全門の射撃を停止
    pub fn cease_fire(&mut self, sink: &mut dyn IActuatorSink) {
        self.volley_timer_ms = 0.0;
        if matches!(self.mode, WeaponMode::Continuous) {
            self.set_firing(false, sink);
        }
    }

    fn set_firing(&mut self, firing: bool, sink: &mut dyn IActuatorSink) {
        for unit in &self.units {
            sink.send(ActuatorCommand::SetFiring { block: *unit, firing });
        }
        if firing != self.firing {
            info!(firing, units = self.units.len(), "WEAPON_FIRING_CHANGED: 射撃状態を切り替えました");
        }
        self.firing = firing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CommandLog;
    use crate::models::target::{Relationship, TargetType};
    use glam::DVec3;

    fn policy() -> FireControlPolicy {
        FireControlPolicy {
            engage_dot: 0.95,
            engage_range: 1200.0,
            change_target_after_ms: 1000.0,
        }
    }

    fn seen_target(at_ms: f64) -> TargetRecord {
        let mut target = TargetRecord::new(5, TargetType::Tracked, Relationship::Hostile);
        target.track(DVec3::new(0.0, 0.0, -500.0), DVec3::ZERO, at_ms);
        target
    }

    #[test]
    fn test_decision_reasons() {
        let policy = policy();
        let target = seen_target(1000.0);

        assert_eq!(policy.decide(None, 1000.0, 1.0, 500.0).reason, FireReason::NoTarget);
        assert_eq!(
            policy.decide(Some(&target), 2500.0, 1.0, 500.0).reason,
            FireReason::TargetNotVisible
        );
        assert_eq!(policy.decide(Some(&target), 1000.0, 0.9, 500.0).reason, FireReason::Aligning);
        assert_eq!(policy.decide(Some(&target), 1000.0, 0.99, 1500.0).reason, FireReason::OutOfRange);
        assert!(policy.decide(Some(&target), 2000.0, 0.95, 1200.0).should_fire, "boundaries are inclusive");
    }

    #[test]
    fn test_locked_target_turns_continuous_weapon_on_once() {
        let policy = policy();
        let target = seen_target(1000.0);
        let mut weapon = WeaponActuator::new(WeaponMode::Continuous, vec![40]);
        let mut log = CommandLog::default();

        for tick in 0..5 {
            let decision = policy.decide(Some(&target), 1000.0 + tick as f64 * 16.0, 0.97, 500.0);
            assert!(decision.should_fire);
            weapon.apply(decision.should_fire, 16.0, &mut log);
        }

        assert_eq!(log.history(), &[ActuatorCommand::SetFiring { block: 40, firing: true }]);
        assert!(weapon.is_firing());
    }

    #[test]
    fn test_continuous_weapon_commands_only_on_change() {
        let mut weapon = WeaponActuator::new(WeaponMode::Continuous, vec![1, 2]);
        let mut log = CommandLog::default();

        for should_fire in [false, true, true, false, false, true] {
            weapon.apply(should_fire, 16.0, &mut log);
        }

        let toggles: Vec<bool> = log
            .history()
            .iter()
            .filter_map(|c| match c {
                ActuatorCommand::SetFiring { block: 1, firing } => Some(*firing),
                _ => None,
            })
            .collect();
        assert_eq!(toggles, vec![true, false, true]);
    }

    #[test]
    fn test_salvo_fires_each_unit_once_per_reload() {
        let mut weapon = WeaponActuator::new(WeaponMode::Salvo { reload_ms: 1500.0 }, vec![7, 8, 9]);
        let mut log = CommandLog::default();

        for _ in 0..15 {
            weapon.apply(true, 100.0, &mut log);
        }

        assert_eq!(
            log.history(),
            &[
                ActuatorCommand::FireOnce { block: 7 },
                ActuatorCommand::FireOnce { block: 8 },
                ActuatorCommand::FireOnce { block: 9 },
            ]
        );
    }

    #[test]
    fn test_salvo_timer_resets_when_engagement_stops() {
        let mut weapon = WeaponActuator::new(WeaponMode::Salvo { reload_ms: 1000.0 }, vec![7, 8]);
        let mut log = CommandLog::default();

        weapon.apply(true, 400.0, &mut log);
        weapon.apply(false, 400.0, &mut log);
        weapon.apply(true, 400.0, &mut log);
        assert!(log.history().is_empty());

        weapon.apply(true, 100.0, &mut log);
        assert_eq!(log.history(), &[ActuatorCommand::FireOnce { block: 7 }]);
    }

    #[test]
    fn test_cease_fire_stops_continuous_weapon() {
        let mut weapon = WeaponActuator::new(WeaponMode::Continuous, vec![3]);
        let mut log = CommandLog::default();
        weapon.apply(true, 16.0, &mut log);
        weapon.cease_fire(&mut log);

        assert!(!weapon.is_firing());
        assert_eq!(log.history().last(), Some(&ActuatorCommand::SetFiring { block: 3, firing: false }));
    }
}
