//! # Turret モジュール
//!
//! ジャイロで砲架を旋回させる直射タレットです。
//! 最も近い目標を保持し、リード予測の会合点へ向けて旋回し、射撃判定を火器に反映します。
//! 目標がない間は方位ローターの後方を向いて待機します。

use glam::DVec3;
use tracing::{debug, info};

use crate::models::common::{BlockId, EntityId, Frame, SimulationContext};
use crate::models::fire_control::{FireControlPolicy, FireDecision, WeaponActuator, WeaponMode};
use crate::models::guidance::{gyro_turn, lead_intercept, GyroGains};
use crate::models::hardware::HardwareError;
use crate::models::target::TargetRecord;
use crate::models::tracker::TargetTracker;
use crate::models::traits::{ActuatorCommand, IActuatorSink, IHardwareInventory};
use crate::scenario::{TargetingConfig, TurretConfig, TurretMode, WeaponType};

/// 起動時に解決したタレットの固定デバイス
#[derive(Debug, Clone, PartialEq)]
pub struct TurretDevices {
    /// 前方基準ブロック
    pub reference: BlockId,
    pub azimuth_rotor: BlockId,
    pub gyros: Vec<BlockId>,
    pub weapons: Vec<BlockId>,
}

#[derive(Debug, Clone)]
pub struct Turret {
    devices: TurretDevices,
    mode: TurretMode,
    gains: GyroGains,
    muzzle_velocity: f64,
    forget_target_after_ms: f64,
    policy: FireControlPolicy,
    weapon: WeaponActuator,
    target: Option<EntityId>,
    previous: (f64, f64),
    target_distance: f64,
    aim_dot: f64,
}

impl Turret {
    pub fn new(config: &TurretConfig, targeting: &TargetingConfig, devices: TurretDevices) -> Self {
        let mode = match config.weapon_type {
            WeaponType::GatlingGun => WeaponMode::Continuous,
            WeaponType::RocketLauncher => WeaponMode::Salvo {
                reload_ms: config.salvo_reload_ms,
            },
        };
        let weapon = WeaponActuator::new(mode, devices.weapons.clone());
        Self {
            devices,
            mode: config.mode,
            gains: GyroGains {
                gain: config.gyro_gain,
                damping: config.gyro_damping_gain,
            },
            muzzle_velocity: config.muzzle_velocity(),
            forget_target_after_ms: targeting.forget_target_after_ms,
            policy: FireControlPolicy {
                engage_dot: config.engage_dot,
                engage_range: config.engage_range,
                change_target_after_ms: targeting.change_target_after_ms,
            },
            weapon,
            target: None,
            previous: (0.0, 0.0),
            target_distance: 0.0,
            aim_dot: 0.0,
        }
    }

    pub fn mode(&self) -> TurretMode {
        self.mode
    }

    pub fn gains(&self) -> GyroGains {
        self.gains
    }

    pub fn target(&self) -> Option<EntityId> {
        self.target
    }

    pub fn target_distance(&self) -> f64 {
        self.target_distance
    }

    pub fn aim_dot(&self) -> f64 {
        self.aim_dot
    }

    pub fn is_firing(&self) -> bool {
        self.weapon.is_firing()
    }

    pub fn adjust_gain(&mut self, delta: f64) {
        self.gains.gain += delta;
        info!(gyro_gain = self.gains.gain, "TURRET_GAIN_ADJUSTED: ジャイロゲインを変更しました");
    }

    pub fn adjust_damping(&mut self, delta: f64) {
        self.gains.damping += delta;
        info!(
            gyro_damping_gain = self.gains.damping,
            "TURRET_DAMPING_ADJUSTED: ジャイロ減衰ゲインを変更しました"
        );
    }

    /// 運用モードの切り替え
    ///
    /// 手動モードではジャイロのオーバーライドを解除し、射撃を停止します。
    pub fn set_mode(&mut self, mode: TurretMode, sink: &mut dyn IActuatorSink) {
        if mode == TurretMode::Manual {
            for gyro in &self.devices.gyros {
                sink.send(ActuatorCommand::ReleaseGyro { block: *gyro });
            }
            self.weapon.cease_fire(sink);
        }
        if mode != self.mode {
            info!(previous_mode = ?self.mode, current_mode = ?mode, "TURRET_MODE_CHANGED: 運用モードを切り替えました");
        }
        self.mode = mode;
    }

    /// 目標の維持
    ///
    /// 目標がこのティックに観測されていなければ最も近い目標へ切り替え、
    /// 忘却間隔より長く観測されない目標は手放します。
    pub fn check_target(&mut self, tracker: &TargetTracker, platform_position: DVec3) {
        let now = tracker.current_time_ms();
        let fresh = self
            .target
            .and_then(|id| tracker.find(id))
            .is_some_and(|target| target.seen_at(now));
        if !fresh {
            if let Some(closest) = tracker.closest(platform_position) {
                if Some(closest.id) != self.target {
                    debug!(previous_target = ?self.target, new_target = closest.id, "TURRET_TARGET_CHANGED: 目標を切り替えました");
                }
                self.target = Some(closest.id);
            }
        }

        let lost = match self.target.map(|id| tracker.find(id)) {
            Some(Some(target)) => target.age_ms(now) > self.forget_target_after_ms,
            Some(None) => true,
            None => false,
        };
        if lost {
            debug!(target_id = ?self.target, "TURRET_TARGET_LOST: 目標を手放しました");
            self.target = None;
        }
    }

    fn target_record<'a>(&self, tracker: &'a TargetTracker) -> Option<&'a TargetRecord> {
        self.target.and_then(|id| tracker.find(id))
    }

    /// 会合点（目標がなければ待機方向）へ旋回
    pub fn orient(
        &mut self,
        ctx: &SimulationContext<'_>,
        tracker: &TargetTracker,
        hw: &dyn IHardwareInventory,
        sink: &mut dyn IActuatorSink,
    ) -> Result<(), HardwareError> {
        let reference = hw.part(self.devices.reference)?;

        let direction = match self.target_record(tracker) {
            None => hw.part(self.devices.azimuth_rotor)?.frame.backward(),
            Some(target) => {
                let solution = lead_intercept(
                    reference.position,
                    DVec3::ZERO,
                    target.position,
                    target.velocity,
                    target.acceleration_mps2(),
                    self.muzzle_velocity,
                );
                let direction = solution.aim_direction(reference.position);
                self.target_distance = solution
                    .distance_from(reference.position)
                    .unwrap_or_else(|| target.position.distance(reference.position));
                self.aim_dot = direction.dot(reference.frame.forward);
                direction
            }
        };

        let mut gyros: Vec<(BlockId, Frame)> = Vec::with_capacity(self.devices.gyros.len());
        for id in &self.devices.gyros {
            gyros.push((*id, hw.part(*id)?.frame));
        }
        let turn = gyro_turn(ctx.elapsed_ms, direction, self.gains, &reference.frame, &gyros, self.previous, false);
        match &turn.commands {
            Some(commands) => {
                for command in commands {
                    sink.send(ActuatorCommand::GyroOverride {
                        block: command.block,
                        pitch: command.pitch,
                        yaw: command.yaw,
                        roll: command.roll,
                    });
                }
            }
            None => debug!("GYRO_NAN_ABORT: タレットのジャイロ指令にNaNが含まれるため送信を中止しました"),
        }
        self.previous = (turn.yaw, turn.pitch);
        Ok(())
    }

    /// 1ティック分のタレット処理
    ///
    /// 手動モードでは何もせずNoneを返します。
    pub fn run(
        &mut self,
        ctx: &SimulationContext<'_>,
        tracker: &TargetTracker,
        hw: &dyn IHardwareInventory,
        sink: &mut dyn IActuatorSink,
    ) -> Result<Option<FireDecision>, HardwareError> {
        if self.mode == TurretMode::Manual {
            return Ok(None);
        }

        self.check_target(tracker, ctx.platform_position);
        self.orient(ctx, tracker, hw, sink)?;

        let decision = self.policy.decide(
            self.target_record(tracker),
            tracker.current_time_ms(),
            self.aim_dot,
            self.target_distance,
        );
        self.weapon.apply(decision.should_fire, ctx.elapsed_ms, sink);
        Ok(Some(decision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CommandLog, SimWorld};
    use crate::models::fire_control::FireReason;
    use crate::models::hardware::PartKind;
    use crate::models::target::Relationship;
    use crate::models::traits::SensorHit;

    const CAMERA: BlockId = 1;
    const ROTOR: BlockId = 2;
    const GYRO: BlockId = 3;
    const GUN: BlockId = 4;

    fn world() -> SimWorld {
        let mut world = SimWorld::new(1, DVec3::ZERO);
        world.add_assembly(1, 10_000.0, None);
        world.add_part(CAMERA, "Camera - CIWS", PartKind::Camera, 1, DVec3::ZERO);
        world.add_part(ROTOR, "Advanced Rotor - CIWS Azimuth", PartKind::Rotor, 1, DVec3::new(0.0, -1.0, 0.0));
        world.set_frame(ROTOR, Frame::new(DVec3::Y, DVec3::Z));
        world.add_part(GYRO, "Gyro - CIWS", PartKind::Gyro, 1, DVec3::ZERO);
        world.add_part(GUN, "Gatling - CIWS", PartKind::Weapon, 1, DVec3::ZERO);
        world
    }

    fn turret(weapon_type: WeaponType) -> Turret {
        let config = TurretConfig {
            weapon_type,
            ..TurretConfig::default()
        };
        let devices = TurretDevices {
            reference: CAMERA,
            azimuth_rotor: ROTOR,
            gyros: vec![GYRO],
            weapons: vec![GUN],
        };
        Turret::new(&config, &TargetingConfig::default(), devices)
    }

    fn hit(id: EntityId, position: DVec3, t: f64) -> SensorHit {
        SensorHit {
            entity_id: id,
            position,
            velocity: DVec3::ZERO,
            relationship: Relationship::Hostile,
            timestamp_ms: t,
        }
    }

    fn context(targeting: &TargetingConfig, now: f64) -> SimulationContext<'_> {
        SimulationContext {
            timestamp_ms: now,
            elapsed_ms: 16.0,
            platform_position: DVec3::ZERO,
            targeting,
        }
    }

    #[test]
    fn test_locked_target_is_engaged() {
        let world = world();
        let targeting = TargetingConfig::default();
        let mut tracker = TargetTracker::new(targeting.forget_target_after_ms);
        tracker.observe(&[hit(9, DVec3::new(0.0, 0.0, -500.0), 1000.0)], 16.0);
        let mut turret = turret(WeaponType::GatlingGun);
        let mut log = CommandLog::default();

        let decision = turret
            .run(&context(&targeting, 1000.0), &tracker, &world, &mut log)
            .expect("devices present")
            .expect("automatic mode");

        assert_eq!(decision.reason, FireReason::Locked);
        assert_eq!(turret.target(), Some(9));
        assert!((turret.target_distance() - 500.0).abs() < 1e-6);
        assert!((turret.aim_dot() - 1.0).abs() < 1e-9);
        assert!(log.history().contains(&ActuatorCommand::SetFiring { block: GUN, firing: true }));
    }

    #[test]
    fn test_idle_without_target_faces_rotor_backward() {
        let world = world();
        let targeting = TargetingConfig::default();
        let tracker = TargetTracker::new(targeting.forget_target_after_ms);
        let mut turret = turret(WeaponType::RocketLauncher);
        let mut log = CommandLog::default();

        let decision = turret
            .run(&context(&targeting, 0.0), &tracker, &world, &mut log)
            .expect("devices present")
            .expect("automatic mode");

        assert_eq!(decision.reason, FireReason::NoTarget);
        assert!(log
            .history()
            .iter()
            .any(|c| matches!(c, ActuatorCommand::GyroOverride { block: GYRO, .. })));
        assert!(!log.history().iter().any(|c| matches!(c, ActuatorCommand::FireOnce { .. })));
    }

    #[test]
    fn test_check_target_switches_and_forgets() {
        let targeting = TargetingConfig::default();
        let mut tracker = TargetTracker::new(10_000.0);
        let mut turret = turret(WeaponType::GatlingGun);

        tracker.observe(&[hit(1, DVec3::new(0.0, 0.0, -800.0), 1000.0)], 16.0);
        turret.check_target(&tracker, DVec3::ZERO);
        assert_eq!(turret.target(), Some(1));

        // 目標1が見えなくなり目標2だけが観測された
        tracker.observe(&[hit(2, DVec3::new(0.0, 0.0, -900.0), 2000.0)], 16.0);
        turret.check_target(&tracker, DVec3::ZERO);
        assert_eq!(turret.target(), Some(2));

        // 何も観測されないまま忘却間隔を超える
        tracker.observe(&[], targeting.forget_target_after_ms + 1.0);
        turret.check_target(&tracker, DVec3::ZERO);
        assert_eq!(turret.target(), None);
    }

    #[test]
    fn test_manual_mode_releases_gyros_and_ceases_fire() {
        let world = world();
        let targeting = TargetingConfig::default();
        let mut tracker = TargetTracker::new(targeting.forget_target_after_ms);
        tracker.observe(&[hit(9, DVec3::new(0.0, 0.0, -500.0), 1000.0)], 16.0);
        let mut turret = turret(WeaponType::GatlingGun);
        let mut log = CommandLog::default();
        let ctx = context(&targeting, 1000.0);
        turret.run(&ctx, &tracker, &world, &mut log).expect("run");

        turret.set_mode(TurretMode::Manual, &mut log);
        assert!(!turret.is_firing());
        assert!(log.history().contains(&ActuatorCommand::ReleaseGyro { block: GYRO }));
        assert_eq!(turret.run(&ctx, &tracker, &world, &mut log), Ok(None));
    }

    #[test]
    fn test_gain_adjustment() {
        let mut turret = turret(WeaponType::GatlingGun);
        turret.adjust_gain(0.25);
        turret.adjust_damping(-0.05);
        assert!((turret.gains().gain - 60.25).abs() < 1e-9);
        assert!((turret.gains().damping - 0.35).abs() < 1e-9);
    }
}
