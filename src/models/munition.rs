//! # Munition モジュール
//!
//! 1発の誘導弾の部品構成、準備状態の判定、発射から終端までの状態遷移を管理します。
//!
//! ## 状態遷移
//!
//! `Idle → Detaching → Initializing → Launching → Tracking → Defunct`
//!
//! - **Idle**: 結合解除を指令して Detaching へ
//! - **Detaching**: 物理的に分離したら誤って拾った部品を捨て、コネクタを切断
//! - **Initializing**: 自アセンブリの質量が観測できたら電源投入
//! - **Launching**: 発射点から十分離れたら近接センサーを有効化して Tracking へ
//! - **Tracking**: 比例航法で目標へ誘導、弾頭の起爆準備と起爆
//! - **Defunct**: 起爆済みまたは構造的に飛行不能（終端）
//!
//! Launching/Tracking 中に必須部品の破壊、燃料切れ、電池切れを検出した場合は
//! その場で起爆して Defunct へ移ります。

use glam::DVec3;
use tracing::{debug, info, warn};

use crate::models::common::{BlockId, EntityId, Frame, SimulationContext};
use crate::models::guidance::{
    cruise_waypoint, gyro_turn, proportional_navigation, GuidanceFlags, GyroGains, PnInput,
};
use crate::models::hardware::{BayKind, HardwareError, LaunchBay, PartKind, PartRole};
use crate::models::target::TargetType;
use crate::models::tracker::TargetTracker;
use crate::models::traits::{ActuatorCommand, IActuatorSink, IHardwareInventory};
use crate::scenario::MunitionConfig;

/// 誘導弾のライフサイクル状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MunitionState {
    Idle,
    Detaching,
    Initializing,
    Launching,
    Tracking,
    Defunct,
}

impl MunitionState {
    /// 正規の遷移先（Defunctは終端）
    pub fn next(self) -> Option<MunitionState> {
        match self {
            MunitionState::Idle => Some(MunitionState::Detaching),
            MunitionState::Detaching => Some(MunitionState::Initializing),
            MunitionState::Initializing => Some(MunitionState::Launching),
            MunitionState::Launching => Some(MunitionState::Tracking),
            MunitionState::Tracking => Some(MunitionState::Defunct),
            MunitionState::Defunct => None,
        }
    }

    /// 飛行中（構造チェックの対象）
    pub fn is_in_flight(self) -> bool {
        matches!(self, MunitionState::Launching | MunitionState::Tracking)
    }
}

impl std::fmt::Display for MunitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MunitionState::Idle => "Idle",
            MunitionState::Detaching => "Detaching",
            MunitionState::Initializing => "Initializing",
            MunitionState::Launching => "Launching",
            MunitionState::Tracking => "Tracking",
            MunitionState::Defunct => "Defunct",
        };
        f.write_str(name)
    }
}

/// 準備不足の理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortfall {
    /// 分離手段（誘導弾側の結合ブロックまたは切り離し式ベイ）がない
    NoSeparation,
    /// 部品数が構成の要求を満たさない
    MissingParts {
        role: PartRole,
        found: usize,
        required: usize,
    },
    /// センサーが要求されているが見つからない
    MissingSensor,
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shortfall::NoSeparation => write!(f, "分離手段がありません"),
            Shortfall::MissingParts { role, found, required } => {
                write!(f, "{:?} が不足しています ({}/{})", role, found, required)
            }
            Shortfall::MissingSensor => write!(f, "近接センサーがありません"),
        }
    }
}

/// 誘導弾が排他的に所有する部品（ブロックID）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MunitionParts {
    pub remotes: Vec<BlockId>,
    pub gyros: Vec<BlockId>,
    pub thrusters: Vec<BlockId>,
    pub batteries: Vec<BlockId>,
    pub fuel_tanks: Vec<BlockId>,
    pub warheads: Vec<BlockId>,
    pub connectors: Vec<BlockId>,
    pub sensor: Option<BlockId>,
}

impl MunitionParts {
    fn ids_mut(&mut self) -> [&mut Vec<BlockId>; 7] {
        [
            &mut self.remotes,
            &mut self.gyros,
            &mut self.thrusters,
            &mut self.batteries,
            &mut self.fuel_tanks,
            &mut self.warheads,
            &mut self.connectors,
        ]
    }
}

/// 推力・質量から求めた機動性能
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MunitionPhysics {
    /// 最大推力の合計（N）
    pub thrust: f64,
    pub mass: f64,
    /// 利用可能加速度（m/s²）
    pub acceleration: f64,
    /// 巡航時の天体中心からの距離（天体近傍でのみ設定）
    pub cruise_offset: Option<f64>,
}

/// ティック間で引き継ぐ誘導計算の状態
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuidanceMemory {
    pub previous_position: DVec3,
    pub previous_target_position: DVec3,
    pub previous_target_velocity: DVec3,
    pub prev_yaw: f64,
    pub prev_pitch: f64,
    pub remaining_distance: f64,
    pub last_remaining_distance: f64,
    pub linear_velocity: f64,
    /// 到達予想時間（秒）、速度ゼロの間はNone
    pub eta_s: Option<f64>,
    pub cruise_dot: Option<f64>,
    pub direction: DVec3,
    pub lateral_direction: DVec3,
    pub lateral_acceleration: DVec3,
    pub flags: GuidanceFlags,
    /// 最後に送ったスラスター出力
    pub last_thrust_power: Option<f64>,
}

/// 誘導弾
#[derive(Debug, Clone)]
pub struct Munition {
    pub id: u64,
    /// 複製された構成（テンプレートとは独立）
    pub config: MunitionConfig,
    pub parts: MunitionParts,
    /// 誘導弾側の結合ブロック（マージ結合式の場合）
    pub merge_coupling: Option<BlockId>,
    /// 発射ベイ
    pub dock: BlockId,
    dock_is_detach: bool,
    pub state: MunitionState,
    /// 目標（追跡器が所有する記録をIDで参照）
    pub target: Option<EntityId>,
    pub physics: MunitionPhysics,
    pub memory: GuidanceMemory,
    armed: bool,
    /// 直近の診断メッセージ
    pub diagnostic: Option<String>,
}

impl Munition {
    pub fn new(
        id: u64,
        config: MunitionConfig,
        bay: &LaunchBay,
        merge_coupling: Option<BlockId>,
        parts: MunitionParts,
    ) -> Self {
        Self {
            id,
            config,
            parts,
            merge_coupling,
            dock: bay.id,
            dock_is_detach: bay.is_detach(),
            state: MunitionState::Idle,
            target: None,
            physics: MunitionPhysics::default(),
            memory: GuidanceMemory::default(),
            armed: false,
            diagnostic: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// 準備状態の検証
    ///
    /// 構成より多い部品は分離後に捨てるため許容します。
    pub fn check_ready(&self) -> Result<(), Shortfall> {
        if self.merge_coupling.is_none() && !self.dock_is_detach {
            return Err(Shortfall::NoSeparation);
        }

        let config = &self.config;
        let requirements = [
            (PartRole::RemoteControl, self.parts.remotes.len(), 1),
            (PartRole::Gyro, self.parts.gyros.len(), config.gyro_count as usize),
            (PartRole::Warhead, self.parts.warheads.len(), config.warhead_count as usize),
            (PartRole::Thruster, self.parts.thrusters.len(), config.thruster_count as usize),
            (PartRole::Battery, self.parts.batteries.len(), config.battery_count as usize),
            (PartRole::FuelTank, self.parts.fuel_tanks.len(), config.fuel_tank_count as usize),
        ];
        for (role, found, required) in requirements {
            if found < required {
                return Err(Shortfall::MissingParts { role, found, required });
            }
        }

        if config.sensor_count > 0 && self.parts.sensor.is_none() {
            return Err(Shortfall::MissingSensor);
        }

        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.check_ready().is_ok()
    }

    /// 誘導弾の代表位置（リモートコントロールが載るアセンブリの中心）
    pub fn position(&self, hw: &dyn IHardwareInventory) -> Result<DVec3, HardwareError> {
        let remote = hw.part(self.first_remote()?)?;
        hw.assembly_center(remote.assembly)
    }

    fn first_remote(&self) -> Result<BlockId, HardwareError> {
        self.parts
            .remotes
            .first()
            .copied()
            .ok_or_else(|| HardwareError::NotFound(format!("{} のリモートコントロール", self.config.name)))
    }

    /// 発射プラットフォームから物理的に分離したか
    pub fn is_detached(&self, hw: &dyn IHardwareInventory) -> Result<bool, HardwareError> {
        let bay = hw.bay(self.dock)?;
        match self.merge_coupling {
            Some(coupling) => {
                let coupling = hw.part(coupling)?;
                Ok(!hw.same_construct(coupling.assembly, bay.assembly))
            }
            None => match bay.kind {
                BayKind::Detach { attached, .. } => Ok(!attached),
                BayKind::Merge { .. } => Err(HardwareError::Introspection {
                    block: bay.id,
                    reason: "マージ式ベイに誘導弾側の結合ブロックがありません".to_string(),
                }),
            },
        }
    }

    /// 発射点から誘導開始距離以上離れたか
    pub fn is_clear(&self, hw: &dyn IHardwareInventory) -> Result<bool, HardwareError> {
        let reference = match (self.merge_coupling, self.parts.batteries.first()) {
            (Some(coupling), _) => coupling,
            (None, Some(battery)) => *battery,
            (None, None) => self.first_remote()?,
        };
        let reference = hw.part(reference)?;
        let bay = hw.bay(self.dock)?;
        Ok(reference.position.distance(bay.position) > self.config.launch_distance)
    }

    /// 構造的に飛行不能か
    ///
    /// 必須部品（ジャイロ、先頭リモート、スラスター）のいずれかが失われた、
    /// 燃料タンクがすべて空、またはバッテリーがすべて放電済みの場合にtrueです。
    pub fn is_defunct(&self, hw: &dyn IHardwareInventory) -> bool {
        let lost = |id: &BlockId| hw.part(*id).is_err();

        if self.parts.gyros.iter().any(lost)
            || self.parts.remotes.first().is_none_or(lost)
            || self.parts.thrusters.iter().any(lost)
        {
            return true;
        }

        let fuel_exhausted = !self.parts.fuel_tanks.is_empty()
            && self.parts.fuel_tanks.iter().all(|id| match hw.part(*id) {
                Ok(part) => matches!(part.kind, PartKind::FuelTank { filled_ratio } if filled_ratio <= 0.0),
                Err(_) => true,
            });

        let batteries_depleted = !self.parts.batteries.is_empty()
            && self.parts.batteries.iter().all(|id| match hw.part(*id) {
                Ok(part) => matches!(part.kind, PartKind::Battery { has_charge: false }),
                Err(_) => true,
            });

        fuel_exhausted || batteries_depleted
    }

    /// 起爆
    ///
    /// `force_arm` が真なら起爆前に全弾頭を起爆準備状態にします。
    /// 起爆後は常に Defunct になります。
    pub fn detonate(&mut self, force_arm: bool, sink: &mut dyn IActuatorSink) {
        for warhead in &self.parts.warheads {
            if force_arm {
                sink.send(ActuatorCommand::ArmWarhead { block: *warhead });
            }
            sink.send(ActuatorCommand::Detonate { block: *warhead });
        }
        if force_arm {
            self.armed = true;
        }

        info!(
            munition_id = self.id,
            munition_type = %self.config.name,
            force_arm,
            remaining_distance = self.memory.remaining_distance,
            "MUNITION_DETONATED: 誘導弾を起爆しました"
        );
        if self.state != MunitionState::Defunct {
            self.transition(MunitionState::Defunct);
        }
    }

    /// 推力・質量・加速度の再計算
    pub fn recalculate_physics(&mut self, hw: &dyn IHardwareInventory) -> Result<(), HardwareError> {
        let mut thrust = 0.0;
        for id in &self.parts.thrusters {
            if let PartKind::Thruster { max_thrust } = hw.part(*id)?.kind {
                thrust += max_thrust;
            }
        }
        let remote = hw.part(self.first_remote()?)?;
        let mass = hw.assembly_mass(remote.assembly)?;

        self.physics.thrust = thrust;
        self.physics.mass = mass;
        self.physics.acceleration = if mass > 0.0 { thrust / mass } else { 0.0 };
        Ok(())
    }

    /// 誤って拾った別構造体の部品を捨てる（マージ結合式のみ）
    pub fn discard_foreign_parts(&mut self, hw: &dyn IHardwareInventory) -> Result<(), HardwareError> {
        let Some(coupling) = self.merge_coupling else {
            return Ok(());
        };
        let own_assembly = hw.part(coupling)?.assembly;

        let mut discarded = 0;
        for ids in self.parts.ids_mut() {
            let before = ids.len();
            ids.retain(|id| {
                hw.part(*id)
                    .map(|part| hw.same_construct(part.assembly, own_assembly))
                    .unwrap_or(false)
            });
            discarded += before - ids.len();
        }

        if discarded > 0 {
            debug!(
                munition_id = self.id,
                discarded,
                "MUNITION_PARTS_DISCARDED: 別構造体の部品を除外しました"
            );
        }
        Ok(())
    }

    /// 電源投入
    ///
    /// 機動性能を再計算し、ジャイロ有効化、バッテリー放電、燃料備蓄解除、
    /// 発射推力の設定を行います。天体近傍では巡航時の中心距離を記録します。
    pub fn power_on(
        &mut self,
        hw: &dyn IHardwareInventory,
        sink: &mut dyn IActuatorSink,
    ) -> Result<(), HardwareError> {
        self.recalculate_physics(hw)?;

        for gyro in &self.parts.gyros {
            sink.send(ActuatorCommand::SetEnabled { block: *gyro, enabled: true });
        }
        for battery in &self.parts.batteries {
            sink.send(ActuatorCommand::SetBatteryDischarge { block: *battery });
        }
        for tank in &self.parts.fuel_tanks {
            sink.send(ActuatorCommand::SetStockpile { block: *tank, enabled: false });
        }
        for thruster in &self.parts.thrusters {
            sink.send(ActuatorCommand::SetEnabled { block: *thruster, enabled: true });
            sink.send(ActuatorCommand::SetThrustOverride {
                block: *thruster,
                fraction: self.config.launch_thrust,
            });
        }
        self.memory.last_thrust_power = Some(self.config.launch_thrust);

        let remote = hw.part(self.first_remote()?)?;
        self.physics.cruise_offset = hw
            .planet_center(remote.position)
            .map(|center| center.distance(remote.position) + self.config.cruise_altitude);

        info!(
            munition_id = self.id,
            munition_type = %self.config.name,
            thrust = self.physics.thrust,
            mass = self.physics.mass,
            acceleration = self.physics.acceleration,
            cruise_offset = ?self.physics.cruise_offset,
            "MUNITION_POWER_ON: 誘導弾の電源を投入しました"
        );
        Ok(())
    }

    fn transition(&mut self, next: MunitionState) {
        debug_assert!(next > self.state, "state transitions are monotonic");
        info!(
            munition_id = self.id,
            munition_type = %self.config.name,
            previous_state = %self.state,
            current_state = %next,
            "MUNITION_STATE_TRANSITION: 誘導弾の状態が遷移しました"
        );
        self.state = next;
    }

    /// 準備状態を再検証してから次の状態へ進める
    ///
    /// Idle で検証に失敗した場合はその場に留まり、診断メッセージを残します。
    /// 分離指令を送った後（Detaching 以降）は戻れないため、失敗すると Defunct へ移ります。
    fn promote(&mut self, hw: &dyn IHardwareInventory) -> bool {
        let Some(next) = self.state.next() else {
            return false;
        };
        let shortfall = match self.check_ready() {
            Ok(()) => {
                self.diagnostic = None;
                self.transition(next);
                return true;
            }
            Err(shortfall) => shortfall,
        };

        let message = format!("{} を {} に進められません: {}", self.config.name, next, shortfall);
        if self.state > MunitionState::Idle {
            warn!(
                munition_id = self.id,
                current_state = %self.state,
                report = %self.diagnose(hw),
                "MUNITION_ABORTED: 分離後に準備状態を満たせなくなりました: {}", message
            );
            self.diagnostic = Some(message);
            self.transition(MunitionState::Defunct);
        } else if self.diagnostic.as_deref() != Some(message.as_str()) {
            warn!(
                munition_id = self.id,
                current_state = %self.state,
                report = %self.diagnose(hw),
                "MUNITION_HELD: {}", message
            );
            self.diagnostic = Some(message);
        }
        false
    }

    fn hold_on_error(&mut self, error: HardwareError) {
        let message = format!("{}: {}", self.config.name, error);
        if self.diagnostic.as_deref() != Some(message.as_str()) {
            warn!(
                munition_id = self.id,
                current_state = %self.state,
                "MUNITION_HARDWARE_ERROR: {}", message
            );
            self.diagnostic = Some(message);
        }
    }

    /// 1ティック分の状態遷移と誘導
    pub fn advance(
        &mut self,
        ctx: &SimulationContext<'_>,
        tracker: &TargetTracker,
        hw: &dyn IHardwareInventory,
        sink: &mut dyn IActuatorSink,
    ) {
        if let Err(error) = self.step(ctx, tracker, hw, sink) {
            self.hold_on_error(error);
        }

        if self.state.is_in_flight() && self.is_defunct(hw) {
            warn!(
                munition_id = self.id,
                munition_type = %self.config.name,
                current_state = %self.state,
                "MUNITION_INTEGRITY_LOST: 構造的に飛行不能になりました"
            );
            self.detonate(false, sink);
        }
    }

    fn step(
        &mut self,
        ctx: &SimulationContext<'_>,
        tracker: &TargetTracker,
        hw: &dyn IHardwareInventory,
        sink: &mut dyn IActuatorSink,
    ) -> Result<(), HardwareError> {
        match self.state {
            MunitionState::Idle => {
                if !self.is_ready() {
                    self.promote(hw);
                    return Ok(());
                }
                match self.merge_coupling {
                    Some(coupling) => sink.send(ActuatorCommand::SetCouplingEnabled {
                        block: coupling,
                        enabled: false,
                    }),
                    None => sink.send(ActuatorCommand::DetachBay { bay: self.dock }),
                }
                self.promote(hw);
            }
            MunitionState::Detaching => {
                if self.is_detached(hw)? {
                    for connector in &self.parts.connectors {
                        sink.send(ActuatorCommand::DisconnectConnector { block: *connector });
                    }
                    self.discard_foreign_parts(hw)?;
                    self.promote(hw);
                }
            }
            MunitionState::Initializing => {
                let remote = hw.part(self.first_remote()?)?;
                if hw.assembly_mass(remote.assembly)? > 0.0 {
                    if self.is_ready() {
                        self.power_on(hw, sink)?;
                    }
                    self.promote(hw);
                }
            }
            MunitionState::Launching => {
                if self.is_clear(hw)? && self.promote(hw) {
                    if let Some(sensor) = self.parts.sensor {
                        sink.send(ActuatorCommand::SetEnabled { block: sensor, enabled: true });
                    }
                    self.begin_tracking(tracker, hw)?;
                }
            }
            MunitionState::Tracking => {
                self.refresh_target(ctx, tracker);
                let target_position = self
                    .target
                    .and_then(|id| tracker.find(id))
                    .map(|target| target.position);
                if let Some(target_position) = target_position {
                    self.run_guidance(ctx, target_position, hw, sink)?;
                }
            }
            MunitionState::Defunct => {}
        }
        Ok(())
    }

    /// 誘導開始時に前回値を現在値で初期化する
    fn begin_tracking(&mut self, tracker: &TargetTracker, hw: &dyn IHardwareInventory) -> Result<(), HardwareError> {
        let position = self.position(hw)?;
        self.memory.previous_position = position;
        self.memory.previous_target_position = self
            .target
            .and_then(|id| tracker.find(id))
            .map_or(position, |target| target.position);
        Ok(())
    }

    /// 目標が古くなっていれば最も近い目標へ切り替える
    fn refresh_target(&mut self, ctx: &SimulationContext<'_>, tracker: &TargetTracker) {
        let stale = match self.target.and_then(|id| tracker.find(id)) {
            Some(target) => {
                target.target_type == TargetType::Tracked
                    && target.age_ms(ctx.timestamp_ms) > ctx.targeting.change_target_after_ms
            }
            None => true,
        };
        if !stale {
            return;
        }

        if let Some(closest) = tracker.closest(ctx.platform_position) {
            if Some(closest.id) != self.target {
                info!(
                    munition_id = self.id,
                    previous_target = ?self.target,
                    new_target = closest.id,
                    "MUNITION_RETARGET: 最も近い目標へ切り替えました"
                );
                self.target = Some(closest.id);
                self.memory.previous_target_position = closest.position;
            }
        }
    }

    /// 比例航法による誘導と弾頭制御
    pub fn run_guidance(
        &mut self,
        ctx: &SimulationContext<'_>,
        target_position: DVec3,
        hw: &dyn IHardwareInventory,
        sink: &mut dyn IActuatorSink,
    ) -> Result<(), HardwareError> {
        let position = self.position(hw)?;
        let remote = hw.part(self.first_remote()?)?;
        let gravity = hw.gravity_at(remote.position);

        // 天体の反対側にいる目標へは巡航ウェイポイントを経由する
        let mut aim_point = target_position;
        self.memory.cruise_dot = None;
        if let (Some(center), Some(offset)) = (hw.planet_center(remote.position), self.physics.cruise_offset) {
            let plan = cruise_waypoint(position, target_position, center, gravity, self.config.cruise_altitude, offset);
            self.memory.cruise_dot = Some(plan.cruise_dot);
            if let Some(waypoint) = plan.waypoint {
                aim_point = waypoint;
            }
        }

        let thrust_axis = match self.parts.thrusters.first() {
            Some(id) => hw.part(*id)?.frame.backward(),
            None => remote.frame.forward,
        };

        let input = PnInput {
            position,
            previous_position: self.memory.previous_position,
            target_position: aim_point,
            previous_target_position: self.memory.previous_target_position,
            thrust_axis,
            gravity,
            max_acceleration: self.physics.acceleration,
            pn_gain: self.config.pn_gain,
            elapsed_s: ctx.elapsed_s(),
        };
        let Some(solution) = proportional_navigation(&input) else {
            return Ok(());
        };

        if solution.flags != self.memory.flags {
            debug!(
                munition_id = self.id,
                oversteer = solution.flags.oversteer,
                bad_thrust = solution.flags.bad_thrust,
                bad_rejected_accel = solution.flags.bad_rejected_accel,
                "GUIDANCE_FLAGS_CHANGED: 誘導計算の診断フラグが変化しました"
            );
        }

        if self.memory.last_thrust_power != Some(solution.thrust_power) {
            for thruster in &self.parts.thrusters {
                sink.send(ActuatorCommand::SetThrustOverride {
                    block: *thruster,
                    fraction: solution.thrust_power,
                });
            }
            self.memory.last_thrust_power = Some(solution.thrust_power);
        }

        let mut gyros: Vec<(BlockId, Frame)> = Vec::with_capacity(self.parts.gyros.len());
        for id in &self.parts.gyros {
            gyros.push((*id, hw.part(*id)?.frame));
        }
        let turn = gyro_turn(
            ctx.elapsed_ms,
            solution.direction,
            GyroGains {
                gain: self.config.gyro_gain,
                damping: self.config.gyro_damping_gain,
            },
            &remote.frame,
            &gyros,
            (self.memory.prev_yaw, self.memory.prev_pitch),
            self.config.spin,
        );
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
            None => debug!(munition_id = self.id, "GYRO_NAN_ABORT: ジャイロ指令にNaNが含まれるため送信を中止しました"),
        }

        let memory = &mut self.memory;
        memory.previous_target_position = aim_point;
        memory.previous_target_velocity = solution.target_velocity;
        memory.previous_position = position;
        memory.prev_yaw = turn.yaw;
        memory.prev_pitch = turn.pitch;
        memory.last_remaining_distance = memory.remaining_distance;
        memory.remaining_distance = aim_point.distance(position);
        memory.linear_velocity = solution.own_velocity.length();
        memory.eta_s = (memory.linear_velocity > 0.0).then(|| memory.remaining_distance / memory.linear_velocity);
        memory.direction = solution.direction;
        memory.lateral_direction = solution.lateral_direction;
        memory.lateral_acceleration = solution.lateral_acceleration;
        memory.flags = solution.flags;

        self.run_warheads(aim_point, hw, sink)
    }

    /// 起爆準備（一方向）と起爆判定
    ///
    /// 起爆条件を満たした時点で未準備の弾頭は準備してから起爆します。
    fn run_warheads(
        &mut self,
        aim_point: DVec3,
        hw: &dyn IHardwareInventory,
        sink: &mut dyn IActuatorSink,
    ) -> Result<(), HardwareError> {
        let Some(first_warhead) = self.parts.warheads.first().copied() else {
            return Ok(());
        };

        if !self.armed && self.memory.remaining_distance < self.config.arm_distance {
            for warhead in &self.parts.warheads {
                sink.send(ActuatorCommand::ArmWarhead { block: *warhead });
            }
            self.armed = true;
            info!(
                munition_id = self.id,
                remaining_distance = self.memory.remaining_distance,
                "WARHEAD_ARMED: 弾頭の起爆準備が完了しました"
            );
        }

        // 距離による起爆と近接センサーによる起爆は独立に判定する
        let warhead = hw.part(first_warhead)?;
        let within_blast = warhead.position.distance(aim_point) < self.config.detonate_distance;
        let sensor_contact = match self.parts.sensor {
            Some(sensor) => matches!(
                hw.part(sensor)?.kind,
                PartKind::ProximitySensor { last_detected: Some(_) }
            ),
            None => false,
        };

        if within_blast || sensor_contact {
            debug!(
                munition_id = self.id,
                within_blast,
                sensor_contact,
                armed = self.armed,
                "WARHEAD_TRIGGERED: 起爆条件を満たしました"
            );
            self.detonate(!self.armed, sink);
        }
        Ok(())
    }

    /// 各部品の結合ブロックからの距離（調整用の診断）
    pub fn diagnose(&self, hw: &dyn IHardwareInventory) -> String {
        let origin = match self.merge_coupling.map(|id| hw.part(id)) {
            Some(Ok(part)) => part.position,
            _ => match hw.bay(self.dock) {
                Ok(bay) => bay.position,
                Err(error) => return format!("diagnose failed: {}", error),
            },
        };

        let max_distance = |ids: &[BlockId]| {
            ids.iter()
                .filter_map(|id| hw.part(*id).ok())
                .map(|part| part.position.distance(origin))
                .fold(0.0_f64, f64::max)
        };

        let mut report = String::new();
        let rows = [
            ("remote", &self.parts.remotes),
            ("gyro", &self.parts.gyros),
            ("warheads", &self.parts.warheads),
            ("batteries", &self.parts.batteries),
            ("thrusters", &self.parts.thrusters),
            ("fuelTanks", &self.parts.fuel_tanks),
        ];
        for (label, ids) in rows {
            report.push_str(&format!("{} distance: {:.2}\n", label, max_distance(ids)));
        }
        report
    }
}
