//! # Host モジュール
//!
//! 外部協調者（センサー、ハードウェア在庫、アクチュエータ、状態表示）のメモリ上の実装です。
//! シナリオ実行とテストのフィクスチャとして使用します。
//!
//! - `SimWorld`: 部品・発射ベイ・扉・接触を保持し、在庫照会とセンサー観測に答える
//! - `CommandLog`: ティック中に送られたアクチュエータ指令を溜める
//! - `StatusLog`: 状態表示の出力を保持する
//!
//! 指令はティック終了後に `SimWorld::apply` で反映されます。
//! 飛行力学は扱わず、分離したアセンブリをスラスター出力に沿って並進させるだけです。

use std::collections::BTreeMap;

use glam::DVec3;
use tracing::{debug, info};

use crate::models::common::{AssemblyId, BlockId, EntityId, Frame};
use crate::models::hardware::{
    BayKind, DoorStatus, HardwareError, LaunchBay, PartKind, PartRecord, PartRole, MERGE_TOLERANCE,
};
use crate::models::traits::{
    ActuatorCommand, IActuatorSink, IHardwareInventory, ISensorSource, IStatusSink, SensorHit,
};
use crate::scenario::{BaySpec, ContactConfig, DesignatorSpec, DoorSpec, PartSpec, PlanetConfig, ScenarioConfig};

/// 弾頭の爆発で接触が破壊される半径（m）
const BLAST_RADIUS: f64 = 10.0;

/// 近接センサーの検知半径（m）
const PROXIMITY_RANGE: f64 = 15.0;

#[derive(Debug, Clone)]
struct AssemblyState {
    mass_kg: f64,
    attached_to: Option<AssemblyId>,
    velocity: DVec3,
}

#[derive(Debug, Clone)]
struct HostPart {
    record: PartRecord,
    groups: Vec<String>,
    enabled: bool,
    thrust_override: f64,
    gyro_override: Option<(f64, f64, f64)>,
    firing: bool,
    shots: u32,
}

#[derive(Debug, Clone)]
struct HostContact {
    config: ContactConfig,
    destroyed: bool,
}

/// メモリ上のワールド
#[derive(Debug, Clone)]
pub struct SimWorld {
    platform_assembly: AssemblyId,
    platform_position: DVec3,
    time_ms: f64,
    assemblies: BTreeMap<AssemblyId, AssemblyState>,
    parts: BTreeMap<BlockId, HostPart>,
    bays: BTreeMap<BlockId, BaySpec>,
    doors: Vec<DoorSpec>,
    designators: Vec<DesignatorSpec>,
    use_other_designators: bool,
    contacts: Vec<HostContact>,
    planet: Option<PlanetConfig>,
    raycast_target: Option<EntityId>,
}

impl SimWorld {
    pub fn new(platform_assembly: AssemblyId, platform_position: DVec3) -> Self {
        Self {
            platform_assembly,
            platform_position,
            time_ms: 0.0,
            assemblies: BTreeMap::new(),
            parts: BTreeMap::new(),
            bays: BTreeMap::new(),
            doors: Vec::new(),
            designators: Vec::new(),
            use_other_designators: false,
            contacts: Vec::new(),
            planet: None,
            raycast_target: None,
        }
    }

    /// シナリオのハードウェア構成からワールドを構築
    pub fn from_scenario(config: &ScenarioConfig) -> Self {
        let layout = &config.hardware;
        let mut world = Self::new(layout.platform_assembly, config.platform.position);
        world.use_other_designators = config.targeting.use_designators_from_other_assemblies;
        world.planet = layout.planet.clone();
        world.raycast_target = layout.raycast_target;

        for assembly in &layout.assemblies {
            world.add_assembly(assembly.id, assembly.mass_kg, assembly.attached_to);
        }
        for part in &layout.parts {
            world.add_part_spec(part.clone());
        }
        for bay in &layout.bays {
            world.add_bay(bay.clone());
        }
        world.doors = layout.doors.clone();
        world.designators = layout.designators.clone();
        for contact in &config.contacts {
            world.add_contact(contact.clone());
        }
        world
    }

    pub fn time_ms(&self) -> f64 {
        self.time_ms
    }

    pub fn add_assembly(&mut self, id: AssemblyId, mass_kg: f64, attached_to: Option<AssemblyId>) {
        self.assemblies.insert(
            id,
            AssemblyState {
                mass_kg,
                attached_to,
                velocity: DVec3::ZERO,
            },
        );
    }

    pub fn add_part(&mut self, id: BlockId, name: &str, kind: PartKind, assembly: AssemblyId, position: DVec3) {
        self.add_part_spec(PartSpec {
            id,
            name: name.to_string(),
            kind,
            assembly,
            position,
            frame: Frame::default(),
            groups: Vec::new(),
        });
    }

    pub fn add_part_spec(&mut self, spec: PartSpec) {
        let record = PartRecord {
            id: spec.id,
            name: spec.name,
            kind: spec.kind,
            assembly: spec.assembly,
            position: spec.position,
            frame: spec.frame,
        };
        self.parts.insert(
            spec.id,
            HostPart {
                record,
                groups: spec.groups,
                enabled: true,
                thrust_override: 0.0,
                gyro_override: None,
                firing: false,
                shots: 0,
            },
        );
    }

    pub fn set_frame(&mut self, id: BlockId, frame: Frame) {
        if let Some(part) = self.parts.get_mut(&id) {
            part.record.frame = frame;
        }
    }

    pub fn add_to_group(&mut self, id: BlockId, group: &str) {
        if let Some(part) = self.parts.get_mut(&id) {
            part.groups.push(group.to_string());
        }
    }

    pub fn add_bay(&mut self, spec: BaySpec) {
        self.bays.insert(spec.id, spec);
    }

    pub fn add_door(&mut self, group: &str, status: DoorStatus) {
        self.doors.push(DoorSpec {
            group: group.to_string(),
            status,
        });
    }

    pub fn set_door_status(&mut self, group: &str, status: DoorStatus) {
        for door in self.doors.iter_mut().filter(|d| d.group == group) {
            door.status = status;
        }
    }

    pub fn add_designator(&mut self, name: &str, assembly: AssemblyId) {
        self.designators.push(DesignatorSpec {
            name: name.to_string(),
            assembly,
        });
    }

    pub fn set_use_other_designators(&mut self, enabled: bool) {
        self.use_other_designators = enabled;
    }

    pub fn add_contact(&mut self, config: ContactConfig) {
        self.contacts.push(HostContact {
            config,
            destroyed: false,
        });
    }

    pub fn set_planet(&mut self, planet: PlanetConfig) {
        self.planet = Some(planet);
    }

    pub fn set_raycast_target(&mut self, target: Option<EntityId>) {
        self.raycast_target = target;
    }

    /// 部品を破壊（以降の照会はNotFound）
    pub fn destroy_part(&mut self, id: BlockId) {
        self.parts.remove(&id);
    }

    pub fn set_kind(&mut self, id: BlockId, kind: PartKind) {
        if let Some(part) = self.parts.get_mut(&id) {
            part.record.kind = kind;
        }
    }

    /// アセンブリ上の全部品を平行移動
    pub fn move_assembly(&mut self, assembly: AssemblyId, delta: DVec3) {
        for part in self.parts.values_mut().filter(|p| p.record.assembly == assembly) {
            part.record.position += delta;
        }
    }

    pub fn thrust_override(&self, id: BlockId) -> Option<f64> {
        self.parts.get(&id).map(|p| p.thrust_override)
    }

    pub fn gyro_override(&self, id: BlockId) -> Option<(f64, f64, f64)> {
        self.parts.get(&id).and_then(|p| p.gyro_override)
    }

    pub fn is_enabled(&self, id: BlockId) -> Option<bool> {
        self.parts.get(&id).map(|p| p.enabled)
    }

    pub fn is_firing(&self, id: BlockId) -> Option<bool> {
        self.parts.get(&id).map(|p| p.firing)
    }

    pub fn shots_fired(&self, id: BlockId) -> u32 {
        self.parts.get(&id).map_or(0, |p| p.shots)
    }

    /// 破壊されていない接触の数
    pub fn surviving_contacts(&self) -> usize {
        self.contacts.iter().filter(|c| !c.destroyed).count()
    }

    /// 結合をたどった最上位のアセンブリ
    fn root(&self, assembly: AssemblyId) -> AssemblyId {
        let mut current = assembly;
        for _ in 0..=self.assemblies.len() {
            match self.assemblies.get(&current).and_then(|a| a.attached_to) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    fn contact_position(&self, contact: &HostContact) -> Option<DVec3> {
        if contact.destroyed {
            return None;
        }
        let config = &contact.config;
        let appear_ms = config.appear_at_s * 1000.0;
        let visible = self.time_ms >= appear_ms
            && config.disappear_at_s.is_none_or(|s| self.time_ms < s * 1000.0);
        visible.then(|| config.position + config.velocity * ((self.time_ms - appear_ms) / 1000.0))
    }

    fn bay_snapshot(&self, spec: &BaySpec) -> LaunchBay {
        let kind = match &spec.kind {
            BayKind::Merge { .. } => BayKind::Merge {
                connected: self.parts.values().any(|p| {
                    matches!(p.record.kind, PartKind::MergeCoupling { enabled: true })
                        && p.record.assembly != spec.assembly
                        && self.same_construct(p.record.assembly, spec.assembly)
                        && p.record.position.distance(spec.position) < MERGE_TOLERANCE
                }),
            },
            detach => detach.clone(),
        };
        LaunchBay {
            id: spec.id,
            name: spec.name.clone(),
            assembly: spec.assembly,
            position: spec.position,
            kind,
        }
    }

    fn separate(&mut self, assembly: AssemblyId) {
        if let Some(state) = self.assemblies.get_mut(&assembly) {
            if state.attached_to.take().is_some() {
                debug!(assembly, "HOST_SEPARATED: アセンブリが分離しました");
            }
        }
    }

    fn explode(&mut self, warhead: BlockId) {
        let Some(part) = self.parts.get(&warhead) else {
            return;
        };
        let assembly = part.record.assembly;
        let position = part.record.position;

        self.parts.retain(|_, p| p.record.assembly != assembly);

        let time_ms = self.time_ms;
        let mut destroyed = Vec::new();
        for index in 0..self.contacts.len() {
            let hit = self
                .contact_position(&self.contacts[index])
                .is_some_and(|p| p.distance(position) < BLAST_RADIUS);
            if hit {
                self.contacts[index].destroyed = true;
                destroyed.push(self.contacts[index].config.id);
            }
        }

        info!(
            warhead,
            assembly,
            time_ms,
            destroyed_contacts = ?destroyed,
            "HOST_EXPLOSION: 弾頭が爆発しました"
        );
    }

    /// アクチュエータ指令の反映
    pub fn apply(&mut self, command: ActuatorCommand) {
        match command {
            ActuatorCommand::SetCouplingEnabled { block, enabled } => {
                let Some(part) = self.parts.get_mut(&block) else {
                    return;
                };
                if let PartKind::MergeCoupling { enabled: state } = &mut part.record.kind {
                    *state = enabled;
                }
                let assembly = part.record.assembly;
                if !enabled {
                    self.separate(assembly);
                }
            }
            ActuatorCommand::DetachBay { bay } => {
                let mut released = None;
                if let Some(spec) = self.bays.get_mut(&bay) {
                    if let BayKind::Detach { attached, top_assembly } = &mut spec.kind {
                        *attached = false;
                        released = *top_assembly;
                    }
                }
                if let Some(top) = released {
                    self.separate(top);
                }
            }
            ActuatorCommand::DisconnectConnector { block } => {
                if let Some(part) = self.parts.get_mut(&block) {
                    if let PartKind::Connector { connected } = &mut part.record.kind {
                        *connected = false;
                    }
                }
            }
            ActuatorCommand::SetEnabled { block, enabled } => {
                if let Some(part) = self.parts.get_mut(&block) {
                    part.enabled = enabled;
                }
            }
            ActuatorCommand::SetBatteryDischarge { .. } | ActuatorCommand::SetStockpile { .. } => {}
            ActuatorCommand::SetThrustOverride { block, fraction } => {
                if let Some(part) = self.parts.get_mut(&block) {
                    part.thrust_override = fraction;
                }
            }
            ActuatorCommand::GyroOverride { block, pitch, yaw, roll } => {
                if let Some(part) = self.parts.get_mut(&block) {
                    part.gyro_override = Some((pitch, yaw, roll));
                }
            }
            ActuatorCommand::ReleaseGyro { block } => {
                if let Some(part) = self.parts.get_mut(&block) {
                    part.gyro_override = None;
                }
            }
            ActuatorCommand::ArmWarhead { block } => {
                if let Some(part) = self.parts.get_mut(&block) {
                    if let PartKind::Warhead { armed } = &mut part.record.kind {
                        *armed = true;
                    }
                }
            }
            ActuatorCommand::Detonate { block } => {
                let armed = self
                    .parts
                    .get(&block)
                    .is_some_and(|p| matches!(p.record.kind, PartKind::Warhead { armed: true }));
                if armed {
                    self.explode(block);
                }
            }
            ActuatorCommand::SetFiring { block, firing } => {
                if let Some(part) = self.parts.get_mut(&block) {
                    part.firing = firing;
                }
            }
            ActuatorCommand::FireOnce { block } => {
                if let Some(part) = self.parts.get_mut(&block) {
                    part.shots += 1;
                }
            }
        }
    }

    /// 時刻を進め、分離済みアセンブリを推力に沿って並進させる
    pub fn advance(&mut self, elapsed_ms: f64) {
        self.time_ms += elapsed_ms.max(0.0);
        let dt_s = elapsed_ms.max(0.0) / 1000.0;

        let mut displacements = Vec::new();
        for (id, state) in &self.assemblies {
            if *id == self.platform_assembly || state.attached_to.is_some() || state.mass_kg <= 0.0 {
                continue;
            }
            let thrust: DVec3 = self
                .parts
                .values()
                .filter(|p| p.record.assembly == *id && p.enabled)
                .filter_map(|p| match p.record.kind {
                    PartKind::Thruster { max_thrust } => {
                        Some(p.record.frame.backward() * max_thrust * p.thrust_override)
                    }
                    _ => None,
                })
                .sum();
            let velocity = state.velocity + thrust / state.mass_kg * dt_s;
            displacements.push((*id, velocity));
        }

        for (id, velocity) in displacements {
            if let Some(state) = self.assemblies.get_mut(&id) {
                state.velocity = velocity;
            }
            self.move_assembly(id, velocity * dt_s);
        }

        // 近接センサー
        let positions: Vec<(EntityId, DVec3)> = self
            .contacts
            .iter()
            .filter_map(|c| self.contact_position(c).map(|p| (c.config.id, p)))
            .collect();
        for part in self.parts.values_mut() {
            let enabled = part.enabled;
            let sensor_position = part.record.position;
            if let PartKind::ProximitySensor { last_detected } = &mut part.record.kind {
                *last_detected = if enabled {
                    positions
                        .iter()
                        .find(|(_, p)| p.distance(sensor_position) < PROXIMITY_RANGE)
                        .map(|(id, _)| *id)
                } else {
                    None
                };
            }
        }
    }
}

impl IHardwareInventory for SimWorld {
    fn tagged_parts(&self, tag: &str) -> Vec<PartRecord> {
        self.parts
            .values()
            .filter(|p| p.record.has_tag(tag))
            .map(|p| p.record.clone())
            .collect()
    }

    fn named_parts(&self, name: &str) -> Vec<PartRecord> {
        self.parts
            .values()
            .filter(|p| p.record.name == name)
            .map(|p| p.record.clone())
            .collect()
    }

    fn group_parts(&self, group: &str) -> Vec<PartRecord> {
        self.parts
            .values()
            .filter(|p| p.groups.iter().any(|g| g == group))
            .map(|p| p.record.clone())
            .collect()
    }

    fn parts_on_assembly(&self, assembly: AssemblyId, role: PartRole) -> Vec<PartRecord> {
        self.parts
            .values()
            .filter(|p| p.record.assembly == assembly && p.record.role() == role)
            .map(|p| p.record.clone())
            .collect()
    }

    fn part(&self, id: BlockId) -> Result<PartRecord, HardwareError> {
        self.parts
            .get(&id)
            .map(|p| p.record.clone())
            .ok_or_else(|| HardwareError::NotFound(format!("block {}", id)))
    }

    fn launch_bays(&self, tag: &str) -> Vec<LaunchBay> {
        let mut bays: Vec<LaunchBay> = self
            .bays
            .values()
            .filter(|b| b.name.contains(tag))
            .map(|b| self.bay_snapshot(b))
            .collect();
        bays.sort_by(|a, b| a.name.cmp(&b.name));
        bays
    }

    fn bay(&self, id: BlockId) -> Result<LaunchBay, HardwareError> {
        self.bays
            .get(&id)
            .map(|b| self.bay_snapshot(b))
            .ok_or_else(|| HardwareError::NotFound(format!("bay {}", id)))
    }

    fn door_group(&self, group: &str) -> Vec<DoorStatus> {
        self.doors.iter().filter(|d| d.group == group).map(|d| d.status).collect()
    }

    fn same_construct(&self, a: AssemblyId, b: AssemblyId) -> bool {
        self.root(a) == self.root(b)
    }

    fn assembly_center(&self, assembly: AssemblyId) -> Result<DVec3, HardwareError> {
        let (sum, count) = self
            .parts
            .values()
            .filter(|p| p.record.assembly == assembly)
            .fold((DVec3::ZERO, 0usize), |(sum, count), p| (sum + p.record.position, count + 1));
        if count == 0 {
            return Err(HardwareError::NotFound(format!("assembly {}", assembly)));
        }
        Ok(sum / count as f64)
    }

    fn assembly_mass(&self, assembly: AssemblyId) -> Result<f64, HardwareError> {
        let state = self
            .assemblies
            .get(&assembly)
            .ok_or_else(|| HardwareError::NotFound(format!("assembly {}", assembly)))?;
        Ok(if state.attached_to.is_some() { 0.0 } else { state.mass_kg })
    }

    fn gravity_at(&self, position: DVec3) -> DVec3 {
        match &self.planet {
            Some(planet) if planet.center.distance(position) < planet.gravity_radius_m => {
                (planet.center - position).normalize_or_zero() * planet.surface_gravity
            }
            _ => DVec3::ZERO,
        }
    }

    fn planet_center(&self, position: DVec3) -> Option<DVec3> {
        self.planet
            .as_ref()
            .filter(|planet| planet.center.distance(position) < planet.gravity_radius_m)
            .map(|planet| planet.center)
    }
}

impl ISensorSource for SimWorld {
    fn poll(&self) -> Vec<SensorHit> {
        if self.sensor_count() == 0 {
            return Vec::new();
        }
        self.contacts
            .iter()
            .filter_map(|contact| {
                self.contact_position(contact).map(|position| SensorHit {
                    entity_id: contact.config.id,
                    position,
                    velocity: contact.config.velocity,
                    relationship: contact.config.relationship,
                    timestamp_ms: self.time_ms,
                })
            })
            .collect()
    }

    fn raycast(&self, max_range: f64) -> Option<EntityId> {
        let target = self.raycast_target?;
        self.contacts
            .iter()
            .filter(|c| c.config.id == target)
            .filter_map(|c| self.contact_position(c))
            .any(|p| p.distance(self.platform_position) <= max_range)
            .then_some(target)
    }

    fn sensor_count(&self) -> usize {
        self.designators
            .iter()
            .filter(|d| self.use_other_designators || d.assembly == self.platform_assembly)
            .count()
    }
}

/// 送信されたアクチュエータ指令の記録
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    pending: Vec<ActuatorCommand>,
    history: Vec<ActuatorCommand>,
}

impl CommandLog {
    /// 未反映の指令を取り出す
    pub fn drain(&mut self) -> Vec<ActuatorCommand> {
        std::mem::take(&mut self.pending)
    }

    /// これまでに送信された全指令
    pub fn history(&self) -> &[ActuatorCommand] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

impl IActuatorSink for CommandLog {
    fn send(&mut self, command: ActuatorCommand) {
        self.pending.push(command);
        self.history.push(command);
    }
}

/// 状態表示の出力記録
#[derive(Debug, Clone, Default)]
pub struct StatusLog {
    published: Vec<String>,
}

impl StatusLog {
    pub fn last(&self) -> Option<&str> {
        self.published.last().map(String::as_str)
    }

    pub fn count(&self) -> usize {
        self.published.len()
    }
}

impl IStatusSink for StatusLog {
    fn publish(&mut self, text: &str) {
        self.published.push(text.to_string());
    }
}

/// ホスト一式
#[derive(Debug, Clone)]
pub struct SimHost {
    pub world: SimWorld,
    pub commands: CommandLog,
    pub status: StatusLog,
}

impl SimHost {
    pub fn new(world: SimWorld) -> Self {
        Self {
            world,
            commands: CommandLog::default(),
            status: StatusLog::default(),
        }
    }

    pub fn from_scenario(config: &ScenarioConfig) -> Self {
        Self::new(SimWorld::from_scenario(config))
    }

    /// ティック中に送られた指令をワールドへ反映
    pub fn apply_commands(&mut self) {
        for command in self.commands.drain() {
            self.world.apply(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::target::Relationship;

    fn contact(id: EntityId, position: DVec3, velocity: DVec3) -> ContactConfig {
        ContactConfig {
            id,
            relationship: Relationship::Hostile,
            position,
            velocity,
            appear_at_s: 0.0,
            disappear_at_s: None,
        }
    }

    #[test]
    fn test_merge_bay_connection_follows_coupling() {
        let mut world = SimWorld::new(1, DVec3::ZERO);
        world.add_assembly(1, 1000.0, None);
        world.add_assembly(2, 100.0, Some(1));
        world.add_bay(BaySpec {
            id: 50,
            name: "Merge [Launch Bay]".to_string(),
            assembly: 1,
            position: DVec3::ZERO,
            kind: BayKind::Merge { connected: false },
        });
        world.add_part(10, "Merge [A]", PartKind::MergeCoupling { enabled: true }, 2, DVec3::new(0.0, 0.0, -1.0));

        assert_eq!(world.bay(50).map(|b| b.kind), Ok(BayKind::Merge { connected: true }));
        assert!(world.same_construct(1, 2));
        assert_eq!(world.assembly_mass(2), Ok(0.0));

        world.apply(ActuatorCommand::SetCouplingEnabled { block: 10, enabled: false });
        assert_eq!(world.bay(50).map(|b| b.kind), Ok(BayKind::Merge { connected: false }));
        assert!(!world.same_construct(1, 2));
        assert_eq!(world.assembly_mass(2), Ok(100.0));
    }

    #[test]
    fn test_detach_bay_releases_top_assembly() {
        let mut world = SimWorld::new(1, DVec3::ZERO);
        world.add_assembly(1, 1000.0, None);
        world.add_assembly(3, 80.0, Some(1));
        world.add_bay(BaySpec {
            id: 60,
            name: "Rotor [Launch Bay]".to_string(),
            assembly: 1,
            position: DVec3::ZERO,
            kind: BayKind::Detach {
                attached: true,
                top_assembly: Some(3),
            },
        });

        world.apply(ActuatorCommand::DetachBay { bay: 60 });
        assert!(matches!(world.bay(60).map(|b| b.kind), Ok(BayKind::Detach { attached: false, .. })));
        assert_eq!(world.assembly_mass(3), Ok(80.0));
    }

    #[test]
    fn test_only_armed_warheads_explode() {
        let mut world = SimWorld::new(1, DVec3::ZERO);
        world.add_assembly(2, 100.0, None);
        world.add_part(20, "Warhead [A]", PartKind::Warhead { armed: false }, 2, DVec3::new(0.0, 0.0, -100.0));
        world.add_part(21, "Gyro [A]", PartKind::Gyro, 2, DVec3::new(0.0, 0.0, -101.0));
        world.add_contact(contact(7, DVec3::new(0.0, 0.0, -105.0), DVec3::ZERO));

        world.apply(ActuatorCommand::Detonate { block: 20 });
        assert!(world.part(20).is_ok());

        world.apply(ActuatorCommand::ArmWarhead { block: 20 });
        world.apply(ActuatorCommand::Detonate { block: 20 });
        assert!(world.part(20).is_err());
        assert!(world.part(21).is_err());
        assert_eq!(world.surviving_contacts(), 0);
    }

    #[test]
    fn test_poll_requires_designator_on_platform() {
        let mut world = SimWorld::new(1, DVec3::ZERO);
        world.add_contact(contact(7, DVec3::new(0.0, 0.0, -500.0), DVec3::new(10.0, 0.0, 0.0)));
        assert!(world.poll().is_empty());

        world.add_designator("Turret B", 9);
        assert!(world.poll().is_empty());
        world.set_use_other_designators(true);
        assert_eq!(world.sensor_count(), 1);

        world.advance(1000.0);
        let hits = world.poll();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, DVec3::new(10.0, 0.0, -500.0));
        assert_eq!(hits[0].timestamp_ms, 1000.0);
    }

    #[test]
    fn test_thrusting_assembly_translates() {
        let mut world = SimWorld::new(1, DVec3::ZERO);
        world.add_assembly(2, 100.0, None);
        world.add_part(30, "Thruster [A]", PartKind::Thruster { max_thrust: 1000.0 }, 2, DVec3::ZERO);
        world.set_frame(30, Frame::new(DVec3::Z, DVec3::Y));
        world.apply(ActuatorCommand::SetThrustOverride { block: 30, fraction: 1.0 });

        world.advance(1000.0);
        let position = world.part(30).map(|p| p.position).expect("part");
        // 推力方向はスラスターの後方（-Z）
        assert!((position.z - -10.0).abs() < 1e-9);
    }

    #[test]
    fn test_raycast_respects_range() {
        let mut world = SimWorld::new(1, DVec3::ZERO);
        world.add_contact(contact(7, DVec3::new(0.0, 0.0, -4000.0), DVec3::ZERO));
        world.set_raycast_target(Some(7));
        assert_eq!(world.raycast(5000.0), Some(7));
        assert_eq!(world.raycast(1000.0), None);
    }
}
