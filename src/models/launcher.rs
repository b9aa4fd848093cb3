//! # Launcher モジュール
//!
//! 発射ベイ上の物理的な誘導弾と論理的な誘導弾構成を対応付け（割り当て）、
//! 発射待ちキューから発射間隔を守って1発ずつ送り出します。
//!
//! ## 割り当ての走査順
//!
//! 1. 切り離し式ベイ（名前順）: 取り付け済みの先端アセンブリ上のタグ付き部品を収集
//! 2. マージ結合式ベイ（名前順）: 接続中のベイから許容距離内の誘導弾側結合ブロックを探し、
//!    その周囲のタグ付き部品を収集
//!
//! 部品不足などの候補は `SkipReason` として読み飛ばし、
//! ハードウェア照会の失敗はベイごとに診断メッセージへ記録して走査を続けます。

use std::collections::{HashSet, VecDeque};

use glam::DVec3;
use tracing::{debug, info, warn};

use crate::models::common::{AssemblyId, BlockId};
use crate::models::hardware::{
    parts_with_role, BayKind, DoorStatus, HardwareError, LaunchBay, PartRecord, PartRole, MERGE_TOLERANCE,
};
use crate::models::munition::{Munition, MunitionParts, Shortfall};
use crate::models::traits::IHardwareInventory;
use crate::scenario::MunitionConfig;

/// 候補を読み飛ばした理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// 切り離し式ベイに何も取り付いていない
    NotAttached,
    /// マージ結合式ベイが接続されていない
    NotConnected,
    /// 許容距離内に指定種別の結合ブロックがない（別種別の誘導弾）
    NoCoupling,
    /// 発射待ちまたは飛行中の誘導弾が使用中
    AlreadyClaimed,
    /// 部品が揃っていない
    Incomplete(Shortfall),
}

/// 1候補の評価結果
#[derive(Debug, Clone)]
pub enum CandidateOutcome {
    Ready(Munition),
    Skip(SkipReason),
}

/// 割り当て結果
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    pub munition: Option<Munition>,
    /// 状態表示向けの診断メッセージ
    pub diagnostics: Vec<String>,
    /// 読み飛ばした候補（ベイID, 理由）
    pub skipped: Vec<(BlockId, SkipReason)>,
}

/// 誘導弾が使用中のブロック（結合ブロック、なければ発射ベイ）
pub fn claim_key(munition: &Munition) -> BlockId {
    munition.merge_coupling.unwrap_or(munition.dock)
}

/// 発射シーケンサー
#[derive(Debug, Clone)]
pub struct LaunchSequencer {
    pending: VecDeque<Munition>,
    time_since_last_launch_ms: f64,
    launch_delay_ms: f64,
    next_id: u64,
}

impl LaunchSequencer {
    pub fn new(launch_delay_ms: f64) -> Self {
        Self {
            pending: VecDeque::new(),
            time_since_last_launch_ms: 0.0,
            launch_delay_ms,
            next_id: 1,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Munition> + '_ {
        self.pending.iter()
    }

    /// 発射待ちの誘導弾が使用中のブロック
    pub fn claimed_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.pending.iter().map(claim_key)
    }

    /// 指定構成の誘導弾を発射ベイから探して割り当てる
    ///
    /// # 引数
    ///
    /// * `config` - 要求する誘導弾構成（割り当て時に複製されます）
    /// * `hw` - ハードウェア在庫
    /// * `bay_tag` - 発射ベイの表示名タグ
    /// * `in_flight` - 飛行中の誘導弾が使用中のブロック
    ///
    /// # 戻り値
    ///
    /// 割り当てた誘導弾（見つからなければNone）と診断メッセージ
    pub fn allocate(
        &mut self,
        config: &MunitionConfig,
        hw: &dyn IHardwareInventory,
        bay_tag: &str,
        in_flight: &HashSet<BlockId>,
    ) -> Allocation {
        let mut claimed: HashSet<BlockId> = self.claimed_ids().collect();
        claimed.extend(in_flight.iter().copied());

        let tagged = hw.tagged_parts(&config.tag());
        let (detach_bays, merge_bays): (Vec<LaunchBay>, Vec<LaunchBay>) =
            hw.launch_bays(bay_tag).into_iter().partition(LaunchBay::is_detach);

        let mut allocation = Allocation::default();
        for bay in detach_bays.iter().chain(merge_bays.iter()) {
            match self.evaluate(config, bay, &tagged, hw, &claimed) {
                Ok(CandidateOutcome::Ready(munition)) => {
                    self.next_id += 1;
                    info!(
                        munition_id = munition.id,
                        munition_type = %config.name,
                        bay = %bay.name,
                        "MUNITION_ALLOCATED: 発射ベイから誘導弾を割り当てました"
                    );
                    allocation
                        .diagnostics
                        .push(format!("Munition allocated from bay {}", bay.name));
                    allocation.munition = Some(munition);
                    return allocation;
                }
                Ok(CandidateOutcome::Skip(reason)) => {
                    debug!(
                        bay = %bay.name,
                        munition_type = %config.name,
                        reason = ?reason,
                        "ALLOCATION_CANDIDATE_SKIPPED: 候補を読み飛ばしました"
                    );
                    allocation.skipped.push((bay.id, reason));
                }
                Err(error) => {
                    let message = format!("Error with munition on launch bay {}: {}", bay.name, error);
                    warn!(bay = %bay.name, "ALLOCATION_ERROR: {}", message);
                    allocation.diagnostics.push(message);
                }
            }
        }

        warn!(
            munition_type = %config.name,
            candidates = detach_bays.len() + merge_bays.len(),
            "ALLOCATION_FAILED: 割り当て可能な誘導弾がありません"
        );
        allocation.diagnostics.push("No munitions available!".to_string());
        allocation
    }

    fn evaluate(
        &self,
        config: &MunitionConfig,
        bay: &LaunchBay,
        tagged: &[PartRecord],
        hw: &dyn IHardwareInventory,
        claimed: &HashSet<BlockId>,
    ) -> Result<CandidateOutcome, HardwareError> {
        match bay.kind {
            BayKind::Detach { attached, top_assembly } => {
                if !attached {
                    return Ok(CandidateOutcome::Skip(SkipReason::NotAttached));
                }
                if claimed.contains(&bay.id) {
                    return Ok(CandidateOutcome::Skip(SkipReason::AlreadyClaimed));
                }
                let top = top_assembly.ok_or_else(|| HardwareError::Introspection {
                    block: bay.id,
                    reason: "取り付け先のアセンブリを読み取れません".to_string(),
                })?;
                let on_top: Vec<PartRecord> = on_assembly(tagged, top);
                let parts = collect_parts(config, &on_top, bay.position);
                Ok(self.candidate(config, bay, None, parts))
            }
            BayKind::Merge { connected } => {
                if !connected {
                    return Ok(CandidateOutcome::Skip(SkipReason::NotConnected));
                }
                let coupling = parts_with_role(tagged, PartRole::MergeCoupling, MERGE_TOLERANCE, bay.position)
                    .find(|p| p.assembly != bay.assembly && hw.same_construct(p.assembly, bay.assembly));
                let Some(coupling) = coupling else {
                    return Ok(CandidateOutcome::Skip(SkipReason::NoCoupling));
                };
                if claimed.contains(&coupling.id) {
                    return Ok(CandidateOutcome::Skip(SkipReason::AlreadyClaimed));
                }
                let parts = collect_parts(config, tagged, coupling.position);
                Ok(self.candidate(config, bay, Some(coupling.id), parts))
            }
        }
    }

    fn candidate(
        &self,
        config: &MunitionConfig,
        bay: &LaunchBay,
        merge_coupling: Option<BlockId>,
        parts: MunitionParts,
    ) -> CandidateOutcome {
        let munition = Munition::new(self.next_id, config.clone(), bay, merge_coupling, parts);
        match munition.check_ready() {
            Ok(()) => CandidateOutcome::Ready(munition),
            Err(shortfall) => CandidateOutcome::Skip(SkipReason::Incomplete(shortfall)),
        }
    }

    /// 発射待ちキューへ追加
    pub fn enqueue(&mut self, munition: Munition) {
        info!(
            munition_id = munition.id,
            munition_type = %munition.config.name,
            target_id = ?munition.target,
            pending = self.pending.len() + 1,
            "MUNITION_QUEUED: 発射待ちキューに追加しました"
        );
        self.pending.push_back(munition);
    }

    /// 発射間隔の経過を待って発射待ちの先頭を送り出す
    ///
    /// 経過時間は常に積算します。扉グループに開ききっていない扉があれば送り出しません。
    pub fn tick(&mut self, elapsed_ms: f64, hw: &dyn IHardwareInventory, door_group: &str) -> Option<Munition> {
        self.time_since_last_launch_ms += elapsed_ms.max(0.0);

        if self.pending.is_empty() {
            return None;
        }
        if hw.door_group(door_group).iter().any(|status| *status != DoorStatus::Open) {
            return None;
        }
        if self.time_since_last_launch_ms <= self.launch_delay_ms {
            return None;
        }

        self.time_since_last_launch_ms = 0.0;
        let munition = self.pending.pop_front()?;
        info!(
            munition_id = munition.id,
            munition_type = %munition.config.name,
            target_id = ?munition.target,
            remaining_pending = self.pending.len(),
            "MUNITION_LAUNCHED: 発射待ちから飛行中へ移しました"
        );
        Some(munition)
    }

    pub fn clear_pending(&mut self) {
        if !self.pending.is_empty() {
            info!(cleared = self.pending.len(), "PENDING_CLEARED: 発射待ちキューを破棄しました");
        }
        self.pending.clear();
    }
}

fn on_assembly(parts: &[PartRecord], assembly: AssemblyId) -> Vec<PartRecord> {
    parts.iter().filter(|p| p.assembly == assembly).cloned().collect()
}

/// 基準点からの探索半径で役割ごとに部品を収集
fn collect_parts(config: &MunitionConfig, parts: &[PartRecord], origin: DVec3) -> MunitionParts {
    let ids = |role: PartRole, radius: f64| -> Vec<BlockId> {
        parts_with_role(parts, role, radius, origin).map(|p| p.id).collect()
    };
    let component = config.max_component_distance;

    MunitionParts {
        remotes: ids(PartRole::RemoteControl, config.remote_distance),
        gyros: ids(PartRole::Gyro, config.effective_gyro_distance()),
        thrusters: ids(PartRole::Thruster, component),
        batteries: ids(PartRole::Battery, component),
        fuel_tanks: ids(PartRole::FuelTank, component),
        warheads: ids(PartRole::Warhead, component),
        connectors: ids(PartRole::Connector, component),
        sensor: parts_with_role(parts, PartRole::ProximitySensor, component, origin)
            .next()
            .map(|p| p.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SimWorld;
    use crate::models::hardware::PartKind;
    use crate::scenario::{BaySpec, MunitionConfigBuilder};

    const PLATFORM: AssemblyId = 1;
    const TAG: &str = "[Launch Bay]";

    fn hornet() -> MunitionConfig {
        MunitionConfigBuilder::new("Hornet")
            .parts(1, 1, 0, 1)
            .search_radii(10.0, 10.0, 10.0)
            .build()
    }

    /// マージ結合式ベイと、その上に載った誘導弾（アセンブリ `body`）を追加
    fn add_merge_missile(world: &mut SimWorld, bay: BlockId, body: AssemblyId, x: f64, gyros: usize) {
        let base = body * 100;
        let origin = DVec3::new(x, 0.0, 0.0);
        world.add_assembly(body, 100.0, Some(PLATFORM));
        world.add_bay(BaySpec {
            id: bay,
            name: format!("Merge {} {}", bay, TAG),
            assembly: PLATFORM,
            position: origin,
            kind: BayKind::Merge { connected: false },
        });
        let at = |z: f64| origin + DVec3::new(0.0, 0.0, z);
        world.add_part(base, "Merge [Hornet]", PartKind::MergeCoupling { enabled: true }, body, at(-1.0));
        world.add_part(base + 1, "Remote [Hornet]", PartKind::RemoteControl, body, at(-2.0));
        world.add_part(base + 2, "Thruster [Hornet]", PartKind::Thruster { max_thrust: 2000.0 }, body, at(-1.5));
        world.add_part(base + 3, "Battery [Hornet]", PartKind::Battery { has_charge: true }, body, at(-3.0));
        world.add_part(base + 4, "Warhead [Hornet]", PartKind::Warhead { armed: false }, body, at(-4.0));
        for i in 0..gyros {
            world.add_part(base + 10 + i as u64, "Gyro [Hornet]", PartKind::Gyro, body, at(-2.5));
        }
    }

    fn world() -> SimWorld {
        let mut world = SimWorld::new(PLATFORM, DVec3::ZERO);
        world.add_assembly(PLATFORM, 50_000.0, None);
        world
    }

    #[test]
    fn test_allocates_complete_merge_missile() {
        let mut world = world();
        add_merge_missile(&mut world, 500, 2, 0.0, 1);
        let mut sequencer = LaunchSequencer::new(1000.0);

        let allocation = sequencer.allocate(&hornet(), &world, TAG, &HashSet::new());
        let munition = allocation.munition.expect("allocated");
        assert_eq!(munition.merge_coupling, Some(200));
        assert_eq!(munition.dock, 500);
        assert_eq!(munition.parts.gyros, vec![210]);
        assert_eq!(allocation.diagnostics, vec![format!("Munition allocated from bay Merge 500 {}", TAG)]);
    }

    #[test]
    fn test_incomplete_candidate_is_skipped() {
        let mut world = world();
        add_merge_missile(&mut world, 500, 2, 0.0, 1);
        add_merge_missile(&mut world, 501, 3, 50.0, 2);
        let config = MunitionConfigBuilder::from_config(&hornet()).gyro_count(2).build();
        let mut sequencer = LaunchSequencer::new(1000.0);

        let allocation = sequencer.allocate(&config, &world, TAG, &HashSet::new());
        assert_eq!(allocation.munition.map(|m| m.dock), Some(501));
        assert_eq!(
            allocation.skipped,
            vec![(
                500,
                SkipReason::Incomplete(Shortfall::MissingParts {
                    role: PartRole::Gyro,
                    found: 1,
                    required: 2
                })
            )]
        );
    }

    #[test]
    fn test_queued_coupling_is_not_allocated_twice() {
        let mut world = world();
        add_merge_missile(&mut world, 500, 2, 0.0, 1);
        let mut sequencer = LaunchSequencer::new(1000.0);

        let first = sequencer.allocate(&hornet(), &world, TAG, &HashSet::new());
        sequencer.enqueue(first.munition.expect("first"));

        let second = sequencer.allocate(&hornet(), &world, TAG, &HashSet::new());
        assert!(second.munition.is_none());
        assert_eq!(second.skipped, vec![(500, SkipReason::AlreadyClaimed)]);
        assert_eq!(second.diagnostics.last().map(String::as_str), Some("No munitions available!"));
    }

    #[test]
    fn test_detach_bays_are_scanned_first() {
        let mut world = world();
        add_merge_missile(&mut world, 500, 2, 0.0, 1);

        world.add_assembly(7, 80.0, Some(PLATFORM));
        world.add_bay(BaySpec {
            id: 700,
            name: format!("Rotor {}", TAG),
            assembly: PLATFORM,
            position: DVec3::new(100.0, 0.0, 0.0),
            kind: BayKind::Detach {
                attached: true,
                top_assembly: Some(7),
            },
        });
        let at = |z: f64| DVec3::new(100.0, 0.0, z);
        world.add_part(701, "Remote [Hornet]", PartKind::RemoteControl, 7, at(-1.0));
        world.add_part(702, "Gyro [Hornet]", PartKind::Gyro, 7, at(-1.5));
        world.add_part(703, "Thruster [Hornet]", PartKind::Thruster { max_thrust: 500.0 }, 7, at(-2.0));
        world.add_part(704, "Battery [Hornet]", PartKind::Battery { has_charge: true }, 7, at(-2.5));
        world.add_part(705, "Warhead [Hornet]", PartKind::Warhead { armed: false }, 7, at(-3.0));

        let mut sequencer = LaunchSequencer::new(1000.0);
        let munition = sequencer
            .allocate(&hornet(), &world, TAG, &HashSet::new())
            .munition
            .expect("allocated");
        assert_eq!(munition.dock, 700);
        assert_eq!(munition.merge_coupling, None);
        assert_eq!(munition.parts.remotes, vec![701]);
    }

    #[test]
    fn test_introspection_error_is_recorded_and_scan_continues() {
        let mut world = world();
        world.add_bay(BaySpec {
            id: 600,
            name: format!("Broken {}", TAG),
            assembly: PLATFORM,
            position: DVec3::ZERO,
            kind: BayKind::Detach {
                attached: true,
                top_assembly: None,
            },
        });
        add_merge_missile(&mut world, 500, 2, 0.0, 1);

        let mut sequencer = LaunchSequencer::new(1000.0);
        let allocation = sequencer.allocate(&hornet(), &world, TAG, &HashSet::new());
        assert!(allocation.munition.is_some());
        assert!(allocation.diagnostics[0].starts_with(&format!("Error with munition on launch bay Broken {}", TAG)));
    }

    #[test]
    fn test_tick_waits_for_delay_and_open_doors() {
        let mut world = world();
        world.add_door("Hangar", DoorStatus::Closed);
        add_merge_missile(&mut world, 500, 2, 0.0, 1);
        add_merge_missile(&mut world, 501, 3, 50.0, 1);

        let mut sequencer = LaunchSequencer::new(1000.0);
        for _ in 0..2 {
            let allocation = sequencer.allocate(&hornet(), &world, TAG, &HashSet::new());
            sequencer.enqueue(allocation.munition.expect("allocated"));
        }

        // 扉が閉じている間は送り出さないが、時間は積算される
        assert!(sequencer.tick(1500.0, &world, "Hangar").is_none());
        world.set_door_status("Hangar", DoorStatus::Open);

        let first = sequencer.tick(16.0, &world, "Hangar").expect("first launch");
        assert_eq!(first.dock, 500);
        assert!(sequencer.tick(1000.0, &world, "Hangar").is_none(), "delay must be exceeded");
        assert_eq!(sequencer.tick(16.0, &world, "Hangar").map(|m| m.dock), Some(501));
        assert_eq!(sequencer.pending_len(), 0);
    }

    #[test]
    fn test_clear_pending() {
        let mut world = world();
        add_merge_missile(&mut world, 500, 2, 0.0, 1);
        let mut sequencer = LaunchSequencer::new(0.0);
        let allocation = sequencer.allocate(&hornet(), &world, TAG, &HashSet::new());
        sequencer.enqueue(allocation.munition.expect("allocated"));

        sequencer.clear_pending();
        assert!(sequencer.tick(100.0, &world, "").is_none());
    }
}
