//! # Controller モジュール
//!
//! 目標追跡器、発射シーケンサー、飛行中の誘導弾をまとめて所有し、
//! 1ティックを決まった順序で実行します。
//!
//! 1. センサー観測の取り込みと追跡記録の更新
//! 2. 発射シーケンス（発射待ちから最大1発を飛行中へ）
//! 3. 飛行中の全誘導弾の誘導
//! 4. Defunct になった誘導弾の回収
//! 5. 状態表示
//!
//! オペレーター操作（発射、自爆、除外指定）もここで受け付けます。

use std::collections::HashSet;

use glam::DVec3;
use tracing::{debug, info, warn};

use crate::models::common::{BlockId, EntityId, SimulationContext};
use crate::models::hardware::HardwareError;
use crate::models::launcher::{claim_key, LaunchSequencer};
use crate::models::munition::{Munition, MunitionState};
use crate::models::target::TargetType;
use crate::models::tracker::TargetTracker;
use crate::models::traits::{IActuatorSink, IHardwareInventory, ISensorSource, IStatusSink};
use crate::scenario::{MunitionConfig, TargetingConfig};

/// カメラのレイキャスト距離（m）
pub const EXEMPT_SCAN_RANGE: f64 = 5000.0;

/// 起動時の致命的エラー
#[derive(Debug, Clone, PartialEq)]
pub enum StartupError {
    /// 固定デバイスが見つからない、または複数見つかった
    Device { name: String, source: HardwareError },
    /// 既定の誘導弾種別が構成に存在しない
    UnknownMunition(String),
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::Device { name, source } => write!(f, "デバイス `{}` を解決できません: {}", name, source),
            StartupError::UnknownMunition(name) => write!(f, "誘導弾種別 `{}` が定義されていません", name),
        }
    }
}

impl std::error::Error for StartupError {}

const SPINNER: [char; 4] = ['/', '-', '\\', '|'];
const SPINNER_RATE: usize = 3;
/// 状態表示を書き出す最短間隔（ミリ秒）
const FLUSH_INTERVAL_MS: f64 = 333.0;

/// 状態表示のバッファ
///
/// 毎ティック行を溜め、一定間隔ごとにだけ出力先へ書き出します。
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    text: String,
    since_last_flush_ms: f64,
    spinner_index: usize,
}

impl StatusBoard {
    /// 回転インジケータ付きの見出し
    pub fn header(&mut self, name: &str) {
        let spinner = SPINNER[self.spinner_index / SPINNER_RATE];
        self.text.push_str(&format!("{} {}\n", name, spinner));
        self.text.push_str("===============================\n");
        self.spinner_index = (self.spinner_index + 1) % (SPINNER.len() * SPINNER_RATE);
    }

    pub fn line(&mut self, text: &str) {
        self.text.push_str(text);
        self.text.push('\n');
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 書き出し間隔を超えた（または経過時間ゼロの）場合だけ出力し、バッファを空にする
    pub fn flush(&mut self, elapsed_ms: f64, sink: &mut dyn IStatusSink) -> bool {
        self.since_last_flush_ms += elapsed_ms;
        let published = self.since_last_flush_ms > FLUSH_INTERVAL_MS || elapsed_ms == 0.0;
        if published {
            sink.publish(&self.text);
            self.since_last_flush_ms = 0.0;
        }
        self.text.clear();
        published
    }
}

/// 目標追跡と誘導弾運用の制御器
#[derive(Debug)]
pub struct TargetingController {
    targeting: TargetingConfig,
    munitions: Vec<MunitionConfig>,
    tracker: TargetTracker,
    sequencer: LaunchSequencer,
    active: Vec<Munition>,
    status: String,
}

impl TargetingController {
    /// 既定の誘導弾種別（空文字列は未指定）は構成に存在しなければなりません。
    pub fn new(targeting: TargetingConfig, munitions: Vec<MunitionConfig>) -> Result<Self, StartupError> {
        for name in [
            &targeting.default_moving_target_munition,
            &targeting.default_static_target_munition,
        ] {
            if !name.is_empty() && !munitions.iter().any(|m| &m.name == name) {
                return Err(StartupError::UnknownMunition(name.clone()));
            }
        }

        let tracker = TargetTracker::new(targeting.forget_target_after_ms);
        let sequencer = LaunchSequencer::new(targeting.launch_delay_ms);
        Ok(Self {
            targeting,
            munitions,
            tracker,
            sequencer,
            active: Vec::new(),
            status: "Ready".to_string(),
        })
    }

    pub fn tracker(&self) -> &TargetTracker {
        &self.tracker
    }

    pub fn active(&self) -> &[Munition] {
        &self.active
    }

    pub fn pending_len(&self) -> usize {
        self.sequencer.pending_len()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn targeting(&self) -> &TargetingConfig {
        &self.targeting
    }

    /// 1ティックの実行
    pub fn run_tick(
        &mut self,
        elapsed_ms: f64,
        platform_position: DVec3,
        sensors: &dyn ISensorSource,
        hw: &dyn IHardwareInventory,
        sink: &mut dyn IActuatorSink,
        board: &mut StatusBoard,
    ) {
        // 1. 追跡
        let hits = sensors.poll();
        self.tracker.observe(&hits, elapsed_ms);

        // 2. 発射シーケンス
        if let Some(munition) = self.sequencer.tick(elapsed_ms, hw, &self.targeting.hangar_door_group) {
            self.active.push(munition);
        }

        // 3. 誘導
        let ctx = SimulationContext {
            timestamp_ms: self.tracker.current_time_ms(),
            elapsed_ms,
            platform_position,
            targeting: &self.targeting,
        };
        for munition in &mut self.active {
            munition.advance(&ctx, &self.tracker, hw, sink);
        }

        // 4. 回収
        self.reap_defunct();

        // 5. 状態表示
        self.report_status(sensors, hw, board);
    }

    /// Defunct の誘導弾を末尾と入れ替えて取り除き、参照されなくなった固定座標目標も破棄
    fn reap_defunct(&mut self) {
        let mut index = 0;
        while index < self.active.len() {
            if self.active[index].state == MunitionState::Defunct {
                let munition = self.active.swap_remove(index);
                info!(
                    munition_id = munition.id,
                    munition_type = %munition.config.name,
                    remaining_active = self.active.len(),
                    "MUNITION_REAPED: 終端状態の誘導弾を回収しました"
                );
            } else {
                index += 1;
            }
        }

        let referenced: HashSet<EntityId> = self
            .active
            .iter()
            .chain(self.sequencer.pending())
            .filter_map(|m| m.target)
            .collect();
        let orphaned: Vec<EntityId> = self
            .tracker
            .iter()
            .filter(|t| t.target_type == TargetType::Static && !referenced.contains(&t.id))
            .map(|t| t.id)
            .collect();
        for id in orphaned {
            self.tracker.remove(id);
            debug!(target_id = id, "TARGET_STATIC_RELEASED: 参照されなくなった固定座標目標を破棄しました");
        }
    }

    /// 状態表示の行を書き込む
    pub fn report_status(&self, sensors: &dyn ISensorSource, hw: &dyn IHardwareInventory, board: &mut StatusBoard) {
        board.line(&format!("Current Timestamp: {:.1}", self.tracker.current_time_ms()));
        board.line(&format!("Launch bays: {}", hw.launch_bays(&self.targeting.launch_bay_tag).len()));
        board.line(&format!("Trackers: {}", sensors.sensor_count()));
        board.line(&format!(
            "Missiles: {} active, {} pending",
            self.active.len(),
            self.sequencer.pending_len()
        ));
        board.line(&format!(
            "Targets: {} ({} exempt)",
            self.tracker.len(),
            self.tracker.exempt_count()
        ));
        board.line(&self.status);

        for munition in &self.active {
            let distance = match (munition.position(hw), munition.target.and_then(|id| self.tracker.find(id))) {
                (Ok(position), Some(target)) => format!("{:.1}", target.position.distance(position)),
                _ => "-".to_string(),
            };
            board.line(&format!("{}: {} ({})", munition.id, distance, munition.state));
            match munition.memory.cruise_dot {
                Some(dot) => board.line(&format!("CruiseDot: {:.4}", dot)),
                None => board.line("CruiseDot: -"),
            }
        }
    }

    fn set_status(&mut self, status: String) {
        debug!(status = %status, "CONTROLLER_STATUS: 状態表示を更新しました");
        self.status = status;
    }

    /// 最も近い目標へ発射
    pub fn fire_at_closest(&mut self, munition_type: Option<&str>, hw: &dyn IHardwareInventory, platform_position: DVec3) {
        let target = self.tracker.closest(platform_position).map(|t| (t.id, t.target_type));
        self.launch_at(target, munition_type, hw);
    }

    /// 見えている全目標へ1発ずつ発射
    pub fn fire_at_all(&mut self, munition_type: Option<&str>, hw: &dyn IHardwareInventory) {
        let targets: Vec<(EntityId, TargetType)> =
            self.tracker.visible().map(|t| (t.id, t.target_type)).collect();
        for target in targets {
            self.launch_at(Some(target), munition_type, hw);
        }
    }

    /// 固定座標へ発射
    pub fn fire_at_static(&mut self, position: DVec3, munition_type: Option<&str>, hw: &dyn IHardwareInventory) {
        let id = self.tracker.insert_static(position);
        self.launch_at(Some((id, TargetType::Static)), munition_type, hw);
    }

    fn resolve_munition(&self, target_type: TargetType, requested: Option<&str>) -> Option<&MunitionConfig> {
        let name = match requested.filter(|name| !name.is_empty()) {
            Some(name) => name,
            None => match target_type {
                TargetType::Static => self.targeting.default_static_target_munition.as_str(),
                TargetType::Tracked => self.targeting.default_moving_target_munition.as_str(),
            },
        };
        self.munitions.iter().find(|m| m.name == name)
    }

    fn usage(&self) -> String {
        let names: Vec<&str> = self.munitions.iter().map(|m| m.name.as_str()).collect();
        format!("Invalid fire argument. Usage:\n fire|fireAll [{}]", names.join("|"))
    }

    fn launch_at(
        &mut self,
        target: Option<(EntityId, TargetType)>,
        munition_type: Option<&str>,
        hw: &dyn IHardwareInventory,
    ) {
        let Some((target_id, target_type)) = target else {
            self.set_status("No visible targets".to_string());
            return;
        };

        let Some(config) = self.resolve_munition(target_type, munition_type).cloned() else {
            warn!(requested = ?munition_type, "FIRE_REJECTED: 誘導弾種別を解決できません");
            let usage = self.usage();
            self.set_status(usage);
            return;
        };

        let in_flight: HashSet<BlockId> = self.active.iter().map(claim_key).collect();
        let allocation = self
            .sequencer
            .allocate(&config, hw, &self.targeting.launch_bay_tag, &in_flight);
        self.set_status(allocation.diagnostics.join("\n"));

        if let Some(mut munition) = allocation.munition {
            munition.target = Some(target_id);
            self.sequencer.enqueue(munition);
        }
    }

    /// 発射待ちを破棄し、飛行中の全誘導弾を強制起爆
    pub fn scuttle(&mut self, sink: &mut dyn IActuatorSink) {
        warn!(
            active = self.active.len(),
            pending = self.sequencer.pending_len(),
            "SCUTTLE: 全誘導弾を自爆させます"
        );
        self.sequencer.clear_pending();
        for munition in &mut self.active {
            munition.detonate(true, sink);
        }
    }

    /// カメラで捉えた物体を攻撃対象から除外
    pub fn exempt_scanned_object(&mut self, sensors: &dyn ISensorSource) {
        if self.targeting.targeting_camera.is_empty() {
            self.set_status("No targeting camera configured".to_string());
            return;
        }
        if let Some(id) = sensors.raycast(EXEMPT_SCAN_RANGE) {
            info!(target_id = id, "TARGET_EXEMPTED: 攻撃対象から除外しました");
            self.tracker.exempt(id);
            self.set_status(format!("Exempting {} from targeting", id));
        }
    }

    pub fn clear_exempt_targets(&mut self) {
        self.tracker.clear_exemptions();
        self.set_status("Cleared exempt targets".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{SimHost, SimWorld, StatusLog};
    use crate::models::hardware::{BayKind, PartKind};
    use crate::models::target::Relationship;
    use crate::models::traits::ActuatorCommand;
    use crate::scenario::{BaySpec, ContactConfig, MunitionConfigBuilder};

    const PLATFORM: u64 = 1;
    const BODY: u64 = 2;
    const WARHEAD: BlockId = 205;

    fn targeting() -> TargetingConfig {
        TargetingConfig {
            default_moving_target_munition: "Hornet".to_string(),
            default_static_target_munition: "Hornet".to_string(),
            targeting_camera: "Camera - Targeting".to_string(),
            ..TargetingConfig::default()
        }
    }

    fn hornet() -> MunitionConfig {
        MunitionConfigBuilder::new("Hornet")
            .parts(1, 1, 0, 1)
            .search_radii(10.0, 10.0, 10.0)
            .build()
    }

    fn host() -> SimHost {
        let mut world = SimWorld::new(PLATFORM, DVec3::ZERO);
        world.add_assembly(PLATFORM, 50_000.0, None);
        world.add_assembly(BODY, 100.0, Some(PLATFORM));
        world.add_designator("Turret", PLATFORM);
        world.add_bay(BaySpec {
            id: 100,
            name: "Merge [Launch Bay]".to_string(),
            assembly: PLATFORM,
            position: DVec3::ZERO,
            kind: BayKind::Merge { connected: false },
        });
        let at = |z: f64| DVec3::new(0.0, 0.0, z);
        world.add_part(201, "Merge [Hornet]", PartKind::MergeCoupling { enabled: true }, BODY, at(-1.0));
        world.add_part(202, "Remote [Hornet]", PartKind::RemoteControl, BODY, at(-2.0));
        world.add_part(203, "Gyro [Hornet]", PartKind::Gyro, BODY, at(-2.5));
        world.add_part(204, "Thruster [Hornet]", PartKind::Thruster { max_thrust: 2000.0 }, BODY, at(-1.5));
        world.add_part(WARHEAD, "Warhead [Hornet]", PartKind::Warhead { armed: false }, BODY, at(-4.0));
        world.add_part(206, "Battery [Hornet]", PartKind::Battery { has_charge: true }, BODY, at(-3.0));
        world.add_contact(ContactConfig {
            id: 42,
            relationship: Relationship::Hostile,
            position: DVec3::new(0.0, 0.0, -3000.0),
            velocity: DVec3::ZERO,
            appear_at_s: 0.0,
            disappear_at_s: None,
        });
        SimHost::new(world)
    }

    fn controller() -> TargetingController {
        TargetingController::new(targeting(), vec![hornet()]).expect("valid config")
    }

    fn tick(controller: &mut TargetingController, host: &mut SimHost, board: &mut StatusBoard) {
        host.world.advance(16.0);
        controller.run_tick(16.0, DVec3::ZERO, &host.world, &host.world, &mut host.commands, board);
        host.apply_commands();
    }

    #[test]
    fn test_unknown_default_munition_is_fatal() {
        let config = TargetingConfig {
            default_moving_target_munition: "Wasp".to_string(),
            ..TargetingConfig::default()
        };
        assert_eq!(
            TargetingController::new(config, vec![hornet()]).err(),
            Some(StartupError::UnknownMunition("Wasp".to_string()))
        );
    }

    #[test]
    fn test_fire_without_targets_reports_status() {
        let mut controller = controller();
        let host = host();
        controller.fire_at_closest(None, &host.world, DVec3::ZERO);
        assert_eq!(controller.status(), "No visible targets");
        assert_eq!(controller.pending_len(), 0);
    }

    #[test]
    fn test_invalid_munition_type_reports_usage() {
        let mut controller = controller();
        let mut host = host();
        let mut board = StatusBoard::default();
        tick(&mut controller, &mut host, &mut board);

        controller.fire_at_closest(Some("Wasp"), &host.world, DVec3::ZERO);
        assert_eq!(controller.status(), "Invalid fire argument. Usage:\n fire|fireAll [Hornet]");
    }

    #[test]
    fn test_pending_munition_launches_after_delay() {
        let mut controller = controller();
        let mut host = host();
        let mut board = StatusBoard::default();
        tick(&mut controller, &mut host, &mut board);

        controller.fire_at_closest(None, &host.world, DVec3::ZERO);
        assert_eq!(controller.status(), "Munition allocated from bay Merge [Launch Bay]");
        assert_eq!(controller.pending_len(), 1);

        let mut ticks = 0;
        while controller.active().is_empty() && ticks < 200 {
            tick(&mut controller, &mut host, &mut board);
            ticks += 1;
        }
        assert_eq!(controller.active().len(), 1);
        assert_eq!(controller.pending_len(), 0);
        assert_eq!(controller.active()[0].target, Some(42));
        // 起動から積算した時間が発射間隔を超えた最初のティック
        assert_eq!(ticks, 62);
    }

    #[test]
    fn test_scuttle_detonates_and_reaps() {
        let mut controller = controller();
        let mut host = host();
        let mut board = StatusBoard::default();
        tick(&mut controller, &mut host, &mut board);
        controller.fire_at_closest(None, &host.world, DVec3::ZERO);
        while controller.active().is_empty() {
            tick(&mut controller, &mut host, &mut board);
        }

        controller.scuttle(&mut host.commands);
        assert!(host.commands.history().contains(&ActuatorCommand::ArmWarhead { block: WARHEAD }));
        assert!(host.commands.history().contains(&ActuatorCommand::Detonate { block: WARHEAD }));

        tick(&mut controller, &mut host, &mut board);
        assert!(controller.active().is_empty());
    }

    #[test]
    fn test_static_target_released_when_unreferenced() {
        let mut controller = controller();
        let mut host = host();
        let mut board = StatusBoard::default();

        controller.fire_at_static(DVec3::new(0.0, 1000.0, 0.0), None, &host.world);
        assert_eq!(controller.pending_len(), 1);
        tick(&mut controller, &mut host, &mut board);
        assert!(controller.tracker().iter().any(|t| t.target_type == TargetType::Static));

        controller.scuttle(&mut host.commands);
        tick(&mut controller, &mut host, &mut board);
        assert!(!controller.tracker().iter().any(|t| t.target_type == TargetType::Static));
    }

    #[test]
    fn test_exempt_scanned_object() {
        let mut controller = controller();
        let mut host = host();
        host.world.set_raycast_target(Some(42));
        let mut board = StatusBoard::default();
        tick(&mut controller, &mut host, &mut board);

        controller.exempt_scanned_object(&host.world);
        assert_eq!(controller.status(), "Exempting 42 from targeting");
        controller.fire_at_closest(None, &host.world, DVec3::ZERO);
        assert_eq!(controller.status(), "No visible targets");

        controller.clear_exempt_targets();
        assert_eq!(controller.status(), "Cleared exempt targets");
        assert_eq!(controller.tracker().exempt_count(), 0);
    }

    #[test]
    fn test_status_report_lines() {
        let mut controller = controller();
        let mut host = host();
        let mut board = StatusBoard::default();
        tick(&mut controller, &mut host, &mut board);

        let text = board.text().to_string();
        assert!(text.starts_with("Current Timestamp: 16.0\nLaunch bays: 1\nTrackers: 1\n"));
        assert!(text.contains("Missiles: 0 active, 0 pending\n"));
        assert!(text.contains("Targets: 1 (0 exempt)\n"));
        assert!(text.ends_with("Ready\n"));
    }

    #[test]
    fn test_status_board_flush_rate() {
        let mut board = StatusBoard::default();
        let mut sink = StatusLog::default();

        board.header("CIWS");
        assert!(board.text().starts_with("CIWS /\n"));
        assert!(board.flush(0.0, &mut sink), "zero elapsed flushes immediately");

        for _ in 0..20 {
            board.line("x");
            board.flush(16.0, &mut sink);
        }
        // 333ms を超えるのは 21 ティック目
        assert_eq!(sink.count(), 1);
        board.line("x");
        assert!(board.flush(16.0, &mut sink));
        assert_eq!(sink.last(), Some("x\n"));
    }

    #[test]
    fn test_spinner_advances_every_three_headers() {
        let mut board = StatusBoard::default();
        let mut sink = StatusLog::default();
        let mut glyphs = Vec::new();
        for _ in 0..7 {
            board.header("CIWS");
            glyphs.push(board.text().chars().nth(5));
            board.flush(0.0, &mut sink);
        }
        assert_eq!(
            glyphs,
            vec![Some('/'), Some('/'), Some('/'), Some('-'), Some('-'), Some('-'), Some('\\')]
        );
    }
}
