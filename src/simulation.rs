//! # Simulation モジュール
//!
//! CIWS シナリオを実行するシミュレーションエンジンを提供します。
//!
//! このモジュールは、固定時間刻み（Δt）のメインループを管理し、
//! 目標追跡制御器・直射タレット・メモリ上のホストを協調動作させます。
//! 台本化されたオペレーター命令も、指定時刻に到達したティックの先頭で適用します。
//!
//! ## シミュレーション処理順序
//!
//! 各時間刻みにおいて、以下の順序で処理が実行されます：
//!
//! 1. **ホスト処理**: 時刻を進め、分離済みアセンブリと接触を移動
//! 2. **オペレーター命令**: 時刻に到達した命令を適用
//! 3. **目標追跡制御**: 追跡、発射シーケンス、誘導、回収、状態表示
//! 4. **タレット処理**: 目標維持、旋回、射撃判定
//! 5. **状態表示の書き出し**と、ティック中に送られた指令のホストへの反映
//!
//! ## 使用例
//!
//! ```rust,no_run
//! use ciws::simulation::SimulationEngine;
//! use ciws::scenario::ScenarioConfig;
//!
//! let config = ScenarioConfig::from_file("scenarios/ciws_basic.yaml")?;
//!
//! let mut engine = SimulationEngine::new(config, 1)?; // verbose_level=1
//! engine.initialize()?;
//! let summary = engine.run();
//! println!("{:?}", summary);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::str::FromStr;

use glam::DVec3;
use tracing::{debug, info, trace, warn};

use crate::host::SimHost;
use crate::models::common::{BlockId, SimulationContext};
use crate::models::controller::{StartupError, StatusBoard, TargetingController};
use crate::models::hardware::{expect_unique, HardwareError};
use crate::models::traits::IHardwareInventory;
use crate::models::turret::{Turret, TurretDevices};
use crate::scenario::{OrderConfig, ScenarioConfig, TurretConfig, TurretMode};

/// 状態表示の見出し
const BOARD_TITLE: &str = "CIWS";

/// 暴走防止のステップ上限
const MAX_STEPS: u64 = 1_000_000;

/// ジャイロゲインの1回あたりの調整量
const GAIN_STEP: f64 = 0.25;

/// ジャイロ減衰ゲインの1回あたりの調整量
const DAMPING_STEP: f64 = 0.05;

/// オペレーター命令
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorOrder {
    /// `fire [種別]`: 最も近い目標へ発射
    Fire(Option<String>),
    /// `fireAll [種別]`: 見えている全目標へ発射
    FireAll(Option<String>),
    /// `fireStatic x y z [種別]`: 固定座標へ発射
    FireStatic { position: DVec3, munition: Option<String> },
    Scuttle,
    Exempt,
    ClearExempt,
    Manual,
    Auto,
    /// `+gain` / `-gain`
    AdjustGain(f64),
    /// `+damp` / `-damp`
    AdjustDamping(f64),
}

impl FromStr for OperatorOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("空の命令です".to_string());
        };
        let args: Vec<&str> = words.collect();
        let munition = |index: usize| args.get(index).map(|name| name.to_string());

        let order = match verb {
            "fire" => OperatorOrder::Fire(munition(0)),
            "fireAll" => OperatorOrder::FireAll(munition(0)),
            "fireStatic" => {
                if args.len() < 3 {
                    return Err(format!("座標が不足しています: {}", s));
                }
                let mut coords = [0.0; 3];
                for (slot, text) in coords.iter_mut().zip(&args) {
                    *slot = text
                        .parse::<f64>()
                        .map_err(|e| format!("座標 `{}` を解析できません: {}", text, e))?;
                }
                OperatorOrder::FireStatic {
                    position: DVec3::from_array(coords),
                    munition: munition(3),
                }
            }
            "scuttle" => OperatorOrder::Scuttle,
            "exempt" => OperatorOrder::Exempt,
            "clearExempt" => OperatorOrder::ClearExempt,
            "manual" => OperatorOrder::Manual,
            "auto" => OperatorOrder::Auto,
            "+gain" => OperatorOrder::AdjustGain(GAIN_STEP),
            "-gain" => OperatorOrder::AdjustGain(-GAIN_STEP),
            "+damp" => OperatorOrder::AdjustDamping(DAMPING_STEP),
            "-damp" => OperatorOrder::AdjustDamping(-DAMPING_STEP),
            _ => return Err(format!("不明な命令: {}", verb)),
        };
        Ok(order)
    }
}

/// 実行結果の概要
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSummary {
    pub steps: u64,
    pub elapsed_ms: f64,
    pub surviving_contacts: usize,
    pub active_munitions: usize,
    pub pending_munitions: usize,
    /// 最後に書き出された状態表示
    pub last_status: Option<String>,
}

pub struct SimulationEngine {
    pub current_time_ms: f64,
    pub dt_ms: f64,
    pub max_time_ms: f64,
    pub step_count: u64,

    pub host: SimHost,
    pub controller: TargetingController,
    pub turret: Option<Turret>,
    pub board: StatusBoard,

    orders: Vec<OrderConfig>,
    next_order: usize,
    platform_position: DVec3,

    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
}

impl SimulationEngine {
    /// エンジンの作成
    ///
    /// 既定の誘導弾種別が定義されていない場合は起動エラーです。
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Result<Self, StartupError> {
        let controller = TargetingController::new(scenario.targeting.clone(), scenario.munitions.clone())?;
        let host = SimHost::from_scenario(&scenario);

        let mut orders = scenario.orders.clone();
        orders.sort_by(|a, b| a.at_s.total_cmp(&b.at_s));

        Ok(Self {
            current_time_ms: 0.0,
            dt_ms: scenario.sim.dt_ms,
            max_time_ms: scenario.sim.t_max_s * 1000.0,
            step_count: 0,
            host,
            controller,
            turret: None,
            board: StatusBoard::default(),
            orders,
            next_order: 0,
            platform_position: scenario.platform.position,
            scenario_config: scenario,
            verbose_level,
        })
    }

    /// 固定デバイスの解決
    ///
    /// 目標指定カメラとタレットのデバイスは名前で一意に見つかる必要があります。
    pub fn initialize(&mut self) -> Result<(), StartupError> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        let camera = self.scenario_config.targeting.targeting_camera.clone();
        if !camera.is_empty() {
            resolve_named(&self.host.world, &camera)?;
        }

        if let Some(config) = self.scenario_config.turret.clone() {
            let devices = resolve_turret_devices(&self.host.world, &config)?;
            if self.verbose_level > 1 {
                debug!(
                    reference = devices.reference,
                    azimuth_rotor = devices.azimuth_rotor,
                    gyros = devices.gyros.len(),
                    weapons = devices.weapons.len(),
                    "タレットのデバイスを解決しました"
                );
            }
            self.turret = Some(Turret::new(&config, &self.scenario_config.targeting, devices));
        }

        if self.verbose_level > 0 {
            let targeting = self.controller.targeting();
            info!("初期化完了:");
            info!("  発射ベイ: {}基", self.host.world.launch_bays(&targeting.launch_bay_tag).len());
            info!("  誘導弾種別: {}種", self.scenario_config.munitions.len());
            info!("  タレット: {}", if self.turret.is_some() { "あり" } else { "なし" });
            info!("  命令: {}件", self.orders.len());
        }

        Ok(())
    }

    pub fn run(&mut self) -> SimulationSummary {
        info!("=== シミュレーション実行開始 ===");

        while self.current_time_ms < self.max_time_ms {
            self.step();

            if self.verbose_level > 2 {
                trace!("時刻: {:.0}ミリ秒 (ステップ: {})", self.current_time_ms, self.step_count);
            }

            if self.step_count % 100 == 0 && self.verbose_level > 0 {
                let progress = (self.current_time_ms / self.max_time_ms) * 100.0;
                info!(
                    "進行状況: {:.1}% ({:.1}/{:.1}秒)",
                    progress,
                    self.current_time_ms / 1000.0,
                    self.max_time_ms / 1000.0
                );
            }

            if self.step_count >= MAX_STEPS {
                warn!(steps = self.step_count, "ステップ上限に達したため打ち切ります");
                break;
            }
        }

        let summary = self.summary();
        info!("=== シミュレーション完了 ===");
        info!("実行時間: {:.1}秒", self.current_time_ms / 1000.0);
        info!("総ステップ数: {}", self.step_count);
        info!(
            surviving_contacts = summary.surviving_contacts,
            active_munitions = summary.active_munitions,
            pending_munitions = summary.pending_munitions,
            "SIMULATION_SUMMARY: 実行結果"
        );
        summary
    }

    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            steps: self.step_count,
            elapsed_ms: self.current_time_ms,
            surviving_contacts: self.host.world.surviving_contacts(),
            active_munitions: self.controller.active().len(),
            pending_munitions: self.controller.pending_len(),
            last_status: self.host.status.last().map(str::to_string),
        }
    }

    pub fn step(&mut self) {
        let dt = self.dt_ms;
        self.host.world.advance(dt);
        self.current_time_ms += dt;

        self.process_orders();

        self.board.header(BOARD_TITLE);
        self.controller.run_tick(
            dt,
            self.platform_position,
            &self.host.world,
            &self.host.world,
            &mut self.host.commands,
            &mut self.board,
        );
        self.process_turret(dt);

        self.board.flush(dt, &mut self.host.status);
        self.host.apply_commands();
        self.step_count += 1;
    }

    fn process_orders(&mut self) {
        while let Some(order) = self.orders.get(self.next_order) {
            if order.at_s * 1000.0 > self.current_time_ms {
                break;
            }
            let command = order.command.clone();
            self.next_order += 1;

            match command.parse::<OperatorOrder>() {
                Ok(parsed) => {
                    info!(order = %command, time_ms = self.current_time_ms, "OPERATOR_ORDER: 命令を適用します");
                    self.apply_order(parsed);
                }
                Err(reason) => warn!(order = %command, "OPERATOR_ORDER_REJECTED: {}", reason),
            }
        }
    }

    /// オペレーター命令の適用
    pub fn apply_order(&mut self, order: OperatorOrder) {
        let world = &self.host.world;
        let platform = self.platform_position;
        match order {
            OperatorOrder::Fire(munition) => self.controller.fire_at_closest(munition.as_deref(), world, platform),
            OperatorOrder::FireAll(munition) => self.controller.fire_at_all(munition.as_deref(), world),
            OperatorOrder::FireStatic { position, munition } => {
                self.controller.fire_at_static(position, munition.as_deref(), world)
            }
            OperatorOrder::Scuttle => self.controller.scuttle(&mut self.host.commands),
            OperatorOrder::Exempt => self.controller.exempt_scanned_object(world),
            OperatorOrder::ClearExempt => self.controller.clear_exempt_targets(),
            OperatorOrder::Manual | OperatorOrder::Auto | OperatorOrder::AdjustGain(_) | OperatorOrder::AdjustDamping(_) => {
                let Some(turret) = self.turret.as_mut() else {
                    warn!(order = ?order, "OPERATOR_ORDER_REJECTED: タレットが構成されていません");
                    return;
                };
                match order {
                    OperatorOrder::Manual => turret.set_mode(TurretMode::Manual, &mut self.host.commands),
                    OperatorOrder::Auto => turret.set_mode(TurretMode::Automatic, &mut self.host.commands),
                    OperatorOrder::AdjustGain(delta) => turret.adjust_gain(delta),
                    OperatorOrder::AdjustDamping(delta) => turret.adjust_damping(delta),
                    _ => {}
                }
            }
        }
    }

    fn process_turret(&mut self, dt: f64) {
        let Some(turret) = self.turret.as_mut() else {
            return;
        };
        let tracker = self.controller.tracker();
        let ctx = SimulationContext {
            timestamp_ms: tracker.current_time_ms(),
            elapsed_ms: dt,
            platform_position: self.platform_position,
            targeting: self.controller.targeting(),
        };
        match turret.run(&ctx, tracker, &self.host.world, &mut self.host.commands) {
            Ok(Some(decision)) => self.board.line(&decision.reason.to_string()),
            Ok(None) => {}
            Err(error) => warn!(error = %error, "TURRET_HARDWARE_ERROR: タレットのデバイスを読み取れません"),
        }
    }
}

fn resolve_named(hw: &dyn IHardwareInventory, name: &str) -> Result<BlockId, StartupError> {
    expect_unique(name, hw.named_parts(name))
        .map(|part| part.id)
        .map_err(|source| StartupError::Device {
            name: name.to_string(),
            source,
        })
}

fn resolve_group(hw: &dyn IHardwareInventory, group: &str) -> Result<Vec<BlockId>, StartupError> {
    let parts = hw.group_parts(group);
    if parts.is_empty() {
        return Err(StartupError::Device {
            name: group.to_string(),
            source: HardwareError::NotFound(format!("group {}", group)),
        });
    }
    Ok(parts.into_iter().map(|part| part.id).collect())
}

fn resolve_turret_devices(hw: &dyn IHardwareInventory, config: &TurretConfig) -> Result<TurretDevices, StartupError> {
    Ok(TurretDevices {
        reference: resolve_named(hw, &config.reference_block)?,
        azimuth_rotor: resolve_named(hw, &config.azimuth_rotor)?,
        gyros: resolve_group(hw, &config.gyro_group)?,
        weapons: resolve_group(hw, &config.weapon_group)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::munition::MunitionState;
    use crate::models::traits::ActuatorCommand;

    const BASIC: &str = include_str!("../scenarios/ciws_basic.yaml");

    fn basic() -> ScenarioConfig {
        let config: ScenarioConfig = serde_yaml::from_str(BASIC).expect("parse");
        config.validate().expect("valid");
        config
    }

    fn engine(config: ScenarioConfig) -> SimulationEngine {
        let mut engine = SimulationEngine::new(config, 0).expect("startup");
        engine.initialize().expect("devices");
        engine
    }

    #[test]
    fn test_parse_orders() {
        assert_eq!("fire".parse::<OperatorOrder>(), Ok(OperatorOrder::Fire(None)));
        assert_eq!(
            "fireAll Hornet".parse::<OperatorOrder>(),
            Ok(OperatorOrder::FireAll(Some("Hornet".to_string())))
        );
        assert_eq!(
            "fireStatic 1 -2.5 300 Hornet".parse::<OperatorOrder>(),
            Ok(OperatorOrder::FireStatic {
                position: DVec3::new(1.0, -2.5, 300.0),
                munition: Some("Hornet".to_string()),
            })
        );
        assert_eq!("-damp".parse::<OperatorOrder>(), Ok(OperatorOrder::AdjustDamping(-0.05)));
        assert_eq!("+gain".parse::<OperatorOrder>(), Ok(OperatorOrder::AdjustGain(0.25)));
        assert!("fireStatic 1 2".parse::<OperatorOrder>().is_err());
        assert!("fireStatic 1 x 3".parse::<OperatorOrder>().is_err());
        assert!("launch".parse::<OperatorOrder>().is_err());
        assert!("".parse::<OperatorOrder>().is_err());
    }

    #[test]
    fn test_missing_turret_device_is_fatal() {
        let mut config = basic();
        if let Some(turret) = config.turret.as_mut() {
            turret.azimuth_rotor = "Missing Rotor".to_string();
        }
        let mut engine = SimulationEngine::new(config, 0).expect("startup");
        match engine.initialize() {
            Err(StartupError::Device { name, source }) => {
                assert_eq!(name, "Missing Rotor");
                assert!(matches!(source, HardwareError::NotFound(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_missing_targeting_camera_is_fatal() {
        let mut config = basic();
        config.targeting.targeting_camera = "Camera - Nowhere".to_string();
        let mut engine = SimulationEngine::new(config, 0).expect("startup");
        assert!(matches!(engine.initialize(), Err(StartupError::Device { .. })));
    }

    #[test]
    fn test_unknown_default_munition_is_fatal() {
        let mut config = basic();
        config.targeting.default_static_target_munition = "Missing".to_string();
        assert!(matches!(
            SimulationEngine::new(config, 0),
            Err(StartupError::UnknownMunition(name)) if name == "Missing"
        ));
    }

    #[test]
    fn test_fire_order_launches_munition() {
        let mut engine = engine(basic());

        // 命令は0.5秒、発射間隔は1秒
        while engine.current_time_ms < 1600.0 {
            engine.step();
        }

        assert_eq!(engine.controller.pending_len(), 0);
        assert_eq!(engine.controller.active().len(), 1);
        assert!(engine.controller.active()[0].state > MunitionState::Idle);
        assert!(engine
            .host
            .commands
            .history()
            .iter()
            .any(|c| matches!(c, ActuatorCommand::SetCouplingEnabled { enabled: false, .. })));
    }

    #[test]
    fn test_manual_order_stops_turret() {
        let mut engine = engine(basic());
        for _ in 0..10 {
            engine.step();
        }
        engine.apply_order(OperatorOrder::Manual);
        engine.apply_order(OperatorOrder::AdjustGain(GAIN_STEP));

        let turret = engine.turret.as_ref().expect("turret");
        assert_eq!(turret.mode(), TurretMode::Manual);
        assert!(!turret.is_firing());
        assert_eq!(turret.gains().gain, TurretConfig::default().gyro_gain + GAIN_STEP);
        assert!(engine
            .host
            .commands
            .history()
            .iter()
            .any(|c| matches!(c, ActuatorCommand::ReleaseGyro { .. })));
    }

    #[test]
    fn test_status_board_is_published() {
        let mut engine = engine(basic());
        for _ in 0..30 {
            engine.step();
        }

        let status = engine.host.status.last().expect("published");
        assert!(status.starts_with("CIWS "));
        assert!(status.contains("Launch bays: 1"));
        assert!(status.contains("Trackers: 1"));
        assert!(status.contains("Fire: Target locked"));
    }

    #[test]
    fn test_salvo_scenario_orders() {
        let config: ScenarioConfig =
            serde_yaml::from_str(include_str!("../scenarios/ciws_salvo.yaml")).expect("parse");
        config.validate().expect("valid");
        let mut engine = engine(config);

        while engine.current_time_ms < 1000.0 {
            engine.step();
        }
        assert_eq!(engine.controller.tracker().exempt_count(), 1);
        assert_eq!(engine.controller.status(), "Exempting 7003 from targeting");

        // 除外された味方機を除く2目標へ1発ずつ
        while engine.current_time_ms < 3000.0 {
            engine.step();
        }
        assert_eq!(engine.controller.pending_len() + engine.controller.active().len(), 2);

        while engine.current_time_ms < 4500.0 {
            engine.step();
        }
        assert_eq!(engine.controller.tracker().exempt_count(), 0);

        let summary = engine.run();
        assert_eq!(summary.active_munitions, 0);
        assert_eq!(summary.pending_munitions, 0);
        let turret = engine.turret.as_ref().expect("turret");
        assert_eq!(turret.gains().gain, TurretConfig::default().gyro_gain + GAIN_STEP);
    }

    #[test]
    fn test_basic_scenario_intercepts_contact() {
        let mut engine = engine(basic());
        let summary = engine.run();

        assert_eq!(summary.surviving_contacts, 0);
        assert_eq!(summary.active_munitions, 0);
        assert_eq!(summary.pending_munitions, 0);
        assert!(engine
            .host
            .commands
            .history()
            .iter()
            .any(|c| matches!(c, ActuatorCommand::Detonate { .. })));
        assert!(engine.host.world.shots_fired(501) > 0, "turret fired at the contact");
    }
}
