use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::models::common::{AssemblyId, BlockId, EntityId, Frame};
use crate::models::hardware::{BayKind, DoorStatus, PartKind};
use crate::models::target::Relationship;

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// 1ティックの経過時間（ミリ秒）
    pub dt_ms: f64,
    pub t_max_s: f64,
}

/// プラットフォーム設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    pub position: DVec3,
}

/// 目標追跡設定
///
/// 起動時に1回読み込まれ、以降は読み取り専用です。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetingConfig {
    /// 観測されない追跡目標を忘れるまでの時間（ミリ秒）
    pub forget_target_after_ms: f64,
    /// 他に目標がある場合、この時間観測されなければ目標を切り替える（ミリ秒）
    pub change_target_after_ms: f64,
    /// 発射間隔の最小値（ミリ秒）
    pub launch_delay_ms: f64,
    /// 発射ベイとして使用するブロックのタグ
    pub launch_bay_tag: String,
    /// 発射前に開いている必要がある格納庫扉のグループ名
    pub hangar_door_group: String,
    /// 目標指定用カメラ名（空の場合は使用しない）
    pub targeting_camera: String,
    /// 移動目標に対して既定で発射する誘導弾の種類
    pub default_moving_target_munition: String,
    /// 静止目標に対して既定で発射する誘導弾の種類
    pub default_static_target_munition: String,
    /// 状態表示パネル名
    pub status_panel: String,
    /// 他のアセンブリ上の追跡タレットも観測に使用する
    pub use_designators_from_other_assemblies: bool,
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            forget_target_after_ms: 5000.0,
            change_target_after_ms: 1000.0,
            launch_delay_ms: 1000.0,
            launch_bay_tag: "[Launch Bay]".to_string(),
            hangar_door_group: String::new(),
            targeting_camera: String::new(),
            default_moving_target_munition: String::new(),
            default_static_target_munition: String::new(),
            status_panel: "LCD Panel - CIWS".to_string(),
            use_designators_from_other_assemblies: false,
        }
    }
}

/// 誘導弾の構成テンプレート
///
/// 誘導弾ごとに複製して所有させるため、すべてのフィールドは値型です。
/// 名前 `Name` の誘導弾は、表示名に `[Name]` を含む部品で構成されます。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MunitionConfig {
    pub name: String,

    pub thruster_count: u32,
    pub battery_count: u32,
    pub fuel_tank_count: u32,
    pub warhead_count: u32,
    pub gyro_count: u32,
    pub sensor_count: u32,

    /// 結合ブロックからリモートコントロールを探す距離（0は無制限）
    pub remote_distance: f64,
    /// 結合ブロックからジャイロを探す距離（0の場合は max_component_distance）
    pub gyro_distance: f64,
    /// 結合ブロックからその他の部品を探す距離（0は無制限）
    pub max_component_distance: f64,

    /// 誘導開始までに発射点から離れる距離（m）
    pub launch_distance: f64,
    /// 発射時のスラスター出力（0.0〜1.0）
    pub launch_thrust: f64,
    /// 比例航法定数（3〜5程度）
    pub pn_gain: f64,
    pub gyro_gain: f64,
    pub gyro_damping_gain: f64,
    /// 弾頭を起爆準備する残距離（m）
    pub arm_distance: f64,
    /// 弾頭を起爆する残距離（m）
    pub detonate_distance: f64,
    /// 巡航高度（m）
    pub cruise_altitude: f64,
    /// ロール軸を最大回転に固定する
    pub spin: bool,
}

impl Default for MunitionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            thruster_count: 0,
            battery_count: 0,
            fuel_tank_count: 0,
            warhead_count: 0,
            gyro_count: 1,
            sensor_count: 0,
            remote_distance: 0.0,
            gyro_distance: 0.0,
            max_component_distance: 0.0,
            launch_distance: 7.5,
            launch_thrust: 0.05,
            pn_gain: 4.0,
            gyro_gain: 36.0,
            gyro_damping_gain: 0.3,
            arm_distance: 75.0,
            detonate_distance: 2.5,
            cruise_altitude: 500.0,
            spin: false,
        }
    }
}

impl MunitionConfig {
    pub fn builder(name: &str) -> MunitionConfigBuilder {
        MunitionConfigBuilder::new(name)
    }

    /// 部品の表示名に含まれるタグ
    pub fn tag(&self) -> String {
        format!("[{}]", self.name)
    }

    /// ジャイロの探索半径
    pub fn effective_gyro_distance(&self) -> f64 {
        if self.gyro_distance > 0.0 {
            self.gyro_distance
        } else {
            self.max_component_distance
        }
    }
}

/// `MunitionConfig` のバリエーションを作るビルダー
#[derive(Debug, Clone)]
pub struct MunitionConfigBuilder {
    config: MunitionConfig,
}

impl MunitionConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: MunitionConfig {
                name: name.to_string(),
                ..MunitionConfig::default()
            },
        }
    }

    /// 既存の構成を元に作成
    pub fn from_config(config: &MunitionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    /// 必要部品数 (スラスター, バッテリー, 燃料タンク, 弾頭)
    pub fn parts(mut self, thrusters: u32, batteries: u32, fuel_tanks: u32, warheads: u32) -> Self {
        self.config.thruster_count = thrusters;
        self.config.battery_count = batteries;
        self.config.fuel_tank_count = fuel_tanks;
        self.config.warhead_count = warheads;
        self
    }

    pub fn gyro_count(mut self, count: u32) -> Self {
        self.config.gyro_count = count;
        self
    }

    pub fn sensor_count(mut self, count: u32) -> Self {
        self.config.sensor_count = count;
        self
    }

    /// 探索半径 (リモート, ジャイロ, その他)
    pub fn search_radii(mut self, remote: f64, gyro: f64, component: f64) -> Self {
        self.config.remote_distance = remote;
        self.config.gyro_distance = gyro;
        self.config.max_component_distance = component;
        self
    }

    pub fn launch(mut self, distance: f64, thrust: f64) -> Self {
        self.config.launch_distance = distance;
        self.config.launch_thrust = thrust;
        self
    }

    pub fn gains(mut self, pn_gain: f64, gyro_gain: f64, gyro_damping_gain: f64) -> Self {
        self.config.pn_gain = pn_gain;
        self.config.gyro_gain = gyro_gain;
        self.config.gyro_damping_gain = gyro_damping_gain;
        self
    }

    pub fn warhead_distances(mut self, arm: f64, detonate: f64) -> Self {
        self.config.arm_distance = arm;
        self.config.detonate_distance = detonate;
        self
    }

    pub fn spin(mut self, spin: bool) -> Self {
        self.config.spin = spin;
        self
    }

    pub fn build(self) -> MunitionConfig {
        self.config
    }
}

/// 直射火器の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponType {
    /// 連射武器（射撃開始/停止の切り替え）
    GatlingGun,
    /// 単発武器を順番に発射する斉射
    RocketLauncher,
}

/// タレットの運用モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurretMode {
    Automatic,
    Manual,
}

/// 直射タレット設定
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TurretConfig {
    pub weapon_type: WeaponType,
    pub mode: TurretMode,
    /// 前方基準ブロック名
    pub reference_block: String,
    /// 方位ローター名（目標がない時はローター後方を向く）
    pub azimuth_rotor: String,
    /// 火器グループ名
    pub weapon_group: String,
    /// ジャイログループ名
    pub gyro_group: String,
    pub gatling_muzzle_velocity: f64,
    pub rocket_muzzle_velocity: f64,
    pub gyro_gain: f64,
    pub gyro_damping_gain: f64,
    /// 射撃を開始する照準内積の閾値
    pub engage_dot: f64,
    /// 射撃を開始する距離（m）
    pub engage_range: f64,
    /// 斉射の全体リロード時間（ミリ秒）
    pub salvo_reload_ms: f64,
}

impl Default for TurretConfig {
    fn default() -> Self {
        Self {
            weapon_type: WeaponType::RocketLauncher,
            mode: TurretMode::Automatic,
            reference_block: "Camera - CIWS".to_string(),
            azimuth_rotor: "Advanced Rotor - CIWS Azimuth".to_string(),
            weapon_group: "CIWS GUNS".to_string(),
            gyro_group: "CIWS GYROS".to_string(),
            gatling_muzzle_velocity: 400.0,
            rocket_muzzle_velocity: 200.0,
            gyro_gain: 60.0,
            gyro_damping_gain: 0.4,
            engage_dot: 0.95,
            engage_range: 1200.0,
            salvo_reload_ms: 1500.0,
        }
    }
}

impl TurretConfig {
    pub fn muzzle_velocity(&self) -> f64 {
        match self.weapon_type {
            WeaponType::GatlingGun => self.gatling_muzzle_velocity,
            WeaponType::RocketLauncher => self.rocket_muzzle_velocity,
        }
    }
}

/// 台本化されたセンサー接触（等速直線運動）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContactConfig {
    pub id: EntityId,
    pub relationship: Relationship,
    pub position: DVec3,
    #[serde(default)]
    pub velocity: DVec3,
    #[serde(default)]
    pub appear_at_s: f64,
    #[serde(default)]
    pub disappear_at_s: Option<f64>,
}

/// 天体（重力源）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanetConfig {
    pub center: DVec3,
    /// 重力が及ぶ半径（m）
    pub gravity_radius_m: f64,
    pub surface_gravity: f64,
}

/// アセンブリ（一体となった構造体）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssemblySpec {
    pub id: AssemblyId,
    pub mass_kg: f64,
    /// 結合先の構造体（未指定なら独立）
    #[serde(default)]
    pub attached_to: Option<AssemblyId>,
}

/// 部品
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartSpec {
    pub id: BlockId,
    pub name: String,
    pub kind: PartKind,
    pub assembly: AssemblyId,
    pub position: DVec3,
    #[serde(default)]
    pub frame: Frame,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// 発射ベイ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BaySpec {
    pub id: BlockId,
    pub name: String,
    pub assembly: AssemblyId,
    pub position: DVec3,
    pub kind: BayKind,
}

/// 格納庫扉
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DoorSpec {
    pub group: String,
    pub status: DoorStatus,
}

/// 追跡タレット（観測源）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DesignatorSpec {
    pub name: String,
    pub assembly: AssemblyId,
}

/// ハードウェア構成
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareLayout {
    /// プラットフォーム本体のアセンブリ
    pub platform_assembly: AssemblyId,
    pub planet: Option<PlanetConfig>,
    pub assemblies: Vec<AssemblySpec>,
    pub parts: Vec<PartSpec>,
    pub bays: Vec<BaySpec>,
    pub doors: Vec<DoorSpec>,
    pub designators: Vec<DesignatorSpec>,
    /// カメラのレイキャストで捕捉できるエンティティ
    pub raycast_target: Option<EntityId>,
}

/// 台本化されたオペレーター命令
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderConfig {
    pub at_s: f64,
    pub command: String,
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub platform: PlatformConfig,
    #[serde(default)]
    pub targeting: TargetingConfig,
    #[serde(default)]
    pub munitions: Vec<MunitionConfig>,
    #[serde(default)]
    pub turret: Option<TurretConfig>,
    #[serde(default)]
    pub contacts: Vec<ContactConfig>,
    #[serde(default)]
    pub hardware: HardwareLayout,
    #[serde(default)]
    pub orders: Vec<OrderConfig>,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        let config: ScenarioConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.sim.dt_ms <= 0.0 {
            return Err(ScenarioError::ValidationError("dt_ms must be positive".to_string()));
        }
        if self.sim.t_max_s <= 0.0 {
            return Err(ScenarioError::ValidationError("t_max_s must be positive".to_string()));
        }

        let targeting = &self.targeting;
        if targeting.forget_target_after_ms < 0.0
            || targeting.change_target_after_ms < 0.0
            || targeting.launch_delay_ms < 0.0
        {
            return Err(ScenarioError::ValidationError(
                "targeting intervals must not be negative".to_string(),
            ));
        }

        for munition in &self.munitions {
            if munition.name.is_empty() {
                return Err(ScenarioError::ValidationError("munition name must not be empty".to_string()));
            }
            if !(0.0..=1.0).contains(&munition.launch_thrust) {
                return Err(ScenarioError::ValidationError(format!(
                    "munition {} launch_thrust {} is outside 0..1",
                    munition.name, munition.launch_thrust
                )));
            }
            if munition.detonate_distance > munition.arm_distance {
                return Err(ScenarioError::ValidationError(format!(
                    "munition {} detonates before it is armed",
                    munition.name
                )));
            }
        }

        // 既定の誘導弾は定義済みである必要がある
        for default_name in [
            &targeting.default_moving_target_munition,
            &targeting.default_static_target_munition,
        ] {
            if !default_name.is_empty() && self.munition(default_name).is_none() {
                return Err(ScenarioError::ValidationError(format!(
                    "default munition {} is not defined",
                    default_name
                )));
            }
        }

        if let Some(turret) = &self.turret {
            if turret.salvo_reload_ms <= 0.0 {
                return Err(ScenarioError::ValidationError(
                    "salvo_reload_ms must be positive".to_string(),
                ));
            }
        }

        for contact in &self.contacts {
            if contact.appear_at_s >= self.sim.t_max_s {
                return Err(ScenarioError::ValidationError(format!(
                    "Contact {} appears at {} >= simulation time {}",
                    contact.id, contact.appear_at_s, self.sim.t_max_s
                )));
            }
        }

        Ok(())
    }

    pub fn munition(&self, name: &str) -> Option<&MunitionConfig> {
        self.munitions.iter().find(|m| m.name == name)
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.1}ミリ秒", self.sim.dt_ms);
        println!("最大時間: {:.1}秒", self.sim.t_max_s);
        println!();

        println!("=== 目標追跡設定 ===");
        println!("忘却時間: {:.0}ミリ秒", self.targeting.forget_target_after_ms);
        println!("目標切替時間: {:.0}ミリ秒", self.targeting.change_target_after_ms);
        println!("発射間隔: {:.0}ミリ秒", self.targeting.launch_delay_ms);
        println!();

        println!("=== 誘導弾 ===");
        for munition in &self.munitions {
            println!(
                "  {}: スラスター{} ジャイロ{} 弾頭{} (PN={:.1})",
                munition.name,
                munition.thruster_count,
                munition.gyro_count,
                munition.warhead_count,
                munition.pn_gain
            );
        }
        println!();

        if let Some(turret) = &self.turret {
            println!("=== タレット ===");
            println!("火器: {:?} (弾速 {:.0}m/s)", turret.weapon_type, turret.muzzle_velocity());
            println!("交戦距離: {:.0}m", turret.engage_range);
            println!();
        }

        println!("=== ハードウェア ===");
        println!("発射ベイ: {}基", self.hardware.bays.len());
        println!("部品: {}個", self.hardware.parts.len());
        println!("接触: {}件", self.contacts.len());
        for contact in &self.contacts {
            println!("  {}: {:?} (出現時刻: {:.1}秒)", contact.id, contact.relationship, contact.appear_at_s);
        }
    }
}

/// シナリオ読み込みエラー
#[derive(Debug)]
pub enum ScenarioError {
    FileNotFound(std::path::PathBuf),
    IoError(std::path::PathBuf, std::io::Error),
    ParseError(std::path::PathBuf, serde_yaml::Error),
    ValidationError(String),
}

impl std::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioError::FileNotFound(path) => {
                write!(f, "シナリオファイルが見つかりません: {}", path.display())
            }
            ScenarioError::IoError(path, err) => {
                write!(f, "ファイル読み込みエラー {}: {}", path.display(), err)
            }
            ScenarioError::ParseError(path, err) => {
                write!(f, "YAML解析エラー {}: {}", path.display(), err)
            }
            ScenarioError::ValidationError(msg) => {
                write!(f, "設定検証エラー: {}", msg)
            }
        }
    }
}

impl std::error::Error for ScenarioError {}
