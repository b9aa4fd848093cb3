use glam::DVec3;

use crate::models::common::{AssemblyId, BlockId, EntityId};
use crate::models::hardware::{DoorStatus, HardwareError, LaunchBay, PartRecord, PartRole};
use crate::models::target::Relationship;

/// センサーの1回分の観測
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorHit {
    pub entity_id: EntityId,
    pub position: DVec3,
    pub velocity: DVec3,
    pub relationship: Relationship,
    /// 観測タイムスタンプ（ミリ秒）
    pub timestamp_ms: f64,
}

/// 外部センサー群（追跡タレット、カメラ）のインターフェース
pub trait ISensorSource {
    /// このティックの観測を取得
    fn poll(&self) -> Vec<SensorHit>;

    /// 単発のレイキャスト照会
    fn raycast(&self, max_range: f64) -> Option<EntityId>;

    /// 観測に使用しているセンサーの数
    fn sensor_count(&self) -> usize;
}

/// アクチュエータへの指令（応答は返らない）
///
/// 指令はティック終了後にホスト側で反映されます。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorCommand {
    /// 結合ブロックの有効/無効
    SetCouplingEnabled { block: BlockId, enabled: bool },
    /// 機械式ベイの切り離し
    DetachBay { bay: BlockId },
    /// 燃料補給コネクタの切断
    DisconnectConnector { block: BlockId },
    /// 汎用の電源オン/オフ（ジャイロ、スラスター、センサー）
    SetEnabled { block: BlockId, enabled: bool },
    /// バッテリーを放電モードへ
    SetBatteryDischarge { block: BlockId },
    /// 燃料タンクの備蓄モード
    SetStockpile { block: BlockId, enabled: bool },
    /// スラスター出力のオーバーライド（0.0〜1.0）
    SetThrustOverride { block: BlockId, fraction: f64 },
    /// ジャイロの回転レート指令
    GyroOverride {
        block: BlockId,
        pitch: f64,
        yaw: f64,
        roll: f64,
    },
    /// ジャイロのオーバーライド解除
    ReleaseGyro { block: BlockId },
    ArmWarhead { block: BlockId },
    Detonate { block: BlockId },
    /// 連射武器の射撃開始/停止
    SetFiring { block: BlockId, firing: bool },
    /// 単発射撃
    FireOnce { block: BlockId },
}

/// アクチュエータ指令の受け口
pub trait IActuatorSink {
    fn send(&mut self, command: ActuatorCommand);
}

/// ハードウェア在庫の照会インターフェース
///
/// 返されるスナップショットは現在のティックの間だけ有効です。
pub trait IHardwareInventory {
    /// 表示名にタグを含む部品をすべて取得
    fn tagged_parts(&self, tag: &str) -> Vec<PartRecord>;

    /// 表示名が完全一致する部品を取得
    fn named_parts(&self, name: &str) -> Vec<PartRecord>;

    /// 指定グループに属する部品を取得
    fn group_parts(&self, group: &str) -> Vec<PartRecord>;

    /// 指定アセンブリ上の指定役割の部品を取得
    fn parts_on_assembly(&self, assembly: AssemblyId, role: PartRole) -> Vec<PartRecord>;

    /// 部品の現在状態（破壊済みの場合はNotFound）
    fn part(&self, id: BlockId) -> Result<PartRecord, HardwareError>;

    /// 表示名にタグを含む発射ベイを取得
    fn launch_bays(&self, tag: &str) -> Vec<LaunchBay>;

    /// 発射ベイの現在状態
    fn bay(&self, id: BlockId) -> Result<LaunchBay, HardwareError>;

    /// 扉グループの状態
    fn door_group(&self, group: &str) -> Vec<DoorStatus>;

    /// 2つのアセンブリが物理的に同じ構造体に属しているか
    fn same_construct(&self, a: AssemblyId, b: AssemblyId) -> bool;

    /// アセンブリの中心位置
    fn assembly_center(&self, assembly: AssemblyId) -> Result<DVec3, HardwareError>;

    /// アセンブリ単体の質量（結合中は0を返す）
    fn assembly_mass(&self, assembly: AssemblyId) -> Result<f64, HardwareError>;

    /// 指定位置の自然重力
    fn gravity_at(&self, position: DVec3) -> DVec3;

    /// 重力圏内であれば天体中心
    fn planet_center(&self, position: DVec3) -> Option<DVec3>;
}

/// 状態表示の出力先
pub trait IStatusSink {
    fn publish(&mut self, text: &str);
}
