// 基本的なデータ型と数学ユーティリティ
pub mod common;

// 外部協調者（センサー、アクチュエータ、ハードウェア在庫、状態表示）のインターフェース
pub mod traits;

// 部品・発射ベイのレコード
pub mod hardware;

// 目標追跡
pub mod target;
pub mod tracker;

// 誘導計算と誘導弾のライフサイクル
pub mod guidance;
pub mod munition;
pub mod launcher;

// 直射火器とタレット
pub mod fire_control;
pub mod turret;

// 1ティック分の処理をまとめる制御器
pub mod controller;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use hardware::{BayKind, DoorStatus, HardwareError, LaunchBay, PartKind, PartRecord, PartRole};
pub use target::{Relationship, TargetRecord, TargetType};
pub use tracker::TargetTracker;
pub use guidance::{GuidanceFlags, GyroGains, LeadSolution, PnInput, PnSolution};
pub use munition::{Munition, MunitionParts, MunitionState, Shortfall};
pub use launcher::{Allocation, LaunchSequencer, SkipReason};
pub use fire_control::{FireControlPolicy, FireDecision, FireReason, WeaponActuator, WeaponMode};
pub use turret::{Turret, TurretDevices};
pub use controller::{StartupError, StatusBoard, TargetingController};
