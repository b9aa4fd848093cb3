//! # ciws
//!
//! 近接防御システム（CIWS）の目標追跡・誘導・誘導弾ライフサイクル管理エンジン。
//!
//! ティック駆動の単一スレッド設計で、外部のセンサー・アクチュエータ・
//! ハードウェア在庫をトレイト越しに扱います。

pub mod host;
pub mod logging;
pub mod models;
pub mod scenario;
pub mod simulation;
