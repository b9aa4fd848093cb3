//! # Hardware モジュール
//!
//! 誘導弾や発射ベイを構成する物理ブロックを、役割タグ付きのレコードとして表現します。
//! 割り当て処理は動的な型判定ではなく、`PartRole` と距離によるフィルタで部品を探します。

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::models::common::{AssemblyId, BlockId, EntityId, Frame};

/// 発射ベイと誘導弾側の結合ブロックを対とみなす距離（m）
pub const MERGE_TOLERANCE: f64 = 5.0;

/// 部品の役割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartRole {
    RemoteControl,
    Gyro,
    Thruster,
    Battery,
    FuelTank,
    Warhead,
    ProximitySensor,
    Connector,
    MergeCoupling,
    Camera,
    Weapon,
    Rotor,
}

/// 役割ごとの状態を持つ部品の種類
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartKind {
    RemoteControl,
    Gyro,
    Thruster { max_thrust: f64 },
    Battery { has_charge: bool },
    FuelTank { filled_ratio: f64 },
    Warhead { armed: bool },
    ProximitySensor { last_detected: Option<EntityId> },
    Connector { connected: bool },
    MergeCoupling { enabled: bool },
    Camera,
    Weapon,
    Rotor,
}

impl PartKind {
    pub fn role(&self) -> PartRole {
        match self {
            PartKind::RemoteControl => PartRole::RemoteControl,
            PartKind::Gyro => PartRole::Gyro,
            PartKind::Thruster { .. } => PartRole::Thruster,
            PartKind::Battery { .. } => PartRole::Battery,
            PartKind::FuelTank { .. } => PartRole::FuelTank,
            PartKind::Warhead { .. } => PartRole::Warhead,
            PartKind::ProximitySensor { .. } => PartRole::ProximitySensor,
            PartKind::Connector { .. } => PartRole::Connector,
            PartKind::MergeCoupling { .. } => PartRole::MergeCoupling,
            PartKind::Camera => PartRole::Camera,
            PartKind::Weapon => PartRole::Weapon,
            PartKind::Rotor => PartRole::Rotor,
        }
    }
}

/// 部品のスナップショット（そのティックの間だけ有効）
#[derive(Debug, Clone, PartialEq)]
pub struct PartRecord {
    pub id: BlockId,
    /// 表示名（"[Hornet]" のような種別タグを含む）
    pub name: String,
    pub kind: PartKind,
    /// 所属アセンブリ
    pub assembly: AssemblyId,
    pub position: DVec3,
    pub frame: Frame,
}

impl PartRecord {
    pub fn role(&self) -> PartRole {
        self.kind.role()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.name.contains(tag)
    }
}

/// 発射ベイの種類
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BayKind {
    /// マージ結合式: 対になる結合ブロックを持つ別アセンブリが近接して接続される
    Merge {
        #[serde(default)]
        connected: bool,
    },
    /// 機械的切り離し式（ローター/ヒンジ）: 先端側アセンブリがベイに取り付く
    Detach {
        attached: bool,
        #[serde(default)]
        top_assembly: Option<AssemblyId>,
    },
}

/// 発射ベイ（プラットフォーム側の取り付け点）
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchBay {
    pub id: BlockId,
    pub name: String,
    pub assembly: AssemblyId,
    pub position: DVec3,
    pub kind: BayKind,
}

impl LaunchBay {
    pub fn is_detach(&self) -> bool {
        matches!(self.kind, BayKind::Detach { .. })
    }
}

/// 格納庫扉の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorStatus {
    Open,
    Opening,
    Closing,
    Closed,
}

/// ハードウェア照会のエラー
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// 指定されたブロックが存在しない（破壊済みを含む）
    NotFound(String),
    /// 名前検索で複数のブロックが見つかった
    Ambiguous { name: String, count: usize },
    /// 物理プロパティの読み取りに失敗
    Introspection { block: BlockId, reason: String },
}

impl std::fmt::Display for HardwareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardwareError::NotFound(what) => write!(f, "ブロックが見つかりません: {}", what),
            HardwareError::Ambiguous { name, count } => {
                write!(f, "ブロック `{}` が1個ではなく{}個見つかりました", name, count)
            }
            HardwareError::Introspection { block, reason } => {
                write!(f, "ブロック {} の読み取りに失敗: {}", block, reason)
            }
        }
    }
}

impl std::error::Error for HardwareError {}

/// 部品リストから役割と距離で絞り込み
///
/// `radius` が 0 以下の場合は距離による絞り込みを行いません。
pub fn parts_with_role<'a>(
    parts: &'a [PartRecord],
    role: PartRole,
    radius: f64,
    from: DVec3,
) -> impl Iterator<Item = &'a PartRecord> + 'a {
    parts
        .iter()
        .filter(move |p| p.role() == role && (radius <= 0.0 || p.position.distance(from) < radius))
}

/// 名前で一意なブロックを1個だけ取り出す
///
/// 0個または複数個の場合は起動時エラーとして扱うためにエラーを返します。
pub fn expect_unique(name: &str, mut found: Vec<PartRecord>) -> Result<PartRecord, HardwareError> {
    match found.len() {
        0 => Err(HardwareError::NotFound(name.to_string())),
        1 => Ok(found.remove(0)),
        count => Err(HardwareError::Ambiguous {
            name: name.to_string(),
            count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(id: BlockId, kind: PartKind, position: DVec3) -> PartRecord {
        PartRecord {
            id,
            name: format!("Part {} [Hornet]", id),
            kind,
            assembly: 1,
            position,
            frame: Frame::default(),
        }
    }

    #[test]
    fn test_parts_with_role_filters_by_role_and_radius() {
        let parts = vec![
            part(1, PartKind::Gyro, DVec3::ZERO),
            part(2, PartKind::Gyro, DVec3::new(10.0, 0.0, 0.0)),
            part(3, PartKind::Thruster { max_thrust: 100.0 }, DVec3::ZERO),
        ];

        let near: Vec<BlockId> = parts_with_role(&parts, PartRole::Gyro, 5.0, DVec3::ZERO)
            .map(|p| p.id)
            .collect();
        assert_eq!(near, vec![1]);

        let all = parts_with_role(&parts, PartRole::Gyro, 0.0, DVec3::ZERO).count();
        assert_eq!(all, 2);
        assert!(parts[0].has_tag("[Hornet]"));
    }

    #[test]
    fn test_expect_unique() {
        let one = vec![part(1, PartKind::Camera, DVec3::ZERO)];
        assert_eq!(expect_unique("cam", one).map(|p| p.id), Ok(1));

        assert_eq!(
            expect_unique("cam", Vec::new()),
            Err(HardwareError::NotFound("cam".to_string()))
        );

        let two = vec![
            part(1, PartKind::Camera, DVec3::ZERO),
            part(2, PartKind::Camera, DVec3::ZERO),
        ];
        assert!(matches!(
            expect_unique("cam", two),
            Err(HardwareError::Ambiguous { count: 2, .. })
        ));
    }
}
