//! # Tracker モジュール
//!
//! センサー観測を取り込み、追跡中ターゲットの集合を管理します。
//!
//! 1ティックの処理:
//!
//! 1. 観測ごとに記録を検索（なければ生成）して `track`
//! 2. 観測が1件もなければ外部経過時間で時計を進める
//! 3. 古すぎる `Tracked` 記録を削除（`Static` は対象外）
//! 4. このティックで観測されなかった記録を `predict` で外挿

use std::collections::{BTreeMap, HashSet};

use glam::DVec3;
use tracing::{debug, info};

use crate::models::common::{math_utils, EntityId};
use crate::models::target::{Relationship, TargetRecord, TargetType};
use crate::models::traits::SensorHit;

/// 静的ターゲットに割り当てるIDの開始値（センサー由来IDと衝突しにくい領域）
const STATIC_ID_BASE: EntityId = 1 << 62;

#[derive(Debug, Clone)]
pub struct TargetTracker {
    /// 追跡中ターゲット（ID順で走査するため BTreeMap）
    targets: BTreeMap<EntityId, TargetRecord>,
    /// 攻撃対象から除外するID
    exempt: HashSet<EntityId>,
    /// 現在のタイムスタンプ（ミリ秒）
    current_time_ms: f64,
    /// この時間（ミリ秒）より長く観測されない追跡目標を忘れる
    forget_after_ms: f64,
    next_static_id: EntityId,
}

impl TargetTracker {
    pub fn new(forget_after_ms: f64) -> Self {
        Self {
            targets: BTreeMap::new(),
            exempt: HashSet::new(),
            current_time_ms: 0.0,
            forget_after_ms,
            next_static_id: STATIC_ID_BASE,
        }
    }

    pub fn current_time_ms(&self) -> f64 {
        self.current_time_ms
    }

    /// センサー観測の取り込み
    ///
    /// # 引数
    ///
    /// * `hits` - このティックの観測
    /// * `elapsed_ms` - 前回ティックからの経過時間（観測がない場合の時計推定に使用）
    ///
    /// # 戻り値
    ///
    /// センサー由来のタイムスタンプで時計が更新された場合はtrue
    pub fn observe(&mut self, hits: &[SensorHit], elapsed_ms: f64) -> bool {
        let mut updated_timestamp = false;

        for hit in hits {
            let record = self.targets.entry(hit.entity_id).or_insert_with(|| {
                info!(
                    target_id = hit.entity_id,
                    relationship = ?hit.relationship,
                    position_x = hit.position.x,
                    position_y = hit.position.y,
                    position_z = hit.position.z,
                    "TARGET_ACQUIRED: 新しいターゲットを捕捉しました"
                );
                TargetRecord::new(hit.entity_id, TargetType::Tracked, hit.relationship)
            });
            record.track(hit.position, hit.velocity, hit.timestamp_ms);

            updated_timestamp = true;
            self.current_time_ms = hit.timestamp_ms;
        }

        // センサーが唯一の絶対時刻なので、観測がなければ経過時間から推定する
        if !updated_timestamp {
            self.current_time_ms += elapsed_ms.max(0.0);
        }

        let now = self.current_time_ms;
        let forget_after = self.forget_after_ms;
        self.targets.retain(|id, record| {
            let stale = record.target_type == TargetType::Tracked && record.age_ms(now) > forget_after;
            if stale {
                info!(
                    target_id = *id,
                    last_seen = ?record.last_seen,
                    current_time = now,
                    "TARGET_FORGOTTEN: 観測が途絶えたターゲットを破棄しました"
                );
            }
            !stale
        });

        for record in self.targets.values_mut() {
            if !record.seen_at(now) {
                record.predict(now);
            }
        }

        updated_timestamp
    }

    /// 固定座標ターゲットを登録してIDを返す
    pub fn insert_static(&mut self, position: DVec3) -> EntityId {
        let id = self.next_static_id;
        self.next_static_id += 1;

        let mut record = TargetRecord::new(id, TargetType::Static, Relationship::Neutral);
        record.track(position, DVec3::ZERO, self.current_time_ms);
        self.targets.insert(id, record);

        debug!(target_id = id, "TARGET_STATIC_REGISTERED: 固定座標ターゲットを登録しました");
        id
    }

    pub fn find(&self, id: EntityId) -> Option<&TargetRecord> {
        self.targets.get(&id)
    }

    /// 記録を削除（参照されなくなった固定座標ターゲットの後始末に使用）
    pub fn remove(&mut self, id: EntityId) -> Option<TargetRecord> {
        self.targets.remove(&id)
    }

    /// 現在のタイムスタンプで観測され、除外されていない追跡ターゲット
    ///
    /// 固定座標ターゲットは選択の対象になりません。
    pub fn visible(&self) -> impl Iterator<Item = &TargetRecord> + '_ {
        let now = self.current_time_ms;
        self.targets.values().filter(move |t| {
            t.target_type == TargetType::Tracked && t.seen_at(now) && !self.exempt.contains(&t.id)
        })
    }

    pub fn closest(&self, from: DVec3) -> Option<&TargetRecord> {
        let mut best: Option<(&TargetRecord, f64)> = None;
        for target in self.visible() {
            let distance = target.position.distance(from);
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((target, distance));
            }
        }
        best.map(|(t, _)| t)
    }

    pub fn farthest(&self, from: DVec3) -> Option<&TargetRecord> {
        let mut best: Option<(&TargetRecord, f64)> = None;
        for target in self.visible() {
            let distance = target.position.distance(from);
            if best.is_none_or(|(_, d)| distance > d) {
                best = Some((target, distance));
            }
        }
        best.map(|(t, _)| t)
    }

    /// 最も脅威度の高いターゲット
    ///
    /// 自分へ向かう視線方向とターゲット速度方向の内積が大きいほど接近中とみなします。
    /// 同値の場合は先に走査した（IDの小さい）ターゲットを選びます。
    pub fn most_threatening(&self, from: DVec3) -> Option<&TargetRecord> {
        let mut best: Option<(&TargetRecord, f64)> = None;
        for target in self.visible() {
            let incoming_los = math_utils::safe_normalize(from - target.position);
            let heading = math_utils::safe_normalize(target.velocity);
            let dot = incoming_los.dot(heading);
            if best.is_none_or(|(_, d)| dot > d) {
                best = Some((target, dot));
            }
        }
        best.map(|(t, _)| t)
    }

    pub fn exempt(&mut self, id: EntityId) {
        self.exempt.insert(id);
    }

    pub fn clear_exemptions(&mut self) {
        self.exempt.clear();
    }

    pub fn exempt_count(&self) -> usize {
        self.exempt.len()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetRecord> + '_ {
        self.targets.values()
    }
}
