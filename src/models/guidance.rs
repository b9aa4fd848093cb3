//! # Guidance モジュール
//!
//! 誘導弾と直射火器の照準計算を提供します。
//!
//! - **比例航法（PN）**: 視線角速度と接近速度に比例した横加速度を指令
//! - **リード予測**: 弾速と目標速度から未来位置（会合点）を求める
//! - **巡航ウェイポイント**: 天体の裏側にいる目標へ巡航高度を経由して向かう
//! - **ジャイロ旋回**: 希望方向をジャイロごとのローカル回転レートへ変換
//!
//! ゼロ除算やNaNはエラーにせず、フラグを立ててその操作をスキップします。

use std::f64::consts::FRAC_PI_2;

use glam::{DQuat, DVec3};

use crate::models::common::{math_utils, BlockId, Frame, ACTUATION_LIMIT, STANDARD_GRAVITY};

/// 横加速度要求がこの比率を超えたらオーバーステアとみなす
pub const OVERSTEER_THRESHOLD: f64 = 0.98;

/// オーバーステア時に速度打ち消し方向へ寄せる重み
const OVERSTEER_BLEND: f64 = 40.0;

/// 会合時間がこれ未満なら現在位置をそのまま狙う（秒）
pub const MIN_INTERCEPT_TIME_S: f64 = 0.01;

/// 目標との天体中心角の内積がこれ未満なら巡航する
pub const CRUISE_DOT_THRESHOLD: f64 = 0.995;

/// 巡航ウェイポイントまでの距離（m）
const CRUISE_WAYPOINT_DISTANCE: f64 = 100.0;

/// 推力出力の下限・上限
const MIN_THRUST_POWER: f64 = 0.1;
const MAX_THRUST_POWER: f64 = 1.0;

/// 数値的な縮退を示す診断フラグ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuidanceFlags {
    /// 要求横加速度が利用可能加速度を超え、速度打ち消し方向へ切り替えた
    pub oversteer: bool,
    /// 推力方向の内積が計算できなかった（ゼロに置換）
    pub bad_thrust: bool,
    /// 残余前進加速度の平方根が負になった（ゼロに置換）
    pub bad_rejected_accel: bool,
}

/// 比例航法の入力
#[derive(Debug, Clone, Copy)]
pub struct PnInput {
    pub position: DVec3,
    pub previous_position: DVec3,
    pub target_position: DVec3,
    pub previous_target_position: DVec3,
    /// 誘導弾の推力方向（前方）
    pub thrust_axis: DVec3,
    pub gravity: DVec3,
    /// 利用可能な最大加速度（推力 / 質量）
    pub max_acceleration: f64,
    pub pn_gain: f64,
    pub elapsed_s: f64,
}

/// 比例航法の解
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnSolution {
    /// 最終的な希望姿勢方向（単位ベクトル）
    pub direction: DVec3,
    pub lateral_direction: DVec3,
    /// オーバーステア処理後の横加速度
    pub lateral_acceleration: DVec3,
    /// 残余前進成分を加えた加速度指令
    pub commanded_acceleration: DVec3,
    /// スラスター出力（0.1〜1.0）
    pub thrust_power: f64,
    pub own_velocity: DVec3,
    pub target_velocity: DVec3,
    pub closing_velocity: f64,
    pub los_rate: f64,
    pub flags: GuidanceFlags,
}

/// 比例航法による誘導計算
///
/// 前回と今回の視線（LOS）単位ベクトルから視線角速度を求め、
/// `LOS方向 * N * LOS角速度 * 接近速度 + LOS変化 * g * 0.5 * N` を横加速度とします。
///
/// # 戻り値
///
/// 経過時間が正でない場合はNone（そのティックの誘導をスキップ）
pub fn proportional_navigation(input: &PnInput) -> Option<PnSolution> {
    if !(input.elapsed_s > 0.0) {
        return None;
    }
    let dt = input.elapsed_s;

    let own_velocity = (input.position - input.previous_position) / dt;
    let target_velocity = (input.target_position - input.previous_target_position) / dt;

    let los_old = math_utils::safe_normalize(input.previous_target_position - input.previous_position);
    let los_new = math_utils::safe_normalize(input.target_position - input.position);
    let relative_direction = math_utils::safe_normalize(target_velocity - own_velocity);

    let (los_rate, los_delta) = if los_old == DVec3::ZERO {
        (0.0, DVec3::ZERO)
    } else {
        let delta = los_new - los_old;
        (delta.length() / dt, delta)
    };

    let closing_velocity = (target_velocity - own_velocity).length();

    let lateral_direction = math_utils::safe_normalize(
        relative_direction.cross(los_new).cross(relative_direction),
    );
    let raw_lateral = lateral_direction * input.pn_gain * los_rate * closing_velocity
        + los_delta * STANDARD_GRAVITY * (0.5 * input.pn_gain);

    let mut flags = GuidanceFlags::default();
    let (lateral_acceleration, oversteer) =
        limit_oversteer(raw_lateral, own_velocity, input.max_acceleration);
    flags.oversteer = oversteer;

    let thrust_power = match lateral_acceleration.try_normalize() {
        Some(lateral_unit) => input.thrust_axis.dot(lateral_unit),
        None => f64::NAN,
    };
    let thrust_power = if thrust_power.is_nan() {
        flags.bad_thrust = true;
        0.0
    } else {
        thrust_power
    };
    let thrust_power = thrust_power.clamp(MIN_THRUST_POWER, MAX_THRUST_POWER);

    let rejected_sq = input.max_acceleration * input.max_acceleration - lateral_acceleration.length_squared();
    let rejected = if rejected_sq < 0.0 || rejected_sq.is_nan() {
        flags.bad_rejected_accel = true;
        0.0
    } else {
        rejected_sq.sqrt()
    };
    let commanded_acceleration = lateral_acceleration + los_new * rejected;

    let direction = math_utils::safe_normalize(commanded_acceleration - input.gravity);

    Some(PnSolution {
        direction,
        lateral_direction,
        lateral_acceleration,
        commanded_acceleration,
        thrust_power,
        own_velocity,
        target_velocity,
        closing_velocity,
        los_rate,
        flags,
    })
}

/// オーバーステア処理
///
/// `|横加速度| / 最大加速度` が閾値を超えた場合、速度を打ち消す方向へ寄せた上で
/// 大きさを最大加速度に揃えます。
///
/// # 戻り値
///
/// (処理後の横加速度, オーバーステアしたか)
pub fn limit_oversteer(lateral: DVec3, own_velocity: DVec3, max_acceleration: f64) -> (DVec3, bool) {
    let requirement = if max_acceleration > 0.0 {
        lateral.length() / max_acceleration
    } else {
        f64::INFINITY
    };

    if requirement > OVERSTEER_THRESHOLD {
        let cancel = math_utils::safe_normalize(-own_velocity);
        let blend_weight = if requirement.is_finite() { requirement } else { 1.0 };
        let blended = lateral + cancel * blend_weight * OVERSTEER_BLEND;
        (math_utils::safe_normalize(blended) * max_acceleration.max(0.0), true)
    } else {
        (lateral, false)
    }
}

/// 直射火器のリード予測結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LeadSolution {
    /// 会合点と会合時間（秒）
    Intercept { point: DVec3, time_s: f64 },
    /// 会合時間がほぼゼロのため現在位置を返す
    Immediate { point: DVec3 },
    /// 接線速度が弾速を超えて追従できない（目標速度方向 * 弾速）
    OutOfReach { direction: DVec3 },
}

impl LeadSolution {
    /// 射手から見た照準方向（単位ベクトル）
    pub fn aim_direction(&self, shooter_position: DVec3) -> DVec3 {
        match *self {
            LeadSolution::Intercept { point, .. } | LeadSolution::Immediate { point } => {
                math_utils::safe_normalize(point - shooter_position)
            }
            LeadSolution::OutOfReach { direction } => math_utils::safe_normalize(direction),
        }
    }

    /// 照準点までの距離（追従不能時はNone）
    pub fn distance_from(&self, shooter_position: DVec3) -> Option<f64> {
        match *self {
            LeadSolution::Intercept { point, .. } | LeadSolution::Immediate { point } => {
                Some(point.distance(shooter_position))
            }
            LeadSolution::OutOfReach { .. } => None,
        }
    }
}

/// リード予測による会合点の計算
///
/// 目標の相対速度を視線方向成分と接線成分に分解し、接線成分を弾で打ち消した残りの
/// 弾速で距離を詰める時間から会合点を求めます。
pub fn lead_intercept(
    shooter_position: DVec3,
    shooter_velocity: DVec3,
    target_position: DVec3,
    target_velocity: DVec3,
    target_acceleration: DVec3,
    shot_speed: f64,
) -> LeadSolution {
    let to_target = target_position - shooter_position;
    let distance = to_target.length();
    let dir_to_target = math_utils::safe_normalize(to_target);

    let relative_velocity = target_velocity - shooter_velocity;
    let radial_speed = relative_velocity.dot(dir_to_target);
    let velocity_along = dir_to_target * radial_speed;
    let velocity_tangential = relative_velocity - velocity_along;
    let tangential_speed = velocity_tangential.length();

    if tangential_speed > shot_speed {
        return LeadSolution::OutOfReach {
            direction: math_utils::safe_normalize(target_velocity) * shot_speed,
        };
    }

    let shot_speed_along = (shot_speed * shot_speed - tangential_speed * tangential_speed).sqrt();
    let closing_speed = shot_speed_along - radial_speed;
    let time_s = if closing_speed != 0.0 { distance / closing_speed } else { 0.0 };

    if time_s > MIN_INTERCEPT_TIME_S {
        let shot_velocity = dir_to_target * shot_speed_along + velocity_tangential;
        let point = shooter_position
            + shot_velocity * time_s
            + 0.5 * target_acceleration * time_s * time_s;
        LeadSolution::Intercept { point, time_s }
    } else {
        LeadSolution::Immediate { point: target_position }
    }
}

/// 巡航計画
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CruisePlan {
    /// 誘導弾と目標の、天体中心から見た方向の内積
    pub cruise_dot: f64,
    /// 巡航中であれば代わりに向かうウェイポイント
    pub waypoint: Option<DVec3>,
}

/// 天体の曲率越しの目標に対する巡航ウェイポイント
///
/// 上昇するにつれて機首を目標方向へ倒し、巡航高度付近で水平になります。
///
/// # 引数
///
/// * `cruise_offset` - 天体中心から巡航高度までの距離（発射時の半径 + 巡航高度）
pub fn cruise_waypoint(
    position: DVec3,
    target_position: DVec3,
    planet_center: DVec3,
    gravity: DVec3,
    cruise_altitude: f64,
    cruise_offset: f64,
) -> CruisePlan {
    let own_dir = math_utils::safe_normalize(position - planet_center);
    let target_dir = math_utils::safe_normalize(target_position - planet_center);
    let cruise_dot = own_dir.dot(target_dir);

    if cruise_dot >= CRUISE_DOT_THRESHOLD {
        return CruisePlan { cruise_dot, waypoint: None };
    }

    let up = match (-gravity).try_normalize() {
        Some(up) => up,
        None => own_dir,
    };
    let to_target = math_utils::safe_normalize(target_position - position);

    let launch_radius = cruise_offset - cruise_altitude;
    let altitude = (position.distance(planet_center) - launch_radius).max(0.0);
    let pitch_down_ratio = if cruise_altitude > 0.0 {
        ((altitude.min(cruise_altitude) + altitude / 10.0) / cruise_altitude).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let desired = match up.cross(to_target).try_normalize() {
        Some(axis) => DQuat::from_axis_angle(axis, pitch_down_ratio * FRAC_PI_2).mul_vec3(up),
        None => up,
    };

    CruisePlan {
        cruise_dot,
        waypoint: Some(position + desired * CRUISE_WAYPOINT_DISTANCE),
    }
}

/// ジャイロ制御ゲイン
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroGains {
    pub gain: f64,
    pub damping: f64,
}

/// 1台のジャイロへの回転レート指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroCommand {
    pub block: BlockId,
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// ジャイロ旋回の結果
#[derive(Debug, Clone, PartialEq)]
pub struct GyroTurn {
    /// 減衰前の方位角（次ティックの微分項に使用）
    pub yaw: f64,
    /// 減衰前の仰角
    pub pitch: f64,
    /// 各ジャイロへの指令。NaNを検出した場合はNone（何も指令しない）
    pub commands: Option<Vec<GyroCommand>>,
}

/// 希望方向へ向けるジャイロ指令の計算
///
/// 基準ブロックのフレームで方位角・仰角を求め、前ティックの値との差分で
/// 微分減衰を加えてから各ジャイロのローカルフレームへ変換します。
///
/// # 引数
///
/// * `elapsed_ms` - 前回ティックからの経過時間（0以下なら減衰項を省略）
/// * `direction` - ワールド座標の希望方向
/// * `reference` - 前方基準ブロックのフレーム
/// * `gyros` - ジャイロのIDと現在フレーム
/// * `previous` - 前ティックの (方位角, 仰角)
/// * `spinning` - ロール軸を最大値に固定する
pub fn gyro_turn(
    elapsed_ms: f64,
    direction: DVec3,
    gains: GyroGains,
    reference: &Frame,
    gyros: &[(BlockId, Frame)],
    previous: (f64, f64),
    spinning: bool,
) -> GyroTurn {
    let (prev_yaw, prev_pitch) = previous;
    let aborted = GyroTurn {
        yaw: prev_yaw,
        pitch: prev_pitch,
        commands: None,
    };

    if math_utils::has_nan(direction) {
        return aborted;
    }

    let local = reference.to_local(direction);
    let (azimuth, elevation) = math_utils::azimuth_elevation(local);

    let mut damped_azimuth = azimuth;
    let mut damped_elevation = elevation;
    let elapsed_s = elapsed_ms / 1000.0;
    if elapsed_s > 0.0 {
        damped_azimuth += gains.damping * ((azimuth - prev_yaw) / elapsed_s);
        damped_elevation += gains.damping * ((elevation - prev_pitch) / elapsed_s);
    }

    let world_rate = reference.to_world(DVec3::new(damped_elevation, damped_azimuth, 0.0));

    let mut commands = Vec::with_capacity(gyros.len());
    for (block, frame) in gyros {
        let rate = frame.to_local(world_rate);
        if math_utils::has_nan(rate) {
            return aborted;
        }

        commands.push(GyroCommand {
            block: *block,
            pitch: math_utils::clamp_actuation(-rate.x * gains.gain),
            yaw: math_utils::clamp_actuation(-rate.y * gains.gain),
            roll: if spinning {
                ACTUATION_LIMIT
            } else {
                math_utils::clamp_actuation(-rate.z * gains.gain)
            },
        });
    }

    GyroTurn {
        yaw: azimuth,
        pitch: elevation,
        commands: Some(commands),
    }
}
