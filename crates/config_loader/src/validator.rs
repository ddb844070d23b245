//! 配置校验模块
//!
//! 字段范围由 `validator` derive 声明，这里补充跨字段规则：
//! - (robot_id, instance) 唯一
//! - 同一实例内 (kind, label) 唯一
//! - 存活检查间隔小于心跳超时
//! - 死连接保留时间不短于心跳超时

use std::collections::HashSet;

use ::validator::Validate;
use contracts::{ContractError, PlatformBlueprint};

/// 校验 PlatformBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &PlatformBlueprint) -> Result<(), ContractError> {
    blueprint.validate()?;
    validate_robot_instances(blueprint)?;
    validate_track_labels(blueprint)?;
    validate_broker_timing(blueprint)?;
    Ok(())
}

fn validate_robot_instances(blueprint: &PlatformBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for robot in &blueprint.robots {
        if !seen.insert((robot.robot_id.as_str(), robot.instance)) {
            return Err(ContractError::config_validation(
                format!("robots[{}#{}]", robot.robot_id, robot.instance),
                "duplicate robot instance",
            ));
        }
    }
    Ok(())
}

/// 相机名在同一实例内必须唯一，否则两条轨道会写进同一个槽位
fn validate_track_labels(blueprint: &PlatformBlueprint) -> Result<(), ContractError> {
    for robot in &blueprint.robots {
        let mut seen = HashSet::new();
        for track in &robot.tracks {
            if !seen.insert((track.kind, track.label.as_str())) {
                return Err(ContractError::config_validation(
                    format!(
                        "robots[{}#{}].tracks[{}:{}]",
                        robot.robot_id, robot.instance, track.kind, track.label
                    ),
                    "duplicate track label",
                ));
            }
        }
    }
    Ok(())
}

fn validate_broker_timing(blueprint: &PlatformBlueprint) -> Result<(), ContractError> {
    let broker = &blueprint.broker;

    if broker.liveness_check_interval_ms >= broker.heartbeat_timeout_ms {
        return Err(ContractError::config_validation(
            "broker.liveness_check_interval_ms",
            format!(
                "liveness_check_interval_ms ({}) must be < heartbeat_timeout_ms ({})",
                broker.liveness_check_interval_ms, broker.heartbeat_timeout_ms
            ),
        ));
    }

    if broker.dead_retention_ms < broker.heartbeat_timeout_ms {
        return Err(ContractError::config_validation(
            "broker.dead_retention_ms",
            format!(
                "dead_retention_ms ({}) must be >= heartbeat_timeout_ms ({})",
                broker.dead_retention_ms, broker.heartbeat_timeout_ms
            ),
        ));
    }

    Ok(())
}
