//! 引擎指标收集模块
//!
//! 注册表、同步引擎、会话代理、录制协调器共用的指标记录函数，以及运行摘要聚合器。

use std::collections::BTreeMap;

use contracts::{DataType, InstanceKey, SyncPoint};
use metrics::{counter, gauge, histogram};

/// 记录一个同步点的输出
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_sync_point;
///
/// while let Some(point) = stream.next().await {
///     record_sync_point(stream.key(), &point);
/// }
/// ```
pub fn record_sync_point(key: &InstanceKey, point: &SyncPoint) {
    counter!(
        "telemetry_broker_sync_points_total",
        "robot_id" => key.robot_id.to_string()
    )
    .increment(1);

    let values = point.source_timestamps();
    histogram!("telemetry_broker_sync_point_modalities").record(values.len() as f64);

    // 源时间戳相对 tick 的滞后 (毫秒)
    for (data_type, ts) in values {
        histogram!(
            "telemetry_broker_sample_staleness_ms",
            "data_type" => data_type.as_str()
        )
        .record((point.timestamp - ts) * 1000.0);
    }
}

/// 记录样本接收
pub fn record_sample_received(key: &InstanceKey, data_type: DataType) {
    counter!(
        "telemetry_broker_samples_received_total",
        "robot_id" => key.robot_id.to_string(),
        "data_type" => data_type.as_str()
    )
    .increment(1);
}

/// 记录样本拒收 (乱序/非法)
pub fn record_sample_rejected(key: &InstanceKey, data_type: DataType, reason: &'static str) {
    counter!(
        "telemetry_broker_samples_rejected_total",
        "robot_id" => key.robot_id.to_string(),
        "data_type" => data_type.as_str(),
        "reason" => reason
    )
    .increment(1);
}

/// 记录命令队列满导致的样本丢弃
pub fn record_sample_dropped(key: &InstanceKey) {
    counter!(
        "telemetry_broker_samples_dropped_total",
        "robot_id" => key.robot_id.to_string()
    )
    .increment(1);
}

/// 记录游标队列覆盖 (慢消费者)
pub fn record_cursor_overflow(key: &InstanceKey, overwritten: u64) {
    counter!(
        "telemetry_broker_cursor_overwritten_total",
        "robot_id" => key.robot_id.to_string()
    )
    .increment(overwritten);
}

/// 记录实例连接容量
pub fn record_capacity(key: &InstanceKey, connections: u32, reserved: u32) {
    gauge!(
        "telemetry_broker_instance_connections",
        "robot_id" => key.robot_id.to_string(),
        "instance" => key.instance.to_string()
    )
    .set(connections as f64);
    gauge!(
        "telemetry_broker_instance_reserved",
        "robot_id" => key.robot_id.to_string(),
        "instance" => key.instance.to_string()
    )
    .set(reserved as f64);
}

/// 记录连接状态迁移
pub fn record_connection_transition(from: &'static str, to: &'static str) {
    counter!(
        "telemetry_broker_connection_transitions_total",
        "from" => from,
        "to" => to
    )
    .increment(1);
}

/// 记录握手消息转发
pub fn record_relay(message_type: &'static str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "telemetry_broker_handshake_relayed_total",
        "type" => message_type,
        "status" => status
    )
    .increment(1);
}

/// 记录录制状态迁移
pub fn record_recording_transition(state: &'static str) {
    counter!(
        "telemetry_broker_recording_transitions_total",
        "state" => state
    )
    .increment(1);
}

/// 记录外部协作者调用
pub fn record_collaborator_call(name: &str, success: bool, latency_ms: f64) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "telemetry_broker_collaborator_calls_total",
        "collaborator" => name.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "telemetry_broker_collaborator_latency_ms",
        "collaborator" => name.to_string()
    )
    .record(latency_ms);
}

/// 遥测指标聚合器
///
/// 在内存中聚合同步输出，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct TelemetryAggregator {
    /// 同步点总数
    pub total_points: u64,

    /// 空同步点数 (无任何模态)
    pub empty_points: u64,

    /// 各数据类型出现次数
    pub presence: BTreeMap<DataType, u64>,

    /// 源时间戳滞后统计 (毫秒)
    pub staleness_stats: RunningStats,

    /// 相邻 tick 间隔统计 (毫秒)
    pub tick_interval_stats: RunningStats,

    last_tick: Option<f64>,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, point: &SyncPoint) {
        self.total_points += 1;

        let values = point.source_timestamps();
        if values.is_empty() {
            self.empty_points += 1;
        }
        for data_type in point.present() {
            *self.presence.entry(data_type).or_insert(0) += 1;
        }
        for (_, ts) in values {
            self.staleness_stats.push((point.timestamp - ts) * 1000.0);
        }

        if let Some(last) = self.last_tick {
            self.tick_interval_stats
                .push((point.timestamp - last) * 1000.0);
        }
        self.last_tick = Some(point.timestamp);
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_points: self.total_points,
            empty_points: self.empty_points,
            empty_rate: if self.total_points > 0 {
                self.empty_points as f64 / self.total_points as f64 * 100.0
            } else {
                0.0
            },
            staleness_ms: StatsSummary::from(&self.staleness_stats),
            tick_interval_ms: StatsSummary::from(&self.tick_interval_stats),
            presence: self.presence.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_points: u64,
    pub empty_points: u64,
    pub empty_rate: f64,
    pub staleness_ms: StatsSummary,
    pub tick_interval_ms: StatsSummary,
    pub presence: BTreeMap<DataType, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Sync Output Summary ===")?;
        writeln!(f, "Sync points: {}", self.total_points)?;
        writeln!(
            f,
            "Empty sync points: {} ({:.2}%)",
            self.empty_points, self.empty_rate
        )?;
        writeln!(f, "Sample staleness (ms): {}", self.staleness_ms)?;
        writeln!(f, "Tick interval (ms): {}", self.tick_interval_ms)?;

        if !self.presence.is_empty() {
            writeln!(f, "Modality presence:")?;
            for (data_type, count) in &self.presence {
                writeln!(f, "  {}: {}", data_type, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{LanguageData, Stamped};

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let key = InstanceKey::new("robot", 0);
        let mut aggregator = TelemetryAggregator::new();

        let mut p1 = SyncPoint::empty(&key, 1.0);
        p1.language_data = Some(Stamped::new(0.95, LanguageData::default()));
        aggregator.update(&p1);
        aggregator.update(&SyncPoint::empty(&key, 1.1));

        let summary = aggregator.summary();
        assert_eq!(summary.total_points, 2);
        assert_eq!(summary.empty_points, 1);
        assert!((summary.empty_rate - 50.0).abs() < 1e-10);
        assert_eq!(summary.presence.get(&DataType::Language), Some(&1));
        assert!((summary.staleness_ms.mean - 50.0).abs() < 1e-6);
        assert!((summary.tick_interval_ms.mean - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_summary_display() {
        let summary = TelemetryAggregator::new().summary();
        let text = summary.to_string();
        assert!(text.contains("Sync points: 0"));
        assert!(text.contains("N/A"));
    }
}
