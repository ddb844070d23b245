//! Ingestion Pipeline main entry

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{InstanceKey, RobotBlueprint};
use stream_registry::StreamRegistry;
use sync_engine::SyncService;
use tracing::{debug, info, instrument};

use crate::adapter::RobotAdapter;
use crate::error::{IngestionError, Result};
use crate::metrics::IngestionMetrics;

/// Ingestion Pipeline
///
/// Owns the robot adapters of a process and shares one metrics instance
/// between them.
pub struct IngestionPipeline {
    adapters: HashMap<InstanceKey, RobotAdapter>,
    metrics: Arc<IngestionMetrics>,
}

impl IngestionPipeline {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            metrics: Arc::new(IngestionMetrics::new()),
        }
    }

    /// One simulated adapter per configured robot
    pub fn from_blueprints(
        robots: &[RobotBlueprint],
        registry: Arc<StreamRegistry>,
        sync: Arc<SyncService>,
    ) -> Result<Self> {
        let mut pipeline = Self::new();
        for robot in robots {
            let adapter = RobotAdapter::from_blueprint(robot, registry.clone(), sync.clone())?;
            pipeline.register_robot(adapter)?;
        }
        Ok(pipeline)
    }

    #[instrument(
        name = "ingestion_register_robot",
        skip(self, adapter),
        fields(key = %adapter.key())
    )]
    pub fn register_robot(&mut self, adapter: RobotAdapter) -> Result<()> {
        let key = adapter.key().clone();
        if self.adapters.contains_key(&key) {
            return Err(IngestionError::DuplicateRobot { key });
        }
        debug!(sources = adapter.source_count(), "registered robot adapter");
        self.adapters
            .insert(key, adapter.with_metrics(self.metrics.clone()));
        Ok(())
    }

    /// Start every adapter that is not running yet. Returns the number of
    /// tracks published.
    #[instrument(name = "ingestion_start_all", skip(self))]
    pub fn start_all(&self) -> Result<usize> {
        info!(count = self.adapters.len(), "starting all robot adapters");
        let mut published = 0;
        for adapter in self.adapters.values() {
            if !adapter.is_listening() {
                published += adapter.start()?.len();
            }
        }
        Ok(published)
    }

    #[instrument(name = "ingestion_stop_all", skip(self))]
    pub fn stop_all(&self) {
        info!(count = self.adapters.len(), "stopping all robot adapters");
        for adapter in self.adapters.values() {
            adapter.stop();
        }
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }

    pub fn robot_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn robots(&self) -> impl Iterator<Item = &InstanceKey> {
        self.adapters.keys()
    }

    pub fn is_robot_listening(&self, key: &InstanceKey) -> bool {
        self.adapters
            .get(key)
            .map(|a| a.is_listening())
            .unwrap_or(false)
    }
}

impl Default for IngestionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.stop_all();
    }
}
