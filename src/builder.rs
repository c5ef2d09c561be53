use crate::config::{ExtractorConfig, DEFAULT_PROBE_BUDGET, DEFAULT_RESERVED_WORKERS};
use crate::errors::{Error, Result};
use crate::orchestrator::CacheOrchestrator;
use crate::raw_frame::FrameSource;
use log::error;
use rayon::ThreadPoolBuilder;
use std::sync::Arc;

/// Builder for `CacheOrchestrator`.
pub struct CacheOrchestratorBuilder {
    num_threads: usize,
    thread_pool: Option<Arc<rayon::ThreadPool>>,
    reserved_workers: usize,
    max_in_flight: Option<usize>,
    probe_budget: usize,
    config: ExtractorConfig,
}

impl Default for CacheOrchestratorBuilder {
    fn default() -> Self {
        CacheOrchestratorBuilder::new()
    }
}

impl CacheOrchestratorBuilder {
    /// Creates a new CacheOrchestratorBuilder.
    pub fn new() -> Self {
        CacheOrchestratorBuilder {
            num_threads: 0,
            thread_pool: None,
            reserved_workers: DEFAULT_RESERVED_WORKERS,
            max_in_flight: None,
            probe_budget: DEFAULT_PROBE_BUDGET,
            config: ExtractorConfig::default(),
        }
    }

    /// Sets the number of worker threads (0 lets rayon decide).
    /// Ignored if a pool is given with `thread_pool`.
    pub fn num_threads(self, num_threads: usize) -> Self {
        CacheOrchestratorBuilder {
            num_threads,
            ..self
        }
    }

    /// Run pipelines on an existing pool instead of creating one.
    /// The pool should have a panic handler: rayon aborts on panics otherwise.
    pub fn thread_pool(self, pool: Arc<rayon::ThreadPool>) -> Self {
        CacheOrchestratorBuilder {
            thread_pool: Some(pool),
            ..self
        }
    }

    /// Number of workers left free when sizing the slots table.
    pub fn reserved_workers(self, reserved_workers: usize) -> Self {
        CacheOrchestratorBuilder {
            reserved_workers,
            ..self
        }
    }

    /// Force the maximal number of frames processed simultaneously.
    pub fn max_in_flight(self, max_in_flight: usize) -> Self {
        CacheOrchestratorBuilder {
            max_in_flight: Some(max_in_flight),
            ..self
        }
    }

    /// Maximal number of frames probed per tick.
    /// Wide requested ranges over sparse sources are walked over several ticks.
    pub fn probe_budget(self, probe_budget: usize) -> Self {
        CacheOrchestratorBuilder {
            probe_budget,
            ..self
        }
    }

    /// Settings for the extraction stage.
    pub fn extractor_config(self, config: ExtractorConfig) -> Self {
        CacheOrchestratorBuilder { config, ..self }
    }

    /// Build the `CacheOrchestrator` reading frames from given source.
    pub fn build(self, source: Arc<dyn FrameSource>) -> Result<CacheOrchestrator> {
        if self.config.max_levels == 0 {
            return Err(Error::InvalidConfig("max_levels must be positive".to_string()));
        }
        if self.max_in_flight == Some(0) {
            return Err(Error::InvalidConfig(
                "max_in_flight must be positive".to_string(),
            ));
        }
        if self.probe_budget == 0 {
            return Err(Error::InvalidConfig(
                "probe_budget must be positive".to_string(),
            ));
        }
        let pool = match self.thread_pool {
            Some(pool) => pool,
            None => Arc::new(
                ThreadPoolBuilder::new()
                    .num_threads(self.num_threads)
                    .thread_name(|index| format!("frame-cache-{}", index))
                    .panic_handler(|_| error!("a frame processing task panicked"))
                    .build()?,
            ),
        };
        let slot_capacity = self.max_in_flight.unwrap_or_else(|| {
            pool.current_num_threads()
                .saturating_sub(self.reserved_workers)
                .max(1)
        });
        Ok(CacheOrchestrator::new(
            source,
            pool,
            self.config,
            slot_capacity,
            self.probe_budget,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_frame::InMemorySource;

    fn source() -> Arc<InMemorySource> {
        Arc::new(InMemorySource::new())
    }

    #[test]
    fn slots_leave_reserved_workers_alone() {
        let cache = CacheOrchestratorBuilder::new()
            .num_threads(4)
            .reserved_workers(1)
            .build(source())
            .unwrap();
        assert_eq!(cache.slot_capacity(), 3);
    }

    #[test]
    fn at_least_one_slot() {
        let cache = CacheOrchestratorBuilder::new()
            .num_threads(2)
            .reserved_workers(8)
            .build(source())
            .unwrap();
        assert_eq!(cache.slot_capacity(), 1);
    }

    #[test]
    fn shared_pool() {
        let pool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(3)
                .build()
                .unwrap(),
        );
        let cache = CacheOrchestratorBuilder::new()
            .thread_pool(pool)
            .reserved_workers(0)
            .build(source())
            .unwrap();
        assert_eq!(cache.slot_capacity(), 3);
    }

    #[test]
    fn invalid_settings() {
        assert!(matches!(
            CacheOrchestratorBuilder::new().max_in_flight(0).build(source()),
            Err(Error::InvalidConfig(_))
        ));
        let config = ExtractorConfig {
            max_levels: 0,
            ..Default::default()
        };
        assert!(CacheOrchestratorBuilder::new()
            .extractor_config(config)
            .build(source())
            .is_err());
        assert!(CacheOrchestratorBuilder::new()
            .probe_budget(0)
            .build(source())
            .is_err());
    }
}
