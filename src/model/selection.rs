//! Hardware-adaptive choice between the base and large checkpoints.

use fixity_caption_types::ModelVariant;

/// Logical cores needed before the large checkpoint is considered safe.
pub const LARGE_MODEL_MIN_CORES: usize = 8;

/// Core count assumed when the platform cannot report one.
pub const DEFAULT_CORE_ESTIMATE: usize = 4;

/// Source of the parallel-compute estimate.
pub trait HardwareProbe: Send + Sync {
    /// Logical core count, or `None` when unknown.
    fn logical_cores(&self) -> Option<usize>;
}

/// Probe backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl HardwareProbe for SystemProbe {
    fn logical_cores(&self) -> Option<usize> {
        std::thread::available_parallelism().ok().map(|n| n.get())
    }
}

/// Pick a variant from the probed core count.
pub fn select_variant(probe: &dyn HardwareProbe) -> ModelVariant {
    let cores = probe.logical_cores().unwrap_or(DEFAULT_CORE_ESTIMATE);
    let variant = if cores >= LARGE_MODEL_MIN_CORES {
        ModelVariant::Large
    } else {
        ModelVariant::Base
    };
    log::info!(
        "Selected {variant} ({cores} logical cores, {:.1} GB RAM available)",
        available_memory_gb()
    );
    variant
}

/// Available RAM in gigabytes, for diagnostics only.
pub fn available_memory_gb() -> f64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.available_memory() as f64 / (1024.0 * 1024.0 * 1024.0)
}
