//! Bundled collectors.

pub mod cpu;
pub mod logical_disk;
pub mod memory;
pub mod system;

use crate::collector::Collector;

/// Names accepted by [`create`].
pub const AVAILABLE: &[&str] = &["cpu", "logical_disk", "memory", "system"];

/// Instantiate a bundled collector by name.
pub fn create(name: &str) -> Option<Box<dyn Collector>> {
    match name {
        "cpu" => Some(Box::new(cpu::CpuCollector::default())),
        "logical_disk" => Some(Box::new(logical_disk::LogicalDiskCollector::default())),
        "memory" => Some(Box::new(memory::MemoryCollector)),
        "system" => Some(Box::new(system::SystemCollector)),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use perfsight_perflib::Perflib;

    use crate::collector::ScrapeContext;
    use crate::demo::DemoReader;

    /// A scrape context over a demo snapshot of `objects`.
    pub fn demo_context(objects: &[&str]) -> ScrapeContext {
        let perflib = Perflib::from_reader(Arc::new(DemoReader::new(2))).unwrap();
        let snapshot = perflib.snapshot(objects).unwrap();
        ScrapeContext::new(Arc::new(snapshot), Instant::now() + Duration::from_secs(10))
    }
}
