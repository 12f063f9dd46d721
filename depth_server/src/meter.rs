use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Counters of processed and failed images.
#[derive(Default)]
pub struct Meter {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn tick_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_processed(&self) -> u64 {
        self.processed.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_failed(&self) -> u64 {
        self.failed.swap(0, Ordering::Relaxed)
    }
}

/// Log throughput every `period` while there is traffic.
pub fn spawn_meter_logger(period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(period);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let processed = METER.get_reset_processed();
            let failed = METER.get_reset_failed();
            let elapsed = start.elapsed().as_secs_f32();

            if processed > 0 {
                log::info!(
                    "Depth maps per second: {:.2} ({processed} total)",
                    processed as f32 / elapsed
                );
            }
            if failed > 0 {
                log::warn!("{failed} images failed in the last {elapsed:.1}s");
            }
        }
    })
}
