//! Event-driven sensor node walkthrough.
//!
//! Wires the three subsystems together the way a small IoT node would:
//! a sensor loop publishes readings, an async processor crunches them on the
//! thread pool, a sync battery monitor reacts immediately, and a wildcard
//! logger traces everything that goes over the bus.

use std::sync::Arc;

use emx_core::osal::delay_ms;
use emx_eventbus::{EventBus, EventId};
use emx_mempool::{PoolConfig, PoolManager};
use emx_threadpool::ThreadPool;

const DOMAIN_SENSOR: u16 = 0x1000;
const DOMAIN_POWER: u16 = 0x2000;

const EVENT_SENSOR_READING: EventId = EventId::new(DOMAIN_SENSOR, 0x0001);
const EVENT_BATTERY_LOW: EventId = EventId::new(DOMAIN_POWER, 0x0001);

/// One simulated measurement, serialized into the event payload.
struct Reading {
    sensor_id: u8,
    temperature_decicelsius: i16,
    humidity_percent: u8,
}

impl Reading {
    fn encode(&self) -> [u8; 4] {
        let temp = self.temperature_decicelsius.to_le_bytes();
        [self.sensor_id, temp[0], temp[1], self.humidity_percent]
    }

    fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != 4 {
            return None;
        }
        Some(Self {
            sensor_id: data[0],
            temperature_decicelsius: i16::from_le_bytes([data[1], data[2]]),
            humidity_percent: data[3],
        })
    }
}

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn main() {
    log::set_logger(&LOGGER).expect("install logger");
    log::set_max_level(log::LevelFilter::Debug);

    // Bring the subsystems up: pools first, then workers, then the bus.
    let manager = Arc::new(PoolManager::new());
    manager.init().expect("init pool manager");
    let payload_pool = manager
        .create_pool(PoolConfig::new(32, 16).named("payloads"))
        .expect("create payload pool");

    let workers = Arc::new(ThreadPool::new());
    workers.init().expect("init thread pool");

    let bus = Arc::new(EventBus::new(
        Arc::clone(&workers),
        Some(Arc::clone(&manager)),
    ));
    bus.init().expect("init event bus");

    // Async processor: runs on a worker, sees its own payload copy.
    bus.subscribe_async(EVENT_SENSOR_READING, |_, payload| {
        let Some(reading) = payload.and_then(Reading::decode) else {
            log::warn!("[processor] invalid sensor payload");
            return;
        };
        log::info!(
            "[processor] sensor {}: {:.1} degC, {} % RH",
            reading.sensor_id,
            f64::from(reading.temperature_decicelsius) / 10.0,
            reading.humidity_percent
        );
    })
    .expect("subscribe processor");

    // Sync battery monitor: reacts in the publisher's thread.
    bus.subscribe_sync(EVENT_BATTERY_LOW, |_, payload| {
        let level = payload.and_then(|p| p.first().copied()).unwrap_or(0);
        log::warn!("[power] battery low: {level} %");
    })
    .expect("subscribe battery monitor");

    // Wildcard tracer: everything that goes over the bus.
    bus.subscribe_sync(EventId::WILDCARD, |id, payload| {
        log::debug!("[trace] {id} ({} bytes)", payload.map_or(0, <[u8]>::len));
    })
    .expect("subscribe tracer");

    // Sensor loop: publish a handful of readings, then a battery warning.
    for cycle in 0u8..8 {
        let reading = Reading {
            sensor_id: 1,
            temperature_decicelsius: 200 + i16::from(cycle % 10) * 10,
            humidity_percent: 60 + cycle % 20,
        };
        bus.publish_data(EVENT_SENSOR_READING, &reading.encode())
            .expect("publish reading");

        if cycle == 5 {
            bus.publish_data(EVENT_BATTERY_LOW, &[17]).expect("publish battery");
        }
        delay_ms(100);
    }

    workers.wait_idle(1000).expect("drain async deliveries");

    let stats = manager.stats(payload_pool).expect("pool stats");
    log::info!(
        "payload pool served {} allocations (peak {} blocks in use), {} published, {} dropped",
        stats.total_allocations,
        stats.peak_used,
        bus.total_published(),
        bus.dropped_deliveries()
    );

    bus.deinit();
    workers.deinit(true);
    manager.deinit();
}
