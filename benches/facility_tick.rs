use criterion::{Criterion, criterion_group, criterion_main};
use fissionrt::device::MatrixSnapshot;
use fissionrt::protocol::PlcStatus;
use fissionrt::supervisor::facility::{FacilityController, FacilityMode};
use fissionrt::supervisor::unit::ReactorUnit;
use std::time::{Duration, Instant};

fn matrix(fill: f64) -> MatrixSnapshot {
    MatrixSnapshot {
        formed: true,
        energy: fill * 4.0e9,
        max_energy: 4.0e9,
        last_input: 1.0e6,
        last_output: 5.0e5,
    }
}

fn controller(units: usize) -> FacilityController {
    let defs: Vec<ReactorUnit> = (0..units)
        .map(|i| ReactorUnit::new(i as u16 + 10, (i % 4) as u8 + 1, 5.0 + i as f64))
        .collect();
    let mut fc = FacilityController::new(defs);
    for i in 0..units {
        let id = i as u16 + 10;
        let u = fc.unit_mut(id).unwrap();
        u.set_connected(true);
        u.update_status(PlcStatus {
            telemetry: None,
            ready: true,
            degraded: false,
            burn_target_mb: 0.0,
            ramping: false,
            blade_count: 28,
            max_burn_mb: 100.0,
        });
    }
    fc
}

/// One controller pass over 16 engaged units: auto-SCRAM evaluation,
/// PID step, and full burn allocation.
fn bench_facility_tick(c: &mut Criterion) {
    let mut fc = controller(16);
    let mut now = Instant::now();

    fc.ingest_matrix(matrix(0.4), now);
    fc.set_charge_target(2.0e9);
    fc.stage_mode(FacilityMode::Charge);
    fc.update(now);

    c.bench_function("facility_tick_16_units", |b| {
        b.iter(|| {
            now += Duration::from_millis(50);
            fc.ingest_matrix(matrix(0.4), now);
            fc.update(now);
        })
    });
}

fn bench_allocation(c: &mut Criterion) {
    let mut fc = controller(16);
    let now = Instant::now();
    fc.ingest_matrix(matrix(0.4), now);
    fc.set_burn_target(60.0);
    fc.stage_mode(FacilityMode::BurnRate);
    fc.update(now);

    c.bench_function("burn_allocation_16_units", |b| {
        let mut t = now;
        b.iter(|| {
            t += Duration::from_millis(50);
            fc.ingest_matrix(matrix(0.4), t);
            fc.update(t);
        })
    });
}

criterion_group!(benches, bench_facility_tick, bench_allocation);
criterion_main!(benches);
