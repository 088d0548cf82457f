use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::{ArrayD, IxDyn};
use sim2tod::{
    inject_signal, CalibrationInterval, CalibrationProvider, FieldGeometry, GnomonicProjector,
    ObservationTiming, Pointing, SignalSource, SkyCube, Telemetry, VaneTsysSolver,
};

#[path = "../src/test_common.rs"]
mod synthetic;
use synthetic::{SyntheticLevel1, FIELD_CENTRE};

const NUM_FEEDS: usize = 4;
const NUM_CHANS: usize = 64;
const NUM_SAMPLES: usize = 2000;

fn synthetic_observation() -> SyntheticLevel1 {
    SyntheticLevel1::new(NUM_FEEDS, NUM_CHANS, NUM_SAMPLES)
}

fn telemetry(obs: &SyntheticLevel1) -> Telemetry {
    Telemetry {
        vane_angles_deg: obs.vane_angle.mapv(|angle| angle / 100.0),
        vane_times_mjd: obs.vane_utc.clone(),
        array_features: obs.features.clone(),
        hot_load_temp: obs.hot_load_temp.clone(),
        tod_times_mjd: obs.mjd.clone(),
    }
}

fn bench_cube_from_raw(crt: &mut Criterion) {
    let raw = ArrayD::from_shape_fn(IxDyn(&[30, 30, 4096]), |idx| (idx[2] % 7) as f64);
    crt.bench_function("SkyCube::from_raw - 30x30 pixels", |bch| {
        bch.iter(|| SkyCube::from_raw(black_box(raw.clone()), 1.0).unwrap())
    });
}

fn bench_vane_solve(crt: &mut Criterion) {
    let obs = synthetic_observation();
    let telemetry = telemetry(&obs);
    let solver = VaneTsysSolver::default();
    crt.bench_function("VaneTsysSolver::solve - synthetic", |bch| {
        bch.iter(|| {
            solver
                .solve(black_box(&telemetry), black_box(obs.tod.view()))
                .unwrap()
        })
    });
}

fn bench_inject(crt: &mut Criterion) {
    let obs = synthetic_observation();
    let calibration = VaneTsysSolver::default()
        .solve(&telemetry(&obs), obs.tod.view())
        .unwrap();
    let raw = ArrayD::from_elem(IxDyn(&[4, 4, 4096]), 1.0);
    let cube = SkyCube::from_raw(raw, 1.0).unwrap();
    let field = FieldGeometry {
        nside: 4,
        dpix_deg: 1.0,
        centre_ra_deg: FIELD_CENTRE.0,
        centre_dec_deg: FIELD_CENTRE.1,
    };
    let pointing = Pointing {
        ra_deg: obs.ra.view(),
        dec_deg: obs.dec.view(),
    };
    let interval: &CalibrationInterval = &calibration.interval;

    crt.bench_function("inject_signal - cube", |bch| {
        bch.iter(|| {
            inject_signal(
                black_box(obs.tod.view()),
                calibration.tsys.view(),
                interval,
                &pointing,
                &field,
                &GnomonicProjector,
                &SignalSource::Cube(&cube),
            )
            .unwrap()
        })
    });

    let timing = ObservationTiming {
        dt_seconds: obs.dt_seconds,
        dnu_hz: obs.dnu_ghz * 1e9,
    };
    crt.bench_function("inject_signal - white noise", |bch| {
        bch.iter(|| {
            inject_signal(
                black_box(obs.tod.view()),
                calibration.tsys.view(),
                interval,
                &pointing,
                &field,
                &GnomonicProjector,
                &SignalSource::WhiteNoise { timing, seed: 42 },
            )
            .unwrap()
        })
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_cube_from_raw, bench_vane_solve, bench_inject,
);
criterion_main!(benches);
