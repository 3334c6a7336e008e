use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lattice_dmx::palette::get_palette;
use lattice_dmx::pattern::{light, stack, ColorSpec};
use lattice_dmx::scheduler::Scheduler;
use lattice_dmx::time::{Fraction, TimeSpan};
use lattice_dmx::value::LightContext;

fn representative_pattern() -> lattice_dmx::pattern::LightPattern {
    stack(vec![
        light("0 1 2").envelope(0.05, 0.2, 0.6, 0.5).color(ColorSpec::Literal(
            lattice_dmx::color::Hsv::new(0.0, 1.0, 1.0),
        )),
        light("3 4 5").seq(None, false).intensity(0.8),
    ])
}

fn bench_compute_colors(c: &mut Criterion) {
    let pattern = representative_pattern();
    let ctx = LightContext::default_context(6);
    let palette = get_palette("white_tones").expect("white_tones is a built-in palette");
    let mut scheduler = Scheduler::new();
    let mut beat = Fraction::new(0, 1);
    let step = Fraction::new(1, 50);

    c.bench_function("scheduler_compute_colors", |b| {
        b.iter(|| {
            let query = TimeSpan::new(beat, beat + step);
            black_box(scheduler.compute_colors(&pattern, &ctx, &palette, query));
            beat = beat + step;
        })
    });
}

criterion_group!(benches, bench_compute_colors);
criterion_main!(benches);
