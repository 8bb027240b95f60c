#[cfg(feature = "bench")]
use criterion::{Criterion, criterion_group, criterion_main};

#[cfg(feature = "bench")]
use esports_arena::{bracket, counter::Counters};

#[cfg(feature = "bench")]
fn bracket_1024(c: &mut Criterion) {
    let entrants: Vec<String> = (1..=1_024).map(|i| format!("player-{i}")).collect();

    c.bench_function("bracket_1024", move |b| {
        b.iter(|| {
            let mut counters = Counters::default();
            bracket::build(1, &entrants, &mut counters).unwrap()
        });
    });
}

#[cfg(feature = "bench")]
criterion_group! {
    name = benches;
    config = Criterion::default();
    targets = bracket_1024
}

#[cfg(feature = "bench")]
criterion_main!(benches);

#[cfg(not(feature = "bench"))]
fn main() {
    eprintln!("You must enable pass `--features=bench`");
}
