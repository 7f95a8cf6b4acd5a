use criterion::{black_box, criterion_group, criterion_main, Criterion};
use seqcrf::{Attribute, Model, Trainer};

fn weather_model() -> Model {
    let data = [
        (vec!["walk", "shop", "clean", "walk"], vec!["sunny", "rainy", "rainy", "sunny"]),
        (vec!["clean", "clean", "shop"], vec!["rainy", "rainy", "sunny"]),
        (vec!["walk", "walk", "shop", "clean"], vec!["sunny", "sunny", "sunny", "rainy"]),
    ];
    let mut trainer = Trainer::new();
    trainer.set("default_label", "sunny").unwrap();
    trainer.set("orders", "2,1").unwrap();
    for (words, labels) in &data {
        let xseq: Vec<Vec<Attribute>> = words
            .iter()
            .map(|w| vec![Attribute::new(*w, 1.0)])
            .collect();
        trainer.append(&xseq, labels).unwrap();
    }
    trainer.train().unwrap().model
}

fn xseq() -> Vec<Vec<Attribute>> {
    vec![
        vec![Attribute::new("walk", 1.0), Attribute::new("shop", 0.5)],
        vec![Attribute::new("walk", 1.0)],
        vec![Attribute::new("walk", 1.0), Attribute::new("clean", 0.5)],
        vec![Attribute::new("shop", 0.5), Attribute::new("clean", 0.5)],
        vec![Attribute::new("walk", 0.5), Attribute::new("clean", 1.0)],
        vec![Attribute::new("clean", 1.0), Attribute::new("shop", 0.1)],
        vec![Attribute::new("walk", 1.0), Attribute::new("shop", 0.5)],
        vec![],
        vec![Attribute::new("clean", 1.0)],
    ]
}

fn criterion_benchmark(c: &mut Criterion) {
    let model = weather_model();
    let xseq = xseq();

    let mut group = c.benchmark_group("tag");
    group.bench_function("viterbi", |b| {
        b.iter(|| {
            let tagger = model.tagger();
            let _res = tagger.tag(black_box(&xseq)).unwrap();
        })
    });
    group.bench_function("nbest_10", |b| {
        b.iter(|| {
            let tagger = model.tagger();
            let _res = tagger.tag_nbest(black_box(&xseq), 10).unwrap();
        })
    });
    group.finish();

    c.bench_function("train", |b| b.iter(weather_model));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
