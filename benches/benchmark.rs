#[macro_use]
extern crate criterion;

extern crate nrms;
extern crate rand;

use criterion::Criterion;

use rand::distributions::{Distribution, Uniform};
use rand::{SeedableRng, XorShiftRng};

use nrms::data::{ArticleTokens, Impression};
use nrms::models::nrms::{Hyperparameters, NrmsModel};
use nrms::NewsRankingModel;

const NUM_ARTICLES: usize = 500;
const VOCAB_SIZE: usize = 2000;
const TITLE_SIZE: usize = 20;

fn synthetic_articles(rng: &mut XorShiftRng) -> ArticleTokens {
    let tokens = Uniform::new(1, VOCAB_SIZE);
    let mut articles = ArticleTokens::new(TITLE_SIZE);

    for article_id in 1..NUM_ARTICLES + 1 {
        let title: Vec<_> = (0..TITLE_SIZE).map(|_| tokens.sample(rng)).collect();
        articles.insert(article_id, &title);
    }

    articles
}

fn synthetic_impressions(rng: &mut XorShiftRng, num_impressions: usize) -> Vec<Impression> {
    let article_ids = Uniform::new(1, NUM_ARTICLES + 1);

    (0..num_impressions)
        .map(|idx| {
            let history: Vec<_> = (0..30).map(|_| article_ids.sample(rng)).collect();
            let inview: Vec<_> = (0..10).map(|_| article_ids.sample(rng)).collect();
            let clicked = vec![inview[0]];

            Impression::new(idx, idx, idx, history, inview, clicked)
        })
        .collect()
}

fn model() -> NrmsModel {
    Hyperparameters::new(VOCAB_SIZE, 64)
        .title_size(TITLE_SIZE)
        .history_size(30)
        .head_num(4)
        .head_dim(16)
        .attention_hidden_dim(64)
        .batch_size(16)
        .from_seed([42; 16])
        .build()
        .unwrap()
}

fn bench_encoding(c: &mut Criterion) {
    c.bench_function("encode_users", |b| {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let articles = synthetic_articles(&mut rng);
        let impressions = synthetic_impressions(&mut rng, 100);

        let model = model();
        let ranker = model.ranker(&articles);

        b.iter(|| {
            for impression in &impressions {
                let user = ranker.user_representation(impression.history()).unwrap();
                ranker.predict(&user, impression.inview()).unwrap();
            }
        })
    });

    c.bench_function("precompute_news", |b| {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let articles = synthetic_articles(&mut rng);
        let model = model();

        b.iter(|| model.ranker(&articles))
    });
}

fn bench_fit(c: &mut Criterion) {
    c.bench_function("fit", |b| {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let articles = synthetic_articles(&mut rng);
        let impressions = synthetic_impressions(&mut rng, 64);

        let mut model = model();

        b.iter(|| {
            model.fit(&impressions, &articles).unwrap();
        })
    });
}

criterion_group!{
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_encoding, bench_fit
}
criterion_main!(benches);
