extern crate failure;
extern crate nrms;
extern crate rand;
extern crate serde_json;
#[macro_use]
extern crate tracing;
extern crate tracing_subscriber;

use std::env;
use std::process;

use rand::{SeedableRng, XorShiftRng};

use nrms::data::user_based_split;
use nrms::datasets::{load_article_tokens, load_behaviors, load_embeddings};
use nrms::evaluation::evaluate;
use nrms::models::nrms::{Hyperparameters, DEFAULT_SEED};

const USAGE: &str =
    "usage: nrms_train <behaviors.csv> <articles.csv> [hyperparameters.json] [embeddings.txt]";
const CHECKPOINT: &str = "nrms_checkpoint.json";
const TEST_FRACTION: f32 = 0.2;

fn run(args: &[String]) -> Result<(), failure::Error> {
    let hyper = match args.get(2) {
        Some(path) => Hyperparameters::from_json(path)?,
        None => Hyperparameters::new(1, 300).seed(DEFAULT_SEED),
    };

    let behaviors = load_behaviors(&args[0])?;
    let articles = load_article_tokens(&args[1], hyper.tokens_per_title())?;

    let mut rng = XorShiftRng::seed_from_u64(DEFAULT_SEED);
    let (train, test) = user_based_split(&behaviors, &mut rng, TEST_FRACTION);

    info!(
        train = train.len(),
        test = test.len(),
        articles = articles.len(),
        "split behaviour log"
    );

    let mut model = match args.get(3) {
        Some(path) => {
            let embeddings = load_embeddings(path)?;
            let (vocab_size, embedding_dim) = embeddings.dim();
            hyper
                .vocab_size(vocab_size)
                .embedding_dim(embedding_dim)
                .build_with_embeddings(embeddings)?
        }
        None => hyper.vocab_size(articles.vocab_size()).build()?,
    };

    let loss = model.fit(train.data(), &articles)?;
    let metrics = evaluate(&model.ranker(&articles), test.data())?;

    println!("{}", serde_json::to_string_pretty(&metrics)?);
    info!(loss, auc = metrics.auc, "trained model");

    model.save(CHECKPOINT)?;
    info!(path = CHECKPOINT, "saved checkpoint");

    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().skip(1).collect();

    if args.len() < 2 {
        eprintln!("{}", USAGE);
        process::exit(2);
    }

    if let Err(error) = run(&args) {
        error!(%error, "training failed");
        process::exit(1);
    }
}
