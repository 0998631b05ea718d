use anyhow::{Context, anyhow};
use distributed_annotator::annotator::handlers::router;
use distributed_annotator::annotator::service::Annotator;
use distributed_annotator::broadcast::types::BroadcastHandle;
use distributed_annotator::candidate::types::{
    Candidate, CandidateKey, CandidateSchema, CandidateSet, Sentence, SlotValue, Span, Split,
    text_between, words_between,
};
use distributed_annotator::config::AnnotatorConfig;
use distributed_annotator::executor::registry::LfRegistry;
use distributed_annotator::executor::types::{FailureMode, Vote};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::collections::HashSet;
use std::net::SocketAddr;

const CHEMICALS: &[&str] = &[
    "lithium",
    "aspirin",
    "cisplatin",
    "haloperidol",
    "ibuprofen",
    "warfarin",
];

const DISEASES: &[&str] = &[
    "tremor",
    "headache",
    "nephrotoxicity",
    "dyskinesia",
    "ulcer",
    "hemorrhage",
];

/// Known chemical-induced-disease pairs, broadcast to every worker.
const CTD_PAIRS: &[(&str, &str)] = &[
    ("lithium", "tremor"),
    ("cisplatin", "nephrotoxicity"),
    ("haloperidol", "dyskinesia"),
    ("warfarin", "hemorrhage"),
    ("aspirin", "ulcer"),
];

/// Sentence templates with the label a careful annotator would give.
const TEMPLATES: &[(&str, i32)] = &[
    ("{c} causes {d} in some treated patients", 1),
    ("acute {d} induced by {c} was observed", 1),
    ("{c} induced {d} after two weeks", 1),
    ("{c} was used to treat {d}", -1),
    ("no evidence that {c} causes {d}", -1),
    ("{c} prevents recurrent {d} in adults", -1),
    ("patients with {d} were later given a low dose of {c}", -1),
];

type Ctd = HashSet<(String, String)>;

struct CliOptions {
    workers: Option<usize>,
    partitions_per_worker: Option<usize>,
    isolated: bool,
    candidates: usize,
    seed: u64,
    output: Option<String>,
    serve: Option<SocketAddr>,
}

impl CliOptions {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let mut options = CliOptions {
            workers: None,
            partitions_per_worker: None,
            isolated: false,
            candidates: 2000,
            seed: 7,
            output: None,
            serve: None,
        };

        let value = |i: usize| {
            args.get(i + 1)
                .ok_or_else(|| anyhow!("{} needs a value", args[i]))
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--workers" => {
                    options.workers = Some(value(i)?.parse()?);
                    i += 2;
                }
                "--partitions" => {
                    options.partitions_per_worker = Some(value(i)?.parse()?);
                    i += 2;
                }
                "--candidates" => {
                    options.candidates = value(i)?.parse()?;
                    i += 2;
                }
                "--seed" => {
                    options.seed = value(i)?.parse()?;
                    i += 2;
                }
                "--output" => {
                    options.output = Some(value(i)?.clone());
                    i += 2;
                }
                "--serve" => {
                    options.serve = Some(value(i)?.parse()?);
                    i += 2;
                }
                "--isolated" => {
                    options.isolated = true;
                    i += 1;
                }
                "--help" | "-h" => {
                    eprintln!(
                        "Usage: {} [--workers N] [--partitions N] [--isolated] [--candidates N] \
                         [--seed N] [--output matrix.json] [--serve <addr:port>]",
                        args[0]
                    );
                    std::process::exit(0);
                }
                other => {
                    tracing::warn!("Ignoring unknown argument {}", other);
                    i += 1;
                }
            }
        }

        Ok(options)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = CliOptions::parse(&args)?;

    // 1. Configuration: environment first, command line on top.
    let mut config = AnnotatorConfig::from_env()?;
    if let Some(workers) = options.workers {
        config = config.with_workers(workers);
    }
    if let Some(partitions) = options.partitions_per_worker {
        config = config.with_partitions_per_worker(partitions);
    }
    if options.isolated {
        config = config.with_failure_mode(FailureMode::Isolated);
    }
    tracing::info!(
        "Annotator with {} workers, {} partitions, {:?}",
        config.worker_count,
        config.num_partitions(),
        config.failure_mode
    );

    // 2. Cluster session:
    let registry = LfRegistry::new();
    let annotator = Annotator::connect(config, registry.clone()).await?;

    // 3. Broadcast the knowledge base once, then register functions that use it:
    let ctd: Ctd = CTD_PAIRS
        .iter()
        .map(|(c, d)| (c.to_string(), d.to_string()))
        .collect();
    let ctd_handle = annotator.broadcast(&ctd).await?;
    register_functions(&registry, ctd_handle)?;

    // 4. Candidates:
    let schema = CandidateSchema::new("ChemicalDisease", &["chemical", "disease"]);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let dev_count = (options.candidates / 4).max(1);

    let (train, _) = generate(&mut rng, &schema, Split::train(), 1, options.candidates)?;
    let (dev, gold) = generate(
        &mut rng,
        &schema,
        Split::dev(),
        options.candidates as u64 + 1,
        dev_count,
    )?;
    let train = CandidateSet::new("cdr", Split::train(), schema.clone(), train)?;
    let dev = CandidateSet::new("cdr", Split::dev(), schema, dev)?;

    let train_handle = annotator.prepare(&train, &Split::train()).await?;
    let dev_handle = annotator.prepare(&dev, &Split::dev()).await?;

    // 5. Apply:
    let functions = registry.list_functions();
    let train_run = annotator.apply(&train_handle, &functions).await?;
    println!("== train ({} ms) ==", train_run.elapsed_ms);
    println!("{}", annotator.report(&train_run.matrix, None)?);

    let dev_run = annotator.apply(&dev_handle, &functions).await?;
    println!("== dev ({} ms) ==", dev_run.elapsed_ms);
    println!("{}", annotator.report(&dev_run.matrix, Some(gold.as_slice()))?);

    for fault in train_run.faults.iter().chain(dev_run.faults.iter()) {
        println!(
            "fault: {} on candidate {}: {}",
            fault.function, fault.candidate, fault.message
        );
    }

    let transport = annotator.transport();
    tracing::info!(
        "Transport: {} messages ({} bytes), {} partitions, {} broadcast deliveries",
        transport.messages_sent,
        transport.bytes_sent,
        transport.partitions_sent,
        transport.broadcasts_sent
    );

    if let Some(path) = &options.output {
        std::fs::write(path, train_run.matrix.to_json()?)
            .with_context(|| format!("writing label matrix to {}", path))?;
        tracing::info!("Train label matrix written to {}", path);
    }

    // 6. Optionally keep serving the HTTP surface:
    if let Some(addr) = options.serve {
        tracing::info!("HTTP server listening on {}", addr);
        tracing::info!("Press Ctrl+C to shutdown");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router(annotator.clone())).await?;
    }

    annotator.shutdown().await?;
    Ok(())
}

fn register_functions(
    registry: &LfRegistry,
    ctd_handle: BroadcastHandle<Ctd>,
) -> anyhow::Result<()> {
    let causal = Regex::new(r"(?i)\b(caus(es|ed|ing)|induced)\b")?;
    let treats = Regex::new(r"(?i)\b(treat(s|ed)?|prevents?)\b")?;

    registry.register("LF_c_cause_d", move |candidate, _| {
        let (chemical, disease) = pair(candidate)?;
        let between = text_between(chemical, disease);
        Ok(if causal.is_match(&between) {
            Vote::POSITIVE
        } else {
            Vote::ABSTAIN
        })
    });

    registry.register("LF_c_treat_d", move |candidate, _| {
        let (chemical, disease) = pair(candidate)?;
        Ok(if treats.is_match(&text_between(chemical, disease)) {
            Vote::NEGATIVE
        } else {
            Vote::ABSTAIN
        })
    });

    registry.register("LF_negated", |candidate, _| {
        let (chemical, _) = pair(candidate)?;
        let negated = chemical
            .left_window(3)
            .iter()
            .any(|w| w.eq_ignore_ascii_case("no") || w.eq_ignore_ascii_case("not"));
        Ok(if negated { Vote::NEGATIVE } else { Vote::ABSTAIN })
    });

    registry.register("LF_far_apart", |candidate, _| {
        let (chemical, disease) = pair(candidate)?;
        Ok(if words_between(chemical, disease).len() > 6 {
            Vote::NEGATIVE
        } else {
            Vote::ABSTAIN
        })
    });

    registry.register("LF_in_ctd", move |candidate, ctx| {
        let ctd = ctx.get(&ctd_handle)?;
        let (chemical, disease) = pair(candidate)?;
        let key = (
            chemical.get_span().to_lowercase(),
            disease.get_span().to_lowercase(),
        );
        Ok(if ctd.contains(&key) {
            Vote::POSITIVE
        } else {
            Vote::ABSTAIN
        })
    });

    registry.register_combined("LF_ctd_and_cause", "LF_in_ctd", "LF_c_cause_d")?;
    Ok(())
}

fn pair(candidate: &Candidate) -> anyhow::Result<(&Span, &Span)> {
    let chemical = candidate
        .span("chemical")
        .ok_or_else(|| anyhow!("candidate {} has no chemical span", candidate.key))?;
    let disease = candidate
        .span("disease")
        .ok_or_else(|| anyhow!("candidate {} has no disease span", candidate.key))?;
    Ok((chemical, disease))
}

/// Synthesizes `count` chemical-disease candidates and their gold labels.
fn generate(
    rng: &mut StdRng,
    schema: &CandidateSchema,
    split: Split,
    first_key: u64,
    count: usize,
) -> anyhow::Result<(Vec<Candidate>, Vec<Vote>)> {
    let mut candidates = Vec::with_capacity(count);
    let mut gold = Vec::with_capacity(count);

    for offset in 0..count as u64 {
        let key = first_key + offset;
        let chemical: &str = CHEMICALS
            .choose(rng)
            .ok_or_else(|| anyhow!("no chemicals"))?;
        let disease: &str = DISEASES.choose(rng).ok_or_else(|| anyhow!("no diseases"))?;
        let (template, label) = TEMPLATES[rng.gen_range(0..TEMPLATES.len())];

        let text = template.replace("{c}", chemical).replace("{d}", disease);
        let sentence = Sentence::new(format!("pmid-{}", 10_000 + key / 3), (key % 3) as u32, text);
        let position = |word: &str| {
            sentence
                .words
                .iter()
                .position(|w| w == word)
                .ok_or_else(|| anyhow!("'{}' missing from '{}'", word, sentence.text))
        };
        let c = position(chemical)?;
        let d = position(disease)?;

        candidates.push(Candidate::new(
            CandidateKey(key),
            split.clone(),
            schema.clone(),
            vec![
                SlotValue::Span(Span::new(sentence.clone(), c, c)?),
                SlotValue::Span(Span::new(sentence.clone(), d, d)?),
            ],
        )?);
        gold.push(Vote(label));
    }

    tracing::info!("Generated {} {} candidates", candidates.len(), split);
    Ok((candidates, gold))
}
