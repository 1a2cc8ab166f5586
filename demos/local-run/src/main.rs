use anyhow::Context;
use tracing::info;

use stim_core::{Scheduler, wait_for_resources};
use stim_experiment::{Experiment, ExperimentSettings, NullHost};
use stim_model::{ControlSignal, ResourceSpec};
use stim_observe::{LoggerConfig, logger_init};
use stim_session::{ConfigSource, SharedResults};

const WORDS: [(&str, &str); 4] = [
    ("red", "green"),
    ("blue", "blue"),
    ("green", "red"),
    ("yellow", "yellow"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Logger
    let cfg = LoggerConfig::from_env()?;
    logger_init(&cfg)?;
    info!("logger initialized");

    // 2) Settings: a local run rooted at the working directory
    let dir = std::env::current_dir().context("cannot resolve working directory")?;
    let source = ConfigSource::local_dir(&dir)?.with_results_dir(dir.join("data"));
    let settings = ExperimentSettings::new("stroop-demo", source)
        .with_resources(vec![ResourceSpec::new("instructions", "Cargo.toml")]);
    let mut experiment = Experiment::new(settings, NullHost)?;

    // 3) Flow
    let results = experiment.results();
    let registry = experiment.session().registry().clone();
    let quit = experiment.quit_handle();
    let trial_results = results.clone();
    let flow = experiment.flow_mut();
    flow.add(wait_for_resources(registry.clone(), vec!["instructions".into()]))
        .add_step("instructions", move || {
            let size = registry.payload("instructions").map_or(0, |p| p.len());
            info!(size, "instructions shown");
            Ok(ControlSignal::Next)
        })
        .add_deferred("trials", move || Ok(trials(trial_results)))
        .add_conditional(
            "feedback",
            move || accuracy(&results) < 1.0,
            feedback("try to name the ink colour, not the word"),
            feedback("perfect run"),
        )
        .add(quit.step("goodbye", true, None));

    // 4) Ctrl-C closes the run like a host window would
    let closing = experiment.closing_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            closing.cancel();
        }
    });

    // 5) Run
    experiment.start().await?;
    let status = experiment.run().await?;
    info!(?status, "demo finished");
    Ok(())
}

fn trials(results: SharedResults) -> Scheduler {
    let mut block = Scheduler::new("trials");
    for (index, (word, ink)) in WORDS.into_iter().enumerate() {
        let results = results.clone();
        block.add_step_with(
            format!("trial_{index}"),
            (word, ink, 0u32),
            move |(word, ink, frames)| {
                *frames += 1;
                if *frames < 3 {
                    return Ok(ControlSignal::Continue);
                }
                let mut table = results.lock().map_err(|e| e.to_string())?;
                table.add_data("word", *word);
                table.add_data("ink", *ink);
                table.add_data("response", *word);
                table.add_data("correct", word == ink);
                table.next_entry();
                Ok(ControlSignal::Next)
            },
        );
    }
    block
}

fn accuracy(results: &SharedResults) -> f64 {
    let Ok(table) = results.lock() else {
        return 0.0;
    };
    if table.len() == 0 {
        return 0.0;
    }
    let correct = table
        .values("correct")
        .filter(|cell| cell.and_then(|v| v.as_bool()).unwrap_or(false))
        .count();
    correct as f64 / table.len() as f64
}

fn feedback(message: &'static str) -> Scheduler {
    let mut queue = Scheduler::new("feedback");
    queue.add_step("show_feedback", move || {
        info!(text = message, "feedback");
        Ok(ControlSignal::Next)
    });
    queue
}
