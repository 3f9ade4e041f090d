use anyhow::{Result, anyhow};
use openask_engine::{ChatEngine, ExchangeOutcome};

use crate::commands::stream_exchange;
use crate::output::{OutputFormat, print_json};

pub async fn run(engine: ChatEngine, question: Vec<String>, format: OutputFormat) -> Result<()> {
    let question = question.join(" ");

    let outcome = if format.is_json() {
        engine.send_message(question).await
    } else {
        stream_exchange(&engine, question).await?
    };

    if format.is_json()
        && outcome.is_completed()
        && let Some(answer) = engine.snapshot().last_assistant()
    {
        print_json(answer)?;
    }

    engine.shutdown().await;

    match outcome {
        ExchangeOutcome::Errored(err) => Err(anyhow!("{}", err)),
        ExchangeOutcome::Skipped => Err(anyhow!("Question is empty")),
        ExchangeOutcome::Completed | ExchangeOutcome::Cancelled => Ok(()),
    }
}
