use anyhow::Result;
use colored::Colorize;
use openask_engine::{ChatEngine, ExchangeOutcome};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::stream_exchange;

pub async fn run(engine: ChatEngine) -> Result<()> {
    println!(
        "{}",
        "Type a question. /reset clears the conversation, /quit exits.".dimmed()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".green().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                engine.reset_chat().await;
                println!("{}", "Conversation cleared.".dimmed());
            }
            question => match stream_exchange(&engine, question.to_string()).await? {
                ExchangeOutcome::Errored(err) => {
                    println!();
                    eprintln!("{} {}", "Error:".red().bold(), err);
                }
                ExchangeOutcome::Cancelled => println!("\n{}", "Cancelled.".dimmed()),
                ExchangeOutcome::Completed | ExchangeOutcome::Skipped => {}
            },
        }
    }

    engine.shutdown().await;
    Ok(())
}
