pub mod ask;
pub mod chat;
pub mod session;

use std::io;

use anyhow::Result;
use openask_engine::{ChatEngine, ExchangeOutcome};

use crate::render::Renderer;

/// Submit `text` and render the answer as it streams. Ctrl-C cancels the
/// exchange.
pub async fn stream_exchange(engine: &ChatEngine, text: String) -> Result<ExchangeOutcome> {
    let mut updates = engine.subscribe();
    let mut exchange = engine.submit(text);
    let mut renderer = Renderer::for_latest(&engine.snapshot());
    let mut stdout = io::stdout();

    let outcome = loop {
        tokio::select! {
            outcome = &mut exchange => break outcome?,
            changed = updates.changed() => {
                if changed.is_err() {
                    break exchange.await?;
                }
                let snapshot = updates.borrow_and_update().clone();
                renderer.render(&snapshot, &mut stdout)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                engine.shutdown().await;
                break exchange.await?;
            }
        }
    };

    renderer.render(&engine.snapshot(), &mut stdout)?;
    if outcome.is_completed() {
        println!();
    }
    Ok(outcome)
}
