use anyhow::Result;
use openask_engine::{ChatTransport, EngineConfig, HttpTransport};
use serde_json::json;

use crate::cli::SessionCommands;
use crate::output::{OutputFormat, print_json};

pub async fn run(config: EngineConfig, command: SessionCommands, format: OutputFormat) -> Result<()> {
    let transport = HttpTransport::new(&config)?;
    match command {
        SessionCommands::Create => create_session(&transport, format).await,
        SessionCommands::Delete { id } => delete_session(&transport, &id, format).await,
    }
}

async fn create_session(transport: &HttpTransport, format: OutputFormat) -> Result<()> {
    let info = transport.create_session().await?;

    if format.is_json() {
        return print_json(&info);
    }

    println!("Session: {}", info.session_id);
    if let Some(expires_in) = info.expires_in {
        println!("Expires in: {}s", expires_in);
    }
    Ok(())
}

async fn delete_session(transport: &HttpTransport, id: &str, format: OutputFormat) -> Result<()> {
    transport.delete_session(id).await?;

    if format.is_json() {
        return print_json(&json!({ "deleted": id }));
    }

    println!("Deleted session: {}", id);
    Ok(())
}
