use colored::Colorize;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let msg = err.to_string().to_lowercase();

    if msg.contains("no api url") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Point openask at a backend with:");
        eprintln!(
            "  {} openask --api-url https://ask.example.com ask \"...\"",
            "$".dimmed()
        );
    }

    if msg.contains("session is being created") || msg.contains("http 429") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  The backend is busy. Wait a moment and try again.");
    }

    if msg.contains("connection refused") || msg.contains("network") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Check that the backend is running and reachable.");
    }

    std::process::exit(1);
}
