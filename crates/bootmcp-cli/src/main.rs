#[tokio::main]
async fn main() {
    if let Err(e) = bootmcp_cli::run().await {
        eprintln!("Error: {e}");

        let suggestions = e.suggestions();
        if !suggestions.is_empty() {
            eprintln!("\nSuggestions:");
            for suggestion in suggestions {
                eprintln!("  • {suggestion}");
            }
        }
        std::process::exit(1);
    }
}
