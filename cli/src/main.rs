//! Maestro CLI: run one research mission from the terminal with streamed
//! progress, or start the WebSocket server.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use maestro::{ConnectionType, MissionSettings, ToolSelection};

#[derive(Parser)]
#[command(name = "maestro", about = "Multi-agent research missions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a research mission and print the final report.
    Run {
        /// The research request.
        request: String,
        /// Search the local document corpus.
        #[arg(long, default_value_t = false)]
        local_rag: bool,
        /// Disable web search (enabled by default).
        #[arg(long, default_value_t = false)]
        no_web_search: bool,
        /// Restrict document search to a document group.
        #[arg(long)]
        document_group: Option<String>,
        /// Structured research rounds.
        #[arg(long)]
        rounds: Option<u32>,
        /// Writing passes (initial draft + revisions).
        #[arg(long)]
        passes: Option<u32>,
        /// Print every realtime event as JSON instead of a summary line.
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
    /// Start the WebSocket server.
    Serve {
        /// Listen address, e.g. 127.0.0.1:8080.
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();
    let _guard = env_config::tracing_init::init("maestro");

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            request,
            local_rag,
            no_web_search,
            document_group,
            rounds,
            passes,
            verbose,
        } => {
            run_mission(
                request,
                ToolSelection {
                    local_rag,
                    web_search: !no_web_search,
                },
                document_group,
                rounds,
                passes,
                verbose,
            )
            .await
        }
        Command::Serve { addr } => serve::run_serve(addr.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run_mission(
    request: String,
    tool_selection: ToolSelection,
    document_group: Option<String>,
    rounds: Option<u32>,
    passes: Option<u32>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = serve::default_state().await?;
    let controller = state.controller.clone();

    let settings = MissionSettings {
        structured_research_rounds: rounds,
        writing_passes: passes,
        ..Default::default()
    };
    let (connection_id, mut events) =
        state.bus.connect("cli", ConnectionType::Research, None);

    let mission_id = controller
        .create_and_start_mission(
            "cli",
            "cli",
            request,
            tool_selection,
            document_group,
            Some(settings),
        )
        .await?;
    state.bus.subscribe(&connection_id, &mission_id)?;
    println!("mission {} started", mission_id);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if verbose {
                println!("{}", event);
            } else if let Some(line) = summarize_event(&event) {
                println!("{}", line);
            }
        }
    });

    // Poll for the terminal status; events keep streaming in the meantime.
    let status = loop {
        let status = controller.get(&mission_id).await?.status;
        if status.is_terminal() {
            break status;
        }
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    };
    // Let the last events drain before tearing the connection down.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    state.bus.disconnect(&connection_id);
    let _ = printer.await;

    println!("mission finished: {}", status.as_str());
    if let Some(report) = controller.get_current_report(&mission_id).await? {
        println!("\n{}", report.content);
    } else if let Ok(ctx) = controller.get(&mission_id).await {
        if let Some(error) = ctx.error_info {
            eprintln!("{}", error);
        }
    }
    Ok(())
}

/// One human-readable line per interesting event; noisy types are skipped.
fn summarize_event(event: &serde_json::Value) -> Option<String> {
    let kind = event.get("type")?.as_str()?;
    match kind {
        "status_changed" => Some(format!("status: {}", event["status"].as_str()?)),
        "log_entry" => {
            let entry = event.get("entry")?;
            Some(format!(
                "[{}] {}",
                entry.get("agent_name")?.as_str()?,
                entry.get("action")?.as_str()?
            ))
        }
        "section_updated" => Some(format!(
            "section drafted: {}",
            event["section_id"].as_str()?
        )),
        "report_version_added" => Some(format!("report version {}", event["version"])),
        "web_fetch_start" => Some(format!("fetching {}", event["url"].as_str()?)),
        _ => None,
    }
}
