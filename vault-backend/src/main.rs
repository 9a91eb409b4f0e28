use dotenv::dotenv;
use std::sync::Arc;

mod config;
mod notes;
mod widgets;

use config::Config;
use notes::FsVault;
use widget_types::Severity;
use widgets::{ComputeOptions, WidgetEngine};

/// One CLI invocation
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Load widget definitions and report problems
    Check,
    Ground { force: bool },
    Recall { path: String },
    Similar { widget: String, path: String },
}

fn usage() -> &'static str {
    "usage: vault-backend <command>\n\
     \n\
     commands:\n\
     \x20 check                     validate widget definitions\n\
     \x20 ground [--force]          compute ground widgets\n\
     \x20 recall <path>             compute recall widgets for a note\n\
     \x20 similar <widget> <path>   rank notes similar to <path>\n"
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut args = args.iter().map(String::as_str);
    let command = match args.next() {
        Some("check") => Command::Check,
        Some("ground") => {
            let mut force = false;
            for arg in args.by_ref() {
                match arg {
                    "--force" | "-f" => force = true,
                    other => return Err(format!("unknown option '{}'", other)),
                }
            }
            Command::Ground { force }
        }
        Some("recall") => Command::Recall {
            path: args.next().ok_or("recall needs a note path")?.to_string(),
        },
        Some("similar") => {
            let widget = args.next().ok_or("similar needs a widget id")?.to_string();
            let path = args.next().ok_or("similar needs a note path")?.to_string();
            Command::Similar { widget, path }
        }
        Some(other) => return Err(format!("unknown command '{}'", other)),
        None => return Err("missing command".to_string()),
    };
    match args.next() {
        Some(extra) => Err(format!("unexpected argument '{}'", extra)),
        None => Ok(command),
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        return;
    }
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, usage());
            std::process::exit(2);
        }
    };

    let config = Config::from_env();
    log::info!(
        "[WIDGETS] Vault '{}' at {}, widgets in {}",
        config.vault_id,
        config.vault_dir.display(),
        config.widgets_dir.display()
    );

    let source = Arc::new(FsVault::new(config.vault_dir.clone()));
    let mut engine = WidgetEngine::new(
        config.vault_id.clone(),
        config.widgets_dir.clone(),
        source,
        config.engine_settings(),
    );
    engine.set_health_callback(Box::new(|issue| match issue.severity {
        Severity::Error => log::error!("[WIDGETS] {}: {}", issue.id, issue.message),
        Severity::Warning => log::warn!("[WIDGETS] {}: {}", issue.id, issue.message),
        Severity::Info => log::info!("[WIDGETS] {}: {}", issue.id, issue.message),
    }));

    if let Err(e) = engine.initialize().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let output = match run(&engine, command).await {
        Ok(output) => output,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    engine.shutdown();

    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Failed to serialize output: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(engine: &WidgetEngine, command: Command) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let output = match command {
        Command::Check => {
            let errors: Vec<serde_json::Value> = engine
                .load_errors()
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "id": e.id,
                        "file": e.file_path.display().to_string(),
                        "error": e.error.to_string(),
                    })
                })
                .collect();
            serde_json::json!({
                "configDir": engine.config_dir().display().to_string(),
                "hasConfigDir": engine.has_config_dir(),
                "widgets": engine.widget_summaries(),
                "errors": errors,
            })
        }
        Command::Ground { force } => {
            serde_json::to_value(engine.compute_ground_widgets(ComputeOptions { force }).await?)?
        }
        Command::Recall { path } => {
            serde_json::to_value(engine.compute_recall_widgets(&path, ComputeOptions::default()).await?)?
        }
        Command::Similar { widget, path } => {
            serde_json::to_value(engine.compute_similarity(&widget, &path).await?)?
        }
    };
    Ok(output)
}
