use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use llmdocs_ai::StreamStatus;
use llmdocs_main::{
    complete_doc, format_model_line, init_tracing, list_models, load_config, new_doc,
    new_resolver, picker_preferences, resolve_conf_dir, resolve_model, LlmDocsConfig,
    NewDocOptions,
};

#[derive(Parser, Debug)]
#[command(name = "llmdocs", version, about = "Chat with LLMs in plain markdown documents")]
struct Cli {
    #[arg(long, global = true)]
    conf_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: RootCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum RootCommand {
    /// Create a new chat document in the docs directory.
    New(NewArgs),
    /// Stream the model's reply into a chat document.
    Complete(CompleteArgs),
    /// List models served by the configured connections.
    Models(ModelsArgs),
    /// Print the connection that serves a model.
    Resolve(ResolveArgs),
}

#[derive(Args, Debug, Clone)]
struct NewArgs {
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    system_prompt: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct CompleteArgs {
    file: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct ModelsArgs {
    #[arg(long)]
    query: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct ResolveArgs {
    model: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let conf_dir = resolve_conf_dir(cli.conf_dir.as_deref());
    let config = load_config(&conf_dir)?;
    init_tracing(&config.log);

    match cli.command {
        RootCommand::New(args) => run_new(&config, args).await,
        RootCommand::Complete(args) => run_complete(&config, args).await,
        RootCommand::Models(args) => run_models(&config, args).await,
        RootCommand::Resolve(args) => {
            let base_url = resolve_model(&config, &new_resolver(), &args.model).await?;
            println!("{base_url}");
            Ok(())
        }
    }
}

async fn run_new(config: &LlmDocsConfig, args: NewArgs) -> Result<(), String> {
    let options = NewDocOptions {
        model: args.model,
        system_prompt: args.system_prompt,
    };
    let path = new_doc(config, options, chrono::Local::now().date_naive()).await?;
    println!("{}", path.display());
    Ok(())
}

async fn run_complete(config: &LlmDocsConfig, args: CompleteArgs) -> Result<(), String> {
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let completion = complete_doc(config, &new_resolver(), &args.file, interrupt).await?;
    if completion.status == StreamStatus::Aborted {
        eprintln!("stopped after {} characters", completion.text.chars().count());
    }
    println!("{}", completion.text);
    Ok(())
}

async fn run_models(config: &LlmDocsConfig, args: ModelsArgs) -> Result<(), String> {
    if config.connections.is_empty() {
        return Err("no connections configured".to_string());
    }
    let models = list_models(config, &new_resolver(), args.query.as_deref()).await;
    let preferences = picker_preferences(config);
    for entry in &models {
        println!("{}", format_model_line(entry, &preferences));
    }
    Ok(())
}
