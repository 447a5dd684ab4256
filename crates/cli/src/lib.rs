pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "shopkeep",
    about = "Shopkeep operator CLI",
    long_about = "Operate the Shopkeep agent store: migrations, demo data, config inspection, \
                  the tool registry and conversation history.",
    after_help = "Examples:\n  shopkeep migrate\n  shopkeep tools sync\n  shopkeep tools list --tenant tenant-demo\n  shopkeep history --conversation <id>"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo shop (inventory, customers, orders) for `tenant-demo`")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Inspect or sync the tool registry")]
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },
    #[command(about = "List a tenant's conversations, or replay one as a timeline")]
    History {
        #[arg(long, default_value = commands::DEMO_TENANT)]
        tenant: String,
        #[arg(long, help = "Conversation id to replay")]
        conversation: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Debug, Subcommand)]
enum ToolsCommand {
    #[command(about = "Write the built-in system tool definitions to the registry")]
    Sync,
    #[command(about = "Show the merged system and custom tools a tenant can call")]
    List {
        #[arg(long, default_value = commands::DEMO_TENANT)]
        tenant: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Tools { command: ToolsCommand::Sync } => commands::tools::sync(),
        Command::Tools { command: ToolsCommand::List { tenant } } => commands::tools::list(&tenant),
        Command::History { tenant, conversation, limit } => {
            commands::history::run(&tenant, conversation.as_deref(), limit)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
