use std::io;
use std::process;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells};
use toolpipe::commands::config::{self, ConfigArgs};
use toolpipe::commands::run::{self, RunArgs};

const ROOT_HELP_EXAMPLES: &str = "Examples:\n  toolpipe run\n  toolpipe run --profile fizz --detection eager \"Sum the primes below 100\"\n  echo \"Plot y=x^2\" | toolpipe run --bundle default --json\n  toolpipe config check\n  toolpipe completion bash > ~/.local/share/bash-completion/completions/toolpipe";

const RUN_HELP_EXAMPLES: &str = "Examples:\n  toolpipe run\n  toolpipe run --model mistralai/Mixtral-8x7B-Instruct-v0.1 \"Generate FizzBuzz code and run it\"\n  toolpipe run --dry-run --json \"Explain retries\"\n  toolpipe run --json --save report.json";

#[derive(Debug, Parser)]
#[command(
    name = "toolpipe",
    about = "Chat completion with remote tool execution",
    after_help = ROOT_HELP_EXAMPLES
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(
        about = "Run the completion and tool pipeline once",
        after_help = RUN_HELP_EXAMPLES,
        disable_version_flag = true
    )]
    Run(RunArgs),
    #[command(about = "Manage local config")]
    Config(ConfigArgs),
    #[command(about = "Generate shell completion script")]
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn print_completion(shell: CompletionShell) {
    let mut cmd = Cli::command();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, "toolpipe", &mut io::stdout()),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, "toolpipe", &mut io::stdout()),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, "toolpipe", &mut io::stdout()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run::run(args).await,
        Commands::Config(args) => config::run(args),
        Commands::Completion { shell } => {
            print_completion(shell);
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}
