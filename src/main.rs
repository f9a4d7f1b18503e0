//! codelab - code execution and exercise grading for an interactive
//! course platform.
//!
//! Usage:
//!   codelab serve [--port 8080] [--data-dir content]   # Start HTTP server
//!   codelab run --code "print('hi')"                   # Execute a fragment
//!   codelab check --file solution.py --test checks.py  # Grade a fragment

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process::exit;

use codelab::checker::Checker;
use codelab::content::ContentStore;
use codelab::http_server;
use codelab::outcome::ExecStatus;
use codelab::sandbox::{ExecutionContext, RunLimits, Sandbox};
use codelab::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "codelab")]
#[command(about = "Code execution and exercise grading service")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Wall-clock budget per execution in milliseconds
    #[arg(long, default_value = "10000")]
    time: u64,

    /// Memory limit in KB
    #[arg(long, default_value = "262144")]
    mem: u64,

    /// Maximum file size submitted code may create, in KB
    #[arg(long, default_value = "1024")]
    fsize: u64,

    /// Maximum number of open files
    #[arg(long, default_value = "64")]
    nofile: u64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Directory holding courses.json and the per-course content files
        #[arg(long, default_value = "content")]
        data_dir: PathBuf,
    },
    /// Execute a fragment and print its captured output
    Run {
        /// Read the fragment from a file ('-' for stdin)
        #[arg(long, conflicts_with = "code")]
        file: Option<PathBuf>,

        /// Inline fragment
        #[arg(long)]
        code: Option<String>,
    },
    /// Grade a fragment against a test file
    Check {
        /// The submission to grade
        #[arg(long)]
        file: PathBuf,

        /// Test fragment run against the submission's output
        #[arg(long)]
        test: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let limits = RunLimits {
        time_ms: args.time,
        mem_kb: args.mem,
        fsize_kb: args.fsize,
        nofile: args.nofile,
    };
    let sandbox = Sandbox::with_limits(limits);

    match args.command {
        Commands::Serve { port, data_dir } => {
            let state = AppState::new(ContentStore::open(data_dir), Checker::new(sandbox));
            http_server::run_server(port, state).await;
        }
        Commands::Run { file, code } => {
            let code = match read_fragment(file, code) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(2);
                }
            };
            match sandbox.run(&code, ExecutionContext::new()).await {
                Ok(outcome) => {
                    print!("{}", outcome.stdout);
                    eprint!("{}", outcome.stderr);
                    exit(if outcome.status == ExecStatus::Success { 0 } else { 1 });
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(2);
                }
            }
        }
        Commands::Check { file, test } => {
            let learner_code = match std::fs::read_to_string(&file) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: read {}: {}", file.display(), e);
                    exit(2);
                }
            };
            let test_code = match test.map(std::fs::read_to_string).transpose() {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: read test file: {}", e);
                    exit(2);
                }
            };
            match Checker::new(sandbox)
                .check(&learner_code, test_code.as_deref())
                .await
            {
                Ok(outcome) => {
                    print!("{}", outcome.output);
                    if !outcome.details.is_empty() {
                        eprintln!("{}", outcome.details.trim_end());
                    }
                    exit(if outcome.success { 0 } else { 1 });
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(2);
                }
            }
        }
    }
}

fn read_fragment(file: Option<PathBuf>, code: Option<String>) -> Result<String, String> {
    if let Some(code) = code {
        return Ok(code);
    }
    match file {
        Some(path) if path.as_os_str() == "-" => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("read stdin: {}", e))?;
            Ok(buf)
        }
        Some(path) => {
            std::fs::read_to_string(&path).map_err(|e| format!("read {}: {}", path.display(), e))
        }
        None => Err("no fragment given, use --file or --code".to_string()),
    }
}
