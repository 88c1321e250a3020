use clap::{Parser, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use npa::compiler::{self, Scanner, Token, TokenKind};
use npa::vm::natives;
use npa::{ConfigError, ExitStatus, ReportFormat, RuntimeConfig, VM, VmError};

// Wrapper type for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum ReportFormatArg {
    #[default]
    Human,
    Json,
}

impl From<ReportFormatArg> for ReportFormat {
    fn from(arg: ReportFormatArg) -> Self {
        match arg {
            ReportFormatArg::Human => ReportFormat::Human,
            ReportFormatArg::Json => ReportFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "npa", version)]
#[command(about = "Runtime core of a small bytecode interpreter", long_about = None)]
struct Cli {
    /// Source file to load (starts a REPL when omitted)
    file: Option<PathBuf>,

    /// Read runtime settings from a TOML file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the scanned tokens (human or json format)
    #[arg(long, value_enum, require_equals = true, num_args = 0..=1, default_missing_value = "human")]
    tokens: Option<ReportFormatArg>,

    /// Collect garbage before every allocation
    #[arg(long)]
    stress_gc: bool,

    /// Print GC statistics when the run ends (human or json format)
    #[arg(long, value_enum, require_equals = true, num_args = 0..=1, default_missing_value = "human")]
    gc_stats: Option<ReportFormatArg>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{count} lexical error(s)")]
    Lexical { count: usize },
    #[error("{0}")]
    Vm(#[from] VmError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    fn status(&self) -> ExitStatus {
        match self {
            CliError::Read { .. } | CliError::Output(_) => ExitStatus::IoError,
            CliError::Config(ConfigError::Io { .. }) => ExitStatus::IoError,
            CliError::Config(ConfigError::Parse(_)) | CliError::Lexical { .. } => ExitStatus::CompileError,
            CliError::Vm(e) => ExitStatus::from(e),
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitStatus::Usage.into()
            } else {
                ExitStatus::Ok.into()
            };
        }
    };

    env_logger::init();

    match run(cli) {
        Ok(()) => ExitStatus::Ok.into(),
        Err(e) => {
            if !matches!(e, CliError::Lexical { .. }) {
                eprintln!("error: {}", e);
            }
            e.status().into()
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if cli.stress_gc {
        config.stress_gc = true;
    }
    let stats_format = match cli.gc_stats {
        Some(format) => Some(ReportFormat::from(format)),
        None if config.gc_stats => Some(ReportFormat::Human),
        None => None,
    };
    let tokens_format = cli.tokens.map(ReportFormat::from);

    let mut vm = VM::new_with_config(config);
    natives::define_builtins(&mut vm)?;

    let result = match &cli.file {
        Some(path) => run_file(&mut vm, path, tokens_format),
        None => repl(&mut vm, tokens_format.unwrap_or(ReportFormat::Human)),
    };

    if let Some(format) = stats_format {
        print_gc_stats(&vm, format);
    }
    result
}

fn run_file(vm: &mut VM, path: &Path, format: Option<ReportFormat>) -> Result<(), CliError> {
    let source = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let tokens = Scanner::new(&source).scan_tokens();
    if let Some(format) = format {
        print_tokens(&tokens, format)?;
    }

    let diagnostics = compiler::diagnostics(&tokens);
    if !diagnostics.is_empty() {
        for diagnostic in &diagnostics {
            eprintln!("{}", diagnostic);
        }
        return Err(CliError::Lexical {
            count: diagnostics.len(),
        });
    }

    let interned = compiler::intern_lexemes(vm, &tokens)?;
    log::info!(
        "{}: {} tokens, {} names interned, {} distinct strings",
        path.display(),
        tokens.len(),
        interned,
        vm.strings().len()
    );
    Ok(())
}

fn repl(vm: &mut VM, format: ReportFormat) -> Result<(), CliError> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            writeln!(stdout)?;
            return Ok(());
        }

        let tokens = Scanner::new(&line).scan_tokens();
        print_tokens(&tokens, format)?;
        for diagnostic in compiler::diagnostics(&tokens) {
            eprintln!("{}", diagnostic);
        }
        compiler::intern_lexemes(vm, &tokens)?;
    }
}

fn print_tokens(tokens: &[Token<'_>], format: ReportFormat) -> Result<(), CliError> {
    let mut out = io::stdout().lock();
    match format {
        ReportFormat::Human => {
            let mut last_line = None;
            for token in tokens {
                if last_line == Some(token.line) {
                    write!(out, "   | ")?;
                } else {
                    write!(out, "{:4} ", token.line)?;
                    last_line = Some(token.line);
                }
                if token.kind == TokenKind::Eof {
                    writeln!(out, "{:?}", token.kind)?;
                } else {
                    writeln!(out, "{:?} '{}'", token.kind, token.lexeme)?;
                }
            }
        }
        ReportFormat::Json => {
            serde_json::to_writer(&mut out, tokens).map_err(io::Error::from)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn print_gc_stats(vm: &VM, format: ReportFormat) {
    let stats = vm.gc_stats();
    match format {
        ReportFormat::Human => {
            eprintln!("GC Statistics:");
            eprintln!("  cycles:         {}", stats.cycles);
            eprintln!("  objects freed:  {}", stats.objects_freed);
            eprintln!("  bytes freed:    {}", stats.bytes_freed);
            eprintln!("  live objects:   {}", vm.heap().object_count());
            eprintln!("  live bytes:     {}", vm.heap().bytes_allocated());
            eprintln!("  total pause:    {}us", stats.total_pause_us);
            eprintln!("  max pause:      {}us", stats.max_pause_us);
        }
        ReportFormat::Json => {
            let report = serde_json::json!({
                "stats": stats,
                "live_objects": vm.heap().object_count(),
                "live_bytes": vm.heap().bytes_allocated(),
            });
            eprintln!("{}", report);
        }
    }
}
