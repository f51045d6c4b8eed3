mod config;
mod test_runner;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing::info;
use tracing_subscriber::EnvFilter;

use expander::{DiagnosticError, Engine};

use crate::config::{Config, load_values};

const SUBCOMMANDS: &[&str] = &["run", "test", "extract", "help"];

#[derive(Parser)]
#[command(name = "mpl", version, about = "Macro expander for AMPL/GMPL models")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Expand a model document
    Run(RunArgs),

    /// Run .test.mod test files
    Test(TestArgs),

    /// Expand a model, then decode a solution through its submodels
    Extract(ExtractArgs),
}

#[derive(clap::Args)]
struct ExpandArgs {
    /// Model document to expand
    file: PathBuf,

    /// Configuration file (default: ./mpl.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Place each command's data right after it
    #[arg(long)]
    inline_data: bool,

    /// Do not echo evaluated commands as comments
    #[arg(long)]
    no_comments: bool,

    /// Bind a snippet variable, e.g. -D n=10 or -D 'W=[5, 7]'. Repeatable.
    #[arg(short = 'D', value_name = "NAME=VALUE")]
    define: Vec<String>,
}

#[derive(clap::Args)]
struct RunArgs {
    #[command(flatten)]
    expand: ExpandArgs,

    /// Write the output here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Scan only, don't expand (exit 0 if valid)
    #[arg(long)]
    check: bool,

    /// Dump the scanned regions
    #[arg(long)]
    regions: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.mod file or directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

#[derive(clap::Args)]
struct ExtractArgs {
    #[command(flatten)]
    expand: ExpandArgs,

    /// TOML table of solved variable values
    #[arg(long)]
    values: PathBuf,

    /// Query only this submodel
    #[arg(long)]
    submodel: Option<String>,

    /// Also print violated valid inequalities
    #[arg(long)]
    separate: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,expander=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    // `mpl file.mod` works like `mpl run file.mod`.
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().skip(1).position(|a| !a.starts_with('-')) {
        if !SUBCOMMANDS.contains(&args[pos + 1].as_str()) {
            args.insert(pos + 1, "run".to_string());
        }
    }

    let cli = Cli::parse_from(&args);
    let color_choice = if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    match cli.command {
        Command::Run(run_args) => do_run(run_args, color_choice),
        Command::Extract(extract_args) => do_extract(extract_args, color_choice),
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, cli.no_color, &test_args.category);
            process::exit(exit_code);
        }
    }
}

/// Build the engine and configuration for a document, exiting on bad input.
fn prepare(args: &ExpandArgs) -> (Engine, Config, String) {
    let mut config = match Config::discover(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(2);
        }
    };
    if args.inline_data {
        config.inline_data = true;
    }
    if args.no_comments {
        config.comment_cmds = false;
    }
    for definition in &args.define {
        if let Err(e) = config.define(definition) {
            eprintln!("error: -D {}", e);
            process::exit(2);
        }
    }

    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.file.display(), e);
            process::exit(1);
        }
    };

    let mut engine = Engine::new();
    for (name, value) in config.runtime_bindings() {
        engine.bind(name, value);
    }
    (engine, config, source)
}

fn expand_or_exit(
    engine: &mut Engine,
    config: &Config,
    file: &Path,
    source: &str,
    color_choice: ColorChoice,
) -> String {
    match engine.translate_with(source, config.options()) {
        Ok(output) => output,
        Err(error) => {
            let mut files = SimpleFiles::new();
            files.add(file.display().to_string(), source.to_string());
            emit_diagnostic_error(color_choice, &files, &error);
            process::exit(1);
        }
    }
}

fn do_run(args: RunArgs, color_choice: ColorChoice) {
    let (mut engine, config, source) = prepare(&args.expand);

    if args.check || args.regions {
        match mpl::parser::Parser::new(source.clone(), 0).parse() {
            Ok(program) if args.regions => {
                for region in &program.regions {
                    println!("{:?} {:?}", region.span, region.kind);
                }
            }
            Ok(program) => {
                eprintln!(
                    "ok: {} scanned successfully ({} constructs)",
                    args.expand.file.display(),
                    program.evaluated_regions().count()
                );
            }
            Err(error) => {
                let mut files = SimpleFiles::new();
                files.add(args.expand.file.display().to_string(), source);
                let writer = StandardStream::stderr(color_choice);
                let _ = term::emit_to_write_style(
                    &mut writer.lock(),
                    &term::Config::default(),
                    &files,
                    &error.to_diagnostic(),
                );
                process::exit(1);
            }
        }
        return;
    }

    let output = expand_or_exit(&mut engine, &config, &args.expand.file, &source, color_choice);
    match &args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, format!("{}\n", output)) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
            info!(path = %path.display(), submodels = ?engine.submodels(), "model written");
        }
        None => println!("{}", output),
    }
}

fn do_extract(args: ExtractArgs, color_choice: ColorChoice) {
    let (mut engine, config, source) = prepare(&args.expand);
    expand_or_exit(&mut engine, &config, &args.expand.file, &source, color_choice);

    let values = load_values(&args.values);
    let lookup = |name: &str| values.get(name).copied().unwrap_or(0.0);

    let names: Vec<String> = match &args.submodel {
        Some(name) => vec![name.clone()],
        None => engine.submodels().to_vec(),
    };
    if names.is_empty() {
        eprintln!("no submodels in {}", args.expand.file.display());
        return;
    }

    for name in &names {
        let decoded = match engine.extract(name, &lookup) {
            Ok(decoded) => decoded,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        };
        println!("{}:", name);
        for solution in decoded {
            println!("  {} = {}", solution.variable, solution.value);
            for path in &solution.paths {
                println!("    {} x [{}]", path.count, path.labels.join(", "));
            }
        }
        if args.separate {
            match engine.separate(name, &lookup) {
                Ok(cuts) => {
                    for cut in cuts {
                        println!("  cut: {}", cut);
                    }
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    process::exit(1);
                }
            }
        }
    }
}

fn emit_diagnostic_error(
    color_choice: ColorChoice,
    files: &SimpleFiles<String, String>,
    error: &DiagnosticError,
) {
    if error.span.is_some() {
        let writer = StandardStream::stderr(color_choice);
        let config = term::Config::default();
        let diagnostic = error.to_diagnostic();
        let _ = term::emit_to_write_style(&mut writer.lock(), &config, files, &diagnostic);
    } else {
        eprintln!("error: {}", error);
    }
}
