use std::env;
use std::ffi::OsString;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, bail};
use clap::{Arg, ArgAction, CommandFactory, FromArgMatches, Parser};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use schemagen::compose::ComposeEngine;
use schemagen::config::Settings;
use schemagen::generators::{self, BUILTIN_GENERATORS, Generator, GeneratorArgs, sql};
use schemagen::plugin::{self, DynamicGenerator};

#[derive(Parser, Debug)]
#[command(
    name = "schemagen",
    version,
    about = "Compile schema files into SQL, JSON Schema and Rust"
)]
struct Cli {
    /// Directory holding .schema / .schemaLang files
    #[arg(long, value_name = "DIR")]
    schema_dir: Option<PathBuf>,

    /// Directory artifacts are written under, one subdirectory per generator
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Also read schema files in subdirectories
    #[arg(long)]
    recursive: bool,

    /// Enable the relational backend
    #[arg(long)]
    sql: bool,

    /// Enable the JSON Schema backend
    #[arg(long)]
    json_schema: bool,

    /// Enable the Rust backend
    #[arg(long)]
    rust: bool,

    /// SQL dialect: sqlite, postgres or mysql
    #[arg(long, value_name = "NAME")]
    dialect: Option<String>,

    /// Load a generator from a shared library (repeatable)
    #[arg(long = "plugin", value_name = "PATH")]
    plugins: Vec<PathBuf>,

    /// Emit one filtered query per column subset of every table
    #[arg(long)]
    allow_combinatorial: bool,

    /// Do not ask before combinatorial emission
    #[arg(short = 'y', long)]
    yes: bool,

    /// Configuration file (default: ./schemagen.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(dir) = &self.schema_dir {
            settings.schema_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.output_dir {
            settings.output_dir = Some(dir.clone());
        }
        if self.recursive {
            settings.recursive = true;
        }
        if self.sql {
            settings.enable(sql::NAME);
        }
        if self.json_schema {
            settings.enable(generators::json_schema::NAME);
        }
        if self.rust {
            settings.enable(generators::rust::NAME);
        }
        if let Some(dialect) = &self.dialect {
            settings.sql.dialect = Some(dialect.clone());
        }
        if self.allow_combinatorial {
            settings.sql.powerset_queries = true;
        }
    }
}

/// Options needed before the real parse: plugins must be loaded first so
/// their flags exist, and logging must be up to report loading.
#[derive(Debug, Default, PartialEq)]
struct EarlyOptions {
    config: Option<PathBuf>,
    plugins: Vec<PathBuf>,
    verbose: u8,
}

impl EarlyOptions {
    /// Scans every argument, so flags clap does not know yet cannot hide a
    /// later `--plugin`.
    fn scan<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut early = Self::default();
        let mut args = args.into_iter().map(Into::into).skip(1);
        while let Some(arg) = args.next() {
            let Some(arg) = arg.to_str().map(str::to_owned) else {
                continue;
            };
            if arg == "--" {
                break;
            }
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_owned())),
                _ => (arg.as_str(), None),
            };
            match flag {
                "--plugin" | "--config" => {
                    let value = inline
                        .map(PathBuf::from)
                        .or_else(|| args.next().map(PathBuf::from));
                    let Some(value) = value else { break };
                    if flag == "--plugin" {
                        early.plugins.push(value);
                    } else {
                        early.config = Some(value);
                    }
                }
                "--verbose" => early.verbose = early.verbose.saturating_add(1),
                short if short.starts_with('-') && !short.starts_with("--") => {
                    let letters = &short[1..];
                    if letters.chars().all(|c| matches!(c, 'v' | 'y')) {
                        let count = letters.chars().filter(|c| *c == 'v').count();
                        early.verbose = early.verbose.saturating_add(count as u8);
                    }
                }
                _ => {}
            }
        }
        early
    }
}

fn main() {
    let early = EarlyOptions::scan(env::args_os());
    init_tracing(early.verbose);

    if let Err(e) = run(&early) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(early: &EarlyOptions) -> anyhow::Result<()> {
    let mut settings = Settings::load(early.config.as_deref())?;

    let mut plugin_paths = settings.plugins.clone();
    for path in &early.plugins {
        if !plugin_paths.contains(path) {
            plugin_paths.push(path.clone());
        }
    }
    let mut plugins = plugin::load_all(&plugin_paths)?;

    let mut command = Cli::command();
    for p in &plugins {
        for spec in p.register_args() {
            command = command.arg(
                Arg::new(spec.name.clone())
                    .long(spec.name.clone())
                    .value_name("VALUE")
                    .help(spec.help)
                    .help_heading(format!("Plugin `{}`", p.name())),
            );
        }
    }
    let matches = command.get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    cli.apply(&mut settings);

    for p in &mut plugins {
        let mut args = GeneratorArgs::new();
        for spec in p.register_args() {
            if let Some(value) = matches.get_one::<String>(&spec.name) {
                args.set(spec.name.clone(), value.clone());
            }
        }
        p.configure(&args)?;
    }

    let stdin = io::stdin();
    compile(&settings, plugins, cli.yes, &mut stdin.lock(), &mut io::stdout())
}

fn compile(
    settings: &Settings,
    plugins: Vec<DynamicGenerator>,
    yes: bool,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let schema_dir = settings.schema_dir()?;
    let output_dir = settings.output_dir()?;

    let mut engine = ComposeEngine::new();
    for name in BUILTIN_GENERATORS {
        if !settings.generators.iter().any(|g| g == name) {
            continue;
        }
        let mut generator = generators::builtin(name)
            .with_context(|| format!("no built-in generator named `{name}`"))?;
        generator.configure(&settings.generator_args(name))?;
        engine.register(generator)?;
    }
    for p in plugins {
        engine.register(Box::new(p))?;
    }
    if engine.is_empty() {
        bail!("no generators enabled; pass --sql, --json-schema, --rust or --plugin");
    }

    let powerset = settings.sql.powerset_queries;
    if powerset && !settings.generators.iter().any(|g| g == sql::NAME) {
        warn!("combinatorial queries requested but the sql generator is not enabled");
    }

    let mut model = schemagen::compile_directory(schema_dir, settings.recursive)
        .with_context(|| format!("reading {}", schema_dir.display()))?;
    info!(
        structs = model.structs.len(),
        enums = model.enums.len(),
        "schema loaded"
    );

    let registry = engine.compose(&mut model)?;

    if powerset && settings.generators.iter().any(|g| g == sql::NAME) {
        let count = sql::powerset_query_count(&model);
        if !confirm(count, yes, input, out)? {
            writeln!(out, "Aborted; nothing was written.")?;
            return Ok(());
        }
    }

    let artifacts = engine.emit(&model, &registry)?;
    let written = ComposeEngine::write(output_dir, &artifacts)?;
    writeln!(out, "Wrote {} files to {}", written.len(), output_dir.display())?;
    Ok(())
}

/// Reports the exact query count and reads a yes/no answer. End of input
/// counts as no.
fn confirm(
    count: u64,
    yes: bool,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> io::Result<bool> {
    writeln!(out, "Combinatorial emission will generate {count} filtered queries.")?;
    if yes {
        return Ok(true);
    }
    write!(out, "Continue? [y/N] ")?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
