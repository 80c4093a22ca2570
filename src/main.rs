use std::{
    fs,
    path::{Path, PathBuf},
    process::exit,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use kismet::{
    builtins,
    config::{Config, DEFAULT_MAX_DEPTH},
    parse, Value,
};

fn main() {
    color_backtrace::install();
    kismet::init_tracing();

    let app = App::parse();
    if let Err(error) = app.run() {
        eprintln!("{}", format!("{:#}", error).red());
        exit(1)
    }
}

#[derive(Parser)]
#[command(name = "kismet", version, about = "Run kismet scripts")]
struct App {
    #[command(subcommand)]
    command: Command,
    /// Maximum nesting of calls before evaluation fails
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
    /// Cache results of pure builtins
    #[arg(long, global = true)]
    memoize: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script file
    #[command(alias = "r")]
    Run { file: PathBuf },
    /// Evaluate source given on the command line
    #[command(alias = "e")]
    Eval { source: String },
    /// Print the parsed form of a script file
    Ast { file: PathBuf },
}

impl App {
    fn config(&self) -> Config {
        Config {
            max_depth: self.max_depth,
            memoize_pure: self.memoize,
        }
    }
    fn run(&self) -> anyhow::Result<()> {
        match &self.command {
            Command::Run { file } => self.evaluate(&read(file)?),
            Command::Eval { source } => self.evaluate(source),
            Command::Ast { file } => {
                let items = parse::parse(&read(file)?)?;
                println!("{}", items);
                Ok(())
            }
        }
    }
    fn evaluate(&self, source: &str) -> anyhow::Result<()> {
        let scope = builtins::prelude(&self.config());
        let value = kismet::run(source, &scope)?;
        if !matches!(value, Value::Nil) {
            println!("{}", value.to_string().bright_white());
        }
        Ok(())
    }
}

fn read(file: &Path) -> anyhow::Result<String> {
    fs::read_to_string(file).with_context(|| format!("Unable to read {}", file.display()))
}
