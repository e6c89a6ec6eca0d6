use std::sync::Arc;

use rustyline::{error::ReadlineError, DefaultEditor};

use crate::context::{ctx_value, Context, ContextRef};
use crate::env::{self, EnvRef};
use crate::error::{format_error, JexError};
use crate::exp::Exp;
use crate::interp::{Interp, Interpret};
use crate::kernel::{EvalLevel, EVAL_LEVEL_KEY};
use crate::module::{ModuleLoader, MODULE_LOADER_KEY};
use crate::parser::JsonParser;
use crate::prelude;

const PROMPT: &str = "jex> ";

const META_COMMANDS: &[&str] = &[":q", ":quit", ":h", ":help", ":path"];

fn print_help() {
    println!("Enter a JSON document to evaluate it.");
    println!("  :q, :quit         exit");
    println!("  :h, :help         this help");
    println!("  :path P1,P2,...   prepend module search roots");
}

/// The read-eval-print driver: one parser, one interpreter, one module
/// loader. Interactive inputs share a prelude-seeded environment but
/// each gets a fresh top-level context; batch mode loads one module.
pub struct Repl {
    parser: JsonParser,
    interp: Interp,
    loader: Arc<dyn ModuleLoader>,
    env: EnvRef,
}

impl Repl {
    pub fn new(parser: JsonParser, interp: Interp, loader: Arc<dyn ModuleLoader>) -> Self {
        let env = env::protect(&prelude::prelude_env());
        Self {
            parser,
            interp,
            loader,
            env,
        }
    }

    fn root_ctx(&self, level: EvalLevel) -> ContextRef {
        Context::root(vec![
            (EVAL_LEVEL_KEY, ctx_value(level)),
            (MODULE_LOADER_KEY, ctx_value(self.loader.clone())),
        ])
    }

    pub fn parse_source(&self, source: &str) -> Result<Exp, JexError> {
        self.parser.parse_source(source)
    }

    pub fn eval_interactive(&self, exp: &Exp) -> Result<Exp, JexError> {
        let ctx = self.root_ctx(EvalLevel::Top);
        self.interp.interpret(&ctx, exp, &self.env)
    }

    pub fn eval_batch(&self, module_name: &str) -> Result<(), JexError> {
        let ctx = self.root_ctx(EvalLevel::Module);
        self.loader.load(&ctx, &self.interp, module_name)?;
        Ok(())
    }

    /// Prepend module search roots; a no-op for loaders without one.
    pub fn add_paths(&self, paths: Vec<String>) {
        self.loader.add_paths(paths);
    }
}

/// The interactive loop: parse a line, evaluate, print the value or
/// the error, resume. Ctrl-C clears the line, Ctrl-D exits.
pub fn run_interactive(repl: &Repl) -> Result<(), JexError> {
    let mut editor = DefaultEditor::new().map_err(|e| JexError::io(e.to_string()))?;
    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                let command = line.split_whitespace().next().unwrap_or(line);
                if META_COMMANDS.contains(&command) {
                    match command {
                        ":q" | ":quit" => return Ok(()),
                        ":path" => {
                            let paths: Vec<String> = line[command.len()..]
                                .trim()
                                .split(',')
                                .map(|p| p.trim().to_string())
                                .filter(|p| !p.is_empty())
                                .collect();
                            if paths.is_empty() {
                                print_help();
                            } else {
                                repl.add_paths(paths);
                            }
                            continue;
                        }
                        _ => {
                            print_help();
                            continue;
                        }
                    }
                }
                let exp = match repl.parse_source(line) {
                    Ok(exp) => exp,
                    Err(err) => {
                        print_error(&err);
                        continue;
                    }
                };
                match repl.eval_interactive(&exp) {
                    Ok(value) => println!("Value: {}", value),
                    Err(err) => print_error(&err),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(JexError::io(err.to_string())),
        }
    }
}

fn print_error(err: &JexError) {
    for line in format_error(err) {
        eprintln!("{}", line);
    }
}
