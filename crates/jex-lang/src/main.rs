use std::env;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use jex_core::error::{format_error, JexError};
use jex_core::kernel::new_kernel_interp;
use jex_core::module::FileModuleLoader;
use jex_core::parser::JsonParser;
use jex_core::repl::{run_interactive, Repl};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn help() -> ! {
    println!("Usage: jex [-i] [-p PATH1,PATH2,...] [-b MODULE | MODULE]");
    println!();
    println!("Options:");
    println!("  -i, --repl        Run interactively (read-eval-print loop)");
    println!("  -b MODULE         Evaluate MODULE in batch mode");
    println!("  -p PATHS          Comma-separated roots to search for modules");
    println!("                    (default: the current directory)");
    println!("  --version         Show version");
    println!("  -h, --help        Show this help");
    exit(0);
}

fn unknown_option(opt: &str) -> ! {
    eprintln!("unknown option: {}", opt);
    help();
}

struct Args {
    interactive: bool,
    batch_module: Option<String>,
    find_paths: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args {
        interactive: false,
        batch_module: None,
        find_paths: None,
    };
    let mut argv = env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "-i" | "--repl" => args.interactive = true,
            "-b" => match argv.next() {
                Some(module) => args.batch_module = Some(module),
                None => {
                    eprintln!("-b needs a module name");
                    exit(2);
                }
            },
            "-p" => match argv.next() {
                Some(paths) => args.find_paths = Some(paths),
                None => {
                    eprintln!("-p needs a path list");
                    exit(2);
                }
            },
            "--version" => {
                println!("jex {}", VERSION);
                exit(0);
            }
            "-h" | "--help" => help(),
            other if other.starts_with('-') => unknown_option(other),
            positional => {
                if args.batch_module.is_some() {
                    eprintln!("expect at most one module name");
                    exit(2);
                }
                args.batch_module = Some(positional.to_string());
            }
        }
    }
    args
}

fn find_paths(spec: Option<&str>) -> Result<Vec<String>, JexError> {
    let raw: Vec<String> = match spec {
        None | Some("") => vec![env::current_dir()?.display().to_string()],
        Some(paths) => paths.split(',').map(|p| p.to_string()).collect(),
    };
    let mut absolute = Vec::with_capacity(raw.len());
    for path in raw {
        let buf = PathBuf::from(&path);
        let buf = if buf.is_absolute() {
            buf
        } else {
            env::current_dir()?.join(buf)
        };
        absolute.push(buf.display().to_string());
    }
    Ok(absolute)
}

fn print_error(err: &JexError) {
    for line in format_error(err) {
        eprintln!("{}", line);
    }
}

fn main() {
    let args = parse_args();

    let paths = match find_paths(args.find_paths.as_deref()) {
        Ok(paths) => paths,
        Err(err) => {
            print_error(&err);
            exit(1);
        }
    };

    let loader = Arc::new(FileModuleLoader::new(paths, JsonParser::kernel()));
    let repl = Repl::new(JsonParser::kernel(), new_kernel_interp(), loader);

    if let Some(module) = &args.batch_module {
        if args.interactive {
            eprintln!("pick one of -i and a batch module");
            exit(2);
        }
        if let Err(err) = repl.eval_batch(module) {
            print_error(&err);
            exit(1);
        }
        return;
    }

    if let Err(err) = run_interactive(&repl) {
        print_error(&err);
        exit(1);
    }
}
