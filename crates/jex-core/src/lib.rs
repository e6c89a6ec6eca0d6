pub mod context;
pub mod env;
pub mod error;
pub mod exp;
pub mod interp;
pub mod kernel;
pub mod matcher;
pub mod module;
pub mod parser;
pub mod prelude;
pub mod repl;

use std::sync::Arc;

use error::JexError;
use exp::Exp;
use module::{FileModuleLoader, MemoryModuleLoader};
use parser::JsonParser;
use repl::Repl;

/// Evaluate one source document at top level with the kernel language
/// and an empty in-memory module space.
pub fn eval_source(source: &str) -> Result<Exp, JexError> {
    let repl = Repl::new(
        JsonParser::kernel(),
        kernel::new_kernel_interp(),
        Arc::new(MemoryModuleLoader::default()),
    );
    let exp = repl.parse_source(source)?;
    repl.eval_interactive(&exp)
}

/// Load and evaluate a module by logical name against the given find
/// paths. This is what batch mode does.
pub fn eval_module(find_paths: Vec<String>, module_name: &str) -> Result<(), JexError> {
    let repl = Repl::new(
        JsonParser::kernel(),
        kernel::new_kernel_interp(),
        Arc::new(FileModuleLoader::new(find_paths, JsonParser::kernel())),
    );
    repl.eval_batch(module_name)
}
