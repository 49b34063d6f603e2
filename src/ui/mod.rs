//! Terminal output helpers.

pub mod shell;
pub mod table;

use is_terminal::IsTerminal;

pub use shell::{Shell, print_comment, print_set_env_command};

/// Whether stdout is a terminal rather than a pipe or file.
pub fn is_interactive() -> bool {
    std::io::stdout().is_terminal()
}
