//! Printing commands that set environment variables in the user's shell.

/// Shell flavours with distinct syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Posix,
    PowerShell,
    Cmd,
}

impl Shell {
    /// Guess the invoking shell.
    pub fn detect() -> Self {
        if !cfg!(windows) {
            return Shell::Posix;
        }
        // cmd.exe exports PROMPT, PowerShell does not.
        if std::env::var_os("PROMPT").is_some() {
            Shell::Cmd
        } else {
            Shell::PowerShell
        }
    }

    pub fn set_env_command(self, name: &str, value: &str) -> String {
        match self {
            Shell::Posix => format!("export {}=\"{}\";", name, value),
            Shell::PowerShell => format!("$Env:{}=\"{}\";", name, value),
            Shell::Cmd => format!("set {}={}", name, value),
        }
    }

    pub fn comment(self, text: &str) -> String {
        match self {
            Shell::Posix | Shell::PowerShell => format!("# {}", text),
            Shell::Cmd => format!("rem {}", text),
        }
    }
}

pub fn print_set_env_command(name: &str, value: &str) {
    println!("{}", Shell::detect().set_env_command(name, value));
}

pub fn print_comment(text: &str) {
    println!("{}", Shell::detect().comment(text));
}
