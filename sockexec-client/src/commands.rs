//! REPL command parsing
//!
//! Parses one input line like `exec ls -la` or `upload ./logo.png logo.png`
//! into a [`Command`].

use std::path::PathBuf;

/// Parsed REPL command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Connect to a URL or a configured remote alias
    Connect(String),
    Disconnect,
    /// Show connection status
    Status,
    /// Run a command line on the server
    Exec(String),
    /// Send a line to the running command's stdin
    Send(String),
    Upload {
        path: PathBuf,
        remote_name: Option<String>,
    },
    Download {
        name: String,
        target: Option<PathBuf>,
    },
    /// List the server workspace
    List,
    Help,
    Quit,
}

/// Error parsing a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Empty input
    Empty,
    /// Required argument missing
    MissingArgument(&'static str),
    /// Unknown command name
    Unknown(String),
    /// Invalid syntax
    InvalidSyntax(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty command"),
            ParseError::MissingArgument(arg) => write!(f, "missing argument: {}", arg),
            ParseError::Unknown(name) => {
                write!(f, "unknown command '{}' (type 'help' for a list)", name)
            }
            ParseError::InvalidSyntax(msg) => write!(f, "invalid syntax: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Help text listing every command
pub const HELP: &str = "\
Commands:
  connect <url|remote>            connect to a server
  disconnect                      close the connection
  status                          show connection status
  exec <command line>             run a command on the server
  send <text>                     write a line to the running command's stdin
  upload <path> [remote name]     upload a local file
  download <name> [local path]    download a file from the server
  ls                              list files on the server
  help                            show this help
  quit                            exit";

/// Parse one input line into a Command
///
/// `exec` and `send` take the rest of the line verbatim, trailing whitespace
/// included; `send` drops only the single separator after its name. Paths
/// and names may be quoted to include spaces.
pub fn parse_command(input: &str) -> Result<Command, ParseError> {
    let input = input.trim_start();
    if input.trim_end().is_empty() {
        return Err(ParseError::Empty);
    }

    let (name, raw_rest) = split_first_token(input);
    let rest = raw_rest.trim_start();

    match name.to_lowercase().as_str() {
        "connect" | "open" => {
            let target = rest.trim();
            if target.is_empty() {
                return Err(ParseError::MissingArgument("url"));
            }
            Ok(Command::Connect(target.to_string()))
        }
        "disconnect" | "close" => Ok(Command::Disconnect),
        "status" => Ok(Command::Status),
        "exec" | "run" => {
            if rest.trim().is_empty() {
                return Err(ParseError::MissingArgument("command line"));
            }
            Ok(Command::Exec(rest.to_string()))
        }
        "send" => {
            let text = raw_rest
                .strip_prefix(|c: char| c.is_whitespace())
                .unwrap_or(raw_rest);
            Ok(Command::Send(format!("{}\n", text)))
        }
        "upload" | "put" => {
            let args = parse_args(rest)?;
            let mut args = args.into_iter();
            let path = args.next().ok_or(ParseError::MissingArgument("path"))?;
            let remote_name = args.next();
            reject_extra(args)?;
            Ok(Command::Upload {
                path: PathBuf::from(path),
                remote_name,
            })
        }
        "download" | "get" => {
            let args = parse_args(rest)?;
            let mut args = args.into_iter();
            let name = args.next().ok_or(ParseError::MissingArgument("name"))?;
            let target = args.next().map(PathBuf::from);
            reject_extra(args)?;
            Ok(Command::Download { name, target })
        }
        "ls" | "list" => Ok(Command::List),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn reject_extra(mut args: impl Iterator<Item = String>) -> Result<(), ParseError> {
    match args.next() {
        Some(extra) => Err(ParseError::InvalidSyntax(format!(
            "unexpected argument '{}'",
            extra
        ))),
        None => Ok(()),
    }
}

/// Split arguments on whitespace, honoring single and double quotes
fn parse_args(input: &str) -> Result<Vec<String>, ParseError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_arg = false;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if quote.is_some() {
        return Err(ParseError::InvalidSyntax("unclosed quote".to_string()));
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}

/// Split the first whitespace-delimited token from a string
fn split_first_token(input: &str) -> (&str, &str) {
    if let Some(pos) = input.find(char::is_whitespace) {
        (&input[..pos], &input[pos..])
    } else {
        (input, "")
    }
}
