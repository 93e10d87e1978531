//! Thin glue: a `clap`-derived argument surface plus a minimal REPL loop.
//! Carries no business logic beyond parsing and dispatching into
//! [`crate::manager::Manager`] — the command table is exactly the one
//! the rest of the crate was designed against.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::manager::{Manager, TransportKind};
use crate::platform::PlatformKind;
use crate::style;
use crate::transport::tls::TlsOptions;

#[derive(Parser, Debug)]
#[command(name = "redcat", about = "interactive multi-session remote-shell handler")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<TopLevelCommand>,
}

/// Only `connect`/`listen` are meaningful directly from argv; every other
/// verb in the command table is a REPL-only affordance.
#[derive(Subcommand, Debug)]
pub enum TopLevelCommand {
    Connect(ConnectArgs),
    Listen(ListenArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// `tcp` or `tls`
    pub proto: String,
    pub host: String,
    pub port: u16,
    #[arg(short = 'm', long, default_value = "linux")]
    pub platform: String,
    #[arg(long)]
    pub cert: Option<PathBuf>,
    #[arg(long)]
    pub key: Option<PathBuf>,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    pub proto: String,
    #[arg(short = 'b', long)]
    pub background: bool,
    #[arg(long, default_value = "")]
    pub host: String,
    pub port: u16,
    #[arg(short = 'm', long, default_value = "linux")]
    pub platform: String,
    #[arg(long)]
    pub cert: Option<PathBuf>,
    #[arg(long)]
    pub key: Option<PathBuf>,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,
}

impl ConnectArgs {
    fn tls_options(&self) -> TlsOptions {
        TlsOptions {
            cert: self.cert.clone(),
            key: self.key.clone(),
            password: self.password.clone(),
            ca_cert: self.ca_cert.clone(),
        }
    }

    fn transport(&self) -> Result<TransportKind, String> {
        match self.proto.as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "tls" => Ok(TransportKind::Tls(self.tls_options())),
            other => Err(format!("unknown protocol {other}, expected tcp or tls")),
        }
    }
}

impl ListenArgs {
    fn tls_options(&self) -> TlsOptions {
        TlsOptions {
            cert: self.cert.clone(),
            key: self.key.clone(),
            password: self.password.clone(),
            ca_cert: self.ca_cert.clone(),
        }
    }

    fn transport(&self) -> Result<TransportKind, String> {
        match self.proto.as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "tls" => Ok(TransportKind::Tls(self.tls_options())),
            other => Err(format!("unknown protocol {other}, expected tcp or tls")),
        }
    }
}

/// Wrapper so `clap` parses a bare REPL line (no program name, no leading
/// subcommand binary) against [`ReplCommand`].
#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct ReplInvocation {
    #[command(subcommand)]
    command: ReplCommand,
}

/// The full command table (§6), parsed fresh out of each REPL line.
#[derive(Subcommand, Debug)]
pub enum ReplCommand {
    Connect(ConnectArgs),
    Listen(ListenArgs),
    Kill {
        kind: String,
        id: String,
    },
    Session {
        id: String,
    },
    Shell {
        id: Option<String>,
    },
    Download {
        rfile: String,
        lfile: String,
        id: Option<String>,
    },
    Upload {
        lfile: String,
        rfile: String,
        id: Option<String>,
    },
    Show {
        kind: String,
    },
    Local {
        #[arg(trailing_var_arg = true)]
        cmd: Vec<String>,
    },
    Exit,
    Clear,
    Help {
        name: Option<String>,
    },
}

/// Run the interactive REPL: read a line, split it like a shell would,
/// parse against the command table, dispatch into `manager`. Loops until
/// `exit` or stdin EOF.
pub async fn run_repl(manager: Arc<Manager>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin());
    loop {
        print_prompt();
        let mut line = String::new();
        match read_line(&mut lines, &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let tokens = match shlex::split(trimmed) {
            Some(tokens) => tokens,
            None => {
                eprintln!("{}", style::error_line("unbalanced quotes"));
                continue;
            }
        };
        match ReplInvocation::try_parse_from(tokens) {
            Ok(ReplInvocation { command: ReplCommand::Exit }) => break,
            Ok(ReplInvocation { command }) => dispatch(&manager, command).await,
            Err(err) => {
                println!("{err}");
            }
        }
    }
    manager.clear().await;
}

async fn read_line(reader: &mut tokio::io::BufReader<tokio::io::Stdin>, buf: &mut String) -> std::io::Result<usize> {
    use tokio::io::AsyncBufReadExt;
    reader.read_line(buf).await
}

fn print_prompt() {
    use std::io::Write;
    print!("(redcat) ");
    let _ = std::io::stdout().flush();
}

async fn dispatch(manager: &Arc<Manager>, command: ReplCommand) {
    match command {
        ReplCommand::Connect(args) => run_connect(manager, args).await,
        ReplCommand::Listen(args) => run_listen(manager, args).await,
        ReplCommand::Kill { kind, id } => report(manager.kill(&kind, &id).await),
        ReplCommand::Session { id } => report(manager.select_session(&id)),
        ReplCommand::Shell { id } => report(manager.remote_shell(id.as_deref().unwrap_or("")).await),
        ReplCommand::Download { rfile, lfile, id } => {
            report(manager.download(&rfile, &lfile, id.as_deref().unwrap_or("")).await)
        }
        ReplCommand::Upload { lfile, rfile, id } => {
            report(manager.upload(&lfile, &rfile, id.as_deref().unwrap_or("")).await)
        }
        ReplCommand::Show { kind } => match manager.show(&kind).await {
            Ok(rows) => println!("{rows}"),
            Err(err) => println!("{}", style::error_line(&err.to_string())),
        },
        ReplCommand::Local { cmd } => run_local(&cmd).await,
        ReplCommand::Clear => manager.clear().await,
        ReplCommand::Help { name } => print_help(name.as_deref()),
        ReplCommand::Exit => {}
    }
}

fn report<E: std::fmt::Display>(result: Result<(), E>) {
    if let Err(err) = result {
        println!("{}", style::error_line(&err.to_string()));
    }
}

async fn run_connect(manager: &Arc<Manager>, args: ConnectArgs) {
    let transport = match args.transport() {
        Ok(transport) => transport,
        Err(err) => {
            println!("{}", style::error_line(&err));
            return;
        }
    };
    let platform: PlatformKind = match args.platform.parse() {
        Ok(platform) => platform,
        Err(err) => {
            println!("{}", style::error_line(&err.to_string()));
            return;
        }
    };
    match manager.connect(&args.host, args.port, transport, platform).await {
        Ok(id) => println!("session {id} backgrounded"),
        Err(err) => println!("{err}"),
    }
}

async fn run_listen(manager: &Arc<Manager>, args: ListenArgs) {
    let transport = match args.transport() {
        Ok(transport) => transport,
        Err(err) => {
            println!("{}", style::error_line(&err));
            return;
        }
    };
    let platform: PlatformKind = match args.platform.parse() {
        Ok(platform) => platform,
        Err(err) => {
            println!("{}", style::error_line(&err.to_string()));
            return;
        }
    };
    match manager.listen(&args.host, args.port, transport, platform, args.background).await {
        Ok(id) => {
            if args.background {
                println!("listener {id} created");
            }
        }
        Err(err) => println!("{err}"),
    }
}

/// `local <cmd...>`: run a command on the operator's own machine and show
/// its output inline, same convenience the source offers for quick local
/// checks (reading a wordlist, checking a tool's presence) without leaving
/// the REPL.
async fn run_local(cmd: &[String]) {
    let Some((program, rest)) = cmd.split_first() else {
        println!("{}", style::error_line("local needs a command to run"));
        return;
    };
    match tokio::process::Command::new(program).args(rest).output().await {
        Ok(output) => {
            use std::io::Write as _;
            let _ = std::io::stdout().write_all(&output.stdout);
            let _ = std::io::stderr().write_all(&output.stderr);
        }
        Err(err) => println!("{}", style::error_line(&format!("local: {err}"))),
    }
}

fn print_help(name: Option<&str>) {
    match name {
        Some(name) => println!("{}", command_help(name)),
        None => {
            println!("commands: connect, listen, kill, session, shell, download, upload, show, local, exit, clear, help");
        }
    }
}

fn command_help(name: &str) -> &'static str {
    match name {
        "connect" => "connect <tcp|tls> <host> <port> [-m platform] [--cert] [--key] [--password] [--ca-cert]",
        "listen" => "listen <tcp|tls> [-b] [--host H] <port> [-m platform] [ssl opts]",
        "kill" => "kill <session|listener> <id>",
        "session" => "session <id|none>",
        "shell" => "shell [id]",
        "download" => "download <rfile> <lfile> [id]",
        "upload" => "upload <lfile> <rfile> [id]",
        "show" => "show <sessions|listeners>",
        "local" => "local <cmd...>",
        _ => "no help available for that command",
    }
}

/// Run the process: start the manager's reaper, either dispatch a single
/// `connect`/`listen` invocation from argv or fall into the REPL.
pub async fn run(cli: Cli, config: Config) {
    let manager = Manager::new(config);
    manager.start();
    match cli.command {
        Some(TopLevelCommand::Connect(args)) => run_connect(&manager, args).await,
        Some(TopLevelCommand::Listen(args)) => run_listen(&manager, args).await,
        None => {}
    }
    run_repl(manager.clone()).await;
    manager.stop();
}
