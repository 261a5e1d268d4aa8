//! eurus: terminal chat client.
//! `eurus setup <username> <jwt-token>` provisions `~/.config/eurus`;
//! `eurus chat` connects with the stored token, sends stdin lines to the
//! current room and prints what the server relays.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use eurus_client::logging::{self, LogFormat};
use eurus_client::messages::ChatMessage;
use eurus_client::{
    config, setup, ChatCommand, Config, ConnectionState, Outbox, ServerMessage, Session,
    SessionEvent, Termination, Token,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "eurus", version, about = "Terminal chat client")]
struct Cli {
    /// Config file (default: ~/.config/eurus/config.toml).
    #[arg(long, global = true, env = "EURUS_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the config directory, config.toml and token file.
    Setup {
        username: String,
        #[arg(value_name = "JWT_TOKEN")]
        token: String,
        /// Server to write into config.toml.
        #[arg(long)]
        server_url: Option<String>,
        /// Directory to provision (default: ~/.config/eurus).
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Connect and chat over stdin/stdout.
    Chat {
        /// Room to join on every connect.
        #[arg(long)]
        room: Option<String>,
    },
}

fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    }
}

fn main() {
    let cli = parse_cli();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    if let Err(e) = logging::init_logging(cli.verbose, format) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let code = match cli.command {
        Command::Setup {
            username,
            token,
            server_url,
            dir,
        } => run_setup(&username, &token, server_url.as_deref(), dir),
        Command::Chat { room } => run_chat(cli.config, room),
    };
    process::exit(code);
}

fn run_setup(username: &str, token: &str, server_url: Option<&str>, dir: Option<PathBuf>) -> i32 {
    let dir = match dir.or_else(config::default_config_dir) {
        Some(d) => d,
        None => {
            eprintln!("Error: unable to determine config directory (set --dir or HOME)");
            return 1;
        }
    };
    match setup::provision(&dir, username, token, server_url) {
        Ok(written) => {
            println!("Config written to {}", written.config.display());
            println!("Token stored in {}", written.token.display());
            0
        }
        Err(e) => {
            eprintln!("Error: setup failed: {}", e);
            1
        }
    }
}

fn resolve_config_path(flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(config::default_config_path)
}

fn load_config(flag: Option<PathBuf>) -> Result<Config, String> {
    let path = resolve_config_path(flag)
        .ok_or("unable to determine config path (set --config or EURUS_CONFIG)")?;
    let mut cfg = config::load(&path)
        .map_err(|e| format!("failed to load config from {}: {}", path.display(), e))?;
    if let Ok(url) = std::env::var("EURUS_SERVER_URL") {
        cfg.server.url = url;
        cfg.validate().map_err(|e| format!("EURUS_SERVER_URL: {}", e))?;
    }
    Ok(cfg)
}

fn run_chat(config_flag: Option<PathBuf>, room: Option<String>) -> i32 {
    let cfg = match load_config(config_flag) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let token = match Token::load(&cfg.token_path()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {} (run `eurus setup <username> <jwt-token>` first)", e);
            return 1;
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(chat_loop(cfg, token, room))
}

/// Read stdin on a plain thread; the runtime only sees whole lines.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// One parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    Command(ChatCommand),
    Say(String),
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };
    let (verb, arg) = match rest.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (rest, ""),
    };
    match (verb, arg) {
        ("quit", _) => Input::Quit,
        ("rooms", _) => Input::Command(ChatCommand::ListRooms),
        ("join", id) if !id.is_empty() => Input::Command(ChatCommand::JoinRoom {
            room_id: id.to_string(),
        }),
        ("create", name) if !name.is_empty() => Input::Command(ChatCommand::CreateRoom {
            name: name.to_string(),
        }),
        _ => Input::Unknown(line.to_string()),
    }
}

struct Chat {
    outbox: Outbox,
    room: Option<String>,
    /// Lines typed while not connected; sent on the next connect.
    held: Vec<String>,
    /// Set from state events, so held lines go out after the room rejoin.
    online: bool,
    input_closed: bool,
    quit: bool,
    show_timestamps: bool,
}

impl Chat {
    fn on_line(&mut self, line: String) {
        let input = parse_input(&line);
        if input == Input::Quit {
            self.quit = true;
            return;
        }
        if !self.online {
            self.held.push(line);
            return;
        }
        match input {
            Input::Quit | Input::Empty => {}
            Input::Unknown(text) => eprintln!("Unknown command: {}", text),
            Input::Command(command) => {
                if let ChatCommand::JoinRoom { room_id } = &command {
                    self.room = Some(room_id.clone());
                }
                self.send(command);
            }
            Input::Say(content) => match &self.room {
                Some(room_id) => self.send(ChatCommand::Send {
                    room_id: room_id.clone(),
                    content,
                }),
                None => eprintln!("Join a room first: /join <room-id>"),
            },
        }
    }

    fn on_state(&mut self, state: ConnectionState) {
        self.online = state.is_connected();
        if self.online {
            self.on_connected();
        }
    }

    fn on_connected(&mut self) {
        if let Some(room_id) = self.room.clone() {
            self.send(ChatCommand::JoinRoom { room_id });
        }
        for line in std::mem::take(&mut self.held) {
            self.on_line(line);
        }
    }

    fn send(&self, command: ChatCommand) {
        if let Err(e) = self.outbox.send(command) {
            eprintln!("Error: {}", e);
        }
    }

    /// Quit once input is done and nothing is left to flush.
    fn should_close(&self) -> bool {
        self.quit || (self.input_closed && self.held.is_empty() && self.online)
    }
}

async fn chat_loop(cfg: Config, token: Token, room: Option<String>) -> i32 {
    let mut session = Session::new(cfg.session_config(), token);
    let mut events = match session.start().await {
        Ok(ev) => ev,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let mut lines = spawn_stdin_reader();
    let mut chat = Chat {
        outbox: session.outbox(),
        room,
        held: Vec::new(),
        online: false,
        input_closed: false,
        quit: false,
        show_timestamps: cfg.ui.show_timestamps,
    };

    let mut closing = false;
    let termination = loop {
        if !closing && chat.should_close() {
            closing = true;
            session.close().await;
        }
        tokio::select! {
            event = events.next() => match event {
                Some(SessionEvent::Terminated(t)) => break t,
                Some(event) => {
                    if let SessionEvent::StateChanged(state) = event {
                        chat.on_state(state);
                    }
                    print_event(&event, chat.show_timestamps);
                }
                None => break Termination::Quit,
            },
            line = lines.recv(), if !chat.input_closed => match line {
                Some(line) => chat.on_line(line),
                None => {
                    debug!("stdin closed");
                    chat.input_closed = true;
                }
            },
        }
    };

    session.close().await;
    match termination.into_error() {
        None => 0,
        Some(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn print_event(event: &SessionEvent, show_timestamps: bool) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = match event {
        SessionEvent::StateChanged(state) => writeln!(out, "* {}", state),
        SessionEvent::Reconnecting { attempt, delay } => writeln!(
            out,
            "* connection lost, retry {} in {:.1}s",
            attempt,
            delay.as_secs_f64()
        ),
        SessionEvent::Undelivered(command) => writeln!(out, "! not delivered: {:?}", command),
        SessionEvent::Message(msg) => print_message(&mut out, msg, show_timestamps),
        SessionEvent::Terminated(_) => Ok(()),
    };
    let _ = out.flush();
}

fn print_chat_line(out: &mut impl Write, msg: &ChatMessage, show_timestamps: bool) -> io::Result<()> {
    if show_timestamps {
        write!(out, "[{}] ", msg.created_at.format("%H:%M"))?;
    }
    writeln!(out, "{}: {}", msg.author.username, msg.content)
}

fn print_message(out: &mut impl Write, msg: &ServerMessage, show_timestamps: bool) -> io::Result<()> {
    match msg {
        ServerMessage::Message(m) => print_chat_line(out, m, show_timestamps),
        ServerMessage::History(h) => {
            writeln!(out, "-- history for {} --", h.room_id)?;
            for m in &h.messages {
                print_chat_line(out, m, show_timestamps)?;
            }
            Ok(())
        }
        ServerMessage::JoinedRoom(r) | ServerMessage::JoinApproved(r) => {
            writeln!(out, "* joined {} ({})", r.name, r.room_id)
        }
        ServerMessage::RoomCreated(r) => writeln!(out, "* created {} ({})", r.name, r.room_id),
        ServerMessage::UserRooms(rooms) => {
            writeln!(out, "* your rooms:")?;
            for room in &rooms.rooms {
                writeln!(out, "  {}  {}", room.id, room.name)?;
            }
            Ok(())
        }
        ServerMessage::Error(p) => writeln!(out, "! {}", p.message),
        ServerMessage::UserJoined(p)
        | ServerMessage::UserLeft(p)
        | ServerMessage::JoinRequest(p)
        | ServerMessage::JoinRejected(p)
        | ServerMessage::JoinRequestSent(p)
        | ServerMessage::Info(p)
        | ServerMessage::RoomDeleted(p)
        | ServerMessage::Registered(p) => writeln!(out, "* {}", p.message),
        ServerMessage::Authenticated(_) | ServerMessage::LoggedIn(_) => Ok(()),
    }
}
