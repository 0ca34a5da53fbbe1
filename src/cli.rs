// ABOUTME: Client-side subcommands speaking to a running server over HTTP

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::auth::SESSION_COOKIE;
use crate::models::{Container, TmuxSession};

/// Exit code when the target session/window does not exist.
pub const EXIT_TARGET_MISSING: i32 = 1;
/// Exit code when the server or source is unreachable.
pub const EXIT_UNREACHABLE: i32 = 2;
/// Exit code for malformed invocations.
pub const EXIT_USAGE: i32 = 64;

#[derive(Debug, Subcommand)]
pub enum ClientCommand {
    /// List containers and their tmux sessions
    List(ListArgs),
    /// Dump a pane's scrollback as plain text
    Capture(CaptureArgs),
    /// Dump the visible pane with colors, like a screenshot
    Screenshot(ScreenshotArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFilter {
    /// Sessions with a bell, activity or pane status flag
    Attention,
    /// Sessions where some window runs more than a shell
    Running,
    /// Everything else
    Idle,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long, value_enum)]
    filter: Option<ListFilter>,
    #[command(flatten)]
    server: ServerArgs,
}

#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Target as containerId:sessionName
    session_id: String,
    /// Window index (defaults to the active window)
    #[arg(short = 'w')]
    window: Option<u32>,
    /// Write to a file instead of stdout
    #[arg(short = 'o')]
    output: Option<PathBuf>,
    /// Keep ANSI escape sequences
    #[arg(long)]
    ansi: bool,
    #[command(flatten)]
    server: ServerArgs,
}

#[derive(Debug, Args)]
pub struct ScreenshotArgs {
    /// Target as containerId:sessionName
    session_id: String,
    /// Window index (defaults to the active window)
    #[arg(short = 'w')]
    window: Option<u32>,
    /// Write to a file instead of stdout
    #[arg(short = 'o')]
    output: Option<PathBuf>,
    #[command(flatten)]
    server: ServerArgs,
}

#[derive(Debug, Args)]
pub struct ServerArgs {
    /// Server base URL
    #[arg(long, env = "TMUXDECK_URL", default_value = "http://127.0.0.1:8080")]
    url: String,
    /// Session token when a PIN is configured
    #[arg(long, env = "TMUXDECK_TOKEN")]
    token: Option<String>,
}

pub async fn run(command: ClientCommand) -> i32 {
    match command {
        ClientCommand::List(args) => list(args).await,
        ClientCommand::Capture(args) => {
            capture(args.server, args.session_id, args.window, args.output, args.ansi).await
        }
        ClientCommand::Screenshot(args) => {
            capture(args.server, args.session_id, args.window, args.output, true).await
        }
    }
}

struct Client {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl Client {
    fn new(server: &ServerArgs) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: server.url.trim_end_matches('/').to_string(),
            token: server.token.clone(),
        }
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, i32> {
        let mut request = self.http.get(format!("{}{path}", self.base));
        if let Some(token) = &self.token {
            request = request.header("Cookie", format!("{SESSION_COOKIE}={token}"));
        }
        let response = request.send().await.map_err(|e| {
            eprintln!("error: cannot reach server: {e}");
            EXIT_UNREACHABLE
        })?;
        match response.status().as_u16() {
            200 => Ok(response),
            401 => {
                eprintln!("error: unauthorized (set TMUXDECK_TOKEN)");
                Err(EXIT_UNREACHABLE)
            }
            404 => {
                eprintln!("error: target not found");
                Err(EXIT_TARGET_MISSING)
            }
            503 => {
                eprintln!("error: source unavailable");
                Err(EXIT_UNREACHABLE)
            }
            code => {
                eprintln!("error: server returned {code}");
                Err(EXIT_UNREACHABLE)
            }
        }
    }
}

#[derive(Deserialize)]
struct ContainersResponse {
    containers: Vec<Container>,
    #[serde(rename = "dockerError")]
    docker_error: Option<String>,
}

#[derive(Deserialize)]
struct SessionsResponse {
    sessions: Vec<TmuxSession>,
}

#[derive(Deserialize)]
struct CaptureResponse {
    content: String,
}

async fn list(args: ListArgs) -> i32 {
    let client = Client::new(&args.server);
    let containers: ContainersResponse = match client.get("/containers").await {
        Ok(response) => match response.json().await {
            Ok(body) => body,
            Err(e) => {
                eprintln!("error: bad response: {e}");
                return EXIT_UNREACHABLE;
            }
        },
        Err(code) => return code,
    };
    if let Some(err) = &containers.docker_error {
        eprintln!("warning: docker unreachable: {err}");
    }

    for container in &containers.containers {
        let sessions = match client
            .get(&format!("/containers/{}/sessions", container.id))
            .await
        {
            Ok(response) => response
                .json::<SessionsResponse>()
                .await
                .map(|b| b.sessions)
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let mut shown = false;
        for session in &sessions {
            if !matches_filter(session, args.filter) {
                continue;
            }
            if !shown {
                println!("{} ({:?})", container.display_name, container.kind);
                shown = true;
            }
            let marker = if session.attached { "*" } else { " " };
            let flags = session_flags(session);
            println!(
                "  {marker} {}:{}  [{} windows]{}",
                container.id,
                session.name,
                session.windows.len(),
                flags
            );
        }
    }
    0
}

fn session_flags(session: &TmuxSession) -> String {
    let bell = session.windows.iter().any(|w| w.bell);
    let activity = session.windows.iter().any(|w| w.activity);
    match (bell, activity) {
        (true, true) => "  !bell !activity".to_string(),
        (true, false) => "  !bell".to_string(),
        (false, true) => "  !activity".to_string(),
        (false, false) => String::new(),
    }
}

fn matches_filter(session: &TmuxSession, filter: Option<ListFilter>) -> bool {
    let Some(filter) = filter else { return true };
    let attention = session
        .windows
        .iter()
        .any(|w| w.bell || w.activity || w.pane_status.is_some());
    let running = session.windows.iter().any(|w| {
        w.command
            .as_deref()
            .is_some_and(|c| !matches!(c, "bash" | "zsh" | "sh" | "fish"))
    });
    match filter {
        ListFilter::Attention => attention,
        ListFilter::Running => running && !attention,
        ListFilter::Idle => !running && !attention,
    }
}

async fn capture(
    server: ServerArgs,
    session_id: String,
    window: Option<u32>,
    output: Option<PathBuf>,
    ansi: bool,
) -> i32 {
    let Some((container_id, session_name)) = session_id.split_once(':') else {
        eprintln!("error: session id must look like containerId:sessionName");
        return EXIT_USAGE;
    };
    let client = Client::new(&server);

    let window = match window {
        Some(index) => index,
        None => {
            // Default to the active window.
            let sessions: SessionsResponse = match client
                .get(&format!("/containers/{container_id}/sessions"))
                .await
            {
                Ok(response) => match response.json().await {
                    Ok(body) => body,
                    Err(e) => {
                        eprintln!("error: bad response: {e}");
                        return EXIT_UNREACHABLE;
                    }
                },
                Err(code) => return code,
            };
            let Some(session) = sessions.sessions.iter().find(|s| s.name == session_name) else {
                eprintln!("error: session not found: {session_name}");
                return EXIT_TARGET_MISSING;
            };
            session.active_window().map(|w| w.index).unwrap_or(0)
        }
    };

    let path = format!(
        "/containers/{container_id}/sessions/{session_name}/windows/{window}/capture?ansi={ansi}"
    );
    let content = match client.get(&path).await {
        Ok(response) => match response.json::<CaptureResponse>().await {
            Ok(body) => body.content,
            Err(e) => {
                eprintln!("error: bad response: {e}");
                return EXIT_UNREACHABLE;
            }
        },
        Err(code) => return code,
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, content) {
                eprintln!("error: cannot write {}: {e}", path.display());
                return EXIT_UNREACHABLE;
            }
        }
        None => {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(content.as_bytes());
        }
    }
    0
}
