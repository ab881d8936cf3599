use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use remotecc_link::{EventKind, Key, LinkEvent, MenuCursor, RemoteLink};
use remotecc_protocol::{AgentState, StateUpdate};

#[derive(Parser, Debug)]
#[command(
    name = "remotecc-attach",
    version,
    about = "Follow a remotecc relay from the terminal"
)]
struct Args {
    /// Connection URL printed by the relay, e.g. ws://10.0.0.5:3456/?token=...
    url: String,
}

/// What one line typed on stdin asks for.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Key(Key),
    Force(AgentState),
    Text(String),
}

fn parse_line(line: &str) -> Command {
    match line.trim() {
        "" => Command::Key(Key::Enter),
        "k" | "up" => Command::Key(Key::Up),
        "j" | "down" => Command::Key(Key::Down),
        "/working" => Command::Force(AgentState::Working),
        "/waiting" => Command::Force(AgentState::Waiting),
        _ => Command::Text(format!("{}\r", line.trim_end_matches(['\r', '\n']))),
    }
}

fn render_state(update: &StateUpdate, cursor: Option<usize>) -> String {
    let mut out = format!("[{}]\n", update.state);
    let Some(question) = &update.question else {
        return out;
    };
    if let Some(context) = question.context() {
        let _ = writeln!(out, "{context}");
    }
    match &question.question {
        Some(text) => {
            let _ = writeln!(out, "? {text}");
        }
        None if question.options.is_none() => {
            let _ = writeln!(out, "{}", question.raw_text.trim());
        }
        None => {}
    }
    for (i, option) in question.options.iter().flatten().enumerate() {
        let marker = if cursor == Some(i) { '>' } else { ' ' };
        let _ = writeln!(out, "{marker} {}. {}", option.number, option.title);
        if let Some(description) = &option.description {
            let _ = writeln!(out, "     {description}");
        }
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "remotecc_link=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let link = RemoteLink::new();
    let cursor = Arc::new(Mutex::new(MenuCursor::default()));
    let latest = Arc::new(Mutex::new(None::<StateUpdate>));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

    {
        let cursor = cursor.clone();
        let latest = latest.clone();
        link.on(EventKind::State, move |event| {
            let LinkEvent::State(update) = event else {
                return;
            };
            let mut cursor = cursor.lock().unwrap_or_else(|e| e.into_inner());
            match update.question.as_ref().and_then(|q| q.options.as_deref()) {
                Some(options) => cursor.reset(options),
                None => cursor.clear(),
            }
            print!("{}", render_state(update, cursor.index()));
            *latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(update.clone());
        });
    }
    link.on(EventKind::Connected, |event| {
        if let LinkEvent::Connected { message } = event {
            println!("{message}");
        }
    });
    link.on(EventKind::Output, |event| {
        if let LinkEvent::Output { data } = event {
            print!("{data}");
        }
    });
    link.on(EventKind::Exit, |event| {
        if let LinkEvent::Exit { exit_code, signal } = event {
            match (exit_code, signal) {
                (_, Some(signal)) => println!("agent killed by {signal}"),
                (Some(code), None) => println!("agent exited with code {code}"),
                (None, None) => println!("agent exited"),
            }
        }
    });
    link.on(EventKind::Error, |event| {
        if let LinkEvent::Error { message } = event {
            eprintln!("error: {message}");
        }
    });
    link.on(EventKind::Reconnecting, |event| {
        if let LinkEvent::Reconnecting { attempt, delay } = event {
            eprintln!("reconnecting in {}ms (attempt {attempt})", delay.as_millis());
        }
    });
    {
        let done_tx = done_tx.clone();
        link.on(EventKind::GaveUp, move |event| {
            if let LinkEvent::GaveUp { attempts } = event {
                eprintln!("giving up after {attempts} attempts");
            }
            let _ = done_tx.send(());
        });
    }

    link.connect(args.url);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = parse_line(&line);
                let sent = match command {
                    Command::Key(key) => {
                        move_cursor(&cursor, &latest, key);
                        link.send_key(key)
                    }
                    Command::Force(state) => link.force_state(state),
                    Command::Text(text) => link.send_input(text),
                };
                if let Err(e) = sent {
                    eprintln!("not sent: {e}");
                }
            }
            _ = done_rx.recv() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    link.disconnect();
    Ok(())
}

fn move_cursor(
    cursor: &Mutex<MenuCursor>,
    latest: &Mutex<Option<StateUpdate>>,
    key: Key,
) {
    let mut cursor = cursor.lock().unwrap_or_else(|e| e.into_inner());
    match key {
        Key::Up => cursor.up(),
        Key::Down => cursor.down(),
        Key::Enter => return,
    }
    if let Some(update) = latest.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
        print!("{}", render_state(update, cursor.index()));
    }
}
