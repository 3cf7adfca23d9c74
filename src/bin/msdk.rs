//! msdk - command-line access to the MSDK Remote gateway
//!
//! Connects to all three gateway channels and runs a single request:
//! - `get`/`set`/`action`/`help` print the gateway's reply
//! - `listen` prints pushed values until Ctrl-C, then unlistens
//! - `control` sends enable/disable/takeoff/land and prints the acknowledgment
//! - `frames` decodes video for a while and reports what arrived

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use msdk_remote::{
    default_decoder, Client, ClientConfig, EventListener, Frame, QueryCommand, UniqueKey,
    VideoDecoder,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Talk to the MSDK Remote gateway app")]
struct Args {
    /// Gateway address (phone IP). Overrides the MSDK_CONFIG file.
    #[arg(long, env = "MSDK_HOST")]
    host: Option<String>,

    /// Timeout for replies, in seconds. Waits forever when omitted.
    #[arg(long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a key.
    Get { module: String, key: String },
    /// Write a key.
    Set {
        module: String,
        key: String,
        value: String,
    },
    /// Trigger an action, optionally with a parameter.
    Action {
        module: String,
        key: String,
        value: Option<String>,
    },
    /// List modules, keys of a module, or describe one key.
    Help {
        module: Option<String>,
        key: Option<String>,
    },
    /// Print every pushed value of a key until Ctrl-C.
    Listen { module: String, key: String },
    /// Send a flight command on the control channel.
    Control {
        #[arg(value_enum)]
        command: FlightCommand,
    },
    /// Decode video for a while and report frame statistics.
    Frames {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FlightCommand {
    Enable,
    Disable,
    Takeoff,
    Land,
}

struct PrintListener {
    label: String,
    received: AtomicU64,
}

impl EventListener<str> for PrintListener {
    fn on_value(&self, value: &str) {
        let n = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        println!("[{}] #{} {}", self.label, n, value);
    }

    fn on_error(&self) {
        log::error!("{}: query channel closed", self.label);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ClientConfig::load()?;
    if let Some(host) = args.host {
        config.host = host;
        config.validate()?;
    }
    let timeout = args.timeout.map(Duration::from_secs);

    let decoder = match default_decoder() {
        Ok(decoder) => decoder,
        Err(e) if !matches!(args.command, Command::Frames { .. }) => {
            log::debug!("video disabled for this command: {}", e);
            Box::new(DiscardVideo)
        }
        Err(e) => return Err(e).context("frames needs a build with the video-ffmpeg feature"),
    };
    let client = Client::connect_with_decoder(&config, decoder)
        .with_context(|| format!("connect to gateway at {}", config.host))?;

    match args.command {
        Command::Get { module, key } => {
            let key = UniqueKey::new(module, key);
            print_reply(keyed_request(&client, timeout, &key, QueryCommand::Get(&key))?);
        }
        Command::Set { module, key, value } => {
            let key = UniqueKey::new(module, key);
            print_reply(keyed_request(
                &client,
                timeout,
                &key,
                QueryCommand::Set(&key, &value),
            )?);
        }
        Command::Action { module, key, value } => {
            let key = UniqueKey::new(module, key);
            print_reply(keyed_request(
                &client,
                timeout,
                &key,
                QueryCommand::Action(&key, value.as_deref()),
            )?);
        }
        Command::Help { module, key } => {
            let reply = match timeout {
                Some(timeout) => {
                    let command = QueryCommand::Help(module.as_deref(), key.as_deref());
                    client
                        .query()
                        .read_unbound_timeout(&command.to_string(), timeout)?
                }
                None => Some(client.help(module.as_deref(), key.as_deref())?),
            };
            print_reply(reply);
        }
        Command::Listen { module, key } => listen(&client, &module, &key)?,
        Command::Control { command } => {
            let reply = match command {
                FlightCommand::Enable => client.enable_control(true)?,
                FlightCommand::Disable => client.disable_control(true)?,
                FlightCommand::Takeoff => client.takeoff(true)?,
                FlightCommand::Land => client.land(true)?,
            };
            print_reply(reply);
        }
        Command::Frames { seconds } => frames(&client, Duration::from_secs(seconds)),
    }

    client.close()?;
    Ok(())
}

/// Drops video bytes; used when the command never looks at frames.
struct DiscardVideo;

impl VideoDecoder for DiscardVideo {
    fn decode(&mut self, _chunk: &[u8], _sink: &mut dyn FnMut(Frame)) -> msdk_remote::Result<()> {
        Ok(())
    }
}

fn keyed_request(
    client: &Client,
    timeout: Option<Duration>,
    key: &UniqueKey,
    command: QueryCommand<'_>,
) -> Result<Option<String>> {
    let command = command.to_string();
    let reply = match timeout {
        Some(timeout) => client.query().read_once_timeout(key, &command, timeout)?,
        None => Some(client.query().read_once(key, &command)?),
    };
    Ok(reply)
}

fn print_reply(reply: Option<String>) {
    match reply {
        Some(reply) => println!("{reply}"),
        None => eprintln!("no reply from gateway"),
    }
}

fn listen(client: &Client, module: &str, key: &str) -> Result<()> {
    let listener = Arc::new(PrintListener {
        label: format!("{module} {key}"),
        received: AtomicU64::new(0),
    });
    client.listen(module, key, listener.clone())?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    log::info!("listening on {} {} (Ctrl-C to stop)", module, key);
    let _ = rx.recv();
    let reply = client.unlisten(module, key)?;
    log::info!(
        "unlisten: {} ({} values received)",
        reply,
        listener.received.load(Ordering::Relaxed)
    );
    Ok(())
}

fn frames(client: &Client, duration: Duration) {
    let counter = Arc::new(AtomicU64::new(0));
    let seen = counter.clone();
    client.frame_listener(Arc::new(move |_frame: &Frame| {
        seen.fetch_add(1, Ordering::Relaxed);
    }));

    let started = Instant::now();
    while started.elapsed() < duration {
        std::thread::sleep(Duration::from_millis(250));
    }
    client.remove_frame_listener();

    let count = counter.load(Ordering::Relaxed);
    let fps = count as f64 / duration.as_secs_f64().max(f64::EPSILON);
    match client.get_frame() {
        Some(frame) => println!(
            "{} frames in {:?} ({:.1} fps), last frame {}x{}",
            count,
            duration,
            fps,
            frame.width(),
            frame.height()
        ),
        None => println!("{} frames in {:?}, no frame cached", count, duration),
    }
}
