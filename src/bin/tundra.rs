use std::{
    error::Error,
    io::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Parser;
use tundra::{
    Auth, Client, Command, Compression, OpenStrategy, Options, Settings, cli::PromptError,
    write_header, write_rows,
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address, `host:port`. Repeat for several replicas
    #[arg(long = "host", default_value = "127.0.0.1:9000")]
    hosts: Vec<String>,
    #[arg(long, default_value = "default")]
    user: String,
    #[arg(long, default_value = "")]
    password: String,
    #[arg(long, default_value = "default")]
    database: String,
    /// Compress data blocks with LZ4
    #[arg(long)]
    compress: bool,
    /// Query setting, `key=value`. May be repeated
    #[arg(long = "setting", value_parser = parse_setting)]
    settings: Vec<(String, String)>,
    /// Order in which hosts are tried: `in_order` or `round_robin`
    #[arg(long, default_value_t = OpenStrategy::InOrder)]
    strategy: OpenStrategy,
    /// Run a single query and exit
    query: Option<String>,
}

fn parse_setting(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let settings: Settings = cli.settings.into_iter().collect();
    let options = Options::builder()
        .settings(settings)
        .compression(if cli.compress {
            Compression::Lz4
        } else {
            Compression::None
        })
        .conn_open_strategy(cli.strategy)
        .build();
    let auth = Auth {
        database: cli.database,
        username: cli.user,
        password: cli.password,
    };
    let client = Client::new(cli.hosts, auth, options);

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))?;
    }

    if let Some(query) = cli.query {
        return run(&client, &query, &interrupted);
    }

    loop {
        let cmd = match tundra::prompt(io::stdin().lock(), io::stdout().lock()) {
            Ok(c) => c,
            Err(PromptError::Unrecognized(s)) => {
                eprintln!("unrecognized command '{s}'");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match cmd {
            Command::Exit => break,
            Command::Ping => match client.ping() {
                Ok(()) => println!("pong"),
                Err(e) => eprintln!("ping error: {e}"),
            },
            Command::Query(query) => {
                interrupted.store(false, Ordering::SeqCst);
                if let Err(e) = run(&client, &query, &interrupted) {
                    eprintln!("query error: {e}");
                }
            }
        }
    }

    Ok(())
}

/// Prints the result of `query` until it ends or the user hits Ctrl-C. Dropping the rows early
/// cancels the rest of the stream.
fn run(client: &Client, query: &str, interrupted: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let rows = client.query(query, &[])?;
    let mut stdout = io::stdout().lock();
    if rows.schema().column_count() > 0 {
        write_header(&mut stdout, rows.schema())?;
    }
    for block in rows {
        if interrupted.load(Ordering::SeqCst) {
            eprintln!("interrupted");
            break;
        }
        write_rows(&mut stdout, &block?)?;
    }
    stdout.flush()?;
    Ok(())
}
