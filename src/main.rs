use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use log::{info, Level};

use config::{Config, DEFAULT_FORCE_DELAY, MANGADEX_API_URL};
use mangadex::{Gateway, MangadexClient};
use session::acquire_session;
use sync::{Outcome, Reconciler, Summary};

mod config;
mod error;
mod mangadex;
mod session;
mod sync;
mod title;

/// Marks every chapter of a MangaDex title as read for your account
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Id of the manga on MangaDex
    #[arg(short = 'm', long = "manga_id")]
    manga_id: Option<String>,
    #[arg(short, long)]
    username: Option<String>,
    #[arg(short, long)]
    password: Option<String>,
    /// Title page, e.g. https://mangadex.org/title/<id>/<name>
    #[arg(short = 'r', long)]
    url: Option<String>,
    /// Language of the chapters to mark
    #[arg(short, long, default_value = "en")]
    language: String,
    /// Session token to use instead of logging in
    #[arg(short, long)]
    token: Option<String>,
    /// Print the session token
    #[arg(short = 'd', long = "print-token")]
    print_token: bool,
    /// Re-check and retry up to 4 more times, waiting SECONDS between attempts
    #[arg(
        short,
        long,
        value_name = "SECONDS",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = DEFAULT_FORCE_DELAY
    )]
    force: Option<u64>,
    #[arg(long, default_value = MANGADEX_API_URL, hide = true)]
    api: String,
}

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut stdout = std::io::stdout();
    ExitCode::from(dexmark(std::env::args_os(), &mut stdout).await)
}

/// Parses `argv`, runs the sync and returns the process exit code.
/// Fatal messages and the printed token go to `out`.
async fn dexmark<I, T, W>(argv: I, out: &mut W) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    W: Write,
{
    let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();
    if argv.len() <= 1 {
        let mut command = Args::command();
        let _ = writeln!(out, "{}", command.render_help());
        return EXIT_FATAL;
    }

    let args = match Args::try_parse_from(argv) {
        Ok(args) => args,
        Err(e) => {
            // --help and --version land here too
            let _ = e.print();
            return e.exit_code() as u8;
        }
    };

    match run(args, out).await {
        Ok(()) => EXIT_OK,
        Err(e) => {
            let _ = writeln!(out, "error: {:#}", e);
            EXIT_FATAL
        }
    }
}

async fn run<W: Write>(args: Args, out: &mut W) -> anyhow::Result<()> {
    let config = Config::from_args(args)?;

    match &config.title {
        Some(title) => info!("syncing {} ({})", title, config.manga_id),
        None => info!("syncing manga {}", config.manga_id),
    }

    let client = MangadexClient::new(&config.api_base)?;

    // Neither request depends on the other
    let (token, chapters) = tokio::try_join!(
        async {
            acquire_session(&client, &config.credentials)
                .await
                .context("could not get a session token")
        },
        async {
            client
                .chapters(&config.manga_id, &config.language)
                .await
                .context("fetching chapter list")
        },
    )?;

    if config.print_token {
        writeln!(out, "{}", token.as_str())?;
    }

    info!("found {} [{}] chapters", chapters.len(), config.language);

    let summary = Reconciler::new(&client, &token, config.pacing(), config.retry_policy())
        .reconcile(&config.manga_id, &config.language, &chapters)
        .await
        .context("fetching read markers")?;

    report(&summary);

    Ok(())
}

fn report(summary: &Summary) {
    for (level, line) in report_lines(summary) {
        log::log!(level, "{}", line);
    }
}

fn report_lines(summary: &Summary) -> Vec<(Level, String)> {
    let mut lines = vec![(
        Level::Info,
        format!(
            "{} chapters, {} attempts, {} marks accepted, {} failed requests ({} chapters)",
            summary.chapters,
            summary.attempts.len(),
            summary.marked(),
            summary.failed_requests(),
            summary.failed_chapters()
        ),
    )];

    match summary.outcome {
        Outcome::Converged => lines.push((Level::Info, "every chapter is marked as read".to_string())),
        Outcome::Exhausted { unconfirmed } if summary.attempts.len() == 1 => lines.push((
            Level::Info,
            format!(
                "{} of {} marks accepted, run with --force to check they were saved",
                summary.marked(),
                unconfirmed
            ),
        )),
        Outcome::Exhausted { unconfirmed } => {
            lines.push((
                Level::Warn,
                format!(
                    "gave up after {} attempts, {} chapters were still unread on the last check",
                    summary.attempts.len(),
                    unconfirmed
                ),
            ));
            for (chapter, error) in summary.failures() {
                lines.push((Level::Warn, format!("chapter {}: {}", chapter, error)));
            }
        }
    }

    lines
}
