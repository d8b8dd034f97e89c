mod checker;
mod logger;
mod models;
mod notify;
mod poller;
mod source;
mod untis;

use std::env;

use anyhow::{Context, Result};

use crate::checker::TimetableChecker;
use crate::poller::{run_poll_loop, PollConfig};
use crate::source::ClassId;
use crate::untis::UntisClient;

const REQUIRED_ENV: [&str; 5] = [
    "UNTIS_SERVER",
    "UNTIS_SCHOOL",
    "UNTIS_USERNAME",
    "UNTIS_PASSWORD",
    "UNTIS_CLASS_ID",
];

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init_logging();

    ensure_required_env()?;

    let server = env::var("UNTIS_SERVER")?;
    let school = env::var("UNTIS_SCHOOL")?;
    let username = env::var("UNTIS_USERNAME")?;
    let password = env::var("UNTIS_PASSWORD")?;
    let class_id: ClassId = env::var("UNTIS_CLASS_ID")?
        .parse()
        .context("UNTIS_CLASS_ID must be a number")?;
    let config = PollConfig::from_env();

    tracing::info!("Authenticating with WebUntis");
    let client = UntisClient::login(&server, &school, &username, &password)
        .await
        .context("WebUntis login failed")?;
    tracing::info!("Authentication successful");

    let mut checker = TimetableChecker::new(client, class_id);
    tracing::info!(
        class_id,
        interval_secs = config.interval.as_secs(),
        "Starting timetable watch"
    );

    run_poll_loop(&mut checker, &config, |date, report| {
        if let Some(text) = notify::render_report(date, &report) {
            tracing::info!("{text}");
        }
    })
    .await;

    Ok(())
}

fn ensure_required_env() -> Result<()> {
    for key in REQUIRED_ENV {
        if env::var(key).is_err() {
            anyhow::bail!("{key} must be set in the environment or .env file");
        }
    }
    Ok(())
}
