use std::io;
use std::path::PathBuf;

use clap::ArgMatches;
use server::config::Settings;

pub async fn run(matches: &ArgMatches) -> io::Result<()> {
    server::init_tracing();
    let mut settings = Settings::from_env();
    if let Some(port) = matches.get_one::<u16>("port") {
        settings.port = *port;
    }
    if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
        settings.data_dir.clone_from(dir);
    }
    tracing::info!(
        "starting on port {} with data under {}",
        settings.port,
        settings.data_dir.display()
    );
    server::run(settings).await
}
