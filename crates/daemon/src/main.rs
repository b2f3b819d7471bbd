use aqhi_daemon::{get_config_info, run, run_on_interval, setup_logger, Fetch, HttpFetcher};
use slog::{error, info};
use std::{sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let (cli, config_source) = get_config_info()?;
    let logger = setup_logger(&cli);

    info!(logger, "AQHI fetcher starting...");
    info!(logger, "  Config: {}", config_source);
    info!(logger, "  Source: {:?}", cli.source());
    info!(logger, "  Output dir: {}", cli.out_dir().display());

    let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new(
        logger.clone(),
        &cli.user_agent(),
        cli.timeout(),
    )?);

    match cli.sleep_interval() {
        Some(seconds) => {
            let shutdown = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!(logger, "failed to listen for ctrl-c: {}", err);
                    std::future::pending::<()>().await;
                }
            };
            run_on_interval(&cli, &logger, fetcher, Duration::from_secs(seconds), shutdown).await;
            Ok(())
        }
        None => {
            let result = run(&cli, &logger, fetcher).await;
            if let Err(err) = result.as_ref() {
                error!(logger, "{}", err);
            }
            result
        }
    }
}
