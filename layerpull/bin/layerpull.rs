use clap::{CommandFactory, Parser};
use layerpull::{
    cli::{LayerpullArgs, LayerpullSubcommand},
    config::DEFAULT_LOG_FILENAME,
    pull::ImagePuller,
    LayerpullResult,
};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> LayerpullResult<()> {
    let args = LayerpullArgs::parse();
    let _guard = init_tracing(&args);

    match args.subcommand {
        Some(LayerpullSubcommand::Pull(pull)) => {
            let options = pull.into_options();
            tracing::trace!("pulling image: options={options:?}");

            let token = CancellationToken::new();
            tokio::spawn({
                let token = token.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("interrupted, cancelling pull");
                        token.cancel();
                    }
                }
            });

            let puller = ImagePuller::from_options(&options).await?;
            let pulled = puller.pull(&options, &token).await?;
            let config = puller.register_image(&options, &pulled, &token).await?;

            println!("Digest: {}", pulled.get_digest());
            println!("Image ID: {}", config.get_image_id());
        }
        None => {
            LayerpullArgs::command().print_help()?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: *
//--------------------------------------------------------------------------------------------------

/// Sets up stderr logging, and file logging when `--logfile` is given.
///
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_tracing(args: &LayerpullArgs) -> Option<WorkerGuard> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match &args.logfile {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| DEFAULT_LOG_FILENAME.into());

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    guard
}
