use anyhow::{Context, Result};
use clap::Parser;
use ftpdrop::cli::{Cli, Command, EventOutput, RunArgs};
use ftpdrop_ftp::DataChannelMode;
use ftpdrop::logging::init_logging;
use ftpdrop::{
    ftp_uploader_factory, FtpUploader, JsonLinesSink, LogSink, NotificationSink,
    PipelineController, PipelineState, Settings, SettingsStore,
};
use secrecy::ExposeSecret;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref(), cli.log_format)?;

    let store = match &cli.settings {
        Some(path) => {
            let cwd = std::env::current_dir().context("reading working directory")?;
            SettingsStore::new(path, cwd)
        }
        None => SettingsStore::in_working_dir()?,
    };
    let settings = store
        .load()
        .with_context(|| format!("loading {}", store.path().display()))?;

    let mode: DataChannelMode = cli.passive_mode.into();
    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(args) => run(Arc::new(store), args, mode).await,
        Command::TestConnection => test_connection(&settings, mode).await,
        Command::ShowSettings => {
            show_settings(&store, &settings);
            Ok(())
        }
    }
}

async fn run(store: Arc<SettingsStore>, args: RunArgs, mode: DataChannelMode) -> Result<()> {
    if store.get().host.is_empty() {
        tracing::warn!("No HOSTNAME in {}; uploads will fail", store.path().display());
    }

    let sink: Arc<dyn NotificationSink> = match args.events {
        EventOutput::Log => Arc::new(LogSink),
        EventOutput::Json => Arc::new(JsonLinesSink::stdout()),
    };
    let factory = ftp_uploader_factory(mode);
    let state = PipelineController::new(store, sink, factory, args.pipeline_options()).into_state();

    state.lock().await.start().await.context("starting pipeline")?;
    tracing::info!("ftpdrop running, Ctrl-C to exit");

    wait_for_signals(&state).await?;

    if let Err(e) = state.lock().await.stop().await {
        tracing::warn!("Shutdown: {}", e);
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signals(state: &PipelineState) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut toggle = signal(SignalKind::user_defined1())?;
    let mut reload = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => return res.map_err(Into::into),
            _ = toggle.recv() => match state.lock().await.toggle().await {
                Ok(now) => tracing::info!("Pipeline {:?}", now),
                Err(e) => tracing::error!("Toggle failed: {}", e),
            },
            _ = reload.recv() => {
                tracing::info!("Reloading settings");
                if let Err(e) = state.lock().await.reload_settings().await {
                    tracing::error!("Reload failed: {}", e);
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_state: &PipelineState) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn test_connection(settings: &Settings, mode: DataChannelMode) -> Result<()> {
    let names = FtpUploader::from_settings(settings)
        .with_data_channel_mode(mode)
        .test_connection()
        .await
        .with_context(|| format!("testing {}:{}", settings.host, settings.port))?;
    println!(
        "Connected to {}:{} as {:?}; {} entries in {}",
        settings.host,
        settings.port,
        settings.user,
        names.len(),
        settings.remote_dir
    );
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}

fn show_settings(store: &SettingsStore, settings: &Settings) {
    let password = if settings.password.expose_secret().is_empty() {
        ""
    } else {
        "********"
    };
    println!("# {}", store.path().display());
    println!("HOSTNAME={}", settings.host);
    println!("USER={}", settings.user);
    println!("PASSWORD={}", password);
    println!("SOURCE={}", settings.source_dir.display());
    println!("TARGET={}", settings.target_dir.display());
    println!("DESTINATION={}", settings.remote_dir);
    println!("PORT={}", settings.port);
}
