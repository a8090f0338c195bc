use anyhow::Result;
use std::sync::Arc;

use gpt_limit_tester::completion::CompletionClient;
use gpt_limit_tester::config::{Config, LogFormat};
use gpt_limit_tester::events::ChannelRegistry;
use gpt_limit_tester::http_client::OpenAiHttpClient;
use gpt_limit_tester::mock_server::{MockOpenAiServer, MockServerConfig};
use gpt_limit_tester::routes::{self, AppState};
use gpt_limit_tester::runner::Orchestrator;
use gpt_limit_tester::store::{FileRunStore, RunStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let mut config = Config::load()?;
    config.validate()?;

    init_tracing(&config);

    tracing::info!("🚀 GPT Limit Tester starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Optional local upstream; kept alive until shutdown
    let mut mock_upstream = None;
    if config.mock_upstream {
        let mut server = MockOpenAiServer::new(MockServerConfig::default());
        server.start().await?;
        config.base_url = server.url();
        tracing::info!("✅ Mock upstream started at {}", config.base_url);
        mock_upstream = Some(server);
    }

    if config.api_key.is_none() && !config.mock_upstream {
        tracing::warn!("OPENAI_API_KEY is not set; upstream calls will be recorded as failures");
    }

    // Initialize HTTP client
    let client: Arc<dyn CompletionClient> = Arc::new(OpenAiHttpClient::new(
        &config.base_url,
        config.api_key.clone(),
        config.http_max_connections,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);
    tracing::info!("✅ HTTP client initialized for {}", config.base_url);

    let store: Arc<dyn RunStore> = Arc::new(FileRunStore::new(config.data_dir.clone()));
    tracing::info!("✅ Run history stored in {}", config.data_dir.display());

    let registry = ChannelRegistry::new(config.keep_alive);
    let orchestrator = Orchestrator::new(client, registry.clone(), Arc::clone(&store));

    let config = Arc::new(config);
    let app = routes::app(AppState {
        orchestrator,
        registry: registry.clone(),
        store,
        config: Arc::clone(&config),
    });

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_startup_banner(&config);

    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(routes::close_streams_on(registry, shutdown_signal()))
        .await?;

    if let Some(mut server) = mock_upstream {
        server.stop();
    }

    tracing::info!("👋 Server shutdown complete");

    Ok(())
}

/// Initialize logging; RUST_LOG wins over the configured level
fn init_tracing(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║               🚀 GPT Limit Tester - Rust Edition          ║
║                                                           ║
║  Concurrent chat completion load tester with live events  ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Upstream:    {}", config.base_url);
    println!(
        "  API Key:     {}",
        if config.api_key.is_some() {
            "configured"
        } else {
            "missing"
        }
    );
    println!("  Data Dir:    {}", config.data_dir.display());
    println!("  Log Level:   {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
