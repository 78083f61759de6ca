use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use tabletalk_core::llm_protocol::LlmClient;
use tabletalk_core::openai::OpenAiClient;
use tabletalk_core::session::AgentConfig;
use tabletalk_server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
    dotenvy::dotenv().ok();

    // Missing credentials abort startup before anything binds.
    let cfg = AgentConfig::from_env()?;
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&cfg));
    let state = AppState::new(llm, cfg.max_turns);

    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    tabletalk_server::serve(state, port).await
}
