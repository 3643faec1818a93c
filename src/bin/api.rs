use portfolio_rebalancer::api::start_server;
use portfolio_rebalancer::service::RebalanceService;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Portfolio Rebalancer - API Server");
    info!("📍 Port: {}", api_port);

    // Wire collaborators from the environment
    let service = match RebalanceService::from_env() {
        Ok(service) => Arc::new(service),
        Err(e) => {
            eprintln!("⚠️  {}", e);
            eprintln!("📌 See .env.example for setup instructions");
            return Err(Box::new(e) as Box<dyn std::error::Error>);
        }
    };

    info!("✅ Rebalance service initialized");
    info!("📡 Starting API server...");

    start_server(service, api_port).await?;

    Ok(())
}
