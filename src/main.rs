pub mod campaigns;
pub mod cashback;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod imports;
pub mod metrics;
pub mod models;
pub mod store;
pub mod transactions;
pub mod validation;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use config::AppConfig;
use dispatch::{Dispatcher, HttpMessagingClient};
use error::ErrorResponse;
use imports::{
    import_sales_handler, ExternalClient, ExternalSale, HttpSalesFeed, ImportRequest, ImportService,
    ImportSummary, SalesPoller,
};
use metrics::{LedgerMetrics, MetricsSummary};
use store::{CashbackStore, PgStore};
use transactions::{
    create_pos_transaction_handler, PosCashback, PosClient, PosSale, PosTransactionRequest,
    PosTransactionResponse, PosTransactionService,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        transactions::create_pos_transaction_handler,
        imports::import_sales_handler,
        get_metrics_handler,
    ),
    components(
        schemas(
            PosTransactionRequest,
            PosClient,
            PosSale,
            PosCashback,
            PosTransactionResponse,
            ImportRequest,
            ExternalSale,
            ExternalClient,
            ImportSummary,
            MetricsSummary,
            ErrorResponse
        )
    ),
    tags(
        (name = "pos", description = "Point-of-sale cashback transactions"),
        (name = "imports", description = "External sales feed imports"),
        (name = "metrics", description = "Ledger counters")
    ),
    info(
        title = "Cashback CRM API",
        version = "0.1.0",
        description = "Cashback ledger, campaign triggers and outreach dispatch"
    )
)]
struct ApiDoc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pos_service: PosTransactionService,
    pub import_service: ImportService,
    pub metrics: LedgerMetrics,
}

impl AppState {
    pub fn new(store: Arc<dyn CashbackStore>, dispatcher: Dispatcher, metrics: LedgerMetrics) -> Self {
        Self {
            pos_service: PosTransactionService::new(store.clone(), dispatcher.clone(), metrics.clone()),
            import_service: ImportService::new(store, dispatcher, metrics.clone()),
            metrics,
        }
    }
}

/// Handler for GET /api/metrics
/// Returns the ledger counters since startup
#[utoipa::path(
    get,
    path = "/api/metrics",
    responses(
        (status = 200, description = "Current counters", body = MetricsSummary)
    ),
    tag = "metrics"
)]
async fn get_metrics_handler(State(state): State<AppState>) -> Json<MetricsSummary> {
    Json(state.metrics.summary())
}

pub fn create_router(state: AppState) -> Router {
    // Configure CORS to allow all origins, methods, and headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // API routes
        .route("/api/pos/transactions", post(create_pos_transaction_handler))
        .route("/api/organizations/:org_id/sales/import", post(import_sales_handler))
        .route("/api/metrics", get(get_metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    init_tracing();

    tracing::info!("Cashback CRM - Starting...");
    let config = AppConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    db::run_migrations(&pool).await?;

    let store: Arc<dyn CashbackStore> = Arc::new(PgStore::new(pool));
    let metrics = LedgerMetrics::new();

    let dispatcher = match config.messaging_api_url.as_deref() {
        Some(url) => {
            let client = HttpMessagingClient::new(url, config.http_timeout)?;
            tracing::info!(endpoint = client.endpoint(), "Outbound dispatch enabled");
            let (dispatcher, _worker) = Dispatcher::spawn(Arc::new(client), config.dispatch_delay, metrics.clone());
            dispatcher
        }
        None => {
            tracing::warn!("MESSAGING_API_URL not set, outbound dispatch disabled");
            Dispatcher::disabled()
        }
    };

    let state = AppState::new(store.clone(), dispatcher, metrics.clone());

    match config.import_poll_interval {
        Some(interval) => {
            let feed = HttpSalesFeed::new(config.http_timeout)?;
            SalesPoller::new(store, Arc::new(feed), state.import_service.clone(), metrics, interval).spawn();
        }
        None => tracing::info!("Sales feed poller disabled"),
    }

    let app = create_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Cashback CRM is running on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
