use axum::{routing::get, Json, Router};
use clap::Args;
use fleet_core::ProviderSettings;
use fleet_providers::ProviderSet;
use fleet_provisioning::{
    BranchIdCache, ProvisioningApiDoc, ProvisioningAppState, SeaOrmTenantStore, StepOrchestrator,
    TenantsApiDoc, TenantsAppState,
};
use fleet_upgrades::{UpgradeCampaignScheduler, UpgradesApiDoc, UpgradesAppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1:8080", env = "FLEET_ADDRESS")]
    pub address: String,

    /// Database connection URL
    #[arg(long, env = "FLEET_DATABASE_URL")]
    pub database_url: String,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let settings = ProviderSettings::from_env();
        settings.validate()?;
        if settings.internal_api_key.is_none() {
            warn!("INTERNAL_API_KEY is not set; every internal request will be rejected");
        }

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run(settings))
    }

    async fn run(self, settings: ProviderSettings) -> anyhow::Result<()> {
        debug!("Initializing database connection...");
        let db = fleet_database::establish_connection(&self.database_url).await?;

        let providers = ProviderSet::from_settings(&settings);
        let store = Arc::new(SeaOrmTenantStore::new(db.clone()));
        let orchestrator = Arc::new(StepOrchestrator::new(
            store.clone(),
            &providers,
            &settings,
            Arc::new(BranchIdCache::default()),
        ));
        let scheduler = Arc::new(UpgradeCampaignScheduler::new(db));

        let provisioning = fleet_provisioning::configure_routes().with_state(Arc::new(
            ProvisioningAppState {
                orchestrator,
                internal_api_key: settings.internal_api_key.clone(),
            },
        ));
        let tenants = fleet_provisioning::configure_tenant_routes().with_state(Arc::new(
            TenantsAppState {
                store,
                internal_api_key: settings.internal_api_key.clone(),
            },
        ));
        let upgrades = fleet_upgrades::configure_routes().with_state(Arc::new(UpgradesAppState {
            scheduler,
            internal_api_key: settings.internal_api_key.clone(),
        }));

        let app = Router::new()
            .merge(health_router())
            .merge(tenants)
            .merge(provisioning)
            .merge(upgrades)
            .merge(swagger_router())
            .layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(&self.address).await?;
        info!(
            "Fleet control plane listening on {} ({})",
            self.address, settings.environment
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("Fleet control plane exited");
        Ok(())
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Unauthenticated liveness route for load balancers.
fn health_router() -> Router {
    Router::new().route("/health", get(health))
}

fn swagger_router() -> Router {
    let mut api_doc = TenantsApiDoc::openapi();
    api_doc.merge(ProvisioningApiDoc::openapi());
    api_doc.merge(UpgradesApiDoc::openapi());
    Router::new().merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await
        }
    }
}
