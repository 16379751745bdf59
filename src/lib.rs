pub mod config;
pub mod handlers;
pub mod models;
pub mod services;

use axum::{
    routing::{get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use config::Config;
use services::{
    BudgetService, ChangeOrderService, Database, DocumentClient, EmailService, FinalInvoiceService,
    GatewayClient, NotificationDedup, Notifier, WebhookReconciler,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub gateway: GatewayClient,
    pub budgets: BudgetService,
    pub final_invoices: FinalInvoiceService,
    pub change_orders: ChangeOrderService,
    pub reconciler: WebhookReconciler,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application: connect to Postgres, run migrations, and wire
    /// up the component services and router.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;
        db.run_migrations().await?;

        let gateway = GatewayClient::new(config.gateway.clone());
        let documents = DocumentClient::new(config.documents.base_url.clone());
        let email = EmailService::new(&config.smtp)?;

        let dedup = NotificationDedup::new();
        let _sweeper = dedup.spawn_sweeper();
        let notifier = Notifier::new(
            email.clone(),
            dedup,
            config.notifications.staff_emails.clone(),
        );

        let budgets = BudgetService::new(
            db.clone(),
            documents.clone(),
            gateway.clone(),
            notifier.clone(),
        );
        let final_invoices = FinalInvoiceService::new(db.clone());
        let change_orders = ChangeOrderService::new(
            db.clone(),
            documents,
            email,
            notifier,
            config.server.public_base_url.clone(),
        );
        let reconciler = WebhookReconciler::new(db.clone(), gateway.fee_rate());

        let state = AppState {
            db,
            gateway,
            budgets,
            final_invoices,
            change_orders,
            reconciler,
        };

        let router = build_router(state);

        let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "HTTP server bound");

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/budgets", post(handlers::budgets::create_budget))
        .route(
            "/budgets/:budget_id",
            get(handlers::budgets::get_budget).patch(handlers::budgets::update_budget),
        )
        .route(
            "/final-invoices",
            post(handlers::final_invoices::create_final_invoice),
        )
        .route(
            "/final-invoices/:final_invoice_id",
            get(handlers::final_invoices::get_final_invoice),
        )
        .route(
            "/final-invoices/:final_invoice_id/extra-items",
            post(handlers::final_invoices::add_extra_item),
        )
        .route(
            "/final-invoices/:final_invoice_id/status",
            patch(handlers::final_invoices::update_invoice_status),
        )
        .route(
            "/extra-items/:extra_item_id",
            patch(handlers::final_invoices::update_extra_item)
                .delete(handlers::final_invoices::remove_extra_item),
        )
        .route(
            "/change-orders",
            post(handlers::change_orders::create_change_order),
        )
        .route(
            "/change-orders/:change_order_id",
            get(handlers::change_orders::get_change_order)
                .patch(handlers::change_orders::update_change_order),
        )
        .route(
            "/change-orders/:change_order_id/send",
            post(handlers::change_orders::send_change_order),
        )
        // Decision links arrive as GETs from the client's mail reader; API
        // clients POST. Both hit the same handler.
        .route(
            "/change-orders/:change_order_id/respond",
            get(handlers::change_orders::respond_to_change_order)
                .post(handlers::change_orders::respond_to_change_order),
        )
        .route("/webhooks/gateway", post(handlers::webhooks::gateway_webhook))
        .layer(axum::middleware::from_fn(services::metrics::track_http))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
