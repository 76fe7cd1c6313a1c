use dotenvy::dotenv;
use std::{env, sync::Arc};
use stockbook::{
    auth::{AuthProvider, LocalAuthProvider},
    backend::Backend,
    config::{database, settings},
    core::{account, currency, report},
    errors::Result,
    realtime::SessionWorkspace,
    session::{Access, SessionManager},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, non-fatal since env vars can be set externally
    dotenv().ok();

    // 3. Load the application configuration
    let app_config = settings::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;

    // 4. Connect to the record store and make sure every table exists
    let database_url = database::get_database_url();
    database::ensure_sqlite_dir(&database_url)?;
    let db = database::create_connection(&database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))?;

    // 5. Build the collaborators; the entry point owns all of them
    let backend = Backend::new(db.clone());
    let auth: Arc<dyn AuthProvider> = Arc::new(LocalAuthProvider::new(db));
    let session = SessionManager::new(backend.clone(), auth, &app_config);
    session.bootstrap().await;

    // 6. Sign in from the environment when no session was restored
    if session.snapshot().access() == Access::SignIn {
        if let (Ok(email), Ok(password)) =
            (env::var("STOCKBOOK_EMAIL"), env::var("STOCKBOOK_PASSWORD"))
        {
            if let Err(e) = session.sign_in(&email, &password).await {
                warn!("Sign-in failed: {}", e);
            }
        }
    }

    // 7. Print the dashboard
    let snapshot = session.snapshot();
    match (snapshot.access(), snapshot.owner_key()) {
        (Access::Granted, Some(owner_key)) => {
            let code = match &snapshot.account {
                Some(account) => account.currency.clone(),
                None => {
                    account::cached_currency(
                        backend.database(),
                        &app_config.display.default_currency,
                    )
                    .await
                }
            };
            match report::generate_dashboard(
                backend.database(),
                owner_key,
                app_config.display.recent_sales_limit,
            )
            .await
            {
                Ok(dashboard) => {
                    let summary = &dashboard.summary;
                    info!(
                        revenue = %currency::format_amount(summary.total_revenue, &code),
                        cogs = %currency::format_amount(summary.cost_of_goods_sold, &code),
                        expenses = %currency::format_amount(summary.total_expenses, &code),
                        net_profit = %currency::format_amount(summary.net_profit, &code),
                        stock_value = %currency::format_amount(dashboard.stock_value, &code),
                        sales = dashboard.sales_count,
                        "Dashboard"
                    );
                }
                Err(e) => error!("Failed to build dashboard: {}", e),
            }
            let threshold = app_config.display.low_stock_threshold;
            match report::low_stock_report(backend.database(), owner_key, threshold).await {
                Ok(low) => {
                    for product in low {
                        warn!(name = %product.name, quantity = product.quantity, "Low stock");
                    }
                }
                Err(e) => error!("Failed to check stock levels: {}", e),
            }
        }
        (Access::Expired, _) => {
            warn!("Account expired or disabled; contact the administrator.");
        }
        _ => {
            info!("Not signed in. Set STOCKBOOK_EMAIL and STOCKBOOK_PASSWORD to sign in.");
        }
    }

    // 8. Keep the live workspace open for as long as the session grants access
    let workspace = SessionWorkspace::follow(backend.clone(), session.watch());

    // 9. Run until interrupted, then tear everything down
    info!("Running. Press Ctrl-C to stop.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    workspace.close().await;
    session.shutdown();
    info!("Shut down.");
    Ok(())
}
