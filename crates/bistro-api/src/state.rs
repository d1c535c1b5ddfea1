//! # Application State
//!
//! Shared state for the Axum application: configuration, stores, the order
//! ledger and the payment gateway. Stores are Postgres-backed when
//! `DATABASE_URL` is set and in-memory otherwise.

use crate::auth::TokenVerifier;
use bistro_core::postgres::{self, PgIntentRepository, PgOrderRepository, PgUserRepository};
use bistro_core::{
    AmountPolicy, BoxedPaymentGateway, CartStore, CheckoutUrls, Currency, IntentRepository,
    LedgerOptions, MemoryIntentRepository, MemoryOrderRepository, MemoryUserRepository,
    MenuCatalog, OrderError, OrderLedger, OrderRepository, OrderResult, Reconciler, StatusPolicy,
    UserRecord, UserRepository,
};
use bistro_stripe::StripeGateway;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Storefront origin; payment callbacks land on `{frontend_url}/verify`
    pub frontend_url: String,
    /// HS256 signing secret shared with the login service
    pub jwt_secret: String,
    pub currency: Currency,
    /// Flat delivery fee in major units
    pub delivery_fee: f64,
    pub gateway_timeout: Duration,
    /// Age after which an unpaid order is rolled back
    pub pending_timeout: Duration,
    pub sweep_interval: Duration,
    pub amount_policy: AmountPolicy,
    pub status_policy: StatusPolicy,
    /// Menu file (TOML, `[[items]]`)
    pub menu_path: String,
    /// Optional user seed file (TOML, `[[users]]`)
    pub users_path: String,
    /// Postgres connection string; in-memory stores when unset
    pub database_url: Option<String>,
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Defaults with an explicit signing secret
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: "development".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            jwt_secret: jwt_secret.into(),
            currency: Currency::USD,
            delivery_fee: 2.0,
            gateway_timeout: Duration::from_secs(15),
            pending_timeout: Duration::from_secs(86_400),
            sweep_interval: Duration::from_secs(300),
            amount_policy: AmountPolicy::Trust,
            status_policy: StatusPolicy::Legacy,
            menu_path: "config/menu.toml".to_string(),
            users_path: "config/users.toml".to_string(),
            database_url: None,
            db_max_connections: 10,
        }
    }

    /// Load from environment variables
    pub fn from_env() -> OrderResult<Self> {
        dotenvy::dotenv().ok();

        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OrderError::Configuration("JWT_SECRET not set".to_string()))?;
        let defaults = Self::new(jwt_secret);

        let currency = match env::var("CURRENCY") {
            Ok(code) => Currency::parse(&code).ok_or_else(|| {
                OrderError::Configuration(format!("unsupported CURRENCY: {}", code))
            })?,
            Err(_) => defaults.currency,
        };

        let delivery_fee: f64 = env_or("DELIVERY_FEE", defaults.delivery_fee)?;
        if !delivery_fee.is_finite() || delivery_fee < 0.0 {
            return Err(OrderError::Configuration("DELIVERY_FEE must be >= 0".to_string()));
        }

        Ok(Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port)?,
            environment: env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            frontend_url: env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            currency,
            delivery_fee,
            gateway_timeout: Duration::from_secs(env_or("GATEWAY_TIMEOUT_SECS", 15)?),
            pending_timeout: Duration::from_secs(env_or("PENDING_TIMEOUT_SECS", 86_400)?),
            sweep_interval: Duration::from_secs(env_or("SWEEP_INTERVAL_SECS", 300)?),
            amount_policy: env_or("AMOUNT_POLICY", defaults.amount_policy)?,
            status_policy: env_or("STATUS_POLICY", defaults.status_policy)?,
            menu_path: env::var("MENU_PATH").unwrap_or(defaults.menu_path),
            users_path: env::var("USERS_PATH").unwrap_or(defaults.users_path),
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            jwt_secret: defaults.jwt_secret,
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> OrderResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| OrderError::Configuration(format!("invalid HOST/PORT: {}", e)))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn ledger_options(&self) -> LedgerOptions {
        LedgerOptions {
            currency: self.currency,
            delivery_fee: self.delivery_fee,
            gateway_timeout: self.gateway_timeout,
            amount_policy: self.amount_policy,
            status_policy: self.status_policy,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> OrderResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| OrderError::Configuration(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ledger: Arc<OrderLedger>,
    pub carts: CartStore,
    pub users: Arc<dyn UserRepository>,
    pub gateway: BoxedPaymentGateway,
    pub tokens: TokenVerifier,
    pub catalog: Arc<MenuCatalog>,
    pub reconciler: Arc<Reconciler>,
}

/// Repositories backing the state
pub struct Stores {
    pub users: Arc<dyn UserRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub intents: Arc<dyn IntentRepository>,
}

impl Stores {
    /// Empty in-memory stores seeded with `users`
    pub fn in_memory(users: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            users: Arc::new(MemoryUserRepository::with_users(users)),
            orders: Arc::new(MemoryOrderRepository::new()),
            intents: Arc::new(MemoryIntentRepository::new()),
        }
    }

    /// Migrated Postgres stores. Seed users are inserted only when missing,
    /// so restarts keep their carts.
    pub async fn postgres(
        database_url: &str,
        max_connections: u32,
        users: impl IntoIterator<Item = UserRecord>,
    ) -> OrderResult<Self> {
        let pool = postgres::connect(database_url, max_connections).await?;
        postgres::run_migrations(&pool).await?;

        let user_repo = PgUserRepository::new(pool.clone());
        let mut seeded = 0usize;
        for user in users {
            if user_repo.find(&user.id).await?.is_none() {
                user_repo.upsert(user).await?;
                seeded += 1;
            }
        }
        info!(seeded, "Postgres stores ready");

        Ok(Self {
            users: Arc::new(user_repo),
            orders: Arc::new(PgOrderRepository::new(pool.clone())),
            intents: Arc::new(PgIntentRepository::new(pool)),
        })
    }
}

impl AppState {
    /// Build from the environment with the Stripe gateway
    pub async fn from_env() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let catalog = load_menu(&config.menu_path)?;
        let users = load_users(&config.users_path)?;
        let gateway = StripeGateway::from_env(config.gateway_timeout)
            .map_err(|e| anyhow::anyhow!("Failed to initialize Stripe: {}", e))?;

        let stores = match config.database_url.as_deref() {
            Some(url) => Stores::postgres(url, config.db_max_connections, users).await?,
            None => {
                warn!("DATABASE_URL not set, orders are kept in memory");
                Stores::in_memory(users)
            }
        };

        Ok(Self::with_parts(config, stores, Arc::new(gateway), catalog))
    }

    /// Assemble from explicit parts (used by tests)
    pub fn with_parts(
        config: AppConfig,
        stores: Stores,
        gateway: BoxedPaymentGateway,
        catalog: MenuCatalog,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let carts = CartStore::new(stores.users.clone());
        let ledger = OrderLedger::new(
            stores.orders.clone(),
            stores.intents.clone(),
            carts.clone(),
            gateway.clone(),
            catalog.clone(),
            CheckoutUrls::for_frontend(&config.frontend_url),
        )
        .with_options(config.ledger_options());
        let reconciler = Reconciler::new(stores.orders, stores.intents, config.pending_timeout);

        Self {
            tokens: TokenVerifier::new(&config.jwt_secret),
            config: Arc::new(config),
            ledger: Arc::new(ledger),
            carts,
            users: stores.users,
            gateway,
            catalog,
            reconciler: Arc::new(reconciler),
        }
    }
}

/// Load the menu; a missing file yields an empty menu
fn load_menu(path: &str) -> anyhow::Result<MenuCatalog> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let catalog = MenuCatalog::from_toml(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
            info!("Loaded {} menu items from {}", catalog.len(), path);
            Ok(catalog)
        }
        Err(_) => {
            warn!("No menu found at {}, using empty catalog", path);
            Ok(MenuCatalog::new())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct UserSeed {
    #[serde(default)]
    users: Vec<UserRecord>,
}

/// Load seed users; a missing file yields none
fn load_users(path: &str) -> anyhow::Result<Vec<UserRecord>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let seed: UserSeed = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
            info!("Loaded {} users from {}", seed.users.len(), path);
            Ok(seed.users)
        }
        Err(_) => {
            warn!("No user seed found at {}", path);
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistro_core::Role;

    #[test]
    fn test_socket_addr() {
        let mut config = AppConfig::new("secret");
        config.host = "0.0.0.0".to_string();
        config.port = 3000;

        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:3000");

        config.host = "not a host".to_string();
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::new("secret");
        assert_eq!(config.port, 8080);
        assert_eq!(config.delivery_fee, 2.0);
        assert_eq!(config.pending_timeout, Duration::from_secs(86_400));
        assert!(!config.is_production());
        assert_eq!(config.ledger_options().amount_policy, AmountPolicy::Trust);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_user_seed_parses() {
        let seed: UserSeed = toml::from_str(
            r#"
            [[users]]
            _id = "admin-1"
            name = "Admin"
            role = "admin"

            [[users]]
            _id = "u1"
            email = "u1@example.com"
            "#,
        )
        .unwrap();
        assert_eq!(seed.users.len(), 2);
        assert_eq!(seed.users[0].role, Role::Admin);
        assert_eq!(seed.users[1].role, Role::User);
        assert!(seed.users[1].cart_data.is_empty());
    }
}
