use booking_core::domain::value_objects::booking_rules::BookingRules;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub user_secret: UserSecret,
    pub stripe: Stripe,
    pub notifications: Notifications,
    pub internal: Internal,
    pub booking_rules: BookingRules,
    /// Run the scheduler cluster inside this process.
    pub run_schedulers: bool,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    /// Megabytes.
    pub body_limit: u64,
    /// Seconds.
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct UserSecret {
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct Notifications {
    /// Without a webhook, codes and notices only go to the log.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Internal {
    pub api_token: Option<String>,
}
