use anyhow::Result;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub smtp: SmtpConfig,
    pub documents: DocumentServiceConfig,
    pub notifications: NotificationConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// External base URL used when building client-facing decision links.
    pub public_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GatewayConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    /// Processing fee the gateway adds on top of the charged amount.
    pub fee_rate: Decimal,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DocumentServiceConfig {
    pub base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct NotificationConfig {
    /// Internal stakeholders notified on lifecycle events.
    pub staff_emails: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("BILLING_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("BILLING_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;
        let public_base_url = env::var("BILLING_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));

        let db_url = env::var("BILLING_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("BILLING_DATABASE_URL must be set"))?;
        let max_connections = env::var("BILLING_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("BILLING_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let gateway_secret_key =
            env::var("GATEWAY_SECRET_KEY").unwrap_or_else(|_| "dev-secret".to_string());
        let gateway_webhook_secret =
            env::var("GATEWAY_WEBHOOK_SECRET").unwrap_or_else(|_| "dev-webhook-secret".to_string());
        let gateway_api_base_url = env::var("GATEWAY_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.gateway.example.com/v1".to_string());
        let fee_rate: Decimal = env::var("GATEWAY_FEE_RATE")
            .unwrap_or_else(|_| "0.03".to_string())
            .parse()?;
        let success_url = env::var("GATEWAY_SUCCESS_URL")
            .unwrap_or_else(|_| format!("{}/payments/success", public_base_url));
        let cancel_url = env::var("GATEWAY_CANCEL_URL")
            .unwrap_or_else(|_| format!("{}/payments/cancel", public_base_url));

        let smtp_host = env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string());
        let smtp_user = env::var("SMTP_USER").unwrap_or_default();
        let smtp_password = env::var("SMTP_PASSWORD").unwrap_or_default();
        let from_email = env::var("SMTP_FROM_EMAIL").unwrap_or_else(|_| smtp_user.clone());

        let documents_base_url = env::var("DOCUMENT_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:3002".to_string());

        let staff_emails = env::var("STAFF_NOTIFICATION_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            server: ServerConfig {
                host,
                port,
                public_base_url,
            },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            gateway: GatewayConfig {
                secret_key: Secret::new(gateway_secret_key),
                webhook_secret: Secret::new(gateway_webhook_secret),
                api_base_url: gateway_api_base_url,
                fee_rate,
                success_url,
                cancel_url,
            },
            smtp: SmtpConfig {
                host: smtp_host,
                user: smtp_user,
                password: Secret::new(smtp_password),
                from_email,
            },
            documents: DocumentServiceConfig {
                base_url: documents_base_url,
            },
            notifications: NotificationConfig { staff_emails },
            service_name: "works-billing-service".to_string(),
        })
    }
}
