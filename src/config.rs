use std::env;

#[derive(Clone, Debug)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
}

#[derive(Clone, Debug)]
pub struct InternalApiSettings {
    /// Base URL of the consumer app, e.g. `https://app.example.com`.
    pub base_url: String,
    /// Bearer secret for `/api/internal/*` calls.
    pub secret: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Origin allowed to call the billing API from a browser.
    pub frontend_origin: String,
    /// Base URL the checkout success/cancel redirects point back to.
    pub app_base_url: String,
    pub stripe: StripeSettings,
    pub internal_api: InternalApiSettings,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file

        let frontend_origin = env::var("FRONTEND_ORIGIN").expect("FRONTEND_ORIGIN must be set");
        let app_base_url = env::var("APP_BASE_URL").expect("APP_BASE_URL must be set");

        let stripe = StripeSettings {
            secret_key: env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY must be set"),
            webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .expect("STRIPE_WEBHOOK_SECRET must be set"),
        };

        let internal_api = InternalApiSettings {
            base_url: env::var("INTERNAL_API_BASE_URL")
                .expect("INTERNAL_API_BASE_URL must be set"),
            secret: env::var("INTERNAL_API_SECRET").expect("INTERNAL_API_SECRET must be set"),
        };

        Config {
            frontend_origin,
            app_base_url,
            stripe,
            internal_api,
        }
    }
}
