use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// CEP the reference point is resolved from at startup.
    pub reference_cep: String,
    /// Maximum great-circle distance (km) for a city to qualify as nearby.
    pub discovery_radius_km: f64,
    /// Estimated-population floor applied before any geocoding.
    pub min_city_population: i64,
    /// How many top-population cities to keep when none clears the floor.
    pub discovery_fallback_top_cities: usize,
    pub viacep_base_url: String,
    pub nominatim_base_url: String,
    pub ibge_base_url: String,
    /// Optional real-time channel for batch progress pushes.
    pub notifier_url: Option<String>,
    /// Pause inserted after each remote call (rate discipline, ~1 req/s).
    pub request_delay_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            reference_cep: std::env::var("REFERENCE_CEP")
                .unwrap_or_else(|_| "01310-100".to_string())
                .trim()
                .to_string(),
            discovery_radius_km: std::env::var("DISCOVERY_RADIUS_KM")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISCOVERY_RADIUS_KM must be a number"))
                .and_then(|km: f64| {
                    if km < 0.0 {
                        anyhow::bail!("DISCOVERY_RADIUS_KM cannot be negative");
                    }
                    Ok(km)
                })?,
            min_city_population: std::env::var("MIN_CITY_POPULATION")
                .unwrap_or_else(|_| "50000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MIN_CITY_POPULATION must be an integer"))
                .and_then(|pop: i64| {
                    if pop < 0 {
                        anyhow::bail!("MIN_CITY_POPULATION cannot be negative");
                    }
                    Ok(pop)
                })?,
            discovery_fallback_top_cities: std::env::var("DISCOVERY_FALLBACK_TOP_CITIES")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| {
                    anyhow::anyhow!("DISCOVERY_FALLBACK_TOP_CITIES must be a positive integer")
                })
                .and_then(|n: usize| {
                    if n == 0 {
                        anyhow::bail!("DISCOVERY_FALLBACK_TOP_CITIES must be at least 1");
                    }
                    Ok(n)
                })?,
            viacep_base_url: std::env::var("VIACEP_BASE_URL")
                .unwrap_or_else(|_| "https://viacep.com.br".to_string())
                .trim_end_matches('/')
                .to_string(),
            nominatim_base_url: std::env::var("NOMINATIM_BASE_URL")
                .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string())
                .trim_end_matches('/')
                .to_string(),
            ibge_base_url: std::env::var("IBGE_BASE_URL")
                .unwrap_or_else(|_| "https://servicodados.ibge.gov.br".to_string())
                .trim_end_matches('/')
                .to_string(),
            notifier_url: std::env::var("NOTIFIER_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            request_delay_ms: std::env::var("REQUEST_DELAY_MS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("REQUEST_DELAY_MS must be an integer"))?,
        };

        if config.reference_cep.chars().filter(|c| c.is_ascii_digit()).count() != 8 {
            anyhow::bail!("REFERENCE_CEP must contain exactly 8 digits");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Reference CEP: {}", config.reference_cep);
        tracing::debug!(
            "Discovery radius: {} km, population floor: {}",
            config.discovery_radius_km,
            config.min_city_population
        );
        if let Some(ref notifier) = config.notifier_url {
            tracing::info!("Progress notifier configured: {}", notifier);
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
