use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::{CrmError, CrmResult};
use crate::services::contacts::ContactService;
use crate::services::dashboard::DashboardService;
use crate::services::deals::DealService;
use crate::services::tasks::TaskService;
use crate::services::ServiceContext;
use crate::store::mock::MockStore;
use crate::store::remote::RemoteStore;
use crate::store::RecordStore;
use crate::types::{Backend, Config};

const PROJECT_ID_ENV: &str = "CRMDESK_PROJECT_ID";
const PUBLIC_KEY_ENV: &str = "CRMDESK_PUBLIC_KEY";

/// Services wired to one record store.
#[derive(Clone)]
pub struct CrmState {
    pub config: Config,
    pub contacts: ContactService,
    pub deals: DealService,
    pub tasks: TaskService,
    pub dashboard: DashboardService,
}

impl CrmState {
    /// Load ~/.crmdesk/config.json and build the configured backend.
    pub fn init() -> CrmResult<Self> {
        Self::from_config(load_config()?)
    }

    pub fn from_config(config: Config) -> CrmResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn RecordStore> = match config.backend {
            Backend::Remote => Arc::new(RemoteStore::new(&config)?),
            Backend::Mock => {
                log::info!("Using in-memory record store");
                Arc::new(MockStore::with_clock(clock.clone()))
            }
        };
        Ok(Self::with_store(config, store, clock))
    }

    pub fn with_store(config: Config, store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        let ctx = ServiceContext::new(store, clock);
        Self {
            config,
            contacts: ContactService::new(ctx.clone()),
            deals: DealService::new(ctx.clone()),
            tasks: TaskService::new(ctx.clone()),
            dashboard: DashboardService::new(ctx),
        }
    }
}

pub fn config_path() -> CrmResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CrmError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".crmdesk").join("config.json"))
}

/// Load configuration from ~/.crmdesk/config.json, then apply environment
/// overrides.
pub fn load_config() -> CrmResult<Config> {
    let path = config_path()?;
    let config = load_config_from(&path)?;
    Ok(apply_overrides(config, |key| std::env::var(key).ok()))
}

/// A missing file yields the defaults; an unreadable or invalid one is an error.
pub fn load_config_from(path: &Path) -> CrmResult<Config> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| CrmError::Config(format!("Failed to read config: {}", e)))?;
    serde_json::from_str(&content)
        .map_err(|e| CrmError::Config(format!("Failed to parse config: {}", e)))
}

fn apply_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(project_id) = lookup(PROJECT_ID_ENV).filter(|v| !v.trim().is_empty()) {
        config.project_id = project_id;
    }
    if let Some(public_key) = lookup(PUBLIC_KEY_ENV).filter(|v| !v.trim().is_empty()) {
        config.public_key = public_key;
    }
    config
}
