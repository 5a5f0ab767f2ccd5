use crate::config::AppConfig;
use crate::service::ObjectStore;

#[derive(Clone)]
pub struct AppState {
    pub store: ObjectStore,
    pub config: AppConfig,
}
