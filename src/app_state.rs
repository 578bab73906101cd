use crate::{cache::CachePool, db::DbPool};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub cache: CachePool,
}
