use std::sync::Arc;

use anyhow::Context;
use tracing::error;

use vch_core::{config::Config, ports::BindingStore};
use vch_store::SqliteBindingStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vch_core::logging::init("vch")?;

    let cfg = Arc::new(Config::load()?);

    let store: Arc<dyn BindingStore> = Arc::new(
        SqliteBindingStore::open(&cfg.database_path).with_context(|| {
            format!("failed to open binding store {}", cfg.database_path.display())
        })?,
    );

    if let Err(e) = vch_discord::router::run(cfg, store).await {
        error!(error = %format!("{e:#}"), "bot exited");
        return Err(e);
    }

    Ok(())
}
