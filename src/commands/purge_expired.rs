use tracing::info;

use crate::controllers::paste;
use crate::App;

pub async fn run(app: App) -> anyhow::Result<()> {
    let now = app.clock.now();
    let count = paste::purge_expired(&app, now).await?;
    if count == 0 {
        info!("no inaccessible pastes to delete");
    }
    Ok(())
}
