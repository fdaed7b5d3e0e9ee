//! The resolve -> load -> transform pipeline behind
//! `DevEnvironment::transform_request`.

use skiff_common::{Error, Result, TransformResult};
use tracing::debug;

use crate::container::{LoadOptions, TransformOptions};
use crate::environment::DevEnvironment;

pub(crate) async fn run(environment: &DevEnvironment, url: &str) -> Result<TransformResult> {
    let container = environment.plugin_container()?;
    let node = environment
        .module_graph()
        .ensure_entry_from_url(url)
        .await?;

    if let Some(cached) = node.read().transform_result.clone() {
        debug!("transform cache hit for {}", url);
        return Ok(cached);
    }

    let (id, file) = {
        let node = node.read();
        (
            node.id.clone().unwrap_or_else(|| url.to_string()),
            node.file.clone(),
        )
    };
    let ssr = environment.legacy_ssr();

    let loaded = container.load(&id, LoadOptions { ssr }).await?;
    let (code, in_map) = match loaded {
        Some(output) => (output.code, output.map),
        None => {
            // No plugin claimed the id; fall back to the backing file.
            let file = file.ok_or_else(|| Error::ModuleNotFound(id.clone()))?;
            match tokio::fs::read_to_string(&file).await {
                Ok(code) => (code, None),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::ModuleNotFound(id.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    let result = container
        .transform(code, &id, TransformOptions { in_map, ssr })
        .await?;
    node.write().transform_result = Some(result.clone());
    Ok(result)
}
