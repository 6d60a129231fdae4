//! Website rows

use crate::db::models::Website;
use crate::db::store::{BatchInsert, Executor, SqlValue};
use crate::errors::{AppError, Result};

/// All websites, in id order
pub async fn load_websites(exec: &dyn Executor) -> Result<Vec<Website>> {
    let rows = exec
        .select_text(Website::TABLE, Website::COLUMNS)
        .await
        .map_err(|e| AppError::persistence("website", "loading", e))?;

    let mut websites = Vec::with_capacity(rows.len());
    for row in rows {
        let [name, categories, domains, init_urls]: [Option<String>; 4] =
            row.try_into().map_err(|_| AppError::Internal {
                message: "unexpected websites column count".to_string(),
            })?;
        let name = name.ok_or_else(|| AppError::InvalidEntity {
            entity: "website",
            message: "missing name".to_string(),
        })?;
        websites.push(Website::from_columns(
            name,
            categories.as_deref(),
            domains.as_deref(),
            init_urls.as_deref(),
        ));
    }
    Ok(websites)
}

/// Insert websites not stored yet
pub async fn save_websites(exec: &dyn Executor, websites: &[Website]) -> Result<()> {
    if websites.is_empty() {
        return Ok(());
    }

    let rows = websites
        .iter()
        .map(|w| {
            vec![
                SqlValue::text(&w.name),
                SqlValue::text(w.categories.join(",")),
                SqlValue::text(w.allowed_domains.join(",")),
                SqlValue::text(w.init_urls.join(",")),
            ]
        })
        .collect();

    exec.insert(
        BatchInsert::new(Website::TABLE, Website::COLUMNS)
            .rows(rows)
            .ignore_conflicts(),
    )
    .await
    .map_err(|e| AppError::persistence("website", "inserting", e))?;
    Ok(())
}
