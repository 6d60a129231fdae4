//! Taxonomy persistence: groups, then archives, then categories

use crate::db::models::{Archive, Category, CategoryIndex, Group};
use crate::db::store::Executor;
use crate::db::upsert::upsert_all;
use crate::errors::{AppError, Result};
use tracing::{info, instrument};

/// Fill in empty archive names and codes.
///
/// An unnamed archive takes its group's name. An archive without a code takes
/// the prefix before '.' of its first category's code, and is rejected when it
/// has no categories or that prefix is empty.
pub fn apply_archive_defaults(groups: &mut [Group]) -> Result<()> {
    for group in groups.iter_mut() {
        for archive in group.archives.iter_mut() {
            if archive.name.is_empty() {
                archive.name = group.name.clone();
            }
            if archive.code.is_empty() {
                let first = archive.categories.first().ok_or_else(|| {
                    AppError::InvalidTaxonomy {
                        message: format!(
                            "archive '{}' of group '{}' has no code and no categories",
                            archive.name, group.name
                        ),
                    }
                })?;
                let prefix = first.code.split('.').next().unwrap_or_default().trim();
                if prefix.is_empty() {
                    return Err(AppError::InvalidTaxonomy {
                        message: format!(
                            "category '{}' of group '{}' has no archive prefix",
                            first.code, group.name
                        ),
                    });
                }
                archive.code = prefix.to_string();
            }
        }
    }
    Ok(())
}

/// Upsert groups and hand their ids down to their archives
pub async fn save_groups(exec: &dyn Executor, groups: &mut [Group]) -> Result<()> {
    upsert_all(exec, groups).await?;

    for group in groups.iter_mut() {
        let group_id = group.id;
        for archive in group.archives.iter_mut() {
            archive.group_id = group_id;
        }
    }
    Ok(())
}

/// Upsert archives and hand their ids down to their categories
pub async fn save_archives(exec: &dyn Executor, archives: &mut [&mut Archive]) -> Result<()> {
    upsert_all(exec, archives).await?;

    for archive in archives.iter_mut() {
        let archive_id = archive.id;
        for category in archive.categories.iter_mut() {
            category.archive_id = archive_id;
        }
    }
    Ok(())
}

pub async fn save_categories(exec: &dyn Executor, categories: &mut [&mut Category]) -> Result<()> {
    upsert_all(exec, categories).await
}

/// Persist a full taxonomy tree and index its categories by code
#[instrument(skip_all, fields(groups = groups.len()))]
pub async fn save_taxonomy(exec: &dyn Executor, groups: &mut [Group]) -> Result<CategoryIndex> {
    apply_archive_defaults(groups)?;

    save_groups(exec, groups).await?;

    {
        let mut archives: Vec<&mut Archive> = groups
            .iter_mut()
            .flat_map(|g| g.archives.iter_mut())
            .collect();
        save_archives(exec, &mut archives).await?;
    }

    {
        let mut categories: Vec<&mut Category> = groups
            .iter_mut()
            .flat_map(|g| g.archives.iter_mut())
            .flat_map(|a| a.categories.iter_mut())
            .collect();
        save_categories(exec, &mut categories).await?;
    }

    let index = CategoryIndex::from_categories(
        groups
            .iter()
            .flat_map(|g| g.archives.iter())
            .flat_map(|a| a.categories.iter()),
    );

    info!(categories = index.len(), "Taxonomy saved");
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_defaults_from_group_and_first_category() {
        let mut groups = vec![Group::new("Economics")
            .with_archive(Archive::new("", "").with_category(Category::new("econ.EM", "Econometrics")))];

        apply_archive_defaults(&mut groups).unwrap();

        let archive = &groups[0].archives[0];
        assert_eq!(archive.name, "Economics");
        assert_eq!(archive.code, "econ");
    }

    #[test]
    fn test_explicit_archive_fields_are_kept() {
        let mut groups = vec![Group::new("Physics").with_archive(
            Archive::new("astro-ph", "Astrophysics")
                .with_category(Category::new("astro-ph.GA", "Astrophysics of Galaxies")),
        )];

        apply_archive_defaults(&mut groups).unwrap();

        assert_eq!(groups[0].archives[0].code, "astro-ph");
        assert_eq!(groups[0].archives[0].name, "Astrophysics");
    }

    #[test]
    fn test_codeless_archive_without_categories_is_fatal() {
        let mut groups = vec![Group::new("Statistics").with_archive(Archive::new("", "Stats"))];

        let err = apply_archive_defaults(&mut groups).unwrap_err();
        assert!(matches!(err, AppError::InvalidTaxonomy { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_category_code_without_prefix_is_fatal() {
        let mut groups = vec![Group::new("Computer Science")
            .with_archive(Archive::new("", "").with_category(Category::new(".AI", "Artificial Intelligence")))];

        let err = apply_archive_defaults(&mut groups).unwrap_err();
        assert!(matches!(err, AppError::InvalidTaxonomy { .. }));
        assert!(err.is_fatal());
    }
}
