//! arXiv category taxonomy loader
//!
//! Scrapes the category taxonomy page into a group → archive → category tree
//! and persists it through the repository.

use crate::errors::IngestionError;
use crate::fetch::{DocumentKind, Fetcher};
use paperharvest_common::db::models::{Archive, Category, CategoryIndex, Group};
use paperharvest_common::db::Repository;
use regex_lite::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use tracing::{debug, info, instrument};

/// "Name (code)" for archives, "code (Name)" for categories
const NAME_CODE_PATTERN: &str = r"^(.+)\((.+)\)$";

fn name_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NAME_CODE_PATTERN).expect("valid taxonomy heading pattern"))
}

fn selector(css: &str) -> Result<Selector, IngestionError> {
    Selector::parse(css)
        .map_err(|e| IngestionError::Taxonomy(format!("invalid selector `{}`: {:?}", css, e)))
}

/// Text content with whitespace runs collapsed
fn text_of(element: ElementRef<'_>) -> String {
    let raw = element.text().collect::<Vec<_>>().join(" ");
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(element: ElementRef<'_>, css: &Selector) -> Option<String> {
    element
        .select(css)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
}

/// Split a heading into its two parts: (outside parentheses, inside)
fn split_heading(heading: &str) -> Result<(String, String), IngestionError> {
    let caps = name_code_regex()
        .captures(heading)
        .ok_or_else(|| IngestionError::Taxonomy(format!("unexpected heading `{}`", heading)))?;
    let outer = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    let inner = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
    if outer.is_empty() || inner.is_empty() {
        return Err(IngestionError::Taxonomy(format!(
            "unexpected heading `{}`",
            heading
        )));
    }
    Ok((outer.to_string(), inner.to_string()))
}

/// Parse the taxonomy page
pub fn parse_taxonomy(html: &str) -> Result<Vec<Group>, IngestionError> {
    let document = Html::parse_document(html);

    let list_sel = selector("#category_taxonomy_list")?;
    let group_name_sel = selector("h2")?;
    let group_body_sel = selector(".accordion-body")?;
    let archive_sel = selector(".accordion-body > .columns")?;
    let columns_sel = selector(".columns")?;
    let h3 = selector("h3")?;
    let h4 = selector("h4")?;
    let p = selector("p")?;

    let list = document
        .select(&list_sel)
        .next()
        .ok_or_else(|| IngestionError::Taxonomy("no #category_taxonomy_list".to_string()))?;

    let mut groups: Vec<Group> = list
        .select(&group_name_sel)
        .map(|h2| Group::new(text_of(h2)))
        .collect();

    for (index, body) in list.select(&group_body_sel).enumerate() {
        let group = groups.get_mut(index).ok_or_else(|| {
            IngestionError::Taxonomy(format!("group body {} has no heading", index))
        })?;

        for archive_block in body.select(&archive_sel) {
            let mut archive = match first_text(archive_block, &h3) {
                Some(heading) => {
                    let (name, code) = split_heading(&heading)?;
                    Archive::new(code, name)
                }
                // Single-archive groups have no archive heading
                None => Archive::new("", ""),
            };

            for category_block in archive_block.select(&columns_sel) {
                let Some(heading) = first_text(category_block, &h4) else {
                    continue;
                };
                let (code, name) = split_heading(&heading)?;
                let description = first_text(category_block, &p).unwrap_or_default();
                archive
                    .categories
                    .push(Category::new(code, name).with_description(description));
            }

            debug!(
                group = %group.name,
                archive = %archive.code,
                categories = archive.categories.len(),
                "Parsed archive"
            );
            group.archives.push(archive);
        }
    }

    Ok(groups)
}

/// Fetch, parse and persist the taxonomy, returning the category index
#[instrument(skip(fetcher, repo))]
pub async fn load_taxonomy(
    fetcher: &dyn Fetcher,
    repo: &Repository,
    url: &str,
) -> Result<CategoryIndex, IngestionError> {
    info!("Loading categories");

    let document = fetcher.fetch(url).await?.expect_kind(DocumentKind::Html)?;
    let mut groups = parse_taxonomy(&document.body)?;
    let index = repo.save_taxonomy(&mut groups).await?;

    info!(
        groups = groups.len(),
        categories = index.len(),
        "arXiv categories updated"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAXONOMY_HTML: &str = r#"<html><body>
<div id="category_taxonomy_list">
  <h2 class="accordion-head">Computer Science</h2>
  <div class="accordion-body">
    <div class="columns">
      <div class="column">
        <div class="columns divided">
          <div class="column is-one-fifth"><h4>cs.AI <span>(Artificial Intelligence)</span></h4></div>
          <div class="column"><p>Covers all areas of AI.</p></div>
        </div>
        <div class="columns divided">
          <div class="column is-one-fifth"><h4>cs.LG <span>(Machine Learning)</span></h4></div>
          <div class="column"><p>Papers on all aspects of machine learning.</p></div>
        </div>
      </div>
    </div>
  </div>
  <h2 class="accordion-head">Physics</h2>
  <div class="accordion-body">
    <div class="columns">
      <div class="column is-one-fifth"><h3>Astrophysics
        <span>(astro-ph)</span></h3></div>
      <div class="column">
        <div class="columns divided">
          <div class="column is-one-fifth"><h4>astro-ph.GA <span>(Astrophysics of Galaxies)</span></h4></div>
          <div class="column"><p>Phenomena pertaining to galaxies.</p></div>
        </div>
      </div>
    </div>
  </div>
</div>
</body></html>"#;

    #[test]
    fn test_parse_taxonomy_tree() {
        let groups = parse_taxonomy(TAXONOMY_HTML).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "Computer Science");
        assert_eq!(groups[1].name, "Physics");

        let cs = &groups[0].archives[0];
        assert_eq!(cs.code, "");
        let codes: Vec<_> = cs.categories.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["cs.AI", "cs.LG"]);
        assert_eq!(cs.categories[0].name, "Artificial Intelligence");
        assert_eq!(cs.categories[0].description, "Covers all areas of AI.");

        let astro = &groups[1].archives[0];
        assert_eq!(astro.code, "astro-ph");
        assert_eq!(astro.name, "Astrophysics");
        assert_eq!(astro.categories[0].code, "astro-ph.GA");
    }

    #[test]
    fn test_malformed_heading_is_fatal() {
        let html = r#"<div id="category_taxonomy_list">
  <h2>Physics</h2>
  <div class="accordion-body"><div class="columns">
    <div class="columns"><h4>no parentheses here</h4></div>
  </div></div>
</div>"#;
        let err = parse_taxonomy(html).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_list_is_an_error() {
        assert!(matches!(
            parse_taxonomy("<html></html>"),
            Err(IngestionError::Taxonomy(_))
        ));
    }

    #[test]
    fn test_split_heading() {
        assert_eq!(
            split_heading("Astrophysics (astro-ph)").unwrap(),
            ("Astrophysics".to_string(), "astro-ph".to_string())
        );
        assert!(split_heading("()").is_err());
    }
}
