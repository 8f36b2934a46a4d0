use chrono::NaiveDate;
use colored::*;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::BookError;
use crate::http::{fetch_bytes, Fetch};

/// Largest page count a landing page may announce.
pub const MAX_PAGES: usize = 10_000;

static LABELLED_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Title\s?:\s?(?P<title>.*),\s?Author\s?:\s?(?P<author>.*),\s?Length\s?:\s?(?P<pages>.*)\spages\s?,\s?Published\s?:\s?(?P<published>\d{4}-\d{2}-\d{2})",
    )
    .unwrap()
});

/// Book metadata announced by the landing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookDescription {
    pub title: String,
    pub author: String,
    pub pages: usize,
    pub published: NaiveDate,
}

/// URL prefix shared by every page asset of one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AssetBasePath(String);

impl AssetBasePath {
    /// Directory part of the social preview image URL, i.e. everything
    /// before the last `/`.
    pub fn from_preview_url(preview: &str) -> Result<Self, BookError> {
        match preview.trim().rsplit_once('/') {
            Some((base, _)) if !base.is_empty() => Ok(Self(base.to_string())),
            _ => Err(BookError::metadata(format!(
                "og:image content '{}' has no directory part",
                preview
            ))),
        }
    }

    /// `{base}/p{index}{suffix}`
    pub fn page_url(&self, index: usize, suffix: &str) -> String {
        format!("{}/p{}{}", self.0, index, suffix)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Turns the text of the description meta tag into a [`BookDescription`].
pub trait DescriptionParser {
    fn parse(&self, description: &str) -> Result<BookDescription, BookError>;
}

/// Parser for `Title: …, Author: …, Length: N pages, Published: YYYY-MM-DD`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LabelledDescriptionParser;

impl DescriptionParser for LabelledDescriptionParser {
    fn parse(&self, description: &str) -> Result<BookDescription, BookError> {
        let caps = LABELLED_DESCRIPTION.captures(description).ok_or_else(|| {
            BookError::metadata(format!(
                "description does not match the expected pattern: '{}'",
                description
            ))
        })?;

        let raw_pages = caps["pages"].trim();
        let pages = raw_pages
            .parse::<usize>()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                BookError::metadata(format!("page count '{}' is not a positive integer", raw_pages))
            })?;
        if pages > MAX_PAGES {
            return Err(BookError::metadata(format!(
                "page count {} exceeds the limit of {}",
                pages, MAX_PAGES
            )));
        }

        let published = NaiveDate::parse_from_str(&caps["published"], "%Y-%m-%d").map_err(|e| {
            BookError::metadata(format!(
                "publication date '{}' is invalid: {}",
                &caps["published"], e
            ))
        })?;

        Ok(BookDescription {
            title: caps["title"].trim().to_string(),
            author: caps["author"].trim().to_string(),
            pages,
            published,
        })
    }
}

/// Everything learned from one landing page.
#[derive(Debug, Clone, Serialize)]
pub struct LandingPage {
    pub asset_base: AssetBasePath,
    pub description: BookDescription,
}

pub struct Resolver {
    parser: Box<dyn DescriptionParser + Send + Sync>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(LabelledDescriptionParser)
    }
}

impl Resolver {
    pub fn new(parser: impl DescriptionParser + Send + Sync + 'static) -> Self {
        Self {
            parser: Box::new(parser),
        }
    }

    pub async fn resolve<F: Fetch>(&self, client: &F, url: &str) -> Result<LandingPage, BookError> {
        info!("Visiting \"{}\"", url.green());

        let body = fetch_bytes(client, url).await?;
        let html = String::from_utf8_lossy(&body);
        let landing = self.parse_landing_page(&html)?;

        info!(
            "Found \"{}\" by {} ({} pages, published {})",
            landing.description.title.green(),
            landing.description.author,
            landing.description.pages,
            landing.description.published
        );
        debug!("Asset base: {}", landing.asset_base.as_str());

        Ok(landing)
    }

    pub fn parse_landing_page(&self, html: &str) -> Result<LandingPage, BookError> {
        let document = Html::parse_document(html);

        let preview = meta_content(&document, r#"head meta[property="og:image"]"#)
            .ok_or_else(|| BookError::metadata("missing og:image meta tag"))?;
        let description = meta_content(&document, r#"head meta[name="description"]"#)
            .ok_or_else(|| BookError::metadata("missing description meta tag"))?;

        Ok(LandingPage {
            asset_base: AssetBasePath::from_preview_url(preview)?,
            description: self.parser.parse(description)?,
        })
    }
}

fn meta_content<'a>(document: &'a Html, selector: &str) -> Option<&'a str> {
    let selector = Selector::parse(selector).unwrap();
    document
        .select(&selector)
        .find_map(|element| element.value().attr("content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESC: &str =
        "Title: My Book: Part 2!, Author: Jane Doe, Length: 12 pages, Published: 2021-03-04";

    fn landing_html(image: Option<&str>, description: Option<&str>) -> String {
        let mut head = String::new();
        if let Some(image) = image {
            head.push_str(&format!(r#"<meta property="og:image" content="{}">"#, image));
        }
        if let Some(description) = description {
            head.push_str(&format!(r#"<meta name="description" content="{}">"#, description));
        }
        format!("<html><head>{}</head><body></body></html>", head)
    }

    #[test]
    fn test_parse_labelled_description() {
        let desc = LabelledDescriptionParser.parse(DESC).unwrap();
        assert_eq!(desc.title, "My Book: Part 2!");
        assert_eq!(desc.author, "Jane Doe");
        assert_eq!(desc.pages, 12);
        assert_eq!(desc.published, NaiveDate::from_ymd_opt(2021, 3, 4).unwrap());
    }

    #[test]
    fn test_parse_tolerates_missing_spaces() {
        let desc = LabelledDescriptionParser
            .parse("Title:X,Author:Y,Length:3 pages,Published:2020-01-01")
            .unwrap();
        assert_eq!(desc.title, "X");
        assert_eq!(desc.pages, 3);
    }

    #[test]
    fn test_missing_length_is_metadata_error() {
        let err = LabelledDescriptionParser
            .parse("Title: X, Author: Y, Published: 2020-01-01")
            .unwrap_err();
        assert!(matches!(err, BookError::MetadataParse { .. }));
    }

    #[test]
    fn test_renamed_label_is_metadata_error() {
        let err = LabelledDescriptionParser
            .parse("Title: X, Writer: Y, Length: 3 pages, Published: 2020-01-01")
            .unwrap_err();
        assert!(matches!(err, BookError::MetadataParse { .. }));
    }

    #[test]
    fn test_non_numeric_or_zero_length_rejected() {
        for length in ["many", "0", "-4"] {
            let text = format!("Title: X, Author: Y, Length: {} pages, Published: 2020-01-01", length);
            assert!(
                matches!(
                    LabelledDescriptionParser.parse(&text),
                    Err(BookError::MetadataParse { .. })
                ),
                "length {length} should be rejected"
            );
        }
    }

    #[test]
    fn test_oversized_length_rejected() {
        for length in ["10001", "1000000000000000000", "99999999999999999999999"] {
            let text = format!("Title: X, Author: Y, Length: {} pages, Published: 2020-01-01", length);
            assert!(
                matches!(
                    LabelledDescriptionParser.parse(&text),
                    Err(BookError::MetadataParse { .. })
                ),
                "length {length} should be rejected"
            );
        }

        let text = format!("Title: X, Author: Y, Length: {} pages, Published: 2020-01-01", MAX_PAGES);
        assert_eq!(LabelledDescriptionParser.parse(&text).unwrap().pages, MAX_PAGES);
    }

    #[test]
    fn test_impossible_date_rejected() {
        let err = LabelledDescriptionParser
            .parse("Title: X, Author: Y, Length: 3 pages, Published: 2020-02-31")
            .unwrap_err();
        assert!(matches!(err, BookError::MetadataParse { .. }));
    }

    #[test]
    fn test_asset_base_strips_last_segment() {
        let base =
            AssetBasePath::from_preview_url("https://p.calameoassets.com/210304/abc/p1.jpg").unwrap();
        assert_eq!(base.as_str(), "https://p.calameoassets.com/210304/abc");
        assert_eq!(
            base.page_url(7, ".svgz"),
            "https://p.calameoassets.com/210304/abc/p7.svgz"
        );
    }

    #[test]
    fn test_asset_base_without_slash_rejected() {
        assert!(AssetBasePath::from_preview_url("cover.jpg").is_err());
    }

    #[test]
    fn test_parse_landing_page() {
        let html = landing_html(Some("https://cdn.example.com/book/p1.jpg"), Some(DESC));
        let landing = Resolver::default().parse_landing_page(&html).unwrap();
        assert_eq!(landing.asset_base.as_str(), "https://cdn.example.com/book");
        assert_eq!(landing.description.pages, 12);
    }

    #[test]
    fn test_missing_tags_are_metadata_errors() {
        let resolver = Resolver::default();
        for html in [
            landing_html(None, Some(DESC)),
            landing_html(Some("https://cdn.example.com/book/p1.jpg"), None),
        ] {
            assert!(matches!(
                resolver.parse_landing_page(&html),
                Err(BookError::MetadataParse { .. })
            ));
        }
    }

    #[test]
    fn test_custom_parser_is_used() {
        struct Fixed;
        impl DescriptionParser for Fixed {
            fn parse(&self, _: &str) -> Result<BookDescription, BookError> {
                Ok(BookDescription {
                    title: "Fixed".into(),
                    author: "Nobody".into(),
                    pages: 1,
                    published: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
                })
            }
        }

        let html = landing_html(Some("https://cdn.example.com/b/p1.jpg"), Some("anything"));
        let landing = Resolver::new(Fixed).parse_landing_page(&html).unwrap();
        assert_eq!(landing.description.title, "Fixed");
    }
}
