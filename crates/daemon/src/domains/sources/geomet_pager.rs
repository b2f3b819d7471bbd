use std::collections::HashSet;

use anyhow::{anyhow, Error};
use serde::Deserialize;
use serde_json::Value;
use slog::{info, warn, Logger};

use crate::{value_as_f64, BoundingBox, Fetch};

/// One GeoJSON feature of an OGC API items response, kept loosely typed
/// because the collections rename and drop properties over time.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GeoFeature {
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub geometry: Value,
}

impl GeoFeature {
    /// `(longitude, latitude)` from a point geometry, each absent if unusable
    pub fn coordinates(&self) -> (Option<f64>, Option<f64>) {
        let coordinate = |index: usize| {
            self.geometry
                .get("coordinates")
                .and_then(|coords| coords.get(index))
                .and_then(value_as_f64)
        };
        (coordinate(0), coordinate(1))
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FeaturePage {
    #[serde(default)]
    features: Vec<GeoFeature>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: Option<String>,
    href: Option<String>,
}

impl FeaturePage {
    fn next_href(&self) -> Option<String> {
        self.links
            .iter()
            .find(|link| {
                link.rel.as_deref() == Some("next")
                    && link.href.as_deref().is_some_and(|href| !href.is_empty())
            })
            .and_then(|link| link.href.clone())
    }
}

/// Walks an OGC API collection by following `rel=next` links.
///
/// Only the first request carries `f`, `limit` and `bbox`; the `next` hrefs
/// already encode them. A failure on the first page is an error, a failure on
/// a later page ends paging with what has been collected so far.
pub async fn fetch_all_features(
    fetcher: &dyn Fetch,
    logger: &Logger,
    api_url: &str,
    bbox: Option<&BoundingBox>,
    page_size: usize,
) -> Result<Vec<GeoFeature>, Error> {
    let mut first_query = vec![
        (String::from("f"), String::from("json")),
        (String::from("limit"), page_size.to_string()),
    ];
    if let Some(bbox) = bbox {
        first_query.push((String::from("bbox"), bbox.to_query_value()));
    }

    let mut features = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(api_url.to_string());
    let mut pages = 0;

    while let Some(url) = next.take() {
        visited.insert(url.clone());
        let query: &[(String, String)] = if pages == 0 { &first_query } else { &[] };

        let page = match fetch_page(fetcher, &url, query).await {
            Ok(page) => page,
            Err(err) if pages == 0 => return Err(err),
            Err(err) => {
                warn!(logger, "stopping paging of {} after {} pages: {}", api_url, pages, err);
                break;
            }
        };
        pages += 1;

        info!(
            logger,
            "page {} of {}: {} features", pages, api_url, page.features.len()
        );

        next = page.next_href();
        features.extend(page.features);

        if let Some(href) = next.as_ref() {
            if visited.contains(href) {
                warn!(logger, "next link points back to {}, stopping", href);
                next = None;
            }
        }
    }

    Ok(features)
}

async fn fetch_page(
    fetcher: &dyn Fetch,
    url: &str,
    query: &[(String, String)],
) -> Result<FeaturePage, Error> {
    let body = fetcher.get(url, query).await?;
    serde_json::from_slice(&body).map_err(|e| anyhow!("error parsing page {}: {}", url, e))
}
