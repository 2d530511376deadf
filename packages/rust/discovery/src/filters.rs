//! Order-preserving link filters applied before batch-crawling a link collection.

use kbingest_shared::LinkRef;
use tracing::info;

use crate::{SelfLinkCheck, is_binary_url};

/// Drop links that point back at the collection document itself.
pub fn filter_self_links(
    links: Vec<LinkRef>,
    base_url: &str,
    check: &dyn SelfLinkCheck,
) -> Vec<LinkRef> {
    let before = links.len();
    let kept: Vec<LinkRef> = links
        .into_iter()
        .filter(|link| !check.is_same_resource(&link.url, base_url))
        .collect();

    let removed = before - kept.len();
    if removed > 0 {
        info!(removed, remaining = kept.len(), "filtered self-referential links");
    }
    kept
}

/// Drop links to binary files (archives, images, PDFs, ...).
pub fn filter_binary_links(links: Vec<LinkRef>) -> Vec<LinkRef> {
    let before = links.len();
    let kept: Vec<LinkRef> = links
        .into_iter()
        .filter(|link| !is_binary_url(&link.url))
        .collect();

    let removed = before - kept.len();
    if removed > 0 {
        info!(removed, remaining = kept.len(), "filtered binary file links");
    }
    kept
}
