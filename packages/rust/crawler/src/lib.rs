//! HTTP crawling for kbingest.
//!
//! This crate provides:
//! - [`HttpCrawler`]: reqwest-backed implementation of the crawl primitives
//!   (text file fetch, sitemap parsing, batch crawl, recursive crawl)
//! - HTML to markdown conversion of fetched pages (scraper + htmd)

pub mod engine;
mod page;
mod sitemap;

pub use engine::HttpCrawler;
