//! Tax-advisor registry: paginated search per region, plus an optional
//! pass over the advisor profile directory.
//!
//! Regions are walked in order; within a region pages are followed until
//! the "next" link is disabled. Each advisor not stored yet has its profile
//! page fetched and stored. When a profile directory is configured, every
//! advisor listed there is fetched afterwards and upserted into `profiles`
//! keyed by registration number, so reruns refresh contact details.

use std::ops::RangeInclusive;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{debug, info, warn};
use url::Url;

use super::{CrawlContext, CrawlError, Saved, SourceCrawler};
use crate::extract::html::{all_texts, css, first_text, join_values, non_empty};
use crate::http_client::FetchRequest;
use crate::models::{BatchSummary, Source};
use crate::repository::namespace::RAW;
use crate::repository::{Record, TableSchema};

/// Region ids of the search form.
pub const REGIONS: RangeInclusive<u32> = 3..=18;
/// Default advisor profile directory site.
pub const PROFILE_DIRECTORY: &str = "https://podatkibezryzyka.pl";
/// Table of directory profiles, keyed by registration number.
pub const PROFILES: &str = "profiles";
const DIRECTORY_PATH: &str = "/znajdz-doradce-wyniki-wyszukiwania";

static BACKGROUND_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"url\(['"]?([^'")]+)['"]?\)"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisorRow {
    pub url: String,
    pub title: Option<String>,
    pub info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionPage {
    pub advisors: Vec<AdvisorRow>,
    pub is_last: bool,
}

/// An advisor as listed by the profile directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub url: String,
    pub name: Option<String>,
    pub image: Option<String>,
    /// Filter classes of the list item.
    pub specialties: Vec<String>,
}

/// Fields of a directory profile page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvisorProfile {
    pub name: Option<String>,
    pub registration_number: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub twitter: Option<String>,
    pub linkedin: Option<String>,
    pub facebook: Option<String>,
    pub other_socials: Vec<String>,
    pub features: Vec<String>,
}

pub fn search_path(region: u32, page: u32) -> String {
    format!(
        "/wyszukaj-doradce-podatkowego?region={}&rodo=on&page={}",
        region, page
    )
}

pub fn parse_region_page(html: &str) -> RegionPage {
    let document = Html::parse_document(html);
    let advisors: Vec<AdvisorRow> = document
        .select(css!(".link-rows__item"))
        .filter_map(|item| {
            let anchor = if item.value().name() == "a" {
                item
            } else {
                item.select(css!("a")).next()?
            };
            let url = anchor.value().attr("href")?.trim().to_string();
            if url.is_empty() {
                return None;
            }
            Some(AdvisorRow {
                url,
                title: first_text(item, css!(".link-rows__title")),
                info: first_text(item, css!(".link-rows__info")),
            })
        })
        .collect();

    let next_disabled = document
        .select(css!(".pagination__item.pagination__item--next.is-disabled"))
        .next()
        .is_some();
    let is_last = next_disabled || advisors.is_empty();
    RegionPage { advisors, is_last }
}

fn background_image(element: ElementRef<'_>) -> Option<String> {
    let style = element.value().attr("style")?;
    BACKGROUND_URL
        .captures(style)?
        .get(1)
        .and_then(|m| non_empty(m.as_str()))
}

/// Advisors on the profile directory's result page.
pub fn parse_directory(html: &str) -> Vec<DirectoryEntry> {
    let document = Html::parse_document(html);
    document
        .select(css!("ul.mainlist > li, ul.helplist > li"))
        .filter_map(|item| {
            let anchor = item.select(css!("a")).next()?;
            let url = non_empty(anchor.value().attr("href")?)?;
            Some(DirectoryEntry {
                url,
                name: first_text(anchor, css!(".desc p strong")),
                image: anchor.select(css!(".image")).next().and_then(background_image),
                specialties: item
                    .value()
                    .classes()
                    .filter(|class| *class != "filterall")
                    .map(str::to_string)
                    .collect(),
            })
        })
        .collect()
}

pub fn parse_profile(html: &str) -> AdvisorProfile {
    let document = Html::parse_document(html);
    let Some(profile) = document.select(css!(".counselor_box")).next() else {
        return AdvisorProfile::default();
    };

    let mut parsed = AdvisorProfile {
        name: first_text(profile, css!("h2 strong")),
        registration_number: first_text(profile, css!(".section_header p"))
            .and_then(|text| non_empty(text.replace("NUMER WPISU", ""))),
        description: non_empty(
            all_texts(profile, css!(r#"div[style="text-align: justify;"] p"#)).join("\n"),
        ),
        address: first_text(profile, css!(".contact_box ul li:first-child p")),
        phone: first_text(profile, css!(".contact_box .phone a")),
        email: first_text(profile, css!(".contact_box .mail a")),
        image: profile.select(css!(".image")).next().and_then(background_image),
        features: all_texts(profile, css!(".featuress ul li p")),
        ..AdvisorProfile::default()
    };

    for link in profile.select(css!(".social ul li a")) {
        let Some(href) = link.value().attr("href").and_then(non_empty) else {
            continue;
        };
        if href.contains("linkedin.com") {
            parsed.linkedin = Some(href);
        } else if href.contains("twitter") {
            parsed.twitter = Some(href);
        } else if href.contains("facebook") {
            parsed.facebook = Some(href);
        } else {
            parsed.other_socials.push(href);
        }
    }
    parsed
}

/// `path` resolved against the directory site.
fn directory_url(base: &str, path: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(path))
        .map(String::from)
        .unwrap_or_else(|_| format!("{}{}", base, path))
}

/// The `profiles` row for a directory entry, `None` without a
/// registration number.
pub fn profile_record(
    base: &str,
    entry: &DirectoryEntry,
    profile: AdvisorProfile,
    profile_link: &str,
    status: u16,
) -> Option<Record> {
    let registration_number = profile.registration_number?;
    let specialties = if entry.specialties.is_empty() {
        profile.features
    } else {
        entry.specialties.clone()
    };
    let image = entry
        .image
        .as_deref()
        .or(profile.image.as_deref())
        .map(|path| directory_url(base, path));

    Some(
        Record::new()
            .with("registration_number", registration_number)
            .with("name", profile.name.or_else(|| entry.name.clone()))
            .with("phone", profile.phone)
            .with("email", profile.email)
            .with("address", profile.address)
            .with("image", image)
            .with("description", profile.description)
            .with("twitter", profile.twitter)
            .with("linkedin", profile.linkedin)
            .with("facebook", profile.facebook)
            .with("other_socials", join_values(&profile.other_socials))
            .with("specialties", non_empty(specialties.join(", ")))
            .with("profile_link", profile_link)
            .with("profile_status", status),
    )
}

#[derive(Debug, Default)]
pub struct KidpCrawler;

impl KidpCrawler {
    async fn store_advisor(
        &self,
        ctx: &CrawlContext,
        advisor: &AdvisorRow,
        region: u32,
        page: u32,
        page_link: &str,
    ) -> Result<Saved, CrawlError> {
        let advisor_url = ctx.url(&advisor.url);
        if ctx.known(RAW, "advisor_url", advisor_url.as_str()).await? {
            return Ok(Saved::Known);
        }
        ctx.throttle().await;
        let profile = ctx
            .fetch(
                &format!("advisor {}", advisor_url),
                FetchRequest::get(&advisor_url).no_redirects(),
            )
            .await?;
        let status = profile.status();
        let Some(profile_html) = profile.into_body() else {
            return Ok(Saved::Gone);
        };

        let record = Record::new()
            .with("advisor_url", advisor_url.as_str())
            .with("advisor_title", advisor.title.clone())
            .with("advisor_info", advisor.info.clone())
            .with("region", region)
            .with("page", page)
            .with("page_link", page_link)
            .with("page_html", profile_html)
            .with("status_code", status);
        ctx.save(RAW, record, "advisor_url").await?;
        Ok(Saved::Imported)
    }

    async fn crawl_region(
        &self,
        ctx: &CrawlContext,
        region: u32,
        summary: &mut BatchSummary,
    ) -> Result<(), CrawlError> {
        let mut page = ctx.settings.start_page.max(1);
        loop {
            let unit = format!("region {} page {}", region, page);
            let page_link = ctx.url(&search_path(region, page));
            let html = ctx
                .fetch(&unit, FetchRequest::get(&page_link))
                .await?
                .into_body()
                .ok_or_else(|| ctx.layout_error(&unit, "search page not found"))?;
            let listing = parse_region_page(&html);
            debug!("kidp {}: {} advisors", unit, listing.advisors.len());

            for advisor in &listing.advisors {
                summary.processed += 1;
                match self.store_advisor(ctx, advisor, region, page, &page_link).await {
                    Ok(saved) => saved.tally(summary),
                    Err(e) => ctx.unit_failed(&format!("advisor {}", advisor.url), e, summary)?,
                }
            }

            if listing.is_last {
                info!("kidp: region {} done after page {}", region, page);
                return Ok(());
            }
            page += 1;
            ctx.throttle().await;
        }
    }

    async fn store_profile(
        &self,
        ctx: &CrawlContext,
        base: &str,
        entry: &DirectoryEntry,
    ) -> Result<Saved, CrawlError> {
        let link = directory_url(base, &entry.url);
        let outcome = ctx
            .fetch(&format!("profile {}", link), FetchRequest::get(&link))
            .await?;
        let status = outcome.status();
        let Some(html) = outcome.into_body() else {
            return Ok(Saved::Gone);
        };
        let Some(mut record) = profile_record(base, entry, parse_profile(&html), &link, status) else {
            warn!(
                "kidp: skipping profile without registration number: {}",
                entry.name.as_deref().unwrap_or(&link)
            );
            return Ok(Saved::Gone);
        };
        record.set("profile_html", html);
        ctx.save(PROFILES, record, "registration_number").await?;
        Ok(Saved::Imported)
    }

    /// Fetch every advisor on the profile directory and upsert their profile.
    async fn crawl_profiles(
        &self,
        ctx: &CrawlContext,
        base: &str,
        summary: &mut BatchSummary,
    ) -> Result<(), CrawlError> {
        let directory = format!("{}{}", base, DIRECTORY_PATH);
        let html = ctx
            .fetch("profile directory", FetchRequest::get(&directory))
            .await?
            .into_body()
            .ok_or_else(|| ctx.layout_error("profile directory", "directory page not found"))?;
        let entries = parse_directory(&html);
        info!("kidp: {} advisors in the profile directory", entries.len());

        for entry in &entries {
            summary.processed += 1;
            ctx.throttle().await;
            match self.store_profile(ctx, base, entry).await {
                Ok(saved) => saved.tally(summary),
                Err(e) => ctx.unit_failed(&format!("profile {}", entry.url), e, summary)?,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SourceCrawler for KidpCrawler {
    fn source(&self) -> Source {
        Source::Kidp
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![
            TableSchema::new(RAW)
                .texts(&[
                    "advisor_url",
                    "advisor_title",
                    "advisor_info",
                    "page_link",
                    "page_html",
                ])
                .integers(&["region", "page", "status_code"])
                .unique(&["advisor_url"]),
            TableSchema::new(PROFILES)
                .texts(&[
                    "registration_number",
                    "name",
                    "phone",
                    "email",
                    "address",
                    "image",
                    "description",
                    "twitter",
                    "linkedin",
                    "facebook",
                    "other_socials",
                    "specialties",
                    "profile_link",
                    "profile_html",
                ])
                .integer("profile_status")
                .unique(&["registration_number"]),
        ]
    }

    async fn crawl(&self, ctx: &CrawlContext) -> Result<BatchSummary, CrawlError> {
        let mut summary = BatchSummary::default();
        let regions = ctx.settings.regions.clone();
        info!("kidp: regions {} to {}", regions.start(), regions.end());

        for region in regions {
            if let Err(e) = self.crawl_region(ctx, region, &mut summary).await {
                ctx.unit_failed(&format!("region {}", region), e, &mut summary)?;
            }
            ctx.throttle().await;
        }

        if let Some(base) = ctx.settings.profiles_url.as_deref() {
            if let Err(e) = self.crawl_profiles(ctx, base, &mut summary).await {
                ctx.unit_failed("profile directory", e, &mut summary)?;
            }
        }

        info!("kidp: crawl finished ({})", summary);
        Ok(summary)
    }
}
