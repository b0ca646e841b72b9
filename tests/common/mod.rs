//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use orzeczenia::config::SourceSettings;
use orzeczenia::http_client::FetchPolicy;
use orzeczenia::models::Source;
use orzeczenia::proxy::ProxyManager;
use orzeczenia::repository::{SchemaEvolvingStore, SourceStore, SqlitePool};
use orzeczenia::scrapers::Orchestrator;
use orzeczenia::sources::SourceRegistry;

mod transport;

pub use transport::{RecordedRequest, Scripted, ScriptedTransport};

pub const BASE: &str = "http://courts.test";

/// A migrated in-memory store with every source's tables.
pub fn store() -> Arc<SchemaEvolvingStore> {
    let store = Arc::new(SchemaEvolvingStore::new(SqlitePool::in_memory().unwrap()));
    store.migrate(&SourceRegistry::default().schema()).unwrap();
    store
}

/// January 2024, pointed at [`BASE`], no delays.
pub fn settings(source: Source, max_retries: u32) -> SourceSettings {
    let mut settings = SourceSettings::for_source(source, BASE);
    settings.since = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    settings.to = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
    settings.request_delay = Duration::ZERO;
    settings.start_page = 1;
    settings.fetch = FetchPolicy {
        max_retries,
        retry_delay: Duration::ZERO,
        anti_bot_cooldown: Duration::ZERO,
        ..FetchPolicy::default()
    };
    settings
}

pub fn orchestrator(
    store: &Arc<SchemaEvolvingStore>,
    transport: &Arc<ScriptedTransport>,
    proxies: ProxyManager,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(SourceRegistry::default()),
        store.clone(),
        transport.clone(),
        Arc::new(proxies),
    )
}

pub fn source_store(store: &Arc<SchemaEvolvingStore>, source: Source) -> SourceStore {
    SourceStore::new(store.clone(), source)
}

/// Result grid URL of the common courts portal for January 2024.
pub fn ms_listing_url(page: u32) -> String {
    format!(
        "{BASE}/search.gridpager/{page}?t:ac=advanced/$N/$N/$N/$N/$N/$N/$N/2024-01-01/2024-01-31/$N/$N/$N/$N/$N/$N/score/descending/{page}",
    )
}

/// One grid page listing `titles`, announcing `total` results and `pages` pages.
pub fn ms_listing(titles: &[&str], total: usize, pages: u32) -> String {
    let rows: String = titles
        .iter()
        .map(|title| {
            format!(
                r#"<tr><td class="title"><h4><a href="/details/$N/{title}">{title}</a></h4><p>Cywilne</p></td></tr>"#
            )
        })
        .collect();
    let pager: String = (1..=pages).map(|p| format!("<a>{}</a>", p)).collect();
    format!(
        r#"<html><body><span class="big_number">{total}</span><table>{rows}</table>
           <div class="pagination"><div class="t-data-grid-pager">{pager}</div></div></body></html>"#
    )
}

pub const MS_DETAILS: &str = r#"<html><body><table class="single_result">
    <tr><td>Sygnatura:</td><td>I C 42/24</td></tr>
    <tr><td>Data orzeczenia:</td><td>2024-01-05</td></tr>
    <tr><td>Sąd:</td><td>Sąd Rejonowy w Gdyni</td></tr>
    <tr><td>Wydział:</td><td>I Wydział Cywilny</td></tr>
    <tr><td>Hasła tematyczne:</td><td>Zapłata</td></tr>
    <tr><td>Podstawa prawna:</td><td>Art. 471 kc</td></tr>
</table></body></html>"#;

pub const MS_JUDGMENT: &str = r#"<html><body>
    <p class="pt-Dokumenttytulorzeczenia18">WYROK</p>
    <p>oddala powództwo.</p>
    <p>UZASADNIENIE</p>
    <p>Powód nie wykazał szkody.</p>
</body></html>"#;

pub const MS_REGULATIONS: &str = r#"<html><body><table>
    <tr><td><a href="/isap/1">Ustawa z dnia 23 kwietnia 1964 r. - Kodeks cywilny</a></td></tr>
</table></body></html>"#;

/// Register the three pages of a case.
pub fn script_ms_case(transport: &ScriptedTransport, title: &str) {
    transport.on_get(&format!("{BASE}/details/$N/{title}"), 200, MS_DETAILS);
    transport.on_get(&format!("{BASE}/content/$N/{title}"), 200, MS_JUDGMENT);
    transport.on_get(&format!("{BASE}/regulations/$N/{title}"), 200, MS_REGULATIONS);
}
