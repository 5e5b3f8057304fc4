use super::*;
use crate::config::{BlackholeConfig, UsenetBackend};
use crate::test_helpers::{Fixture, test_config};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;


/// Counts runs; optionally takes a while, fails or panics
#[derive(Default)]
struct Counter {
    runs: AtomicU32,
    active: AtomicU32,
    max_active: AtomicU32,
    busy_for: Option<Duration>,
    fail: bool,
    panic: bool,
}

impl Counter {
    fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobTarget for Counter {
    async fn run(&self, _ctx: &JobContext) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if let Some(busy) = self.busy_for {
            tokio::time::sleep(busy).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.panic {
            panic!("job target exploded");
        }
        if self.fail {
            return Err(crate::error::Error::Other("job target failed".into()));
        }
        Ok(())
    }
}

/// Config with NZB providers and a usenet backend so the NZB search is enabled
fn search_config() -> Config {
    let mut config = test_config();
    config.providers.nzb = true;
    config.usenet = UsenetBackend::Blackhole(BlackholeConfig {
        directory: std::env::temp_dir(),
    });
    config.jobs.search_book_minutes = 5;
    config
}

fn scheduler_for(fx: &Fixture) -> Arc<JobScheduler> {
    JobScheduler::new(
        fx.db.clone(),
        fx.dispatcher.clone(),
        fx.reconciler.clone(),
        fx.config.reader(),
        fx.event_tx.clone(),
    )
}

#[test]
fn job_names_are_stable_and_parse_back() {
    let names: Vec<&str> = JobId::ALL.iter().map(|id| id.name()).collect();
    assert_eq!(
        names,
        vec![
            "post_processor",
            "search_nzb_book",
            "search_tor_book",
            "search_rss_book",
            "search_magazines",
            "version_check",
            "author_update",
        ]
    );
    for id in JobId::ALL {
        assert_eq!(JobId::parse(id.name()), Some(id));
    }
    assert_eq!(JobId::parse("Book search"), None);
}

#[test]
fn intervals_follow_job_config() {
    let jobs = crate::config::JobsConfig::default();
    assert_eq!(JobId::PostProcessor.interval(&jobs), JobInterval::minutes(10));
    assert_eq!(JobId::SearchTorBook.interval(&jobs), JobInterval::minutes(360));
    assert_eq!(JobId::SearchRssBook.interval(&jobs), JobInterval::minutes(20));
    assert_eq!(JobId::VersionCheck.interval(&jobs), JobInterval::hours(24));
    assert_eq!(JobInterval::hours(2).as_duration(), Duration::from_secs(7200));
    assert_eq!(JobInterval::minutes(1).to_string(), "1 minute");
    assert_eq!(JobInterval::hours(6).to_string(), "6 hours");
    assert!(JobInterval::minutes(0).is_disabled());
}

#[test]
fn enable_predicates_need_provider_and_backend() {
    let bare = test_config();
    assert!(JobId::PostProcessor.is_enabled(&bare));
    assert!(JobId::VersionCheck.is_enabled(&bare));
    assert!(!JobId::SearchNzbBook.is_enabled(&bare));
    assert!(!JobId::SearchMagazines.is_enabled(&bare));

    let nzb = search_config();
    assert!(JobId::SearchNzbBook.is_enabled(&nzb));
    assert!(JobId::SearchMagazines.is_enabled(&nzb));
    assert!(!JobId::SearchTorBook.is_enabled(&nzb));
    assert!(!JobId::SearchRssBook.is_enabled(&nzb));

    let mut providers_only = test_config();
    providers_only.providers.rss = true;
    assert!(!JobId::SearchRssBook.is_enabled(&providers_only));
    assert!(!JobId::SearchMagazines.is_enabled(&providers_only));
}
