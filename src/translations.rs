//! `bench download-translations`: fetch translation CSVs for the core apps
//! on a small worker pool.

use std::io::Read;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Deserialize;
use thiserror::Error;

use crate::bench::{BenchPaths, write_atomic};
use crate::types::AppName;

const BASE_URL: &str = "https://translate.erpnext.com/files";
const APPS: [&str; 2] = ["frappe", "erpnext"];
const WORKERS: usize = 4;

#[derive(Error, Debug)]
pub enum TranslationError {
    #[error("cannot read {path}: {source}")]
    Languages {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid language list {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Language {
    code: String,
}

/// One CSV to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub app: AppName,
    pub lang: String,
    pub url: String,
    pub dest: PathBuf,
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: Vec<Job>,
    pub failed: Vec<(Job, String)>,
}

/// Language codes from frappe's `geo/languages.json`.
pub fn languages(paths: &BenchPaths) -> Result<Vec<String>, TranslationError> {
    let path = paths.languages_json();
    let contents = std::fs::read_to_string(&path).map_err(|source| TranslationError::Languages {
        path: path.clone(),
        source,
    })?;
    let langs: Vec<Language> = serde_json::from_str(&contents)
        .map_err(|source| TranslationError::Json { path, source })?;
    Ok(langs.into_iter().map(|l| l.code).collect())
}

/// Every (app, language) pair for the core apps present in the bench.
pub fn jobs(paths: &BenchPaths, langs: &[String]) -> Vec<Job> {
    APPS.iter()
        .filter_map(|name| name.parse::<AppName>().ok())
        .filter(|app| paths.app_dir(app).is_dir())
        .flat_map(|app| {
            langs.iter().map(move |lang| Job {
                url: format!("{}/{}-{}.csv", BASE_URL, app, lang),
                dest: paths.translations_dir(&app).join(format!("{}.csv", lang)),
                app: app.clone(),
                lang: lang.clone(),
            })
        })
        .collect()
}

/// Download every job over HTTP. Failures are reported, not raised.
pub fn download(paths: &BenchPaths) -> Result<DownloadReport, TranslationError> {
    let langs = languages(paths)?;
    let agent = ureq::builder()
        .timeout(Duration::from_secs(30))
        .build();
    Ok(run_pool(jobs(paths, &langs), |url| fetch(&agent, url)))
}

fn fetch(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>, String> {
    match agent.get(url).set("User-Agent", "bench").call() {
        Ok(response) => {
            let mut body = Vec::new();
            response
                .into_reader()
                .read_to_end(&mut body)
                .map_err(|e| e.to_string())?;
            Ok(body)
        }
        Err(ureq::Error::Status(code, _)) => Err(format!("HTTP {}", code)),
        Err(ureq::Error::Transport(e)) => Err(format!("transport error: {}", e)),
    }
}

/// Run `jobs` on `WORKERS` threads, writing each body to its destination.
fn run_pool<F>(jobs: Vec<Job>, fetch: F) -> DownloadReport
where
    F: Fn(&str) -> Result<Vec<u8>, String> + Sync,
{
    let (job_tx, job_rx): (Sender<Job>, Receiver<Job>) = unbounded();
    let (done_tx, done_rx) = unbounded();
    for job in jobs {
        // Receiver is alive until the scope below ends.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    thread::scope(|scope| {
        for _ in 0..WORKERS {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let fetch = &fetch;
            scope.spawn(move || {
                for job in job_rx {
                    let result = fetch(&job.url)
                        .and_then(|body| write_atomic(&job.dest, &body).map_err(|e| e.to_string()));
                    let _ = done_tx.send((job, result));
                }
            });
        }
    });
    drop(done_tx);

    let mut report = DownloadReport::default();
    for (job, result) in done_rx {
        match result {
            Ok(()) => {
                println!("downloaded for {} {}", job.app, job.lang);
                report.downloaded.push(job);
            }
            Err(reason) => {
                log::warn!("Download failed for {} {}: {}", job.app, job.lang, reason);
                report.failed.push((job, reason));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bench_with_languages(json: &str) -> (tempfile::TempDir, BenchPaths) {
        let dir = tempdir().unwrap();
        let paths = BenchPaths::new(dir.path());
        let file = paths.languages_json();
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, json).unwrap();
        (dir, paths)
    }

    #[test]
    fn languages_reads_codes() {
        let (_dir, paths) = bench_with_languages(
            r#"[{"code": "de", "name": "Deutsch"}, {"code": "fr", "name": "Français"}]"#,
        );
        assert_eq!(languages(&paths).unwrap(), ["de", "fr"]);
    }

    #[test]
    fn languages_missing_or_invalid() {
        let dir = tempdir().unwrap();
        let paths = BenchPaths::new(dir.path());
        assert!(matches!(
            languages(&paths),
            Err(TranslationError::Languages { .. })
        ));

        let (_dir, paths) = bench_with_languages("{not json");
        assert!(matches!(languages(&paths), Err(TranslationError::Json { .. })));
    }

    #[test]
    fn jobs_cover_present_core_apps() {
        let (_dir, paths) = bench_with_languages("[]");
        let langs = vec!["de".to_string(), "fr".to_string()];

        // only frappe exists
        let jobs = jobs(&paths, &langs);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].url, "https://translate.erpnext.com/files/frappe-de.csv");
        assert_eq!(
            jobs[1].dest,
            paths
                .translations_dir(&AppName::base())
                .join("fr.csv")
        );
    }

    #[test]
    fn pool_writes_successes_and_reports_failures() {
        let (_dir, paths) = bench_with_languages("[]");
        std::fs::create_dir_all(paths.apps_dir().join("erpnext")).unwrap();
        let langs: Vec<String> = ["de", "fr", "es"].iter().map(|s| s.to_string()).collect();
        let jobs = jobs(&paths, &langs);
        assert_eq!(jobs.len(), 6);

        let report = run_pool(jobs, |url| {
            if url.ends_with("-es.csv") {
                Err("HTTP 404".to_string())
            } else {
                Ok(url.as_bytes().to_vec())
            }
        });

        assert_eq!(report.downloaded.len(), 4);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed.iter().all(|(job, _)| job.lang == "es"));

        let erpnext: AppName = "erpnext".parse().unwrap();
        let written =
            std::fs::read_to_string(paths.translations_dir(&erpnext).join("de.csv")).unwrap();
        assert_eq!(written, "https://translate.erpnext.com/files/erpnext-de.csv");
    }
}
