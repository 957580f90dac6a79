use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hyper::body::HttpBody;
use hyper::client::HttpConnector;
use hyper::{Client, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::listing_parsing::{
    is_safe_name, is_tree_path, last_segment, parse_listing, resolve_raw_url,
};

/// Host serving the HTML directory-listing pages.
pub const LISTING_HOST: &str = "https://github.com";
/// Host serving raw, unrendered file bytes.
pub const CONTENT_HOST: &str = "https://raw.githubusercontent.com";

type HttpClient = Client<HttpsConnector<HttpConnector>>;

/// Caps the number of simultaneously live download tasks and lets the
/// traversal line block until every dispatched task has finished.
struct TaskPool {
    max_task_count: usize,
    in_flight: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    fn new(max_task_count: u16) -> Self {
        TaskPool {
            max_task_count: (max_task_count as usize).max(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `task`, stalling the caller while the pool is at capacity.
    async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = Arc::clone(&self.in_flight);
        let handle = tokio::spawn(async move {
            task.await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        let mut handles = self.handles.lock().await;
        handles.push(handle);
        while handles.len() >= self.max_task_count {
            sleep(Duration::from_millis(10)).await;

            // remove dead tasks
            handles.retain(|h| !h.is_finished());
        }
    }

    /// Blocks until every spawned task has terminated.
    async fn wait_all(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

pub struct Crawler {
    client: HttpClient,
    listing_host: String,
    content_host: String,
    pool: TaskPool,
}

impl Crawler {
    pub fn new(max_task_count: u16) -> Self {
        Self::with_hosts(
            LISTING_HOST.to_string(),
            CONTENT_HOST.to_string(),
            max_task_count,
        )
    }

    /// Listing hrefs are site-relative, so recursion URLs and raw-content
    /// URLs are composed against these hosts.
    pub fn with_hosts(listing_host: String, content_host: String, max_task_count: u16) -> Self {
        let client = Client::builder().build::<_, hyper::Body>(HttpsConnector::new());
        Crawler {
            client,
            listing_host,
            content_host,
            pool: TaskPool::new(max_task_count),
        }
    }

    /// Mirrors the remote directory tree at `url` into `path`, returning
    /// once every dispatched download has finished.
    pub async fn download_all(&self, url: &str, path: PathBuf) {
        self.crawl_dir(url.to_string(), path).await;
        self.pool.wait_all().await;
    }

    /// Processes one directory: ensures `dir` exists, fetches and scrapes
    /// its listing, recurses into subdirectories and dispatches a download
    /// task per file. A failure here abandons this subtree only.
    fn crawl_dir(&self, url: String, dir: PathBuf) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                tracing::warn!("failed to create directory {}: {e}", dir.display());
                return;
            }

            let html = match fetch(&self.client, &url).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!("failed to fetch listing {url}: {e}");
                    return;
                }
            };

            for link in parse_listing(&html) {
                if is_tree_path(&link.href) {
                    let name = last_segment(&link.href);
                    if !is_safe_name(name) {
                        tracing::warn!("skipping directory with unsafe name: {}", link.href);
                        continue;
                    }
                    let sub_url = format!("{}{}", self.listing_host, link.href);
                    self.crawl_dir(sub_url, dir.join(name)).await;
                } else {
                    let Some(content_url) = resolve_raw_url(&self.content_host, &link.href) else {
                        tracing::warn!("skipping {}: no blob segment in listing path", link.href);
                        continue;
                    };
                    if !is_safe_name(&link.title) {
                        tracing::warn!("skipping file with unsafe name: {}", link.title);
                        continue;
                    }
                    let client = self.client.clone();
                    let dir = dir.clone();
                    self.pool
                        .spawn(download_file(client, content_url, dir, link.title))
                        .await;
                }
            }
        })
    }
}

/// Downloads one file and reports the outcome. Errors are per-file; the
/// rest of the crawl is unaffected.
async fn download_file(client: HttpClient, url: String, dir: PathBuf, filename: String) {
    tracing::info!("start to download: {filename}");
    match fetch_to_file(&client, &url, &dir.join(&filename)).await {
        Ok(bytes) => tracing::info!("finish download: {filename} ({bytes} bytes)"),
        Err(e) => tracing::warn!("download of {filename} failed: {e}"),
    }
}

/// Fetches the whole body of `url`, for listing pages.
async fn fetch(client: &HttpClient, url: &str) -> Result<Vec<u8>> {
    let uri: Uri = url
        .parse()
        .with_context(|| format!("invalid url {url}"))?;
    let resp = client
        .get(uri)
        .await
        .with_context(|| format!("error while trying to fetch {url}"))?;
    match resp.status() {
        StatusCode::OK => {
            let bytes = hyper::body::to_bytes(resp)
                .await
                .with_context(|| format!("error while reading body of {url}"))?;
            Ok(bytes.to_vec())
        }
        StatusCode::NOT_FOUND => bail!("got 404 while trying to fetch {url}"),
        status => bail!("error while trying to fetch {url}: status code is {status}"),
    }
}

/// Streams the body of `url` into `dest`, returning the byte count.
///
/// `dest` is created (truncating an existing file) before the body is read;
/// on any read or write error afterwards the partial file is removed, so
/// `dest` ends up holding either the complete content or nothing.
async fn fetch_to_file(client: &HttpClient, url: &str, dest: &Path) -> Result<u64> {
    let uri: Uri = url
        .parse()
        .with_context(|| format!("invalid content url {url}"))?;
    let resp = client
        .get(uri)
        .await
        .with_context(|| format!("error while trying to download {url}"))?;
    if resp.status() != StatusCode::OK {
        bail!(
            "error while trying to download {url}: status code is {}",
            resp.status()
        );
    }

    let mut body = resp.into_body();
    let mut file = std::fs::File::create(dest)
        .with_context(|| format!("error while trying to create {}", dest.display()))?;

    let mut written = 0u64;
    while let Some(next) = body.data().await {
        let wrote = next.map_err(anyhow::Error::from).and_then(|data| {
            file.write_all(&data)?;
            Ok(data.len() as u64)
        });
        match wrote {
            Ok(len) => written += len,
            Err(e) => {
                drop(file);
                let _ = std::fs::remove_file(dest);
                return Err(e.context(format!("error while downloading {url}")));
            }
        }
    }

    Ok(written)
}
