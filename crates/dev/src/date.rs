//! Cached `Date` header value.
//!
//! Formatting an HTTP date per response is wasteful; the value is refreshed by a
//! background task instead and cloned out cheaply.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use tokio::task::JoinHandle;

const UPDATE_INTERVAL: Duration = Duration::from_millis(800);

/// Keeps the current HTTP date. Owned by one server and stopped with it.
#[derive(Debug)]
pub struct DateService {
    current: Arc<ArcSwap<Bytes>>,
    handle: JoinHandle<()>,
}

fn now() -> Bytes {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    Bytes::from_owner(buf)
}

impl DateService {
    /// Starts the refresh task. Must be called inside a tokio runtime.
    pub fn start() -> Self {
        Self::with_update_interval(UPDATE_INTERVAL)
    }

    pub fn with_update_interval(update_interval: Duration) -> Self {
        let current = Arc::new(ArcSwap::from_pointee(now()));
        let current_arc = Arc::clone(&current);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(update_interval).await;
                current_arc.store(Arc::new(now()));
            }
        });

        DateService { current, handle }
    }

    pub fn http_date(&self) -> Option<HeaderValue> {
        HeaderValue::from_maybe_shared(self.current.load().as_ref().clone()).ok()
    }
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
