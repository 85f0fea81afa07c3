use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fraudsub_common::{HeadFetcher, Header, HeaderFetcher};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DummyHeader {
    height: u64,
}

impl DummyHeader {
    pub fn new(height: u64) -> Self {
        Self { height }
    }
}

impl Header for DummyHeader {
    fn height(&self) -> u64 {
        self.height
    }
}

/// A header source for tests: headers exist at every height and the
/// network head sits wherever the test puts it.
pub struct TestHeaders {
    head_height: AtomicU64,
}

impl TestHeaders {
    pub fn new(head_height: u64) -> Arc<Self> {
        Arc::new(Self {
            head_height: AtomicU64::new(head_height),
        })
    }

    pub fn set_head(&self, height: u64) {
        self.head_height.store(height, Ordering::SeqCst);
    }

    pub fn header_fetcher(&self) -> HeaderFetcher<DummyHeader> {
        Arc::new(|height| Box::pin(async move { Ok(Arc::new(DummyHeader::new(height))) }))
    }

    pub fn head_fetcher(self: &Arc<Self>) -> HeadFetcher<DummyHeader> {
        let this = self.clone();
        Arc::new(move || {
            let head = this.head_height.load(Ordering::SeqCst);
            Box::pin(async move { Ok(Arc::new(DummyHeader::new(head))) })
        })
    }
}
