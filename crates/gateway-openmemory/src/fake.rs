use crate::{
    MemoryBackend, OpenMemoryError, SearchRequest, SearchResult, StoreRequest, StoreResult,
};
use std::sync::Mutex;

enum Canned<T> {
    Success(T),
    Connection(String),
    Api { status: u16, body: String },
    Generic(String),
}

/// In-memory stand-in for [`crate::OpenMemoryClient`] used by handler and
/// server tests. Configure one outcome per call; calls beyond the
/// configured queue panic, which surfaces unexpected extra upstream calls.
#[derive(Default)]
pub struct FakeOpenMemoryClient {
    store_queue: Mutex<Vec<Canned<StoreResult>>>,
    search_queue: Mutex<Vec<Canned<SearchResult>>>,
}

impl FakeOpenMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure_store_success(&self, memory_id: &str) {
        self.store_queue
            .lock()
            .unwrap()
            .push(Canned::Success(StoreResult {
                memory_id: memory_id.to_string(),
            }));
    }

    pub fn configure_store_connection_error(&self, message: &str) {
        self.store_queue
            .lock()
            .unwrap()
            .push(Canned::Connection(message.to_string()));
    }

    pub fn configure_store_api_error(&self, status: u16, body: &str) {
        self.store_queue.lock().unwrap().push(Canned::Api {
            status,
            body: body.to_string(),
        });
    }

    pub fn configure_store_generic_error(&self, message: &str) {
        self.store_queue
            .lock()
            .unwrap()
            .push(Canned::Generic(message.to_string()));
    }

    pub fn configure_search_success(&self, result: SearchResult) {
        self.search_queue.lock().unwrap().push(Canned::Success(result));
    }

    pub fn configure_search_connection_error(&self, message: &str) {
        self.search_queue
            .lock()
            .unwrap()
            .push(Canned::Connection(message.to_string()));
    }
}

fn resolve<T>(canned: Canned<T>) -> Result<T, OpenMemoryError> {
    match canned {
        Canned::Success(v) => Ok(v),
        Canned::Connection(msg) => Err(OpenMemoryError::Connection(msg)),
        Canned::Api { status, body } => Err(OpenMemoryError::Api { status, body }),
        Canned::Generic(msg) => Err(OpenMemoryError::Decode(msg)),
    }
}

#[async_trait::async_trait]
impl MemoryBackend for FakeOpenMemoryClient {
    async fn store(&self, _req: StoreRequest<'_>) -> Result<StoreResult, OpenMemoryError> {
        let canned = self
            .store_queue
            .lock()
            .unwrap()
            .pop()
            .expect("no canned store() outcome configured for this call");
        resolve(canned)
    }

    async fn search(&self, _req: SearchRequest<'_>) -> Result<SearchResult, OpenMemoryError> {
        let canned = self
            .search_queue
            .lock()
            .unwrap()
            .pop()
            .expect("no canned search() outcome configured for this call");
        resolve(canned)
    }
}
