#[derive(Clone)]
struct AppState {
    // Single writer: every request takes this lock, which also serializes
    // the ledger's read-then-insert against concurrent posts.
    inner: Arc<Mutex<TrackerApi>>,
}

impl AppState {
    fn new(api: TrackerApi) -> Self {
        Self {
            inner: Arc::new(Mutex::new(api)),
        }
    }
}
