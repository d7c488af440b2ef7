use super::*;
use std::sync::atomic::{AtomicBool, Ordering};

fn store_with(volatile: Arc<dyn VolatileTier>, max: usize) -> ContextStore {
    ContextStore::new(Arc::new(Database::open_in_memory().unwrap()), volatile, max)
}

fn memory_store(max: usize) -> ContextStore {
    store_with(
        Arc::new(MemoryTier::new(Duration::from_secs(600), 100)),
        max,
    )
}

/// Volatile tier that fails every call while `broken` is set.
struct FlakyTier {
    inner: MemoryTier,
    broken: AtomicBool,
}

impl FlakyTier {
    fn new() -> Self {
        Self {
            inner: MemoryTier::new(Duration::from_secs(600), 100),
            broken: AtomicBool::new(true),
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            anyhow::bail!("volatile tier unavailable");
        }
        Ok(())
    }
}

impl VolatileTier for FlakyTier {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<ContextMessage>>> {
        self.check()?;
        self.inner.get(key)
    }

    fn put(&self, key: &str, window: Vec<ContextMessage>) -> anyhow::Result<()> {
        self.check()?;
        self.inner.put(key, window)
    }

    fn invalidate(&self, key: &str) -> anyhow::Result<()> {
        self.check()?;
        self.inner.invalidate(key)
    }
}

#[test]
fn test_empty_conversation_loads_empty() {
    let store = memory_store(5);
    let ctx = store.load("acme", "5511999990000").unwrap();
    assert!(ctx.messages.is_empty());
    assert_eq!(ctx.source, ContextSource::Durable);
}

#[test]
fn test_append_then_load_warm() {
    let store = memory_store(5);
    store
        .append("acme", "5511", &ContextMessage::user("Hello", Some("c-1")))
        .unwrap();
    let ctx = store.load("acme", "5511").unwrap();
    assert!(ctx.from_volatile());
    assert_eq!(ctx.messages.last().unwrap().body, "Hello");
    assert_eq!(ctx.messages.last().unwrap().role, Role::User);
}

#[test]
fn test_append_then_load_cold() {
    let store = memory_store(5);
    store
        .append("acme", "5511", &ContextMessage::user("Hello", None))
        .unwrap();
    store.flush("acme", "5511").unwrap();

    let ctx = store.load("acme", "5511").unwrap();
    assert_eq!(ctx.source, ContextSource::Durable);
    assert_eq!(ctx.messages.last().unwrap().body, "Hello");

    // The cold read repopulates the volatile tier
    assert!(store.load("acme", "5511").unwrap().from_volatile());
}

#[test]
fn test_window_keeps_last_n_in_order() {
    let store = memory_store(3);
    for i in 0..5 {
        store
            .append("acme", "5511", &ContextMessage::user(format!("m{i}"), None))
            .unwrap();
    }
    let bodies = |ctx: MergedContext| ctx.messages.into_iter().map(|m| m.body).collect::<Vec<_>>();

    assert_eq!(bodies(store.load("acme", "5511").unwrap()), ["m2", "m3", "m4"]);
    store.flush("acme", "5511").unwrap();
    assert_eq!(bodies(store.load("acme", "5511").unwrap()), ["m2", "m3", "m4"]);
}

#[test]
fn test_append_all_preserves_order() {
    let store = memory_store(5);
    store
        .append_all(
            "acme",
            "5511",
            &[
                ContextMessage::user("question", Some("c-1")),
                ContextMessage::assistant("answer", Some("c-1")),
            ],
        )
        .unwrap();
    let ctx = store.load("acme", "5511").unwrap();
    assert_eq!(ctx.messages.len(), 2);
    assert_eq!(ctx.messages[0].role, Role::User);
    assert_eq!(ctx.messages[1].role, Role::Assistant);
    assert_eq!(ctx.messages[1].correlation_id.as_deref(), Some("c-1"));
}

#[test]
fn test_conversations_isolated_by_tenant_and_recipient() {
    let store = memory_store(5);
    store
        .append("acme", "5511", &ContextMessage::user("a", None))
        .unwrap();
    store
        .append("globex", "5511", &ContextMessage::user("b", None))
        .unwrap();
    assert_eq!(store.load("acme", "5511").unwrap().messages.len(), 1);
    assert_eq!(store.load("globex", "5511").unwrap().messages[0].body, "b");
    assert!(store.load("acme", "5522").unwrap().messages.is_empty());
}

#[test]
fn test_volatile_failures_are_not_fatal() {
    let tier = Arc::new(FlakyTier::new());
    let store = store_with(tier.clone(), 5);

    store
        .append("acme", "5511", &ContextMessage::user("Hello", None))
        .unwrap();
    let ctx = store.load("acme", "5511").unwrap();
    assert_eq!(ctx.source, ContextSource::Durable);
    assert_eq!(ctx.messages[0].body, "Hello");
    assert!(store.flush("acme", "5511").is_err());

    tier.broken.store(false, Ordering::SeqCst);
    assert_eq!(store.load("acme", "5511").unwrap().source, ContextSource::Durable);
    assert_eq!(store.load("acme", "5511").unwrap().source, ContextSource::Volatile);
}

#[test]
fn test_ttl_expiry_falls_back_to_durable() {
    let store = store_with(
        Arc::new(MemoryTier::new(Duration::from_millis(50), 100)),
        5,
    );
    store
        .append("acme", "5511", &ContextMessage::user("Hello", None))
        .unwrap();
    std::thread::sleep(Duration::from_millis(120));
    let ctx = store.load("acme", "5511").unwrap();
    assert_eq!(ctx.source, ContextSource::Durable);
    assert_eq!(ctx.messages[0].body, "Hello");
}
