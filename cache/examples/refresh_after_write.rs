use fibre_refresh::{CacheBuilder, CacheListener, ReloadError};
use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct ExchangeRate {
  version: usize,
  rate: f64,
}

#[derive(Debug, thiserror::Error)]
#[error("rate service unavailable")]
struct Unavailable;

struct PrintFailures;

impl CacheListener<String> for PrintFailures {
  fn on_reload_failure(&self, key: &String, error: &ReloadError) {
    println!("[Listener] Reload of '{key}' failed: {error}. Still serving the old rate.");
  }
}

fn main() {
  let calls = Arc::new(AtomicUsize::new(0));
  let service_down = Arc::new(AtomicBool::new(false));

  let cache = CacheBuilder::<String, ExchangeRate>::new()
    .loader({
      let calls = calls.clone();
      let service_down = service_down.clone();
      move |pair: &String| {
        let version = calls.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[Loader] Call {version} for '{pair}' on {:?}", thread::current().name());
        thread::sleep(Duration::from_millis(200));
        if service_down.load(Ordering::SeqCst) {
          return Err(Unavailable);
        }
        Ok(Some(ExchangeRate {
          version,
          rate: 1.08 + version as f64 / 100.0,
        }))
      }
    })
    .refresh_after_write(Duration::from_secs(1))
    .expire_after_write(Duration::from_secs(10))
    .listener(PrintFailures)
    .build()
    .expect("valid cache configuration");

  let pair = "EUR/USD".to_string();

  println!("--- Step 1: Cold load blocks the caller ---");
  let first = cache.get(&pair).expect("first load");
  println!("Received: {first:?}");

  println!("\n--- Step 2: Past refresh_after_write, the old rate comes back at once ---");
  thread::sleep(Duration::from_millis(1200));
  let stale = cache.get(&pair).expect("stale read");
  println!("Received immediately: {stale:?}");
  assert_eq!(stale.version, 1);

  println!("\n--- Step 3: The background reload lands ---");
  thread::sleep(Duration::from_millis(500));
  let refreshed = cache.get(&pair).expect("refreshed read");
  println!("Received: {refreshed:?}");
  assert_eq!(refreshed.version, 2);

  println!("\n--- Step 4: A failing reload keeps the last good value ---");
  service_down.store(true, Ordering::SeqCst);
  thread::sleep(Duration::from_millis(1200));
  cache.get(&pair).expect("stale read");
  thread::sleep(Duration::from_millis(500));
  let kept = cache.get(&pair).expect("value survives a failed reload");
  println!("Received: {kept:?}");
  assert_eq!(kept.version, 2);

  println!("\nLoader calls: {}", calls.load(Ordering::SeqCst));
}
