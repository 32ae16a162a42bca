#[cfg(not(target_arch = "wasm32"))]
use chrono::Utc;

/// Current unix time in seconds
#[cfg(target_arch = "wasm32")]
pub fn now_secs() -> u64 {
    js_sys::Date::now() as u64 / 1000
}

/// Current unix time in seconds
#[cfg(not(target_arch = "wasm32"))]
pub fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Sleep for `secs` seconds on the current runtime
pub async fn sleep_secs(secs: u64) {
    #[cfg(target_arch = "wasm32")]
    {
        gloo_timers::future::sleep(std::time::Duration::from_secs(secs)).await;
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
    }
}

/// Run `fut`, giving up after `secs` seconds. Returns `None` on timeout.
pub async fn with_timeout<F, T>(secs: u64, fut: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    #[cfg(target_arch = "wasm32")]
    {
        use futures::future::{select, Either};
        let timer = gloo_timers::future::TimeoutFuture::new((secs.saturating_mul(1000)).min(u32::MAX as u64) as u32);
        match select(Box::pin(fut), timer).await {
            Either::Left((value, _)) => Some(value),
            Either::Right(_) => None,
        }
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        tokio::time::timeout(std::time::Duration::from_secs(secs), fut)
            .await
            .ok()
    }
}
