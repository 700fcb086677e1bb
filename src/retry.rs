/// Retries an async request while it fails with a transient
/// [`DataSourceError`](crate::price_source::DataSourceError), backing off
/// exponentially with jitter between attempts.
macro_rules! retry_request {
    ($context:expr, $operation:expr) => {{
        const MAX_ATTEMPTS: u32 = 3;
        const BASE_DELAY_MS: u64 = 500;
        const MAX_DELAY_MS: u64 = 5_000;

        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= MAX_ATTEMPTS || !err.is_transient() => break Err(err),
                Err(err) => {
                    let delay_ms = (BASE_DELAY_MS * 2_u64.pow(attempt - 1)).min(MAX_DELAY_MS);
                    let jitter_range = delay_ms / 4;
                    let final_delay = delay_ms
                        .saturating_sub(jitter_range)
                        .saturating_add(fastrand::u64(0..=jitter_range * 2));
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}ms.",
                        attempt,
                        MAX_ATTEMPTS,
                        context_value,
                        err,
                        final_delay
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(final_delay)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_request;
