use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use aliri_clock::{Clock, DurationSecs, System};
use aliri_token_cache::{
    jitter::RandomEarlyJitter, sources, AccessToken, AcquiredToken, TokenCache, TokenRequest,
    TokenStatus,
};
use clap::Parser;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// Number of concurrent callers requesting tokens
    #[arg(short, long, env, default_value_t = 16)]
    callers: usize,

    /// Scope sets to request; each caller picks one in turn
    #[arg(short, long, env, value_delimiter = ',', default_value = "api://orders,api://billing")]
    scopes: Vec<String>,

    /// Simulated identity provider latency, in milliseconds
    #[arg(short, long, env, default_value_t = 250)]
    latency_ms: u64,

    /// Lifetime of each issued token, in seconds
    #[arg(short = 't', long, env, default_value_t = 20)]
    token_lifetime: u64,

    /// Renew tokens once this many seconds or fewer remain
    #[arg(short, long, env, default_value_t = 5)]
    refresh_margin: u64,

    /// Spread derived refresh times earlier by up to this many seconds
    #[arg(short, long, env, default_value_t = 2)]
    jitter: u64,

    /// Make every n-th acquisition fail
    #[arg(short, long, env)]
    fail_every: Option<usize>,

    /// Seconds between request rounds
    #[arg(short, long, env, default_value_t = 1)]
    interval: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("simulated identity provider failure on acquisition {0}")]
struct SimulatedFailure(usize);

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let acquisitions = Arc::new(AtomicUsize::new(0));
    let acquirer = {
        let acquisitions = acquisitions.clone();
        let latency = Duration::from_millis(opts.latency_ms);
        let lifetime = DurationSecs(opts.token_lifetime);
        let fail_every = opts.fail_every;

        sources::from_fn(move |request: TokenRequest| {
            let n = acquisitions.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                time::sleep(latency).await;

                if fail_every.map_or(false, |every| every > 0 && n % every == 0) {
                    return Err(SimulatedFailure(n));
                }

                let token = AccessToken::new(format!("{}#{}", request.cache_key(), n));
                Ok(AcquiredToken::new(token, System.now() + lifetime))
            }
        })
    };

    let cache = Arc::new(
        TokenCache::new(acquirer, DurationSecs(opts.refresh_margin))
            .with_jitter(RandomEarlyJitter::new(DurationSecs(opts.jitter))),
    );

    let requests: Vec<TokenRequest> = opts
        .scopes
        .iter()
        .map(|scope| TokenRequest::new(scope.split_whitespace()))
        .collect();

    if requests.is_empty() {
        color_eyre::eyre::bail!("at least one scope set must be requested");
    }

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    let mut round = 0_usize;
    loop {
        interval.tick().await;
        round += 1;

        let callers: Vec<_> = (0..opts.callers)
            .map(|i| {
                let cache = cache.clone();
                let request = requests[i % requests.len()].clone();
                tokio::spawn(async move { cache.get_token(&request).await })
            })
            .collect();

        let mut served = 0_usize;
        let mut failed = 0_usize;
        for caller in callers {
            match caller.await? {
                Ok(token) => {
                    served += 1;
                    if token.token_status_with_clock(&System) != TokenStatus::Fresh {
                        tracing::debug!(
                            stale = token.stale().0,
                            expiry = token.expiry().0,
                            "served a token that is due for renewal"
                        );
                    }
                }
                Err(error) => {
                    failed += 1;
                    tracing::warn!(
                        error = (&error as &dyn std::error::Error),
                        "caller could not obtain a token"
                    );
                }
            }
        }

        tracing::info!(
            round,
            served,
            failed,
            acquisitions = acquisitions.load(Ordering::SeqCst),
            keys = cache.len(),
            "round complete"
        );
    }
}
