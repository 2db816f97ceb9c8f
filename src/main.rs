// bidwatch entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not the terminal)
// 2. Load config
// 3. Open the session store
// 4. Resume the stored session or log in with configured credentials
// 5. Fetch the vehicle detail
// 6. Bring up the push channel and announce the buyer identity
// 7. Start the vehicle watcher and print updates until Ctrl+C
// 8. Cleanup on exit

use std::sync::Arc;

use anyhow::{bail, Context};
use buyer_assistant::api::ApiClient;
use buyer_assistant::app::{self, UiUpdate, VehicleWatcher};
use buyer_assistant::config;
use buyer_assistant::session::{self, SessionStore};
use buyer_assistant::socket::PushChannel;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file, not the terminal)
    init_tracing()?;
    info!("bidwatch starting up");

    let mut args = std::env::args().skip(1);
    let vehicle_id: u64 = args
        .next()
        .context("usage: bidwatch <vehicle_id> [buyer_id]")?
        .parse()
        .context("vehicle_id must be a number")?;
    let buyer_id_arg: Option<u64> = match args.next() {
        Some(raw) => Some(raw.parse().context("buyer_id must be a number")?),
        None => None,
    };

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: buyer API {}, vertical {}",
        config.api.buyer_base_url,
        config.business_vertical.as_code()
    );

    // 3. Open the session store
    let db_path = match &config.session.db_path {
        Some(path) => path.clone(),
        None => session::default_db_path()?
            .to_string_lossy()
            .into_owned(),
    };
    let session = Arc::new(SessionStore::open(&db_path).context("failed to open session store")?);
    info!("Session store opened at {db_path}");

    if let Some(id) = buyer_id_arg {
        session.set_buyer_id(id)?;
    }

    // 4. Resume the stored session or log in with configured credentials
    let api = Arc::new(ApiClient::new(&config, Arc::clone(&session))?);
    if session.access_token()?.is_none() {
        let (Some(phone), Some(password)) = (
            config.credentials.phone.as_deref(),
            config.credentials.password.as_deref(),
        ) else {
            bail!(
                "no stored session and no credentials configured; \
                 add phone/password to config/credentials.toml"
            );
        };
        api.login(phone, password)
            .await
            .context("login failed")?;
        info!("Logged in as {phone}");
    } else {
        info!("Resuming stored session");
    }

    let Some(buyer_id) = session.buyer_id()? else {
        bail!("buyer id unknown; pass it as the second argument once: bidwatch <vehicle_id> <buyer_id>");
    };

    // 5. Fetch the vehicle detail
    let vehicle = api
        .vehicle_by_id(vehicle_id)
        .await
        .context("failed to fetch vehicle")?;
    println!("Watching {} (vehicle #{vehicle_id})", vehicle.title());

    // 6. Bring up the push channel and announce the buyer identity
    let channel = PushChannel::new(config.socket.clone());
    channel.set_buyer_id(buyer_id);

    // 7. Start the vehicle watcher and print updates until Ctrl+C
    let (watcher, mut ui_rx) = VehicleWatcher::start(Arc::clone(&api), &channel, &vehicle, buyer_id);
    let view = app::view_from_vehicle(&vehicle);
    println!(
        "Status: {:?} | has bidded: {} | favorite: {}",
        view.bidding_status, view.has_bidded, view.is_favorite
    );

    loop {
        tokio::select! {
            update = ui_rx.recv() => match update {
                Some(UiUpdate::Status(view)) => {
                    println!(
                        "Status: {:?} | has bidded: {} | favorite: {}",
                        view.bidding_status, view.has_bidded, view.is_favorite
                    );
                }
                Some(UiUpdate::CountdownTick { parts, .. }) => {
                    println!("Time left: {parts}");
                }
                Some(UiUpdate::BidHistory(items)) => {
                    println!("Bid history ({} bids):", items.len());
                    for item in items {
                        println!(
                            "  {:?} bid of {} at {}",
                            item.bid_mode,
                            item.bid_amt,
                            item.created_dttm.as_deref().unwrap_or("-")
                        );
                    }
                }
                Some(UiUpdate::BidHistoryError(message)) => {
                    warn!("bid history refresh failed: {message}");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    // 8. Cleanup
    watcher.stop();
    channel.disconnect();
    info!("bidwatch shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (not the terminal, which carries the
/// status output).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("bidwatch.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("buyer_assistant=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
